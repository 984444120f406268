use crate::config::InputSource;
use anyhow::Context;
use std::io::{ErrorKind, Read};
use std::net::{Ipv4Addr, TcpListener, TcpStream};

pub trait SampleSource {
    // Fills `buf` and returns its length, or returns fewer bytes only when
    // the stream has ended.
    fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize>;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        (**self).read(buf)
    }
}

pub struct ReaderSource<R> {
    inner: R,
    label: String,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(inner: R, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
        }
    }
}

impl<R: Read> SampleSource for ReaderSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).with_context(|| format!("read from {}", self.label)),
            }
        }
        Ok(filled)
    }
}

// Network input: listen on a port and stream from the first sender.
pub struct SampleListener {
    listener: TcpListener,
}

impl SampleListener {
    pub fn bind(port: u16) -> anyhow::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .with_context(|| format!("bind TCP port {port}"))?;
        Ok(Self { listener })
    }

    pub fn port(&self) -> anyhow::Result<u16> {
        Ok(self.listener.local_addr().context("listener address")?.port())
    }

    pub fn accept(self) -> anyhow::Result<ReaderSource<TcpStream>> {
        tracing::info!(port = self.port()?, "waiting for sample stream connection");
        let (stream, peer) = self.listener.accept().context("accept sample stream")?;
        tracing::info!(%peer, "sample stream connected");
        Ok(ReaderSource::new(stream, format!("tcp:{peer}")))
    }
}

pub fn open_source(input: &InputSource) -> anyhow::Result<Box<dyn SampleSource>> {
    match input {
        InputSource::Stdin => Ok(Box::new(ReaderSource::new(std::io::stdin().lock(), "stdin"))),
        InputSource::File(path) => {
            let file = std::fs::File::open(path).with_context(|| format!("{}", path.display()))?;
            tracing::info!(path = %path.display(), "reading samples from file");
            Ok(Box::new(ReaderSource::new(
                std::io::BufReader::new(file),
                path.display().to_string(),
            )))
        }
        InputSource::Network(port) => Ok(Box::new(SampleListener::bind(*port)?.accept()?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hands out at most `step` bytes per read and injects interrupts.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
        interrupt_next: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.interrupt_next {
                self.interrupt_next = false;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.interrupt_next = true;
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn fills_buffer_across_partial_reads() {
        let data: Vec<u8> = (0..20).collect();
        let mut src = ReaderSource::new(
            Trickle {
                data: data.clone(),
                pos: 0,
                step: 3,
                interrupt_next: false,
            },
            "trickle",
        );
        let mut buf = [0u8; 8];
        assert_eq!(src.read(&mut buf).unwrap(), 8);
        assert_eq!(&buf, &data[..8]);
        assert_eq!(src.read(&mut buf).unwrap(), 8);
        assert_eq!(&buf, &data[8..16]);
        // Short read only at end of stream.
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert_eq!(src.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn network_input_streams_from_first_sender() {
        let listener = SampleListener::bind(0).unwrap();
        let port = listener.port().unwrap();
        let sender = std::thread::spawn(move || {
            use std::io::Write;
            let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
            stream.write_all(&[1, 2, 3, 4, 5]).unwrap();
        });

        let mut src = listener.accept().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        // Sender closes after the fifth byte.
        assert_eq!(src.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 5);
        assert_eq!(src.read(&mut buf).unwrap(), 0);
        sender.join().unwrap();
    }

    #[test]
    fn missing_file_names_the_path() {
        let path = std::path::PathBuf::from("/nonexistent/gaspec-input.bin");
        let err = match open_source(&InputSource::File(path)) {
            Ok(_) => panic!("opened a missing file"),
            Err(e) => e,
        };
        assert!(format!("{err:#}").contains("gaspec-input.bin"), "{err:#}");
    }
}
