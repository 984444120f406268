use num_complex::Complex32;
use std::io::Write;

#[derive(Debug, Clone, PartialEq)]
pub struct IntegratedSpectrum {
    pub first_loop: u64,
    pub loops: u64,
    // `bins / 2 * channels` elements, bin-major.
    pub data: Vec<Complex32>,
}

pub trait SpectrumSink {
    fn emit(&mut self, spectrum: &IntegratedSpectrum) -> anyhow::Result<()>;
}

impl SpectrumSink for Vec<IntegratedSpectrum> {
    fn emit(&mut self, spectrum: &IntegratedSpectrum) -> anyhow::Result<()> {
        self.push(spectrum.clone());
        Ok(())
    }
}

// Plain-text output: one power value per line, a blank line before every
// group of `group_len` values.
pub struct TextSink<W> {
    out: W,
    group_len: usize,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W, group_len: usize) -> Self {
        Self {
            out,
            group_len: group_len.max(1),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub fn write_spectrum<W: Write>(
    out: &mut W,
    spectrum: &[Complex32],
    group_len: usize,
) -> std::io::Result<()> {
    let group_len = group_len.max(1);
    for (i, v) in spectrum.iter().enumerate() {
        if i % group_len == 0 {
            writeln!(out)?;
        }
        writeln!(out, "{:.6}", v.re)?;
    }
    Ok(())
}

impl<W: Write> SpectrumSink for TextSink<W> {
    fn emit(&mut self, spectrum: &IntegratedSpectrum) -> anyhow::Result<()> {
        write_spectrum(&mut self.out, &spectrum.data, self.group_len)?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_marker_every_half_bins() {
        // bins = 8, channels = 2
        let data: Vec<Complex32> = (0..8).map(|i| Complex32::new(i as f32, 0.0)).collect();
        let mut sink = TextSink::new(Vec::new(), 8 / 2);
        sink.emit(&IntegratedSpectrum {
            first_loop: 0,
            loops: 1,
            data,
        })
        .unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();

        let groups: Vec<Vec<&str>> = text
            .split("\n\n")
            .map(|g| g.lines().filter(|l| !l.is_empty()).collect())
            .filter(|g: &Vec<&str>| !g.is_empty())
            .collect();
        assert_eq!(groups.len(), 2, "{text:?}");
        assert_eq!(groups[0], vec!["0.000000", "1.000000", "2.000000", "3.000000"]);
        assert_eq!(groups[1], vec!["4.000000", "5.000000", "6.000000", "7.000000"]);
        assert_eq!(text.lines().filter(|l| l.is_empty()).count(), 2);
    }

    #[test]
    fn empty_spectrum_writes_nothing() {
        let mut out = Vec::new();
        write_spectrum(&mut out, &[], 4).unwrap();
        assert!(out.is_empty());
    }
}
