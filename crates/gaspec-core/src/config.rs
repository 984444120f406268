use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const SUPPORTED_BITS_PER_SAMPLE: u32 = 2;

pub const DEFAULT_CPU_MAX_WORK_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Vlba,
    At,
}

impl std::str::FromStr for Encoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vlba" => Ok(Encoding::Vlba),
            "at" => Ok(Encoding::At),
            _ => Err(ConfigError::UnknownEncoding(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    #[default]
    None,
    Clfft,
}

impl std::str::FromStr for Accelerator {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "cpu" => Ok(Accelerator::None),
            "clfft" | "opencl" => Ok(Accelerator::Clfft),
            _ => Err(ConfigError::UnknownAccelerator(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
    Network(u16),
}

impl std::fmt::Display for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputSource::Stdin => write!(f, "stdin"),
            InputSource::File(path) => write!(f, "file:{}", path.display()),
            InputSource::Network(port) => write!(f, "tcp:{port}"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Samples per channel ({spc}) != bins ({bins}) * batch size ({batch})")]
    SizeMismatch { spc: usize, bins: usize, batch: usize },
    #[error("{what} ({value}) is not divisible by {by}")]
    NotDivisible {
        what: &'static str,
        value: usize,
        by: usize,
    },
    #[error("Must specify at least two of: samples per channel, batch size, bins")]
    Underdetermined,
    #[error("Samples per channel ({spc}) must be at least the batch size ({batch})")]
    SpcBelowBatch { spc: usize, batch: usize },
    #[error("Samples per channel ({spc}) must be at least the number of FFT bins ({bins})")]
    SpcBelowBins { spc: usize, bins: usize },
    #[error("Batch size ({0}) must be a power of two")]
    BatchNotPowerOfTwo(usize),
    #[error("Number of FFT bins ({0}) must be even and at least 2")]
    BinsNotEven(usize),
    #[error("Number of channels must be greater than zero")]
    NoChannels,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("Encoding must be one of: vlba, at (got {0:?})")]
    UnknownEncoding(String),
    #[error("Unknown encoding: {encoding:?} with {bits} bits per sample")]
    UnsupportedEncoding { encoding: Encoding, bits: u32 },
    #[error("Accelerator must be one of: cpu, clfft (got {0:?})")]
    UnknownAccelerator(String),
    #[error("Input type has been specified multiple times")]
    MultipleInputs,
    #[error("{what} ({value}) overflows the addressable size")]
    Overflow { what: &'static str, value: usize },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    pub spc: Option<usize>,
    pub batch: Option<usize>,
    pub bins: Option<usize>,
    pub channels: Option<usize>,
    pub bits_per_sample: Option<u32>,
    pub encoding: Option<Encoding>,
    pub loops: Option<u64>,
    pub integrate: Option<u64>,
    pub accelerator: Option<Accelerator>,
    pub platform: Option<usize>,
    pub device: Option<usize>,
    pub max_work_size: Option<usize>,
    pub kernel_dir: Option<PathBuf>,
    pub stdin: bool,
    pub file: Option<PathBuf>,
    pub port: Option<u16>,
}

impl Options {
    // Overlays every field set in `other` on top of `self`.
    pub fn merge(mut self, other: Options) -> Options {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            spc,
            batch,
            bins,
            channels,
            bits_per_sample,
            encoding,
            loops,
            integrate,
            accelerator,
            platform,
            device,
            max_work_size,
            kernel_dir
        );
        // An input chosen by the overlay replaces the base input entirely.
        if other.stdin || other.file.is_some() || other.port.is_some() {
            self.stdin = other.stdin;
            self.file = other.file;
            self.port = other.port;
        }
        self
    }

    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let input = self.resolve_input()?;
        let (spc, batch, bins) = resolve_geometry(self.spc, self.batch, self.bins)?;

        if spc < batch {
            return Err(ConfigError::SpcBelowBatch { spc, batch });
        }
        if spc < bins {
            return Err(ConfigError::SpcBelowBins { spc, bins });
        }
        if !batch.is_power_of_two() {
            return Err(ConfigError::BatchNotPowerOfTwo(batch));
        }
        if bins < 2 || bins % 2 != 0 {
            return Err(ConfigError::BinsNotEven(bins));
        }

        let channels = self.channels.unwrap_or(0);
        if channels == 0 {
            return Err(ConfigError::NoChannels);
        }

        let bits_per_sample = self.bits_per_sample.unwrap_or(SUPPORTED_BITS_PER_SAMPLE);
        let encoding = self.encoding.unwrap_or_default();
        if bits_per_sample != SUPPORTED_BITS_PER_SAMPLE {
            return Err(ConfigError::UnsupportedEncoding {
                encoding,
                bits: bits_per_sample,
            });
        }

        let n = spc.checked_mul(channels).ok_or(ConfigError::Overflow {
            what: "samples per loop",
            value: spc,
        })?;
        // Whole bytes only; 2-bit samples pack four to a byte.
        let bits = n
            .checked_mul(bits_per_sample as usize)
            .ok_or(ConfigError::Overflow {
                what: "bits per loop",
                value: n,
            })?;
        if bits % 8 != 0 {
            return Err(ConfigError::NotDivisible {
                what: "bits per loop",
                value: bits,
                by: 8,
            });
        }

        if self.max_work_size == Some(0) {
            return Err(ConfigError::Zero("Maximum work size"));
        }

        Ok(Settings {
            spc,
            batch,
            bins,
            channels,
            bits_per_sample,
            encoding,
            loops: self.loops.unwrap_or(0),
            integrate: self.integrate.unwrap_or(0),
            accelerator: self.accelerator.unwrap_or_default(),
            platform: self.platform,
            device: self.device,
            max_work_size: self.max_work_size,
            kernel_dir: self.kernel_dir.clone(),
            input,
        })
    }

    fn resolve_input(&self) -> Result<InputSource, ConfigError> {
        let given = [self.stdin, self.file.is_some(), self.port.is_some()]
            .into_iter()
            .filter(|set| *set)
            .count();
        if given > 1 {
            return Err(ConfigError::MultipleInputs);
        }
        Ok(match (&self.file, self.port) {
            (Some(path), _) => InputSource::File(path.clone()),
            (None, Some(port)) => InputSource::Network(port),
            (None, None) => InputSource::Stdin,
        })
    }
}

fn resolve_geometry(
    spc: Option<usize>,
    batch: Option<usize>,
    bins: Option<usize>,
) -> Result<(usize, usize, usize), ConfigError> {
    let spc = spc.filter(|v| *v > 0);
    let batch = batch.filter(|v| *v > 0);
    let bins = bins.filter(|v| *v > 0);

    match (spc, batch, bins) {
        (Some(spc), Some(batch), Some(bins)) => {
            if bins.checked_mul(batch) != Some(spc) {
                return Err(ConfigError::SizeMismatch { spc, bins, batch });
            }
            Ok((spc, batch, bins))
        }
        (None, Some(batch), Some(bins)) => {
            let spc = bins.checked_mul(batch).ok_or(ConfigError::Overflow {
                what: "samples per channel",
                value: bins,
            })?;
            Ok((spc, batch, bins))
        }
        (Some(spc), None, Some(bins)) => {
            if spc % bins != 0 {
                return Err(ConfigError::NotDivisible {
                    what: "samples per channel",
                    value: spc,
                    by: bins,
                });
            }
            Ok((spc, spc / bins, bins))
        }
        (Some(spc), Some(batch), None) => {
            if spc % batch != 0 {
                return Err(ConfigError::NotDivisible {
                    what: "samples per channel",
                    value: spc,
                    by: batch,
                });
            }
            Ok((spc, batch, spc / batch))
        }
        _ => Err(ConfigError::Underdetermined),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    spc: usize,
    batch: usize,
    bins: usize,
    channels: usize,
    bits_per_sample: u32,
    encoding: Encoding,
    loops: u64,
    integrate: u64,
    accelerator: Accelerator,
    platform: Option<usize>,
    device: Option<usize>,
    max_work_size: Option<usize>,
    kernel_dir: Option<PathBuf>,
    input: InputSource,
}

impl Settings {
    pub fn spc(&self) -> usize {
        self.spc
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn bits_per_sample(&self) -> u32 {
        self.bits_per_sample
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    // 0 runs until the input is exhausted.
    pub fn loops(&self) -> u64 {
        self.loops
    }

    // Loops per emitted integration window; 0 emits once at the end.
    pub fn integrate(&self) -> u64 {
        self.integrate
    }

    pub fn accelerator(&self) -> Accelerator {
        self.accelerator
    }

    pub fn platform(&self) -> Option<usize> {
        self.platform
    }

    pub fn device(&self) -> Option<usize> {
        self.device
    }

    // Work-group cap requested by the user; devices fall back to their own.
    pub fn max_work_size(&self) -> Option<usize> {
        self.max_work_size
    }

    pub fn kernel_dir(&self) -> Option<&Path> {
        self.kernel_dir.as_deref()
    }

    pub fn input(&self) -> &InputSource {
        &self.input
    }

    pub fn n(&self) -> usize {
        self.spc * self.channels
    }

    // Raw bytes consumed per loop.
    pub fn bytes(&self) -> usize {
        self.n() * self.bits_per_sample as usize / 8
    }

    pub fn half_bins(&self) -> usize {
        self.bins / 2
    }

    pub fn out_len(&self) -> usize {
        self.half_bins() * self.channels
    }

    pub fn transforms(&self) -> usize {
        self.channels * self.batch
    }
}
