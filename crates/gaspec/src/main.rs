use anyhow::Context;
use clap::Parser;
use gaspec_core::config::{Accelerator, ConfigError, Encoding, Options};
use gaspec_core::device::{list_devices, open_device};
use gaspec_core::input::open_source;
use gaspec_core::output::TextSink;
use gaspec_core::timing::StageTimings;
use gaspec_core::Pipeline;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gaspec", version, about = "Streaming 2-bit spectrometer")]
struct Cli {
    /// Input file (same as --file).
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Read samples from standard input (the default).
    #[arg(long)]
    stdin: bool,

    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Listen on this TCP port and read samples from the first sender.
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// OpenCL device index. Without it, devices are listed.
    #[arg(short = 'd', long)]
    device: Option<usize>,

    #[arg(long)]
    platform: Option<usize>,

    /// Samples per channel per loop.
    #[arg(short = 'a', long)]
    spc: Option<usize>,

    /// FFTs per channel per loop; must be a power of two.
    #[arg(short = 'b', long = "batchsize")]
    batch: Option<usize>,

    /// FFT length.
    #[arg(short = 'n', long)]
    bins: Option<usize>,

    /// Loops to run; 0 runs until the input ends.
    #[arg(short = 'g', long)]
    loops: Option<u64>,

    /// Sample encoding: vlba or at.
    #[arg(short = 'e', long)]
    encoding: Option<Encoding>,

    #[arg(short = 'c', long)]
    channels: Option<usize>,

    /// Compute backend: cpu or clfft.
    #[arg(long)]
    accelerator: Option<Accelerator>,

    #[arg(long)]
    max_work_size: Option<usize>,

    /// Directory with .cl sources overriding the built-in kernels.
    #[arg(long)]
    kernel_dir: Option<PathBuf>,

    /// Emit and reset the accumulated spectrum every N loops.
    #[arg(long, value_name = "LOOPS")]
    integrate: Option<u64>,

    #[arg(long)]
    list_devices: bool,

    /// TOML file with defaults; command-line flags take precedence.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Cli {
    fn options(&self) -> Result<Options, ConfigError> {
        if self.input.is_some() && self.file.is_some() {
            return Err(ConfigError::MultipleInputs);
        }
        Ok(Options {
            spc: self.spc,
            batch: self.batch,
            bins: self.bins,
            channels: self.channels,
            bits_per_sample: None,
            encoding: self.encoding,
            loops: self.loops,
            integrate: self.integrate,
            accelerator: self.accelerator,
            platform: self.platform,
            device: self.device,
            max_work_size: self.max_work_size,
            kernel_dir: self.kernel_dir.clone(),
            stdin: self.stdin,
            file: self.file.clone().or_else(|| self.input.clone()),
            port: self.port,
        })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> anyhow::Result<Options> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))
}

fn print_devices(accelerator: Accelerator) -> anyhow::Result<()> {
    let devices = list_devices(accelerator)?;
    if devices.is_empty() {
        tracing::warn!("no compute devices found");
    }
    for d in devices {
        println!(
            "platform {} ({}) device {}: {} [max work size {}]",
            d.platform_index, d.platform, d.device_index, d.name, d.max_work_size
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let base = match &cli.config {
        Some(path) => load_config(path)?,
        None => Options::default(),
    };
    let options = base.merge(cli.options()?);

    let accelerator = options.accelerator.unwrap_or_default();
    if cli.list_devices || (accelerator == Accelerator::Clfft && options.device.is_none()) {
        return print_devices(accelerator);
    }

    let settings = options.resolve()?;
    tracing::info!(
        input = %settings.input(),
        accelerator = ?settings.accelerator(),
        loops = settings.loops(),
        integrate = settings.integrate(),
        "starting"
    );

    let device = open_device(&settings)?;
    let group_len = settings.half_bins();
    let input = settings.input().clone();
    let mut pipeline = Pipeline::new(settings, device)?;
    let mut source = open_source(&input)?;

    let stdout = std::io::stdout();
    let mut sink = TextSink::new(BufWriter::new(stdout.lock()), group_len);
    let mut timings = StageTimings::default();
    let summary = pipeline.run(&mut source, &mut sink, &mut timings)?;
    timings.log_summary(summary.loops);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn short_flags_map_to_options() {
        let cli = Cli::try_parse_from([
            "gaspec", "-n", "1024", "-b", "8", "-c", "4", "-e", "AT", "-g", "10", "capture.bin",
        ])
        .unwrap();
        let settings = cli.options().unwrap().resolve().unwrap();
        assert_eq!(settings.spc(), 8192);
        assert_eq!(settings.channels(), 4);
        assert_eq!(settings.encoding(), Encoding::At);
        assert_eq!(settings.loops(), 10);
        assert_eq!(
            settings.input(),
            &gaspec_core::config::InputSource::File(PathBuf::from("capture.bin"))
        );
    }

    #[test]
    fn positional_and_file_together_are_rejected() {
        let cli = Cli::try_parse_from(["gaspec", "--file", "a.bin", "b.bin"]).unwrap();
        assert_eq!(cli.options().unwrap_err(), ConfigError::MultipleInputs);
    }

    #[test]
    fn unknown_encoding_is_a_parse_error() {
        assert!(Cli::try_parse_from(["gaspec", "-e", "mark5"]).is_err());
    }

    #[test]
    fn config_file_fields_deserialize() {
        let options: Options = toml::from_str(
            r#"
            bins = 256
            batch = 4
            channels = 2
            encoding = "at"
            accelerator = "clfft"
            integrate = 16
            "#,
        )
        .unwrap();
        assert_eq!(options.bins, Some(256));
        assert_eq!(options.encoding, Some(Encoding::At));
        assert_eq!(options.accelerator, Some(Accelerator::Clfft));
        assert_eq!(options.integrate, Some(16));
    }
}
