pub mod config;
pub mod device;
pub mod dsp;
pub mod input;
pub mod kernels;
pub mod output;
pub mod pipeline;
pub mod timing;

pub use config::{ConfigError, Options, Settings};
pub use pipeline::{Pipeline, RunEnd, RunSummary};
