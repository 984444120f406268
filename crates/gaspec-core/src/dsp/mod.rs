pub mod fft;
pub mod reduce;
pub mod spectrum;
pub mod unpack;
