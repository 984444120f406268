//! 2-bit sample unpacking.
//!
//! Packed input is time-major with channels interleaved: symbol `s = t *
//! channels + c` holds sample `t` of channel `c`, four symbols per byte,
//! least significant bit pair first. Unpacking writes the channel-major
//! working layout `data[c * spc + t]` with a zero imaginary part.

use crate::config::{ConfigError, Encoding};
use num_complex::Complex32;

pub const HI_MAG: f32 = 3.3359;

pub type Lut = [f32; 4];

pub fn lut_for(encoding: Encoding, bits_per_sample: u32) -> Result<Lut, ConfigError> {
    match (encoding, bits_per_sample) {
        (Encoding::Vlba, 2) => Ok([-HI_MAG, 1.0, -1.0, HI_MAG]),
        (Encoding::At, 2) => Ok([1.0, -1.0, HI_MAG, -HI_MAG]),
        (encoding, bits) => Err(ConfigError::UnsupportedEncoding { encoding, bits }),
    }
}

#[inline]
pub fn symbol_at(input: &[u8], index: usize) -> u8 {
    (input[index >> 2] >> ((index & 3) * 2)) & 0b11
}

// `data` is the whole working buffer (`spc * channels` elements); only the
// samples of `range` are written so callers can split the work into groups.
pub fn unpack_2bit_range(
    input: &[u8],
    data: &mut [Complex32],
    lut: &Lut,
    spc: usize,
    channels: usize,
    range: std::ops::Range<usize>,
) {
    debug_assert!(range.end <= spc);
    debug_assert!(data.len() >= spc * channels);
    debug_assert!(input.len() * 4 >= spc * channels);
    for t in range {
        let base = t * channels;
        for c in 0..channels {
            let sym = symbol_at(input, base + c);
            data[c * spc + t] = Complex32::new(lut[sym as usize], 0.0);
        }
    }
}

pub fn unpack_2bit(input: &[u8], data: &mut [Complex32], lut: &Lut, spc: usize, channels: usize) {
    unpack_2bit_range(input, data, lut, spc, channels, 0..spc);
}
