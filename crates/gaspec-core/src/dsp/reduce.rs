//! Power detection and binary-tree integration.
//!
//! The working buffer holds `batch` sub-integrations of `bins` points per
//! channel (`data[c * spc + k * bins + j]`). Each tree level folds the upper
//! half of the live sub-integrations onto the lower half, so after
//! `log2(batch)` levels sub-integration 0 of every channel holds the sum.

use num_complex::Complex32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionLevel {
    pub index: usize,
    // Offset, in sub-integrations, of the half being folded in.
    pub b: usize,
    pub length: usize,
    pub depends_on: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReductionPlan {
    pub bins: usize,
    pub spc: usize,
    pub levels: Vec<ReductionLevel>,
}

impl ReductionPlan {
    pub fn new(spc: usize, bins: usize, batch: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(
            bins > 0 && batch > 0 && spc == bins * batch,
            "reduction geometry spc={spc} bins={bins} batch={batch} is inconsistent"
        );
        anyhow::ensure!(batch.is_power_of_two(), "batch {batch} is not a power of two");

        let mut levels = Vec::with_capacity(batch.trailing_zeros() as usize);
        let mut length = spc;
        let mut b = batch >> 1;
        while b > 0 {
            length /= 2;
            let index = levels.len();
            levels.push(ReductionLevel {
                index,
                b,
                length,
                depends_on: index.checked_sub(1),
            });
            b >>= 1;
        }
        Ok(Self { bins, spc, levels })
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

pub fn magnitude_inplace(data: &mut [Complex32]) {
    for v in data.iter_mut() {
        *v = Complex32::new(v.norm_sqr(), 0.0);
    }
}

pub fn sum_level_range(
    data: &mut [Complex32],
    channels: usize,
    spc: usize,
    bins: usize,
    b: usize,
    range: std::ops::Range<usize>,
) {
    let offset = b * bins;
    debug_assert!(range.end <= offset);
    for c in 0..channels {
        let base = c * spc;
        for i in range.clone() {
            let upper = data[base + i + offset];
            data[base + i] += upper;
        }
    }
}

pub fn sum_level(data: &mut [Complex32], channels: usize, level: &ReductionLevel, plan: &ReductionPlan) {
    sum_level_range(data, channels, plan.spc, plan.bins, level.b, 0..level.length);
}

pub fn power_and_reduce(data: &mut [Complex32], channels: usize, plan: &ReductionPlan) {
    magnitude_inplace(data);
    for level in &plan.levels {
        sum_level(data, channels, level, plan);
    }
}

// Output index of bin `j` of channel `c`: bin-major, channel-minor.
#[inline]
pub fn reorder_index(j: usize, c: usize, channels: usize) -> usize {
    j * channels + c
}

pub fn reorder_range(
    data: &[Complex32],
    out: &mut [Complex32],
    channels: usize,
    spc: usize,
    range: std::ops::Range<usize>,
) {
    for i in range {
        let j = i / channels;
        let c = i % channels;
        out[i] = data[c * spc + j];
    }
}

pub fn reorder_half_spectrum(
    data: &[Complex32],
    out: &mut [Complex32],
    channels: usize,
    spc: usize,
    bins: usize,
) {
    let out_len = bins / 2 * channels;
    debug_assert!(out.len() >= out_len);
    reorder_range(data, out, channels, spc, 0..out_len);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f32) -> Complex32 {
        Complex32::new(re, 0.0)
    }

    #[test]
    fn batch_of_two_has_one_level() {
        let plan = ReductionPlan::new(8, 4, 2).unwrap();
        assert_eq!(
            plan.levels,
            vec![ReductionLevel {
                index: 0,
                b: 1,
                length: 4,
                depends_on: None
            }]
        );
    }

    #[test]
    fn batch_of_one_has_no_levels() {
        let plan = ReductionPlan::new(16, 16, 1).unwrap();
        assert_eq!(plan.depth(), 0);
    }

    #[test]
    fn levels_halve_and_chain() {
        let plan = ReductionPlan::new(64, 8, 8).unwrap();
        let bs: Vec<usize> = plan.levels.iter().map(|l| l.b).collect();
        let lengths: Vec<usize> = plan.levels.iter().map(|l| l.length).collect();
        let deps: Vec<Option<usize>> = plan.levels.iter().map(|l| l.depends_on).collect();
        assert_eq!(bs, vec![4, 2, 1]);
        assert_eq!(lengths, vec![32, 16, 8]);
        assert_eq!(deps, vec![None, Some(0), Some(1)]);
        for l in &plan.levels {
            assert_eq!(l.length, l.b * plan.bins);
        }
    }

    #[test]
    fn inconsistent_geometry_is_rejected() {
        assert!(ReductionPlan::new(10, 4, 2).is_err());
        assert!(ReductionPlan::new(12, 4, 3).is_err());
    }

    #[test]
    fn magnitude_is_norm_squared() {
        let mut data = vec![Complex32::new(3.0, 4.0), Complex32::new(-1.0, 0.5)];
        magnitude_inplace(&mut data);
        assert_eq!(data[0], c(25.0));
        assert_eq!(data[1], c(1.25));
    }

    #[test]
    fn tree_sum_order_matches_pairwise_folding() {
        // One channel, bins = 1, batch = 4: ((s0 + s2) + (s1 + s3)).
        let plan = ReductionPlan::new(4, 1, 4).unwrap();
        let mut data = vec![c(1.0e8), c(1.0), c(-1.0e8), c(1.0)];
        for level in &plan.levels {
            sum_level(&mut data, 1, level, &plan);
        }
        let expected = (1.0e8f32 + -1.0e8) + (1.0f32 + 1.0);
        assert_eq!(data[0].re, expected);
    }

    #[test]
    fn channels_keep_their_identity() {
        let plan = ReductionPlan::new(8, 4, 2).unwrap();
        let channels = 2;
        // channel 0 bins 0..4 then 10..14, channel 1 bins 100.. and 1000..
        let mut data: Vec<Complex32> = (0..4)
            .map(|j| c(j as f32))
            .chain((0..4).map(|j| c(10.0 + j as f32)))
            .chain((0..4).map(|j| c(100.0 + j as f32)))
            .chain((0..4).map(|j| c(1000.0 + j as f32)))
            .collect();
        for level in &plan.levels {
            sum_level(&mut data, channels, level, &plan);
        }
        for j in 0..4 {
            assert_eq!(data[j].re, 10.0 + 2.0 * j as f32);
            assert_eq!(data[8 + j].re, 1100.0 + 2.0 * j as f32);
        }
    }

    #[test]
    fn reorder_is_bin_major_and_drops_upper_half() {
        let channels = 2;
        let spc = 8;
        let bins = 8;
        let data: Vec<Complex32> = (0..spc * channels).map(|i| c(i as f32)).collect();
        let mut out = vec![c(-1.0); bins / 2 * channels];
        reorder_half_spectrum(&data, &mut out, channels, spc, bins);
        let got: Vec<f32> = out.iter().map(|v| v.re).collect();
        assert_eq!(got, vec![0.0, 8.0, 1.0, 9.0, 2.0, 10.0, 3.0, 11.0]);
        assert_eq!(reorder_index(3, 1, channels), 7);
    }

    #[test]
    fn single_integration_reorders_without_reduction() {
        let plan = ReductionPlan::new(4, 4, 1).unwrap();
        let mut data = vec![Complex32::new(1.0, 1.0); 4];
        power_and_reduce(&mut data, 1, &plan);
        let mut out = vec![Complex32::default(); 2];
        reorder_half_spectrum(&data, &mut out, 1, 4, 4);
        assert_eq!(out, vec![c(2.0), c(2.0)]);
    }
}
