use num_complex::Complex32;
use rustfft::{Fft as RustFft, FftPlanner};
use std::sync::Arc;

pub struct BatchedFft {
    len: usize,
    fft: Arc<dyn RustFft<f32>>,
    scratch: Vec<Complex32>,
}

impl BatchedFft {
    pub fn new(len: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(len > 0, "fft length must be > 0");
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(len);
        let scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Ok(Self { len, fft, scratch })
    }

    pub fn process_batch(&mut self, data: &mut [Complex32]) -> anyhow::Result<()> {
        anyhow::ensure!(
            data.len() % self.len == 0,
            "fft batch length {} is not a multiple of {}",
            data.len(),
            self.len
        );
        if data.is_empty() {
            return Ok(());
        }
        self.fft.process_with_scratch(data, &mut self.scratch);
        Ok(())
    }
}
