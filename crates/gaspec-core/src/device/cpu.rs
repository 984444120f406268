use super::{effective_work_size, ComputeDevice, DeviceInfo, SpectrumSlot, WorkSize};
use crate::config::{Settings, DEFAULT_CPU_MAX_WORK_SIZE};
use crate::dsp::{fft::BatchedFft, reduce, spectrum, unpack};
use anyhow::Context;
use num_complex::Complex32;

// Host-memory device. Dispatches are split into work groups of the same
// width a GPU would use and run to completion before the call returns.
pub struct CpuDevice {
    info: DeviceInfo,
    spc: usize,
    bins: usize,
    channels: usize,
    input: Vec<u8>,
    data: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    output: Vec<Complex32>,
    fft: BatchedFft,
}

impl CpuDevice {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let info = Self::describe(effective_work_size(
            settings.max_work_size(),
            DEFAULT_CPU_MAX_WORK_SIZE,
        ));
        let fft = BatchedFft::new(settings.bins()).context("plan CPU FFT")?;
        tracing::info!(
            device = %info.name,
            max_work_size = info.max_work_size,
            fft_size = settings.bins(),
            transforms = settings.transforms(),
            "CPU device enabled"
        );
        Ok(Self {
            info,
            spc: settings.spc(),
            bins: settings.bins(),
            channels: settings.channels(),
            input: vec![0u8; settings.bytes()],
            data: vec![Complex32::new(0.0, 0.0); settings.n()],
            spectrum: vec![Complex32::new(0.0, 0.0); settings.out_len()],
            output: vec![Complex32::new(0.0, 0.0); settings.out_len()],
            fft,
        })
    }

    pub fn describe(max_work_size: usize) -> DeviceInfo {
        DeviceInfo {
            platform_index: 0,
            device_index: 0,
            platform: "host".to_string(),
            name: "cpu".to_string(),
            max_work_size,
        }
    }

    fn work(&self, items: usize) -> WorkSize {
        WorkSize::new(items, self.info.max_work_size)
    }

    fn slot_mut(&mut self, slot: SpectrumSlot) -> &mut [Complex32] {
        match slot {
            SpectrumSlot::Spectrum => &mut self.spectrum,
            SpectrumSlot::Output => &mut self.output,
        }
    }
}

impl ComputeDevice for CpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn upload(&mut self, raw: &[u8]) -> anyhow::Result<()> {
        anyhow::ensure!(
            raw.len() == self.input.len(),
            "upload length mismatch: {} != {}",
            raw.len(),
            self.input.len()
        );
        self.input.copy_from_slice(raw);
        Ok(())
    }

    fn unpack(&mut self, lut: &unpack::Lut) -> anyhow::Result<()> {
        let ws = self.work(self.spc);
        for group in ws.groups() {
            unpack::unpack_2bit_range(
                &self.input,
                &mut self.data,
                lut,
                self.spc,
                self.channels,
                group,
            );
        }
        Ok(())
    }

    fn transform(&mut self) -> anyhow::Result<()> {
        self.fft.process_batch(&mut self.data).context("CPU FFT")
    }

    fn power(&mut self) -> anyhow::Result<()> {
        let ws = self.work(self.data.len());
        for group in ws.groups() {
            reduce::magnitude_inplace(&mut self.data[group]);
        }
        Ok(())
    }

    fn reduce_level(&mut self, level: &reduce::ReductionLevel) -> anyhow::Result<()> {
        anyhow::ensure!(
            level.length == level.b * self.bins && level.length * 2 <= self.spc,
            "reduction level {level:?} does not fit spc={} bins={}",
            self.spc,
            self.bins
        );
        let ws = self.work(level.length);
        for group in ws.groups() {
            reduce::sum_level_range(
                &mut self.data,
                self.channels,
                self.spc,
                self.bins,
                level.b,
                group,
            );
        }
        Ok(())
    }

    fn reorder(&mut self) -> anyhow::Result<()> {
        let ws = self.work(self.spectrum.len());
        for group in ws.groups() {
            reduce::reorder_range(&self.data, &mut self.spectrum, self.channels, self.spc, group);
        }
        Ok(())
    }

    fn zero(&mut self, slot: SpectrumSlot) -> anyhow::Result<()> {
        let ws = self.work(self.spectrum.len());
        let buf = self.slot_mut(slot);
        for group in ws.groups() {
            spectrum::zero_range(buf, group);
        }
        Ok(())
    }

    fn accumulate(&mut self) -> anyhow::Result<()> {
        let ws = self.work(self.output.len());
        for group in ws.groups() {
            spectrum::add_range(&mut self.output, &self.spectrum, group);
        }
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn read_output(&mut self, out: &mut [Complex32]) -> anyhow::Result<()> {
        anyhow::ensure!(
            out.len() == self.output.len(),
            "output length mismatch: {} != {}",
            out.len(),
            self.output.len()
        );
        out.copy_from_slice(&self.output);
        Ok(())
    }
}
