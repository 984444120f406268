// A device owns the four run buffers (raw input, working data, per-loop
// spectrum and output accumulator) and one ordered command stream. Every
// stage call is ordered after the previous one; `finish` blocks until all
// issued work has completed.

pub mod cpu;
#[cfg(feature = "clfft")]
pub mod clfft;
#[cfg(feature = "clfft")]
pub mod opencl;

use crate::config::{Accelerator, Settings};
use crate::dsp::reduce::ReductionLevel;
use crate::dsp::unpack::Lut;
use num_complex::Complex32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrumSlot {
    Spectrum,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    pub items: usize,
    pub local: usize,
    pub global: usize,
}

impl WorkSize {
    pub fn new(items: usize, max_work_size: usize) -> Self {
        let local = items.min(max_work_size).max(1);
        let global = items.div_ceil(local) * local;
        Self {
            items,
            local,
            global,
        }
    }

    pub fn groups(&self) -> impl Iterator<Item = std::ops::Range<usize>> + '_ {
        (0..self.global)
            .step_by(self.local)
            .map(move |start| start..(start + self.local).min(self.items))
            .filter(|r| !r.is_empty())
    }
}

// Work-group cap for a device: the user's request, never above what the
// device supports.
pub fn effective_work_size(requested: Option<usize>, device_limit: usize) -> usize {
    requested.map_or(device_limit, |r| r.min(device_limit)).max(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub platform_index: usize,
    pub device_index: usize,
    pub platform: String,
    pub name: String,
    pub max_work_size: usize,
}

pub trait ComputeDevice {
    fn info(&self) -> &DeviceInfo;

    fn capacity(&self) -> usize {
        self.info().max_work_size
    }

    fn upload(&mut self, raw: &[u8]) -> anyhow::Result<()>;

    fn unpack(&mut self, lut: &Lut) -> anyhow::Result<()>;

    fn transform(&mut self) -> anyhow::Result<()>;

    fn power(&mut self) -> anyhow::Result<()>;

    // Issues one tree level. Callers place a barrier between levels.
    fn reduce_level(&mut self, level: &ReductionLevel) -> anyhow::Result<()>;

    fn reorder(&mut self) -> anyhow::Result<()>;

    fn zero(&mut self, slot: SpectrumSlot) -> anyhow::Result<()>;

    fn accumulate(&mut self) -> anyhow::Result<()>;

    fn finish(&mut self) -> anyhow::Result<()>;

    fn read_output(&mut self, out: &mut [Complex32]) -> anyhow::Result<()>;
}

impl<D: ComputeDevice + ?Sized> ComputeDevice for Box<D> {
    fn info(&self) -> &DeviceInfo {
        (**self).info()
    }
    fn upload(&mut self, raw: &[u8]) -> anyhow::Result<()> {
        (**self).upload(raw)
    }
    fn unpack(&mut self, lut: &Lut) -> anyhow::Result<()> {
        (**self).unpack(lut)
    }
    fn transform(&mut self) -> anyhow::Result<()> {
        (**self).transform()
    }
    fn power(&mut self) -> anyhow::Result<()> {
        (**self).power()
    }
    fn reduce_level(&mut self, level: &ReductionLevel) -> anyhow::Result<()> {
        (**self).reduce_level(level)
    }
    fn reorder(&mut self) -> anyhow::Result<()> {
        (**self).reorder()
    }
    fn zero(&mut self, slot: SpectrumSlot) -> anyhow::Result<()> {
        (**self).zero(slot)
    }
    fn accumulate(&mut self) -> anyhow::Result<()> {
        (**self).accumulate()
    }
    fn finish(&mut self) -> anyhow::Result<()> {
        (**self).finish()
    }
    fn read_output(&mut self, out: &mut [Complex32]) -> anyhow::Result<()> {
        (**self).read_output(out)
    }
}

pub fn open_device(settings: &Settings) -> anyhow::Result<Box<dyn ComputeDevice>> {
    match settings.accelerator() {
        Accelerator::None => Ok(Box::new(cpu::CpuDevice::new(settings)?)),
        Accelerator::Clfft => {
            #[cfg(feature = "clfft")]
            {
                Ok(Box::new(opencl::ClDevice::new(settings)?))
            }
            #[cfg(not(feature = "clfft"))]
            {
                anyhow::bail!("accelerator = \"clfft\" requires building with --features clfft");
            }
        }
    }
}

pub fn list_devices(accelerator: Accelerator) -> anyhow::Result<Vec<DeviceInfo>> {
    match accelerator {
        Accelerator::None => Ok(vec![cpu::CpuDevice::describe(
            crate::config::DEFAULT_CPU_MAX_WORK_SIZE,
        )]),
        Accelerator::Clfft => {
            #[cfg(feature = "clfft")]
            {
                opencl::list_devices()
            }
            #[cfg(not(feature = "clfft"))]
            {
                anyhow::bail!("accelerator = \"clfft\" requires building with --features clfft");
            }
        }
    }
}
