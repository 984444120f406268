use crate::config::Settings;
use crate::device::{ComputeDevice, SpectrumSlot};
use crate::dsp::reduce::ReductionPlan;
use crate::dsp::unpack::{lut_for, Lut};
use crate::input::SampleSource;
use crate::output::{IntegratedSpectrum, SpectrumSink};
use crate::timing::{Stage, StageObserver};
use anyhow::Context;
use num_complex::Complex32;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    LoopLimit,
    EndOfStream { bytes_read: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub loops: u64,
    pub windows: u64,
    pub end: RunEnd,
}

pub struct Pipeline<D> {
    settings: Settings,
    device: D,
    lut: Lut,
    plan: ReductionPlan,
    raw: Vec<u8>,
    host_output: Vec<Complex32>,
}

impl<D: ComputeDevice> Pipeline<D> {
    pub fn new(settings: Settings, mut device: D) -> anyhow::Result<Self> {
        let lut = lut_for(settings.encoding(), settings.bits_per_sample())?;
        let plan = ReductionPlan::new(settings.spc(), settings.bins(), settings.batch())?;
        anyhow::ensure!(device.capacity() > 0, "device reports zero work-group capacity");

        device.zero(SpectrumSlot::Spectrum).context("zero spectrum")?;
        device.zero(SpectrumSlot::Output).context("zero output")?;
        device.finish()?;

        tracing::info!(
            device = %device.info().name,
            spc = settings.spc(),
            batch = settings.batch(),
            bins = settings.bins(),
            channels = settings.channels(),
            encoding = ?settings.encoding(),
            bytes_per_loop = settings.bytes(),
            reduction_levels = plan.depth(),
            "pipeline initialised"
        );

        Ok(Self {
            raw: vec![0u8; settings.bytes()],
            host_output: vec![Complex32::new(0.0, 0.0); settings.out_len()],
            settings,
            device,
            lut,
            plan,
        })
    }

    pub fn plan(&self) -> &ReductionPlan {
        &self.plan
    }

    // Runs until the loop limit or end of stream, emitting every completed
    // integration window to `sink`. At least one window is always emitted.
    pub fn run(
        &mut self,
        source: &mut dyn SampleSource,
        sink: &mut dyn SpectrumSink,
        observer: &mut dyn StageObserver,
    ) -> anyhow::Result<RunSummary> {
        let limit = self.settings.loops();
        let integrate = self.settings.integrate();
        let mut completed = 0u64;
        let mut window_start = 0u64;
        let mut window_loops = 0u64;
        let mut windows = 0u64;

        let end = loop {
            if limit != 0 && completed >= limit {
                break RunEnd::LoopLimit;
            }

            let start = Instant::now();
            let bytes_read = source.read(&mut self.raw)?;
            observer.stage_complete(Stage::Read, start.elapsed());

            if bytes_read < self.raw.len() {
                if bytes_read > 0 {
                    tracing::warn!(
                        bytes_read,
                        bytes_required = self.raw.len(),
                        "end of stream with partial batch; discarding it"
                    );
                } else {
                    tracing::debug!("end of stream");
                }
                break RunEnd::EndOfStream { bytes_read };
            }

            self.process_loop(observer)
                .with_context(|| format!("loop {completed}"))?;
            completed += 1;
            window_loops += 1;
            tracing::trace!(loop_index = completed - 1, "loop complete");

            if integrate != 0 && window_loops == integrate {
                self.emit_window(sink, observer, window_start, window_loops)?;
                windows += 1;
                self.device.zero(SpectrumSlot::Output)?;
                self.device.finish()?;
                window_start = completed;
                window_loops = 0;
            }
        };

        self.device.finish()?;
        if window_loops > 0 || windows == 0 {
            self.emit_window(sink, observer, window_start, window_loops)?;
            windows += 1;
        }

        tracing::info!(loops = completed, windows, end = ?end, "run complete");
        Ok(RunSummary {
            loops: completed,
            windows,
            end,
        })
    }

    fn process_loop(&mut self, observer: &mut dyn StageObserver) -> anyhow::Result<()> {
        let raw = &self.raw;
        let lut = &self.lut;
        let plan = &self.plan;
        let device = &mut self.device;

        timed(device, observer, Stage::Upload, |d| d.upload(raw))?;
        timed(device, observer, Stage::Unpack, |d| d.unpack(lut))?;
        timed(device, observer, Stage::Transform, |d| d.transform())?;
        timed(device, observer, Stage::Reduce, |d| reduce(d, plan))?;
        timed(device, observer, Stage::Accumulate, |d| d.accumulate())?;
        Ok(())
    }

    fn emit_window(
        &mut self,
        sink: &mut dyn SpectrumSink,
        observer: &mut dyn StageObserver,
        first_loop: u64,
        loops: u64,
    ) -> anyhow::Result<()> {
        let out = &mut self.host_output;
        timed(&mut self.device, observer, Stage::Readback, |d| {
            d.read_output(out)
        })?;
        tracing::debug!(first_loop, loops, "integration window read back");
        sink.emit(&IntegratedSpectrum {
            first_loop,
            loops,
            data: self.host_output.clone(),
        })
        .context("emit spectrum")
    }
}

// Power, then each tree level behind a barrier on the level it depends on,
// then the reorder into the spectrum buffer.
fn reduce<D: ComputeDevice>(device: &mut D, plan: &ReductionPlan) -> anyhow::Result<()> {
    device.power()?;
    let mut previous: Option<usize> = None;
    for level in &plan.levels {
        anyhow::ensure!(
            level.depends_on == previous,
            "reduction level {} depends on {:?}, last completed {:?}",
            level.index,
            level.depends_on,
            previous
        );
        device.reduce_level(level)?;
        device.finish()?;
        tracing::debug!(level = level.index, b = level.b, length = level.length, "tree level done");
        previous = Some(level.index);
    }
    device.reorder()
}

fn timed<D: ComputeDevice>(
    device: &mut D,
    observer: &mut dyn StageObserver,
    stage: Stage,
    f: impl FnOnce(&mut D) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let start = Instant::now();
    f(device).with_context(|| format!("{} stage", stage.name()))?;
    device.finish()?;
    observer.stage_complete(stage, start.elapsed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::device::DeviceInfo;
    use crate::dsp::reduce::ReductionLevel;
    use crate::input::ReaderSource;
    use crate::timing::{NoopObserver, StageTimings};

    // Records the command stream instead of computing.
    struct Recorder {
        info: DeviceInfo,
        calls: Vec<String>,
        out_len: usize,
    }

    impl Recorder {
        fn new(out_len: usize) -> Self {
            Self {
                info: DeviceInfo {
                    platform_index: 0,
                    device_index: 0,
                    platform: "test".into(),
                    name: "recorder".into(),
                    max_work_size: 64,
                },
                calls: Vec::new(),
                out_len,
            }
        }
    }

    impl ComputeDevice for Recorder {
        fn info(&self) -> &DeviceInfo {
            &self.info
        }
        fn upload(&mut self, _raw: &[u8]) -> anyhow::Result<()> {
            self.calls.push("upload".into());
            Ok(())
        }
        fn unpack(&mut self, _lut: &Lut) -> anyhow::Result<()> {
            self.calls.push("unpack".into());
            Ok(())
        }
        fn transform(&mut self) -> anyhow::Result<()> {
            self.calls.push("fft".into());
            Ok(())
        }
        fn power(&mut self) -> anyhow::Result<()> {
            self.calls.push("power".into());
            Ok(())
        }
        fn reduce_level(&mut self, level: &ReductionLevel) -> anyhow::Result<()> {
            self.calls.push(format!("sum b={}", level.b));
            Ok(())
        }
        fn reorder(&mut self) -> anyhow::Result<()> {
            self.calls.push("reorder".into());
            Ok(())
        }
        fn zero(&mut self, slot: SpectrumSlot) -> anyhow::Result<()> {
            self.calls.push(format!("zero {slot:?}"));
            Ok(())
        }
        fn accumulate(&mut self) -> anyhow::Result<()> {
            self.calls.push("add".into());
            Ok(())
        }
        fn finish(&mut self) -> anyhow::Result<()> {
            self.calls.push("finish".into());
            Ok(())
        }
        fn read_output(&mut self, out: &mut [Complex32]) -> anyhow::Result<()> {
            assert_eq!(out.len(), self.out_len);
            self.calls.push("read".into());
            Ok(())
        }
    }

    fn options(bins: usize, batch: usize, channels: usize) -> Options {
        Options {
            bins: Some(bins),
            batch: Some(batch),
            channels: Some(channels),
            ..Options::default()
        }
    }

    fn settings(bins: usize, batch: usize, channels: usize) -> Settings {
        options(bins, batch, channels).resolve().unwrap()
    }

    #[test]
    fn stages_run_in_order_with_barriers_between_tree_levels() {
        let s = settings(4, 4, 4);
        let bytes = s.bytes();
        let mut p = Pipeline::new(s.clone(), Recorder::new(s.out_len())).unwrap();
        p.device.calls.clear();

        let mut src = ReaderSource::new(std::io::Cursor::new(vec![0u8; bytes]), "mem");
        let mut sink: Vec<IntegratedSpectrum> = Vec::new();
        p.run(&mut src, &mut sink, &mut NoopObserver).unwrap();

        let calls: Vec<&str> = p.device.calls.iter().map(String::as_str).collect();
        assert_eq!(
            calls,
            vec![
                "upload", "finish", "unpack", "finish", "fft", "finish", "power", "sum b=2",
                "finish", "sum b=1", "finish", "reorder", "finish", "add", "finish", "finish",
                "read", "finish",
            ]
        );
    }

    #[test]
    fn init_zeroes_both_spectra() {
        let s = settings(4, 2, 4);
        let p = Pipeline::new(s.clone(), Recorder::new(s.out_len())).unwrap();
        assert_eq!(
            p.device.calls,
            vec!["zero Spectrum", "zero Output", "finish"]
        );
        assert_eq!(p.plan().depth(), 1);
    }

    #[test]
    fn loop_limit_stops_before_reading_more() {
        let s = Options {
            loops: Some(2),
            ..options(4, 2, 4)
        }
        .resolve()
        .unwrap();
        let bytes = s.bytes();
        let mut p = Pipeline::new(s.clone(), Recorder::new(s.out_len())).unwrap();
        let mut src = ReaderSource::new(std::io::Cursor::new(vec![0u8; bytes * 5]), "mem");
        let mut sink: Vec<IntegratedSpectrum> = Vec::new();
        let mut timings = StageTimings::default();
        let summary = p.run(&mut src, &mut sink, &mut timings).unwrap();
        assert_eq!(summary.loops, 2);
        assert_eq!(summary.end, RunEnd::LoopLimit);
        assert_eq!(timings.calls(Stage::Read), 2);
        assert_eq!(timings.calls(Stage::Transform), 2);
        assert_eq!(timings.calls(Stage::Readback), 1);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].loops, 2);
    }

    #[test]
    fn integration_windows_reset_the_accumulator() {
        let s = Options {
            integrate: Some(2),
            ..options(4, 2, 4)
        }
        .resolve()
        .unwrap();
        let bytes = s.bytes();
        let mut p = Pipeline::new(s.clone(), Recorder::new(s.out_len())).unwrap();
        p.device.calls.clear();
        let mut src = ReaderSource::new(std::io::Cursor::new(vec![0u8; bytes * 5]), "mem");
        let mut sink: Vec<IntegratedSpectrum> = Vec::new();
        let summary = p.run(&mut src, &mut sink, &mut NoopObserver).unwrap();

        assert_eq!(summary.loops, 5);
        assert_eq!(summary.windows, 3);
        let spans: Vec<(u64, u64)> = sink.iter().map(|w| (w.first_loop, w.loops)).collect();
        assert_eq!(spans, vec![(0, 2), (2, 2), (4, 1)]);
        let resets = p
            .device
            .calls
            .iter()
            .filter(|c| c.as_str() == "zero Output")
            .count();
        assert_eq!(resets, 2);
    }
}
