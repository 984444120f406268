use super::clfft::ClfftBatchPlan;
use super::{effective_work_size, ComputeDevice, DeviceInfo, SpectrumSlot, WorkSize};
use crate::config::Settings;
use crate::dsp::reduce::ReductionLevel;
use crate::dsp::unpack::Lut;
use crate::kernels::{self, ProgramSource};
use anyhow::Context;
use num_complex::Complex32;
use opencl3::{
    command_queue::{CommandQueue, CL_BLOCKING},
    context::Context as ClContext,
    device::{Device, CL_DEVICE_TYPE_ALL},
    event::Event,
    kernel::{ExecuteKernel, Kernel},
    memory::{Buffer, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE},
    platform::{get_platforms, Platform},
    program::Program,
    types::{cl_device_id, cl_float, cl_int},
};
use std::path::Path;

pub struct ComputeContext {
    info: DeviceInfo,
    queue: CommandQueue,
    ctx: ClContext,
}

impl ComputeContext {
    pub fn new(
        platform_idx: Option<usize>,
        device_idx: usize,
        requested_work_size: Option<usize>,
    ) -> anyhow::Result<Self> {
        let (platform_index, platform, device_id) = select_platform_device(platform_idx, device_idx)?;
        let device = Device::new(device_id);

        let platform_name = platform.name().unwrap_or_else(|_| "<unknown>".to_string());
        let device_name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
        let device_limit = device
            .max_work_group_size()
            .context("query CL_DEVICE_MAX_WORK_GROUP_SIZE")?;
        let max_work_size = effective_work_size(requested_work_size, device_limit);
        if let Some(requested) = requested_work_size.filter(|r| *r > device_limit) {
            tracing::warn!(
                requested,
                device_limit,
                "requested work size exceeds the device limit; clamping"
            );
        }

        let ctx = ClContext::from_device(&device).context("create OpenCL context")?;
        let queue = unsafe { CommandQueue::create(&ctx, device_id, 0) }
            .context("create OpenCL command queue")?;

        tracing::info!(
            opencl_platform = %platform_name,
            opencl_device = %device_name,
            device_limit,
            max_work_size,
            "OpenCL device selected"
        );

        Ok(Self {
            info: DeviceInfo {
                platform_index,
                device_index: device_idx,
                platform: platform_name,
                name: device_name,
                max_work_size,
            },
            queue,
            ctx,
        })
    }

    pub fn work(&self, items: usize) -> WorkSize {
        WorkSize::new(items, self.info.max_work_size)
    }

    // Builds one program; a failed build surfaces the build log.
    pub fn build(&self, src: &ProgramSource) -> anyhow::Result<Program> {
        let program = Program::create_and_build_from_source(&self.ctx, &src.source, "")
            .map_err(|log| anyhow::anyhow!("{} build log:\n{log}", src.origin))?;
        tracing::debug!(program = %src.origin, "OpenCL program built");
        Ok(program)
    }

    pub fn kernel(&self, program: &Program, name: &str) -> anyhow::Result<Kernel> {
        Kernel::create(program, name).with_context(|| format!("Failed to create kernel {name:?}"))
    }

    fn buffer<T>(&self, flags: u64, len: usize, what: &str) -> anyhow::Result<Buffer<T>> {
        unsafe { Buffer::<T>::create(&self.ctx, flags, len.max(1), std::ptr::null_mut()) }
            .with_context(|| format!("create OpenCL {what} buffer"))
    }

    pub fn finish(&self) -> anyhow::Result<()> {
        self.queue.finish().context("clFinish")?;
        Ok(())
    }
}

fn build_stage(
    cx: &ComputeContext,
    program: kernels::Program,
    dir: Option<&Path>,
) -> anyhow::Result<(Program, Vec<Kernel>)> {
    let src = kernels::load(program, dir)?;
    let built = cx.build(&src)?;
    let kernels = program
        .kernel_names()
        .iter()
        .map(|name| cx.kernel(&built, name))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok((built, kernels))
}

struct UnpackStage {
    unpack: Kernel,
    _program: Program,
}

struct ReduceStage {
    magnitude: Kernel,
    sum: Kernel,
    reorder: Kernel,
    _program: Program,
    // Completion of the last issued tree level.
    last_level: Option<Event>,
}

struct SpectrumStage {
    zero: Kernel,
    add: Kernel,
    _program: Program,
}

pub struct ClDevice {
    unpack: UnpackStage,
    reduce: ReduceStage,
    spectrum_ops: SpectrumStage,
    fft: ClfftBatchPlan,
    input: Buffer<u8>,
    data: Buffer<f32>,
    spectrum: Buffer<f32>,
    output: Buffer<f32>,
    spc: cl_int,
    bins: cl_int,
    channels: cl_int,
    n: usize,
    out_len: usize,
    bytes: usize,
    cx: ComputeContext,
}

impl ClDevice {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let device_idx = settings
            .device
            .context("no OpenCL device index given (use --list-devices)")?;
        let cx = ComputeContext::new(settings.platform(), device_idx, settings.max_work_size())?;
        let dir = settings.kernel_dir().as_deref();

        let (program, mut k) = build_stage(&cx, kernels::Program::Unpack, dir)?;
        let unpack = UnpackStage {
            unpack: k.remove(0),
            _program: program,
        };

        let (program, k) = build_stage(&cx, kernels::Program::Reduce, dir)?;
        let mut k = k.into_iter();
        let reduce = ReduceStage {
            magnitude: k.next().context("magnitude kernel")?,
            sum: k.next().context("sum kernel")?,
            reorder: k.next().context("reorder kernel")?,
            _program: program,
            last_level: None,
        };

        let (program, k) = build_stage(&cx, kernels::Program::Spectrum, dir)?;
        let mut k = k.into_iter();
        let spectrum_ops = SpectrumStage {
            zero: k.next().context("zero_spectrum kernel")?,
            add: k.next().context("add_spectrum kernel")?,
            _program: program,
        };

        let n = settings.n();
        let out_len = settings.out_len();
        let bytes = settings.bytes();
        let input = cx.buffer::<u8>(CL_MEM_READ_ONLY, bytes, "input")?;
        let data = cx.buffer::<f32>(CL_MEM_READ_WRITE, n * 2, "data")?;
        let spectrum = cx.buffer::<f32>(CL_MEM_READ_WRITE, out_len * 2, "spectrum")?;
        let output = cx.buffer::<f32>(CL_MEM_READ_WRITE, out_len * 2, "output")?;

        let fft = ClfftBatchPlan::new(&cx.ctx, &cx.queue, settings.bins(), settings.transforms())?;

        Ok(Self {
            unpack,
            reduce,
            spectrum_ops,
            fft,
            input,
            data,
            spectrum,
            output,
            spc: to_cl_int(settings.spc(), "spc")?,
            bins: to_cl_int(settings.bins(), "bins")?,
            channels: to_cl_int(settings.channels(), "channels")?,
            n,
            out_len,
            bytes,
            cx,
        })
    }
}

fn to_cl_int(v: usize, what: &str) -> anyhow::Result<cl_int> {
    cl_int::try_from(v).with_context(|| format!("{what} ({v}) exceeds cl_int"))
}

impl ComputeDevice for ClDevice {
    fn info(&self) -> &DeviceInfo {
        &self.cx.info
    }

    fn upload(&mut self, raw: &[u8]) -> anyhow::Result<()> {
        anyhow::ensure!(raw.len() == self.bytes, "upload length mismatch");
        unsafe {
            self.cx
                .queue
                .enqueue_write_buffer(&mut self.input, CL_BLOCKING, 0, raw, &[])
                .context("OpenCL write input")?;
        }
        Ok(())
    }

    fn unpack(&mut self, lut: &Lut) -> anyhow::Result<()> {
        let ws = self.cx.work(self.spc as usize);
        let lut: [cl_float; 4] = *lut;
        // SAFETY: argument order and types match unpack_2bit in unpack.cl;
        // the kernel guards indices beyond spc.
        unsafe {
            ExecuteKernel::new(&self.unpack.unpack)
                .set_arg(&self.input)
                .set_arg(&self.data)
                .set_arg_local_buffer(ws.local * std::mem::size_of::<cl_int>())
                .set_arg(&lut)
                .set_arg(&self.spc)
                .set_arg(&self.channels)
                .set_global_work_size(ws.global)
                .set_local_work_size(ws.local)
                .enqueue_nd_range(&self.cx.queue)
                .context("enqueue unpack_2bit")?;
        }
        Ok(())
    }

    fn transform(&mut self) -> anyhow::Result<()> {
        self.fft.enqueue(&self.cx.queue, &self.data)
    }

    fn power(&mut self) -> anyhow::Result<()> {
        let ws = self.cx.work(self.n);
        let n = to_cl_int(self.n, "n")?;
        unsafe {
            ExecuteKernel::new(&self.reduce.magnitude)
                .set_arg(&self.data)
                .set_arg(&n)
                .set_global_work_size(ws.global)
                .set_local_work_size(ws.local)
                .enqueue_nd_range(&self.cx.queue)
                .context("enqueue magnitude")?;
        }
        self.reduce.last_level = None;
        Ok(())
    }

    fn reduce_level(&mut self, level: &ReductionLevel) -> anyhow::Result<()> {
        let ws = self.cx.work(level.length);
        let b = to_cl_int(level.b, "b")?;
        let mut exec = ExecuteKernel::new(&self.reduce.sum);
        unsafe {
            exec.set_arg(&self.data)
                .set_arg(&self.channels)
                .set_arg(&self.spc)
                .set_arg(&self.bins)
                .set_arg(&b)
                .set_global_work_size(ws.global)
                .set_local_work_size(ws.local);
        }
        if level.depends_on.is_some() {
            let prev = self
                .reduce
                .last_level
                .as_ref()
                .with_context(|| format!("level {} issued before its dependency", level.index))?;
            exec.set_wait_event(prev);
        }
        let event = unsafe { exec.enqueue_nd_range(&self.cx.queue) }
            .with_context(|| format!("enqueue sum level {}", level.index))?;
        self.reduce.last_level = Some(event);
        Ok(())
    }

    fn reorder(&mut self) -> anyhow::Result<()> {
        let ws = self.cx.work(self.out_len);
        unsafe {
            ExecuteKernel::new(&self.reduce.reorder)
                .set_arg(&self.data)
                .set_arg(&self.spectrum)
                .set_arg(&self.spc)
                .set_arg(&self.bins)
                .set_arg(&self.channels)
                .set_global_work_size(ws.global)
                .set_local_work_size(ws.local)
                .enqueue_nd_range(&self.cx.queue)
                .context("enqueue reorder")?;
        }
        self.reduce.last_level = None;
        Ok(())
    }

    fn zero(&mut self, slot: SpectrumSlot) -> anyhow::Result<()> {
        let ws = self.cx.work(self.out_len);
        let len = to_cl_int(self.out_len, "out_len")?;
        let target = match slot {
            SpectrumSlot::Spectrum => &self.spectrum,
            SpectrumSlot::Output => &self.output,
        };
        unsafe {
            ExecuteKernel::new(&self.spectrum_ops.zero)
                .set_arg(target)
                .set_arg(&len)
                .set_global_work_size(ws.global)
                .set_local_work_size(ws.local)
                .enqueue_nd_range(&self.cx.queue)
                .context("enqueue zero_spectrum")?;
        }
        Ok(())
    }

    fn accumulate(&mut self) -> anyhow::Result<()> {
        let ws = self.cx.work(self.out_len);
        let len = to_cl_int(self.out_len, "out_len")?;
        unsafe {
            ExecuteKernel::new(&self.spectrum_ops.add)
                .set_arg(&self.output)
                .set_arg(&self.spectrum)
                .set_arg(&len)
                .set_global_work_size(ws.global)
                .set_local_work_size(ws.local)
                .enqueue_nd_range(&self.cx.queue)
                .context("enqueue add_spectrum")?;
        }
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.cx.finish()
    }

    fn read_output(&mut self, out: &mut [Complex32]) -> anyhow::Result<()> {
        anyhow::ensure!(out.len() == self.out_len, "output length mismatch");
        let out_interleaved = complex_as_f32_slice_mut(out);
        unsafe {
            self.cx
                .queue
                .enqueue_read_buffer(&self.output, CL_BLOCKING, 0, out_interleaved, &[])
                .context("OpenCL read output")?;
        }
        Ok(())
    }
}

impl Drop for ClDevice {
    fn drop(&mut self) {
        // Drain before kernels, programs, queue and context are released in
        // field order.
        if let Err(e) = self.cx.finish() {
            tracing::warn!(error = %e, "OpenCL queue drain failed during teardown");
        }
    }
}

fn complex_as_f32_slice_mut(v: &mut [Complex32]) -> &mut [f32] {
    debug_assert_eq!(std::mem::size_of::<Complex32>(), 8);
    unsafe { std::slice::from_raw_parts_mut(v.as_mut_ptr().cast::<f32>(), v.len() * 2) }
}

pub fn list_devices() -> anyhow::Result<Vec<DeviceInfo>> {
    let platforms = get_platforms().context("list OpenCL platforms")?;
    let mut out = Vec::new();
    for (platform_index, platform) in platforms.iter().enumerate() {
        let platform_name = platform.name().unwrap_or_else(|_| "<unknown>".to_string());
        let version = platform.version().unwrap_or_default();
        tracing::info!(platform_index, %platform_name, %version, "OpenCL platform");
        let devices = platform
            .get_devices(CL_DEVICE_TYPE_ALL)
            .context("list OpenCL devices")?;
        for (device_index, id) in devices.into_iter().enumerate() {
            let device = Device::new(id);
            out.push(DeviceInfo {
                platform_index,
                device_index,
                platform: platform_name.clone(),
                name: device.name().unwrap_or_else(|_| "<unknown>".to_string()),
                max_work_size: device.max_work_group_size().unwrap_or(1),
            });
        }
    }
    Ok(out)
}

fn select_platform_device(
    platform_idx: Option<usize>,
    device_idx: usize,
) -> anyhow::Result<(usize, Platform, cl_device_id)> {
    let platforms = get_platforms().context("list OpenCL platforms")?;
    anyhow::ensure!(!platforms.is_empty(), "no OpenCL platforms found");

    let index = platform_idx.unwrap_or(0);
    let platform = platforms
        .get(index)
        .copied()
        .with_context(|| format!("OpenCL platform index {index} not found"))?;

    let devices = platform
        .get_devices(CL_DEVICE_TYPE_ALL)
        .context("list OpenCL devices")?;
    anyhow::ensure!(!devices.is_empty(), "no OpenCL devices found");

    let device = *devices
        .get(device_idx)
        .with_context(|| format!("OpenCL device index {device_idx} not found"))?;

    Ok((index, platform, device))
}
