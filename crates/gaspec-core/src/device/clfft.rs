use opencl3::{
    command_queue::CommandQueue,
    context::Context as ClContext,
    memory::{Buffer, ClMem},
    types::{cl_command_queue, cl_mem},
};
use std::sync::OnceLock;

#[allow(non_camel_case_types)]
#[allow(non_snake_case)]
mod ffi {
    use opencl3::types::{cl_command_queue, cl_context, cl_event, cl_mem, cl_uint};
    use std::ffi::c_void;

    pub type clfftPlanHandle = usize;

    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct clfftStatus(pub i32);

    pub const CLFFT_SUCCESS: clfftStatus = clfftStatus(0);

    #[repr(u32)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum clfftDim {
        CLFFT_1D = 1,
    }

    #[repr(u32)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum clfftPrecision {
        CLFFT_SINGLE = 1,
    }

    #[repr(u32)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum clfftLayout {
        CLFFT_COMPLEX_INTERLEAVED = 1,
    }

    #[repr(u32)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum clfftResultLocation {
        CLFFT_INPLACE = 1,
    }

    #[repr(i32)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum clfftDirection {
        CLFFT_FORWARD = -1,
    }

    #[repr(C)]
    #[derive(Copy, Clone)]
    pub struct clfftSetupData {
        pub major: cl_uint,
        pub minor: cl_uint,
        pub patch: cl_uint,
        pub debugFlags: cl_uint,
    }

    #[link(name = "clFFT")]
    extern "C" {
        pub fn clfftGetVersion(
            major: *mut cl_uint,
            minor: *mut cl_uint,
            patch: *mut cl_uint,
        ) -> clfftStatus;
        pub fn clfftSetup(setupData: *const clfftSetupData) -> clfftStatus;

        pub fn clfftCreateDefaultPlan(
            plHandle: *mut clfftPlanHandle,
            context: cl_context,
            dim: clfftDim,
            clLengths: *const usize,
        ) -> clfftStatus;
        pub fn clfftDestroyPlan(plHandle: *mut clfftPlanHandle) -> clfftStatus;
        pub fn clfftSetPlanPrecision(
            plHandle: clfftPlanHandle,
            precision: clfftPrecision,
        ) -> clfftStatus;
        pub fn clfftSetLayout(
            plHandle: clfftPlanHandle,
            iLayout: clfftLayout,
            oLayout: clfftLayout,
        ) -> clfftStatus;
        pub fn clfftSetResultLocation(
            plHandle: clfftPlanHandle,
            placeness: clfftResultLocation,
        ) -> clfftStatus;
        pub fn clfftSetPlanBatchSize(plHandle: clfftPlanHandle, batchSize: usize) -> clfftStatus;
        pub fn clfftSetPlanDistance(
            plHandle: clfftPlanHandle,
            iDist: usize,
            oDist: usize,
        ) -> clfftStatus;
        pub fn clfftBakePlan(
            plHandle: clfftPlanHandle,
            numQueues: cl_uint,
            commQueues: *mut cl_command_queue,
            pfn_notify: Option<extern "C" fn(clfftPlanHandle, cl_uint, *mut c_void)>,
            user_data: *mut c_void,
        ) -> clfftStatus;
        pub fn clfftEnqueueTransform(
            plHandle: clfftPlanHandle,
            dir: clfftDirection,
            numQueuesAndEvents: cl_uint,
            commQueues: *mut cl_command_queue,
            numWaitEvents: cl_uint,
            waitEvents: *const cl_event,
            outEvents: *mut cl_event,
            inputBuffers: *mut cl_mem,
            outputBuffers: *mut cl_mem,
            tmpBuffer: cl_mem,
        ) -> clfftStatus;
    }
}

fn ensure_setup() -> anyhow::Result<()> {
    static SETUP: OnceLock<Result<(), String>> = OnceLock::new();
    let res = SETUP.get_or_init(|| unsafe {
        let mut major: u32 = 0;
        let mut minor: u32 = 0;
        let mut patch: u32 = 0;
        let st = ffi::clfftGetVersion(&mut major, &mut minor, &mut patch);
        if st != ffi::CLFFT_SUCCESS {
            return Err(format!("clfftGetVersion failed: {st:?}"));
        }
        let data = ffi::clfftSetupData {
            major,
            minor,
            patch,
            debugFlags: 0,
        };
        let st = ffi::clfftSetup(&data);
        if st != ffi::CLFFT_SUCCESS {
            return Err(format!("clfftSetup failed: {st:?}"));
        }
        tracing::debug!(major, minor, patch, "clFFT initialised");
        Ok(())
    });

    res.clone().map_err(|e| anyhow::anyhow!(e))
}

fn check(st: ffi::clfftStatus, op: &str) -> anyhow::Result<()> {
    anyhow::ensure!(st == ffi::CLFFT_SUCCESS, "{op} failed: {st:?}");
    Ok(())
}

pub struct ClfftBatchPlan {
    plan: ffi::clfftPlanHandle,
}

impl ClfftBatchPlan {
    pub fn new(
        ctx: &ClContext,
        queue: &CommandQueue,
        len: usize,
        batch: usize,
    ) -> anyhow::Result<Self> {
        ensure_setup()?;

        let mut plan: ffi::clfftPlanHandle = 0;
        let lengths = [len];
        check(
            unsafe {
                ffi::clfftCreateDefaultPlan(
                    &mut plan,
                    ctx.get(),
                    ffi::clfftDim::CLFFT_1D,
                    lengths.as_ptr(),
                )
            },
            "clfftCreateDefaultPlan",
        )?;
        // From here on the plan is destroyed by Drop on any error.
        let this = Self { plan };

        check(
            unsafe { ffi::clfftSetPlanPrecision(plan, ffi::clfftPrecision::CLFFT_SINGLE) },
            "clfftSetPlanPrecision",
        )?;
        check(
            unsafe {
                ffi::clfftSetLayout(
                    plan,
                    ffi::clfftLayout::CLFFT_COMPLEX_INTERLEAVED,
                    ffi::clfftLayout::CLFFT_COMPLEX_INTERLEAVED,
                )
            },
            "clfftSetLayout",
        )?;
        check(
            unsafe { ffi::clfftSetResultLocation(plan, ffi::clfftResultLocation::CLFFT_INPLACE) },
            "clfftSetResultLocation",
        )?;
        check(
            unsafe { ffi::clfftSetPlanBatchSize(plan, batch) },
            "clfftSetPlanBatchSize",
        )?;
        check(
            unsafe { ffi::clfftSetPlanDistance(plan, len, len) },
            "clfftSetPlanDistance",
        )?;

        let mut q: cl_command_queue = queue.get();
        check(
            unsafe { ffi::clfftBakePlan(plan, 1, &mut q, None, std::ptr::null_mut()) },
            "clfftBakePlan",
        )?;

        tracing::info!(fft_size = len, batch, "clFFT plan baked");
        Ok(this)
    }

    pub fn enqueue(&self, queue: &CommandQueue, buf: &Buffer<f32>) -> anyhow::Result<()> {
        let mut q: cl_command_queue = queue.get();
        let mut mem: cl_mem = buf.get();
        check(
            unsafe {
                ffi::clfftEnqueueTransform(
                    self.plan,
                    ffi::clfftDirection::CLFFT_FORWARD,
                    1,
                    &mut q,
                    0,
                    std::ptr::null(),
                    std::ptr::null_mut(),
                    &mut mem,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            },
            "clfftEnqueueTransform",
        )
    }
}

impl Drop for ClfftBatchPlan {
    fn drop(&mut self) {
        let st = unsafe { ffi::clfftDestroyPlan(&mut self.plan) };
        if st != ffi::CLFFT_SUCCESS {
            tracing::warn!(status = ?st, "clfftDestroyPlan failed");
        }
    }
}
