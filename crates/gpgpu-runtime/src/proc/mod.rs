//! Processor nodes.
//!
//! A processor holds input texture bindings, a shader, and (unless it is a
//! display sink) an output texture + framebuffer owned through its
//! [`MemTransfer`]. Edges live in the pipeline's graph, not in processors.

mod disp;
mod filter;

use std::any::Any;
use std::fmt;

use gpgpu_core::{EngineError, PixelFormat, RenderPhase, Size2d};

use crate::gpu::{check_gpu_error, Gpu, TextureId};
use crate::transfer::{FrameDelegate, MemTransfer, MemTransferFactory};

pub use disp::{DispProc, RenderbufferStorage};
pub use filter::{
    DrawTarget, Filter, FilterCore, FilterProc, OutputScale, DEFAULT_VERT, SAMPLER_NAMES,
};

/// Per-call rendering context: the GPU plus the pipeline's transfer policy.
#[derive(Clone, Copy)]
pub struct GpuCtx<'a> {
    pub gpu: &'a dyn Gpu,
    pub transfers: &'a MemTransferFactory,
    /// Poll the GPU error state after each protocol phase.
    pub check_errors: bool,
}

impl fmt::Debug for GpuCtx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuCtx")
            .field("transfer", &self.transfers.kind())
            .field("check_errors", &self.check_errors)
            .finish()
    }
}

impl<'a> GpuCtx<'a> {
    pub fn new(gpu: &'a dyn Gpu, transfers: &'a MemTransferFactory) -> Self {
        Self {
            gpu,
            transfers,
            check_errors: true,
        }
    }

    pub fn check(&self, proc: &str, phase: RenderPhase) -> Result<(), EngineError> {
        if self.check_errors {
            check_gpu_error(self.gpu, proc, phase)
        } else {
            Ok(())
        }
    }
}

/// `Uninitialized -> Initialized -> Ready`; `reinit` returns to `Initialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcState {
    Uninitialized,
    Initialized,
    /// Rendered at least once since the last (re)init.
    Ready,
}

/// Where `result_data` delivers the output.
pub enum ResultTarget<'a> {
    /// Start an asynchronous readback into the given slot.
    Queue,
    /// Copy into a host buffer of `bytes_per_row * height` bytes.
    Buffer(&'a mut [u8]),
    /// Zero-copy callback `(size, pixels, bytes_per_row)`.
    Delegate(FrameDelegate<'a>),
}

impl fmt::Debug for ResultTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultTarget::Queue => f.write_str("Queue"),
            ResultTarget::Buffer(b) => write!(f, "Buffer({} bytes)", b.len()),
            ResultTarget::Delegate(_) => f.write_str("Delegate"),
        }
    }
}

/// The node contract the pipeline, camera glue and display glue rely on.
pub trait Processor: fmt::Debug + Any {
    fn name(&self) -> &str;

    fn state(&self) -> ProcState;

    /// Number of input slots that must be bound before `render`.
    fn input_slots(&self) -> usize {
        1
    }

    /// Size output from `in_size`, allocate GPU resources and compile shaders.
    /// Source nodes pass `prepare_for_external_input` to allocate an upload texture.
    fn init(
        &mut self,
        ctx: &GpuCtx<'_>,
        in_size: Size2d,
        order: usize,
        prepare_for_external_input: bool,
    ) -> Result<(), EngineError>;

    /// Reallocate buffers for a new input size. Shaders and graph edges survive.
    fn reinit(
        &mut self,
        ctx: &GpuCtx<'_>,
        in_size: Size2d,
        prepare_for_external_input: bool,
    ) -> Result<(), EngineError>;

    fn set_external_input_format(&mut self, format: PixelFormat);

    /// Upload a host frame through this node's transfer (source nodes only).
    fn set_external_input_data(&mut self, ctx: &GpuCtx<'_>, data: &[u8]) -> Result<(), EngineError>;

    /// Bind `tex` as input `slot` for the next render.
    fn use_texture(&mut self, slot: usize, tex: TextureId) -> Result<(), EngineError>;

    /// Render one frame. `position` is the node's index in the pipeline order.
    fn render(&mut self, ctx: &GpuCtx<'_>, position: usize) -> Result<(), EngineError>;

    fn input_texture(&self) -> Option<TextureId>;
    fn output_texture(&self) -> Option<TextureId>;
    fn output_size(&self) -> Size2d;

    fn mem_transfer(&self) -> Option<&dyn MemTransfer>;
    fn mem_transfer_mut(&mut self) -> Option<&mut (dyn MemTransfer + 'static)>;

    fn result_data(
        &mut self,
        ctx: &GpuCtx<'_>,
        target: ResultTarget<'_>,
        slot: usize,
    ) -> Result<(), EngineError>;

    /// Output from `age` frames ago (0 = newest). Only history-keeping nodes return `Some`.
    fn history_texture(&self, _age: usize) -> Option<TextureId> {
        None
    }

    /// How many past outputs this node keeps.
    fn history_capacity(&self) -> usize {
        0
    }

    fn release(&mut self, gpu: &dyn Gpu);

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) fn not_initialized(name: &str, op: &str) -> EngineError {
    tracing::error!(proc = name, op, "called before init");
    EngineError::precondition(format!("{name}: {op} before init"))
}
