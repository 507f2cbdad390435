use std::any::Any;
use std::fmt;

use gpgpu_core::{EngineError, PixelFormat, Size2d};

use super::{not_initialized, DrawTarget, FilterCore, GpuCtx, ProcState, Processor, ResultTarget};
use crate::fbo::{Attachment, FrameBuffer};
use crate::filters::Passthrough;
use crate::gpu::{Gpu, RenderbufferId, TextureId};
use crate::transfer::MemTransfer;

/// Allocates storage for the display renderbuffer (e.g. from a native layer).
pub type RenderbufferStorage = Box<dyn FnMut(&dyn Gpu, Size2d) -> Result<(), EngineError>>;

/// Terminal display sink.
///
/// Draws its input to the default framebuffer at a pixel offset, scaled by a
/// display-resolution multiplier. With a storage callback installed it draws
/// into its own renderbuffer-backed framebuffer instead. Has no output texture
/// and no memory transfer.
pub struct DispProc {
    blit: Passthrough,
    core: FilterCore,
    offset: (i32, i32),
    resolution: (f32, f32),
    storage: Option<RenderbufferStorage>,
    target: Option<(FrameBuffer, RenderbufferId)>,
    state: ProcState,
    in_size: Size2d,
    view_size: Size2d,
}

impl fmt::Debug for DispProc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispProc")
            .field("offset", &self.offset)
            .field("resolution", &self.resolution)
            .field("renderbuffer", &self.target.as_ref().map(|(_, rb)| *rb))
            .field("state", &self.state)
            .field("view_size", &self.view_size)
            .finish()
    }
}

impl Default for DispProc {
    fn default() -> Self {
        Self::new()
    }
}

impl DispProc {
    pub fn new() -> Self {
        Self {
            blit: Passthrough,
            core: FilterCore::new("disp", 1),
            offset: (0, 0),
            resolution: (1.0, 1.0),
            storage: None,
            target: None,
            state: ProcState::Uninitialized,
            in_size: Size2d::default(),
            view_size: Size2d::default(),
        }
    }

    /// Pixel offset of the lower-left corner within the screen.
    pub fn set_output_translation(&mut self, x: i32, y: i32) {
        self.offset = (x, y);
    }

    /// Multiplier between input pixels and display pixels (e.g. a content scale factor).
    pub fn set_resolution(&mut self, x: f32, y: f32) {
        self.resolution = (x, y);
        self.view_size = self.scaled(self.in_size);
    }

    /// Render into a renderbuffer whose storage `storage` provides. Takes effect at the next init.
    pub fn set_renderbuffer_storage(&mut self, storage: RenderbufferStorage) {
        self.storage = Some(storage);
    }

    pub fn renderbuffer(&self) -> Option<RenderbufferId> {
        self.target.as_ref().map(|(_, rb)| *rb)
    }

    /// Viewport size after the resolution multiplier.
    pub fn view_size(&self) -> Size2d {
        self.view_size
    }

    fn scaled(&self, size: Size2d) -> Size2d {
        let w = (size.width as f32 * self.resolution.0).round().max(1.0) as u32;
        let h = (size.height as f32 * self.resolution.1).round().max(1.0) as u32;
        Size2d::new(w, h)
    }

    fn create_target(&mut self, gpu: &dyn Gpu) -> Result<(), EngineError> {
        let Some(storage) = self.storage.as_mut() else {
            return Ok(());
        };
        let rb = gpu
            .create_renderbuffer()
            .map_err(|e| EngineError::resource("renderbuffer", e))?;
        gpu.bind_renderbuffer(Some(rb));
        let stored = storage(gpu, self.view_size);
        gpu.bind_renderbuffer(None);
        if let Err(e) = stored {
            gpu.delete_renderbuffer(rb);
            return Err(e);
        }
        let mut fbo = match FrameBuffer::create(gpu) {
            Ok(f) => f,
            Err(e) => {
                gpu.delete_renderbuffer(rb);
                return Err(e);
            }
        };
        if let Err(e) = fbo.attach(gpu, Attachment::Renderbuffer(rb), self.view_size) {
            fbo.release(gpu);
            gpu.delete_renderbuffer(rb);
            return Err(e);
        }
        self.target = Some((fbo, rb));
        Ok(())
    }

    fn release_target(&mut self, gpu: &dyn Gpu) {
        if let Some((mut fbo, rb)) = self.target.take() {
            fbo.release(gpu);
            gpu.delete_renderbuffer(rb);
        }
    }
}

impl Processor for DispProc {
    fn name(&self) -> &str {
        "disp"
    }

    fn state(&self) -> ProcState {
        self.state
    }

    fn init(
        &mut self,
        ctx: &GpuCtx<'_>,
        in_size: Size2d,
        _order: usize,
        _prepare_for_external_input: bool,
    ) -> Result<(), EngineError> {
        if in_size.is_empty() {
            return Err(EngineError::precondition("disp: init with zero input size"));
        }
        if self.state != ProcState::Uninitialized {
            self.release(ctx.gpu);
        }
        self.core.build(ctx, &self.blit)?;
        self.in_size = in_size;
        self.view_size = self.scaled(in_size);
        self.create_target(ctx.gpu)?;
        self.state = ProcState::Initialized;
        tracing::debug!(
            w = self.view_size.width,
            h = self.view_size.height,
            offscreen = self.target.is_some(),
            "display sink initialized"
        );
        Ok(())
    }

    fn reinit(
        &mut self,
        ctx: &GpuCtx<'_>,
        in_size: Size2d,
        prepare_for_external_input: bool,
    ) -> Result<(), EngineError> {
        if self.state == ProcState::Uninitialized {
            return self.init(ctx, in_size, 0, prepare_for_external_input);
        }
        if in_size.is_empty() {
            return Err(EngineError::precondition("disp: reinit with zero input size"));
        }
        self.in_size = in_size;
        self.view_size = self.scaled(in_size);
        self.release_target(ctx.gpu);
        self.create_target(ctx.gpu)?;
        self.state = ProcState::Initialized;
        Ok(())
    }

    fn set_external_input_format(&mut self, _format: PixelFormat) {}

    fn set_external_input_data(&mut self, _ctx: &GpuCtx<'_>, _data: &[u8]) -> Result<(), EngineError> {
        Err(EngineError::unsupported("display sink cannot receive host frames"))
    }

    fn use_texture(&mut self, slot: usize, tex: TextureId) -> Result<(), EngineError> {
        self.core.set_input(slot, tex)
    }

    fn render(&mut self, ctx: &GpuCtx<'_>, position: usize) -> Result<(), EngineError> {
        if self.state == ProcState::Uninitialized {
            return Err(not_initialized("disp", "render"));
        }
        let target = match &self.target {
            Some((fbo, _)) => DrawTarget::Framebuffer(fbo),
            None => DrawTarget::Screen {
                x: self.offset.0,
                y: self.offset.1,
                size: self.view_size,
            },
        };
        self.core.run(ctx, &self.blit, target)?;
        self.state = ProcState::Ready;
        tracing::trace!(position, "displayed");
        Ok(())
    }

    fn input_texture(&self) -> Option<TextureId> {
        self.core.input(0)
    }

    fn output_texture(&self) -> Option<TextureId> {
        None
    }

    fn output_size(&self) -> Size2d {
        self.view_size
    }

    fn mem_transfer(&self) -> Option<&dyn MemTransfer> {
        None
    }

    fn mem_transfer_mut(&mut self) -> Option<&mut (dyn MemTransfer + 'static)> {
        None
    }

    fn result_data(
        &mut self,
        _ctx: &GpuCtx<'_>,
        _target: ResultTarget<'_>,
        _slot: usize,
    ) -> Result<(), EngineError> {
        tracing::error!("result_data on display sink");
        Err(EngineError::unsupported("display sink has no readable output"))
    }

    fn release(&mut self, gpu: &dyn Gpu) {
        self.core.release(gpu);
        self.core.clear_inputs();
        self.release_target(gpu);
        self.state = ProcState::Uninitialized;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
