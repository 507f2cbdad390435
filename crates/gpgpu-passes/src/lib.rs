#![forbid(unsafe_code)]
#![deny(missing_debug_implementations)]

use std::any::Any;

use gpgpu_core::{EngineError, PixelFormat, Size2d, TextureFormat};
use gpgpu_runtime::fbo::{create_render_target, FrameBuffer, RenderTarget};
use gpgpu_runtime::gpu::{Gpu, TextureId};
use gpgpu_runtime::proc::{
    DrawTarget, Filter, FilterCore, GpuCtx, ProcState, Processor, ResultTarget,
};
use gpgpu_runtime::transfer::MemTransfer;

/// A ping-pong render target pair for internal feedback.
///
/// Semantics:
/// - `prev_tex()` is the texture you sample from (previous pass)
/// - `next_target()` is the FBO/texture you render into (current pass)
/// - after rendering, call `swap()`
#[derive(Debug)]
pub struct PingPongTarget {
    a: RenderTarget,
    b: RenderTarget,
    a_is_prev: bool,
    size: Size2d,
}

impl PingPongTarget {
    /// Both targets start cleared to opaque black.
    pub fn new(gpu: &dyn Gpu, size: Size2d) -> Result<Self, EngineError> {
        let mut a = create_render_target(gpu, size, TextureFormat::Rgba)?;
        let b = match create_render_target(gpu, size, TextureFormat::Rgba) {
            Ok(b) => b,
            Err(e) => {
                a.release(gpu);
                return Err(e);
            }
        };
        let target = Self {
            a,
            b,
            a_is_prev: true,
            size,
        };
        target.a.clear(gpu)?;
        target.b.clear(gpu)?;
        Ok(target)
    }

    pub fn size(&self) -> Size2d {
        self.size
    }

    /// The texture to sample as feedback.
    pub fn prev_tex(&self) -> Option<TextureId> {
        if self.a_is_prev {
            self.a.texture()
        } else {
            self.b.texture()
        }
    }

    /// The render target to draw into for this pass.
    pub fn next_target(&self) -> &RenderTarget {
        if self.a_is_prev {
            &self.b
        } else {
            &self.a
        }
    }

    /// Swap prev/next after completing a pass.
    pub fn swap(&mut self) {
        self.a_is_prev = !self.a_is_prev;
    }

    /// Recreate both targets at a new size (cleared to black).
    pub fn resize(&mut self, gpu: &dyn Gpu, size: Size2d) -> Result<(), EngineError> {
        self.a.resize(gpu, size)?;
        self.b.resize(gpu, size)?;
        self.size = size;
        self.a_is_prev = true;
        self.a.clear(gpu)?;
        self.b.clear(gpu)
    }

    pub fn release(&mut self, gpu: &dyn Gpu) {
        self.a.release(gpu);
        self.b.release(gpu);
    }
}

/// N filter stages run back to back as one node.
///
/// Intermediate passes alternate between the two halves of a
/// [`PingPongTarget`]; the last pass writes the node's own transfer-backed
/// output. Stage 0 receives the node's inputs, every later stage reads the
/// previous pass through slot 0.
#[derive(Debug)]
pub struct MultiPassProc {
    name: &'static str,
    stages: Vec<Box<dyn Filter>>,
    cores: Vec<FilterCore>,
    pingpong: Option<PingPongTarget>,
    transfer: Option<Box<dyn MemTransfer>>,
    fbo: Option<FrameBuffer>,
    state: ProcState,
    size: Size2d,
    order: usize,
    external_format: PixelFormat,
}

impl MultiPassProc {
    pub fn new(name: &'static str, stages: Vec<Box<dyn Filter>>) -> Result<Self, EngineError> {
        if stages.is_empty() {
            return Err(EngineError::precondition(format!("{name}: no stages")));
        }
        if let Some(s) = stages.iter().skip(1).find(|s| s.input_slots() != 1) {
            return Err(EngineError::precondition(format!(
                "{name}: stage {} takes {} inputs; only the first stage may take more than one",
                s.name(),
                s.input_slots()
            )));
        }
        let cores = stages
            .iter()
            .map(|s| FilterCore::new(s.name(), s.input_slots()))
            .collect();
        Ok(Self {
            name,
            stages,
            cores,
            pingpong: None,
            transfer: None,
            fbo: None,
            state: ProcState::Uninitialized,
            size: Size2d::default(),
            order: 0,
            external_format: PixelFormat::RGBA,
        })
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage(&self, i: usize) -> Option<&dyn Filter> {
        self.stages.get(i).map(|s| s.as_ref())
    }

    /// Mutable stage access; uniform changes apply on the next render.
    pub fn stage_mut(&mut self, i: usize) -> Option<&mut Box<dyn Filter>> {
        self.stages.get_mut(i)
    }

    fn allocate(
        &mut self,
        ctx: &GpuCtx<'_>,
        size: Size2d,
        prepare_for_external_input: bool,
    ) -> Result<(), EngineError> {
        if size.is_empty() {
            return Err(EngineError::precondition(format!(
                "{}: init with zero input size",
                self.name
            )));
        }
        let transfer = self.transfer.get_or_insert_with(|| ctx.transfers.create());
        if prepare_for_external_input {
            let tex = transfer.prepare_input(ctx.gpu, size, self.external_format, None)?;
            self.cores[0].set_input(0, tex)?;
        } else if transfer.input_texture().is_some() {
            transfer.release_input(ctx.gpu);
        }
        let (out_tex, reallocated) = transfer.refresh_output(ctx.gpu, size)?;

        let fbo = match self.fbo.take() {
            Some(f) => f,
            None => FrameBuffer::create(ctx.gpu)?,
        };
        let fbo = self.fbo.insert(fbo);
        fbo.ensure_texture(ctx.gpu, out_tex, size, reallocated)?;

        if self.stages.len() > 1 {
            match self.pingpong.as_mut() {
                Some(pp) if pp.size() == size => {}
                Some(pp) => pp.resize(ctx.gpu, size)?,
                None => self.pingpong = Some(PingPongTarget::new(ctx.gpu, size)?),
            }
        }
        self.size = size;
        Ok(())
    }
}

impl Processor for MultiPassProc {
    fn name(&self) -> &str {
        self.name
    }

    fn state(&self) -> ProcState {
        self.state
    }

    fn input_slots(&self) -> usize {
        self.stages[0].input_slots()
    }

    fn init(
        &mut self,
        ctx: &GpuCtx<'_>,
        in_size: Size2d,
        order: usize,
        prepare_for_external_input: bool,
    ) -> Result<(), EngineError> {
        if self.state != ProcState::Uninitialized {
            self.release(ctx.gpu);
        }
        self.order = order;
        for (core, stage) in self.cores.iter_mut().zip(&self.stages) {
            core.build(ctx, stage.as_ref())?;
        }
        self.allocate(ctx, in_size, prepare_for_external_input)?;
        self.state = ProcState::Initialized;
        tracing::debug!(
            proc = self.name,
            order,
            stages = self.stages.len(),
            w = in_size.width,
            h = in_size.height,
            "init"
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
            return self.init(ctx, in_size, self.order, prepare_for_external_input);
        }
        self.allocate(ctx, in_size, prepare_for_external_input)?;
        self.state = ProcState::Initialized;
        tracing::debug!(proc = self.name, w = in_size.width, h = in_size.height, "reinit");
        Ok(())
    }

    fn set_external_input_format(&mut self, format: PixelFormat) {
        self.external_format = format;
    }

    fn set_external_input_data(&mut self, ctx: &GpuCtx<'_>, data: &[u8]) -> Result<(), EngineError> {
        let transfer = self.transfer.as_mut().ok_or_else(|| {
            EngineError::precondition(format!("{}: set_external_input_data before init", self.name))
        })?;
        transfer.to_gpu(ctx.gpu, data)
    }

    fn use_texture(&mut self, slot: usize, tex: TextureId) -> Result<(), EngineError> {
        self.cores[0].set_input(slot, tex)
    }

    fn render(&mut self, ctx: &GpuCtx<'_>, position: usize) -> Result<(), EngineError> {
        let fbo = match (&self.fbo, self.state) {
            (Some(f), s) if s != ProcState::Uninitialized => f,
            _ => {
                return Err(EngineError::precondition(format!("{}: render before init", self.name)))
            }
        };
        let last = self.stages.len() - 1;
        for (i, (core, stage)) in self.cores.iter_mut().zip(&self.stages).enumerate() {
            if i > 0 {
                let prev = self
                    .pingpong
                    .as_ref()
                    .and_then(PingPongTarget::prev_tex)
                    .ok_or_else(|| EngineError::resource("texture", "intermediate pass missing"))?;
                core.set_input(0, prev)?;
            }
            if i == last {
                core.run(ctx, stage.as_ref(), DrawTarget::Framebuffer(fbo))?;
            } else {
                let pp = self
                    .pingpong
                    .as_mut()
                    .ok_or_else(|| EngineError::resource("texture", "intermediate pass missing"))?;
                core.run(ctx, stage.as_ref(), DrawTarget::Framebuffer(&pp.next_target().fbo))?;
                pp.swap();
            }
        }
        self.state = ProcState::Ready;
        tracing::trace!(proc = self.name, position, passes = self.stages.len(), "rendered");
        Ok(())
    }

    fn input_texture(&self) -> Option<TextureId> {
        self.cores[0].input(0)
    }

    fn output_texture(&self) -> Option<TextureId> {
        self.transfer.as_ref().and_then(|t| t.output_texture())
    }

    fn output_size(&self) -> Size2d {
        self.size
    }

    fn mem_transfer(&self) -> Option<&dyn MemTransfer> {
        self.transfer.as_deref()
    }

    fn mem_transfer_mut(&mut self) -> Option<&mut (dyn MemTransfer + 'static)> {
        self.transfer.as_deref_mut()
    }

    fn result_data(
        &mut self,
        ctx: &GpuCtx<'_>,
        target: ResultTarget<'_>,
        slot: usize,
    ) -> Result<(), EngineError> {
        let (fbo, transfer) = match (&self.fbo, &mut self.transfer) {
            (Some(f), Some(t)) => (f, t),
            _ => {
                return Err(EngineError::precondition(format!(
                    "{}: result_data before init",
                    self.name
                )))
            }
        };
        fbo.bind(ctx.gpu)?;
        let result = match target {
            ResultTarget::Queue => transfer.queue_readback(ctx.gpu, slot),
            ResultTarget::Buffer(buf) => transfer.read_slot(ctx.gpu, slot, buf),
            ResultTarget::Delegate(d) => transfer.read_slot_with(ctx.gpu, slot, d),
        };
        FrameBuffer::unbind(ctx.gpu);
        result
    }

    fn release(&mut self, gpu: &dyn Gpu) {
        for core in self.cores.iter_mut() {
            core.release(gpu);
            core.clear_inputs();
        }
        if let Some(mut pp) = self.pingpong.take() {
            pp.release(gpu);
        }
        if let Some(mut t) = self.transfer.take() {
            t.release(gpu);
        }
        if let Some(mut f) = self.fbo.take() {
            f.release(gpu);
        }
        self.state = ProcState::Uninitialized;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpgpu_runtime::filters::{Blend, Gain, Passthrough};
    use gpgpu_runtime::texture::Texture;
    use gpgpu_runtime::transfer::MemTransferFactory;
    use gpgpu_soft::SoftGpu;

    fn constant(gpu: &SoftGpu, size: Size2d, v: u8) -> Texture {
        let px: Vec<u8> = (0..size.area()).flat_map(|_| [v, v, v, 255]).collect();
        Texture::from_pixels(gpu, size, TextureFormat::Rgba, &px).unwrap()
    }

    #[test]
    fn ping_pong_alternates() {
        let gpu = SoftGpu::new();
        let mut pp = PingPongTarget::new(&gpu, Size2d::new(2, 2)).unwrap();
        let first = pp.prev_tex();
        let next = pp.next_target().texture();
        assert_ne!(first, next);
        pp.swap();
        assert_eq!(pp.prev_tex(), next);
        pp.resize(&gpu, Size2d::new(4, 4)).unwrap();
        assert_eq!(gpu.texture_size(pp.prev_tex().unwrap()), Some(Size2d::new(4, 4)));
        pp.release(&gpu);
        assert_eq!(gpu.live_textures(), 0);
    }

    #[test]
    fn stages_chain_in_order() {
        let gpu = SoftGpu::new();
        let factory = MemTransferFactory::generic();
        let ctx = GpuCtx::new(&gpu, &factory);
        let size = Size2d::new(4, 4);

        let stages: Vec<Box<dyn Filter>> = vec![
            Box::new(Gain::new(2.0)),
            Box::new(Passthrough),
            Box::new(Gain::new(3.0)),
        ];
        let mut proc = MultiPassProc::new("gain-chain", stages).unwrap();
        proc.init(&ctx, size, 0, false).unwrap();
        let input = constant(&gpu, size, 10);
        proc.use_texture(0, input.handle().unwrap()).unwrap();
        proc.render(&ctx, 0).unwrap();

        let mut buf = vec![0u8; 64];
        proc.result_data(&ctx, ResultTarget::Buffer(&mut buf), 0).unwrap();
        assert_eq!(&buf[..4], &[60, 60, 60, 255]);
    }

    #[test]
    fn only_first_stage_may_fan_in() {
        let stages: Vec<Box<dyn Filter>> = vec![Box::new(Gain::new(1.0)), Box::new(Blend::new(0.5))];
        assert!(matches!(
            MultiPassProc::new("bad", stages),
            Err(EngineError::Precondition(_))
        ));
        assert!(MultiPassProc::new("empty", Vec::new()).is_err());
    }
}
