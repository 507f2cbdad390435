#![forbid(unsafe_code)]
#![deny(missing_debug_implementations)]

use std::any::Any;

use gpgpu_core::{EngineError, PixelFormat, Size2d, TextureFormat};
use gpgpu_runtime::filters::Passthrough;
use gpgpu_runtime::fbo::{create_render_target, FrameBuffer, RenderTarget};
use gpgpu_runtime::gpu::{Gpu, TextureId};
use gpgpu_runtime::proc::{DrawTarget, FilterCore, GpuCtx, ProcState, Processor, ResultTarget};
use gpgpu_runtime::transfer::MemTransfer;

/// Write position and fill level of a ring of `cap` slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingIndex {
    cap: usize,
    head: usize, // next write position
    len: usize,
}

impl RingIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            cap: capacity.max(1),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Commit a write at `head`; the oldest entry is evicted when full.
    pub fn advance(&mut self) {
        self.head = (self.head + 1) % self.cap;
        self.len = (self.len + 1).min(self.cap);
    }

    pub fn reset(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Map "frames_ago" (0 = newest) to a slot index inside the ring.
    pub fn slot_for_frames_ago(&self, frames_ago: usize) -> Option<usize> {
        if frames_ago >= self.len {
            return None;
        }
        Some((self.head + self.cap - 1 - frames_ago) % self.cap)
    }

    /// Map an oldest-first position to a slot index.
    pub fn slot_for_index(&self, index: usize) -> Option<usize> {
        if index >= self.len {
            return None;
        }
        let start = (self.head + self.cap - self.len) % self.cap;
        Some((start + index) % self.cap)
    }
}

/// A temporal ring buffer of GPU render targets.
///
/// - The owner decides when to push.
/// - Shaders sample prior frames as separate textures.
/// - N separate 2D textures (not a texture array) for portability.
#[derive(Debug)]
pub struct TemporalRing {
    size: Size2d,
    slots: Vec<RenderTarget>,
    index: RingIndex,
    copy: FilterCore,
}

impl TemporalRing {
    pub fn new(ctx: &GpuCtx<'_>, size: Size2d, capacity: usize) -> Result<Self, EngineError> {
        let index = RingIndex::new(capacity);
        let mut ring = Self {
            size,
            slots: Vec::with_capacity(index.capacity()),
            index,
            copy: FilterCore::new("fifo-push", 1),
        };
        if let Err(e) = ring.allocate(ctx) {
            ring.release(ctx.gpu);
            return Err(e);
        }
        Ok(ring)
    }

    fn allocate(&mut self, ctx: &GpuCtx<'_>) -> Result<(), EngineError> {
        self.copy.build(ctx, &Passthrough)?;
        for _ in 0..self.index.capacity() {
            let rt = create_render_target(ctx.gpu, self.size, TextureFormat::Rgba)?;
            rt.clear(ctx.gpu)?;
            self.slots.push(rt);
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.index.capacity()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn size(&self) -> Size2d {
        self.size
    }

    /// Copy `src` into the next slot by drawing it through a passthrough pass.
    pub fn push(&mut self, ctx: &GpuCtx<'_>, src: TextureId) -> Result<(), EngineError> {
        let dst = &self.slots[self.index.head()];
        self.copy.set_input(0, src)?;
        self.copy
            .run(ctx, &Passthrough, DrawTarget::Framebuffer(&dst.fbo))?;
        self.index.advance();
        Ok(())
    }

    /// Texture of the frame pushed `frames_ago` pushes back (0 = newest).
    pub fn tex_frames_ago(&self, frames_ago: usize) -> Option<TextureId> {
        let slot = self.index.slot_for_frames_ago(frames_ago)?;
        self.slots[slot].texture()
    }

    /// Oldest-first access: `get(0)` is the oldest retained frame.
    pub fn get(&self, index: usize) -> Option<&RenderTarget> {
        let slot = self.index.slot_for_index(index)?;
        self.slots.get(slot)
    }

    /// Recreate every slot at a new size. Retained history is dropped.
    pub fn resize(&mut self, ctx: &GpuCtx<'_>, size: Size2d) -> Result<(), EngineError> {
        for rt in self.slots.iter_mut() {
            rt.release(ctx.gpu);
        }
        self.slots.clear();
        self.index.reset();
        self.size = size;
        for _ in 0..self.index.capacity() {
            let rt = create_render_target(ctx.gpu, size, TextureFormat::Rgba)?;
            rt.clear(ctx.gpu)?;
            self.slots.push(rt);
        }
        Ok(())
    }

    pub fn release(&mut self, gpu: &dyn Gpu) {
        for rt in self.slots.iter_mut() {
            rt.release(gpu);
        }
        self.slots.clear();
        self.copy.release(gpu);
        self.index.reset();
    }
}

/// Delay line: keeps the last `capacity` frames of its input.
///
/// Each render copies the input into the node's own output (readable through
/// its memory transfer like any other node) and pushes that output into a
/// [`TemporalRing`]. `history_texture(0)` is the newest frame; indexing with
/// [`FifoProc::get`] is oldest first.
#[derive(Debug)]
pub struct FifoProc {
    capacity: usize,
    core: FilterCore,
    ring: Option<TemporalRing>,
    transfer: Option<Box<dyn MemTransfer>>,
    fbo: Option<FrameBuffer>,
    state: ProcState,
    size: Size2d,
    order: usize,
    external_format: PixelFormat,
}

impl FifoProc {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            core: FilterCore::new("fifo", 1),
            ring: None,
            transfer: None,
            fbo: None,
            state: ProcState::Uninitialized,
            size: Size2d::default(),
            order: 0,
            external_format: PixelFormat::RGBA,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames currently retained.
    pub fn len(&self) -> usize {
        self.ring.as_ref().map_or(0, TemporalRing::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Texture of the `index`-th retained frame, oldest first.
    pub fn get(&self, index: usize) -> Option<TextureId> {
        self.ring.as_ref()?.get(index)?.texture()
    }

    /// Read back the `index`-th retained frame (oldest first) as RGBA rows.
    pub fn read_history(
        &mut self,
        ctx: &GpuCtx<'_>,
        index: usize,
        buf: &mut [u8],
    ) -> Result<(), EngineError> {
        let ring = self
            .ring
            .as_ref()
            .ok_or_else(|| EngineError::precondition("fifo: read_history before init"))?;
        let rt = ring.get(index).ok_or_else(|| {
            EngineError::precondition(format!("fifo: index {index} beyond {} frames", ring.len()))
        })?;
        let transfer = self
            .transfer
            .as_mut()
            .ok_or_else(|| EngineError::precondition("fifo: read_history before init"))?;
        rt.fbo.bind(ctx.gpu)?;
        let result = transfer.from_gpu(ctx.gpu, buf);
        FrameBuffer::unbind(ctx.gpu);
        result
    }

    fn allocate(
        &mut self,
        ctx: &GpuCtx<'_>,
        size: Size2d,
        prepare_for_external_input: bool,
    ) -> Result<(), EngineError> {
        if size.is_empty() {
            return Err(EngineError::precondition("fifo: init with zero input size"));
        }
        let transfer = self.transfer.get_or_insert_with(|| ctx.transfers.create());
        if prepare_for_external_input {
            let tex = transfer.prepare_input(ctx.gpu, size, self.external_format, None)?;
            self.core.set_input(0, tex)?;
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

        match self.ring.as_mut() {
            Some(ring) if ring.size() == size => {}
            Some(ring) => ring.resize(ctx, size)?,
            None => self.ring = Some(TemporalRing::new(ctx, size, self.capacity)?),
        }
        self.size = size;
        Ok(())
    }
}

impl Processor for FifoProc {
    fn name(&self) -> &str {
        "fifo"
    }

    fn state(&self) -> ProcState {
        self.state
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
        self.core.build(ctx, &Passthrough)?;
        self.allocate(ctx, in_size, prepare_for_external_input)?;
        self.state = ProcState::Initialized;
        tracing::debug!(
            proc = "fifo",
            order,
            capacity = self.capacity,
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
        tracing::debug!(proc = "fifo", w = in_size.width, h = in_size.height, "reinit");
        Ok(())
    }

    fn set_external_input_format(&mut self, format: PixelFormat) {
        self.external_format = format;
    }

    fn set_external_input_data(&mut self, ctx: &GpuCtx<'_>, data: &[u8]) -> Result<(), EngineError> {
        let transfer = self
            .transfer
            .as_mut()
            .ok_or_else(|| EngineError::precondition("fifo: set_external_input_data before init"))?;
        transfer.to_gpu(ctx.gpu, data)
    }

    fn use_texture(&mut self, slot: usize, tex: TextureId) -> Result<(), EngineError> {
        self.core.set_input(slot, tex)
    }

    fn render(&mut self, ctx: &GpuCtx<'_>, position: usize) -> Result<(), EngineError> {
        let (fbo, ring, out) = match (&self.fbo, self.ring.as_mut(), self.transfer.as_ref()) {
            (Some(f), Some(r), Some(t)) if self.state != ProcState::Uninitialized => {
                (f, r, t.output_texture())
            }
            _ => return Err(EngineError::precondition("fifo: render before init")),
        };
        let out = out.ok_or_else(|| EngineError::resource("texture", "fifo output missing"))?;
        self.core.run(ctx, &Passthrough, DrawTarget::Framebuffer(fbo))?;
        ring.push(ctx, out)?;
        self.state = ProcState::Ready;
        tracing::trace!(proc = "fifo", position, len = ring.len(), "rendered");
        Ok(())
    }

    fn input_texture(&self) -> Option<TextureId> {
        self.core.input(0)
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
            _ => return Err(EngineError::precondition("fifo: result_data before init")),
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

    fn history_texture(&self, age: usize) -> Option<TextureId> {
        self.ring.as_ref()?.tex_frames_ago(age)
    }

    fn history_capacity(&self) -> usize {
        self.capacity
    }

    fn release(&mut self, gpu: &dyn Gpu) {
        self.core.release(gpu);
        if let Some(mut ring) = self.ring.take() {
            ring.release(gpu);
        }
        if let Some(mut t) = self.transfer.take() {
            t.release(gpu);
        }
        if let Some(mut f) = self.fbo.take() {
            f.release(gpu);
        }
        self.core.clear_inputs();
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
    use gpgpu_runtime::texture::Texture;
    use gpgpu_runtime::transfer::MemTransferFactory;
    use gpgpu_soft::SoftGpu;

    #[test]
    fn ring_index_evicts_oldest() {
        let mut idx = RingIndex::new(3);
        assert_eq!(idx.slot_for_frames_ago(0), None);
        for _ in 0..4 {
            idx.advance();
        }
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.head(), 1);
        // slots 1, 2, 0 hold pushes 2, 3, 4
        assert_eq!(idx.slot_for_index(0), Some(1));
        assert_eq!(idx.slot_for_index(2), Some(0));
        assert_eq!(idx.slot_for_frames_ago(0), Some(0));
        assert_eq!(idx.slot_for_frames_ago(2), Some(1));
        assert_eq!(idx.slot_for_frames_ago(3), None);
    }

    #[test]
    fn partially_filled_ring_is_oldest_first() {
        let mut idx = RingIndex::new(4);
        idx.advance();
        idx.advance();
        assert_eq!(idx.slot_for_index(0), Some(0));
        assert_eq!(idx.slot_for_index(1), Some(1));
        assert_eq!(idx.slot_for_index(2), None);
        assert_eq!(idx.slot_for_frames_ago(0), Some(1));
    }

    #[test]
    fn fifo_keeps_last_frames() {
        let gpu = SoftGpu::new();
        let factory = MemTransferFactory::generic();
        let ctx = GpuCtx::new(&gpu, &factory);
        let size = Size2d::new(4, 4);

        let mut fifo = FifoProc::new(2);
        fifo.init(&ctx, size, 0, false).unwrap();
        for v in [10u8, 20, 30] {
            let mut tex = Texture::from_pixels(&gpu, size, TextureFormat::Rgba, &vec![v; 64]).unwrap();
            fifo.use_texture(0, tex.handle().unwrap()).unwrap();
            fifo.render(&ctx, 0).unwrap();
            tex.release(&gpu);
        }
        assert_eq!(fifo.len(), 2);
        let oldest = gpu.texture_pixels(fifo.get(0).unwrap()).unwrap();
        assert_eq!(oldest[0], 20);
        let newest = gpu.texture_pixels(fifo.history_texture(0).unwrap()).unwrap();
        assert_eq!(newest[0], 30);

        let mut buf = vec![0u8; 64];
        fifo.read_history(&ctx, 0, &mut buf).unwrap();
        assert_eq!(buf[0], 20);

        fifo.release(&gpu);
        assert_eq!(gpu.live_textures(), 0);
    }
}
