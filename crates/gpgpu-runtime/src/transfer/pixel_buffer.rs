use gpgpu_core::{ChromaChannels, EngineError, PixelFormat, RenderPhase, Size2d, TextureFormat};

use super::{
    check_buf, stage_frame, upload_planes, FrameDelegate, InputSide, MemTransfer, OutputSide,
    TransferKind, YuvTextures,
};
use crate::gpu::{
    check_gpu_error, BufferId, BufferTarget, BufferUsage, Gpu, PixelDest, TextureId,
};

/// One read-side pack buffer.
#[derive(Debug)]
struct ReadSlot {
    buf: BufferId,
    /// A `read_pixels` into this buffer was issued and not yet consumed.
    queued: bool,
}

/// Transfer through mapped pixel buffers.
///
/// Uploads go host -> mapped unpack buffer -> partial texture update.
/// Readback goes framebuffer -> pack buffer -> mapped read. With more than one
/// slot, frame N can be queued while frame N-1's slot is consumed; the caller
/// always reads a slot older than the one in flight.
#[derive(Debug)]
pub struct PixelBufferTransfer {
    chroma: ChromaChannels,
    input: InputSide,
    write_buf: Option<BufferId>,
    output: OutputSide,
    slot_count: usize,
    slots: Vec<ReadSlot>,
}

impl PixelBufferTransfer {
    pub fn new(chroma: ChromaChannels, slot_count: usize) -> Self {
        Self {
            chroma,
            input: InputSide::default(),
            write_buf: None,
            output: OutputSide::default(),
            slot_count: slot_count.max(1),
            slots: Vec::new(),
        }
    }

    fn alloc_buffer(
        gpu: &dyn Gpu,
        target: BufferTarget,
        len: usize,
        usage: BufferUsage,
    ) -> Result<BufferId, EngineError> {
        let buf = gpu
            .create_buffer()
            .map_err(|e| EngineError::resource("pixel buffer", e))?;
        gpu.bind_buffer(target, Some(buf));
        gpu.buffer_data_size(target, len, usage);
        gpu.bind_buffer(target, None);
        Ok(buf)
    }

    fn slot(&self, slot: usize) -> Result<&ReadSlot, EngineError> {
        if self.output.id().is_none() {
            return Err(EngineError::precondition("readback before prepare_output"));
        }
        self.slots.get(slot).ok_or_else(|| {
            EngineError::precondition(format!(
                "readback slot {slot} out of range ({} slots)",
                self.slots.len()
            ))
        })
    }

    /// Issue `read_pixels` of the bound framebuffer into a slot's pack buffer.
    fn issue_read(&mut self, gpu: &dyn Gpu, slot: usize) -> Result<(), EngineError> {
        let buf = self.slot(slot)?.buf;
        let size = self.output.size();
        gpu.bind_buffer(BufferTarget::PixelPack, Some(buf));
        gpu.read_pixels(size.width, size.height, self.output.format, PixelDest::PackOffset(0));
        gpu.bind_buffer(BufferTarget::PixelPack, None);
        check_gpu_error(gpu, "PixelBufferTransfer", RenderPhase::Readback)?;
        self.slots[slot].queued = true;
        Ok(())
    }

    /// Map a slot (issuing a synchronous read first if nothing is queued) and
    /// hand the mapped bytes to `consume`.
    fn consume_slot(
        &mut self,
        gpu: &dyn Gpu,
        slot: usize,
        consume: &mut dyn FnMut(Size2d, &[u8], usize),
    ) -> Result<(), EngineError> {
        if !self.slot(slot)?.queued {
            self.issue_read(gpu, slot)?;
        }
        let len = self.output.frame_len()?;
        let size = self.output.size();
        let bpr = self.bytes_per_row();
        let buf = self.slots[slot].buf;

        gpu.bind_buffer(BufferTarget::PixelPack, Some(buf));
        let mapped = gpu.map_buffer_read(BufferTarget::PixelPack, len, &mut |bytes| {
            consume(size, bytes, bpr)
        });
        gpu.bind_buffer(BufferTarget::PixelPack, None);
        self.slots[slot].queued = false;

        if !mapped {
            return Err(EngineError::resource("pixel buffer", "map for read failed"));
        }
        check_gpu_error(gpu, "PixelBufferTransfer", RenderPhase::Readback)
    }
}

impl MemTransfer for PixelBufferTransfer {
    fn kind(&self) -> TransferKind {
        TransferKind::PixelBuffer
    }

    fn prepare_input(
        &mut self,
        gpu: &dyn Gpu,
        size: Size2d,
        format: PixelFormat,
        data: Option<&[u8]>,
    ) -> Result<TextureId, EngineError> {
        if size.is_empty() {
            return Err(EngineError::precondition("prepare_input with zero dimensions"));
        }
        if !self.input.matches(size, format) || data.is_some() {
            self.release_input(gpu);
            self.input.allocate(gpu, size, format, self.chroma)?;
            let len = format.frame_len(size).max(size.area() * 4);
            match Self::alloc_buffer(gpu, BufferTarget::PixelUnpack, len, BufferUsage::StreamDraw) {
                Ok(b) => self.write_buf = Some(b),
                Err(e) => {
                    self.input.release(gpu);
                    return Err(e);
                }
            }
            tracing::debug!(w = size.width, h = size.height, ?format, len, "pixel-buffer input prepared");
        }
        if let Some(d) = data {
            self.to_gpu(gpu, d)?;
        }
        self.input
            .primary()
            .ok_or_else(|| EngineError::resource("texture", "input texture missing after prepare"))
    }

    fn prepare_output(&mut self, gpu: &dyn Gpu, size: Size2d) -> Result<TextureId, EngineError> {
        if size.is_empty() {
            return Err(EngineError::precondition("prepare_output with zero dimensions"));
        }
        if let (true, Some(id)) = (self.output.matches(size), self.output.id()) {
            return Ok(id);
        }
        self.release_output(gpu);
        let id = self.output.allocate(gpu, size)?;
        let len = size.area() * 4;
        for _ in 0..self.slot_count {
            match Self::alloc_buffer(gpu, BufferTarget::PixelPack, len, BufferUsage::StreamRead) {
                Ok(buf) => self.slots.push(ReadSlot { buf, queued: false }),
                Err(e) => {
                    self.release_output(gpu);
                    return Err(e);
                }
            }
        }
        tracing::debug!(w = size.width, h = size.height, slots = self.slot_count, "pixel-buffer output prepared");
        Ok(id)
    }

    fn release_input(&mut self, gpu: &dyn Gpu) {
        self.input.release(gpu);
        if let Some(b) = self.write_buf.take() {
            gpu.delete_buffer(b);
        }
    }

    fn release_output(&mut self, gpu: &dyn Gpu) {
        self.output.release(gpu);
        for s in self.slots.drain(..) {
            gpu.delete_buffer(s.buf);
        }
    }

    fn input_texture(&self) -> Option<TextureId> {
        self.input.primary()
    }

    fn output_texture(&self) -> Option<TextureId> {
        self.output.id()
    }

    fn input_size(&self) -> Size2d {
        self.input.size()
    }

    fn output_size(&self) -> Size2d {
        self.output.size()
    }

    fn input_format(&self) -> Option<PixelFormat> {
        self.input.format()
    }

    fn yuv_textures(&self) -> Option<YuvTextures> {
        self.input.yuv_textures()
    }

    fn to_gpu(&mut self, gpu: &dyn Gpu, data: &[u8]) -> Result<(), EngineError> {
        let need = self.input.check_frame(data)?;
        let buf = self
            .write_buf
            .ok_or_else(|| EngineError::precondition("to_gpu before prepare_input"))?;
        let format = self.input.format().unwrap_or(PixelFormat::RGBA);
        let size = self.input.size();

        gpu.bind_buffer(BufferTarget::PixelUnpack, Some(buf));
        let mapped = gpu.map_buffer_write(BufferTarget::PixelUnpack, need, &mut |dst| {
            stage_frame(format, size, &data[..need], dst)
        });
        if !mapped {
            gpu.bind_buffer(BufferTarget::PixelUnpack, None);
            return Err(EngineError::resource("pixel buffer", "map for write failed"));
        }
        let uploaded = upload_planes(gpu, &self.input, None);
        gpu.bind_buffer(BufferTarget::PixelUnpack, None);
        uploaded?;
        check_gpu_error(gpu, "PixelBufferTransfer", RenderPhase::Upload)
    }

    fn from_gpu(&mut self, gpu: &dyn Gpu, buf: &mut [u8]) -> Result<(), EngineError> {
        self.read_slot(gpu, 0, buf)
    }

    fn from_gpu_with(&mut self, gpu: &dyn Gpu, delegate: FrameDelegate<'_>) -> Result<(), EngineError> {
        self.read_slot_with(gpu, 0, delegate)
    }

    fn output_slots(&self) -> usize {
        self.slot_count
    }

    fn queue_readback(&mut self, gpu: &dyn Gpu, slot: usize) -> Result<(), EngineError> {
        self.issue_read(gpu, slot)
    }

    fn read_slot(&mut self, gpu: &dyn Gpu, slot: usize, buf: &mut [u8]) -> Result<(), EngineError> {
        let need = self.output.frame_len()?;
        check_buf(buf, need)?;
        self.consume_slot(gpu, slot, &mut |_, bytes, _| {
            let n = need.min(bytes.len());
            buf[..n].copy_from_slice(&bytes[..n]);
        })
    }

    fn read_slot_with(
        &mut self,
        gpu: &dyn Gpu,
        slot: usize,
        delegate: FrameDelegate<'_>,
    ) -> Result<(), EngineError> {
        self.consume_slot(gpu, slot, delegate)
    }

    fn set_output_format(&mut self, format: TextureFormat) -> Result<(), EngineError> {
        self.output.set_format(format)
    }

    fn output_format(&self) -> TextureFormat {
        self.output.format
    }
}
