use gpgpu_core::{ChromaChannels, EngineError, PixelFormat, RenderPhase, Size2d, TextureFormat, YuvLayout};

use super::{
    check_buf, stage_frame, upload_planes, FrameDelegate, InputSide, MemTransfer, OutputSide,
    TransferKind, YuvTextures,
};
use crate::gpu::{check_gpu_error, Gpu, PixelDest, TextureId};

/// Synchronous transfer: full texture uploads and direct `read_pixels`.
///
/// Has a single readback slot and cannot hand out mapped memory, so
/// asynchronous and delegate readback are rejected as unsupported.
#[derive(Debug, Default)]
pub struct GenericTransfer {
    chroma: ChromaChannels,
    input: InputSide,
    output: OutputSide,
    /// Reused for NV21 chroma reordering.
    staging: Vec<u8>,
}

impl GenericTransfer {
    pub fn new(chroma: ChromaChannels) -> Self {
        Self {
            chroma,
            ..Self::default()
        }
    }
}

impl MemTransfer for GenericTransfer {
    fn kind(&self) -> TransferKind {
        TransferKind::Generic
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
            self.input.allocate(gpu, size, format, self.chroma)?;
            tracing::debug!(w = size.width, h = size.height, ?format, "generic input prepared");
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
        self.output.allocate(gpu, size)
    }

    fn release_input(&mut self, gpu: &dyn Gpu) {
        self.input.release(gpu);
    }

    fn release_output(&mut self, gpu: &dyn Gpu) {
        self.output.release(gpu);
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
        let format = self.input.format().unwrap_or(PixelFormat::RGBA);
        if format == PixelFormat::Yuv(YuvLayout::Nv21) {
            self.staging.resize(need, 0);
            stage_frame(format, self.input.size(), data, &mut self.staging);
            upload_planes(gpu, &self.input, Some(&self.staging))?;
        } else {
            upload_planes(gpu, &self.input, Some(&data[..need]))?;
        }
        check_gpu_error(gpu, "GenericTransfer", RenderPhase::Upload)
    }

    fn from_gpu(&mut self, gpu: &dyn Gpu, buf: &mut [u8]) -> Result<(), EngineError> {
        let need = self.output.frame_len()?;
        check_buf(buf, need)?;
        let size = self.output.size();
        gpu.read_pixels(
            size.width,
            size.height,
            self.output.format,
            PixelDest::Slice(&mut buf[..need]),
        );
        check_gpu_error(gpu, "GenericTransfer", RenderPhase::Readback)
    }

    fn from_gpu_with(&mut self, _gpu: &dyn Gpu, _delegate: FrameDelegate<'_>) -> Result<(), EngineError> {
        tracing::error!("frame delegate readback requested on the generic transfer");
        Err(EngineError::unsupported(
            "frame delegate readback requires the pixel-buffer transfer",
        ))
    }

    fn output_slots(&self) -> usize {
        1
    }

    fn queue_readback(&mut self, _gpu: &dyn Gpu, _slot: usize) -> Result<(), EngineError> {
        Err(EngineError::unsupported(
            "asynchronous readback requires the pixel-buffer transfer",
        ))
    }

    fn read_slot(&mut self, gpu: &dyn Gpu, slot: usize, buf: &mut [u8]) -> Result<(), EngineError> {
        if slot != 0 {
            return Err(EngineError::precondition(format!(
                "readback slot {slot} out of range (generic transfer has 1)"
            )));
        }
        self.from_gpu(gpu, buf)
    }

    fn read_slot_with(
        &mut self,
        gpu: &dyn Gpu,
        _slot: usize,
        delegate: FrameDelegate<'_>,
    ) -> Result<(), EngineError> {
        self.from_gpu_with(gpu, delegate)
    }

    fn set_output_format(&mut self, format: TextureFormat) -> Result<(), EngineError> {
        self.output.set_format(format)
    }

    fn output_format(&self) -> TextureFormat {
        self.output.format
    }
}
