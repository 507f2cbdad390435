//! CPU <-> GPU pixel movement.
//!
//! Every processor owns one [`MemTransfer`]: its output texture lives here, and
//! source nodes additionally use the input side to receive host frames. Two
//! variants exist: [`GenericTransfer`] (synchronous full uploads and direct
//! `read_pixels`) and, with the `pixel-buffers` feature, [`PixelBufferTransfer`]
//! (mapped unpack/pack buffers with multi-slot asynchronous readback). The
//! [`MemTransferFactory`] picks one per pipeline from config and context caps.

mod factory;
mod generic;
#[cfg(feature = "pixel-buffers")]
mod pixel_buffer;

use std::fmt;

use gpgpu_core::{ChromaChannels, EngineError, PixelFormat, Size2d, TextureFormat, YuvLayout};

use crate::gpu::{Gpu, PixelSource, TextureId};
use crate::texture::Texture;

pub use factory::MemTransferFactory;
pub use generic::GenericTransfer;
#[cfg(feature = "pixel-buffers")]
pub use pixel_buffer::PixelBufferTransfer;

/// Zero-copy result consumer: `(size, pixels, bytes_per_row)`.
pub type FrameDelegate<'a> = &'a mut dyn FnMut(Size2d, &[u8], usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Generic,
    PixelBuffer,
}

/// Chroma plane textures of an uploaded YUV frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaTextures {
    /// UV pairs in one texture (`RedGreen` or `LuminanceAlpha`).
    Interleaved { tex: TextureId, format: TextureFormat },
    Planar { u: TextureId, v: TextureId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YuvTextures {
    pub luma: TextureId,
    pub chroma: ChromaTextures,
}

/// Capability interface of one transfer endpoint.
///
/// `prepare_*` must precede every transfer call on that side; calls made
/// before it fail with [`EngineError::Precondition`].
pub trait MemTransfer: fmt::Debug {
    fn kind(&self) -> TransferKind;

    /// Allocate the input texture(s). No-op (same handle) when size and
    /// format are unchanged and `data` is `None`; otherwise reallocates and,
    /// when `data` is given, uploads it.
    fn prepare_input(
        &mut self,
        gpu: &dyn Gpu,
        size: Size2d,
        format: PixelFormat,
        data: Option<&[u8]>,
    ) -> Result<TextureId, EngineError>;

    /// Allocate the output texture and read-side buffers. Idempotent per size.
    fn prepare_output(&mut self, gpu: &dyn Gpu, size: Size2d) -> Result<TextureId, EngineError>;

    /// [`prepare_output`](Self::prepare_output), also reporting whether the
    /// output texture was (re)allocated. A new texture may reuse a deleted name.
    fn refresh_output(&mut self, gpu: &dyn Gpu, size: Size2d) -> Result<(TextureId, bool), EngineError> {
        let kept = self.output_texture().filter(|_| self.output_size() == size);
        let id = self.prepare_output(gpu, size)?;
        Ok((id, kept != Some(id)))
    }

    fn release_input(&mut self, gpu: &dyn Gpu);
    fn release_output(&mut self, gpu: &dyn Gpu);

    fn release(&mut self, gpu: &dyn Gpu) {
        self.release_input(gpu);
        self.release_output(gpu);
    }

    fn input_texture(&self) -> Option<TextureId>;
    fn output_texture(&self) -> Option<TextureId>;
    fn input_size(&self) -> Size2d;
    fn output_size(&self) -> Size2d;
    fn input_format(&self) -> Option<PixelFormat>;
    /// Plane textures when the input is YUV.
    fn yuv_textures(&self) -> Option<YuvTextures>;

    /// Copy one host frame (`input_format().frame_len(input_size())` bytes) to the input texture(s).
    fn to_gpu(&mut self, gpu: &dyn Gpu, data: &[u8]) -> Result<(), EngineError>;

    /// Synchronously read the output into `buf` (`bytes_per_row() * height` bytes).
    /// The framebuffer holding the output must be bound.
    fn from_gpu(&mut self, gpu: &dyn Gpu, buf: &mut [u8]) -> Result<(), EngineError>;

    /// Hand the output to `delegate` without an intermediate copy.
    fn from_gpu_with(&mut self, gpu: &dyn Gpu, delegate: FrameDelegate<'_>) -> Result<(), EngineError>;

    fn output_slots(&self) -> usize;

    /// Start an asynchronous readback of the bound output into `slot`.
    fn queue_readback(&mut self, gpu: &dyn Gpu, slot: usize) -> Result<(), EngineError>;

    /// Complete a queued readback (or read synchronously if none is pending).
    fn read_slot(&mut self, gpu: &dyn Gpu, slot: usize, buf: &mut [u8]) -> Result<(), EngineError>;

    fn read_slot_with(
        &mut self,
        gpu: &dyn Gpu,
        slot: usize,
        delegate: FrameDelegate<'_>,
    ) -> Result<(), EngineError>;

    /// Channel order of read-back pixels.
    fn set_output_format(&mut self, format: TextureFormat) -> Result<(), EngineError>;
    fn output_format(&self) -> TextureFormat;

    fn bytes_per_row(&self) -> usize {
        self.output_size().width as usize * 4
    }
}

// ---- shared input/output bookkeeping ----

/// Input textures: one for RGBA-family frames, two or three for YUV planes.
#[derive(Debug, Default)]
pub(crate) struct InputSide {
    size: Size2d,
    format: Option<PixelFormat>,
    planes: Vec<(Texture, usize)>,
}

impl InputSide {
    pub(crate) fn matches(&self, size: Size2d, format: PixelFormat) -> bool {
        !self.planes.is_empty() && self.size == size && self.format == Some(format)
    }

    pub(crate) fn allocate(
        &mut self,
        gpu: &dyn Gpu,
        size: Size2d,
        format: PixelFormat,
        chroma: ChromaChannels,
    ) -> Result<(), EngineError> {
        self.release(gpu);
        let descs: Vec<(Size2d, TextureFormat, usize)> = match format {
            PixelFormat::Texture(t) => vec![(size, t, 0)],
            PixelFormat::Yuv(layout) => layout
                .planes(size)
                .into_iter()
                .map(|p| {
                    let fmt = match (p.channels, chroma) {
                        (1, _) => TextureFormat::Luminance,
                        (_, ChromaChannels::LuminanceAlpha) => TextureFormat::LuminanceAlpha,
                        _ => TextureFormat::RedGreen,
                    };
                    (p.size, fmt, p.offset)
                })
                .collect(),
        };
        for (plane_size, fmt, offset) in descs {
            match Texture::create(gpu, plane_size, fmt) {
                Ok(t) => self.planes.push((t, offset)),
                Err(e) => {
                    self.release(gpu);
                    return Err(e);
                }
            }
        }
        self.size = size;
        self.format = Some(format);
        Ok(())
    }

    pub(crate) fn primary(&self) -> Option<TextureId> {
        self.planes.first().and_then(|(t, _)| t.id())
    }

    pub(crate) fn size(&self) -> Size2d {
        self.size
    }

    pub(crate) fn format(&self) -> Option<PixelFormat> {
        self.format
    }

    /// Validate readiness and frame length; returns the expected byte count.
    pub(crate) fn check_frame(&self, data: &[u8]) -> Result<usize, EngineError> {
        let format = match (self.format, self.planes.is_empty()) {
            (Some(f), false) => f,
            _ => return Err(EngineError::precondition("to_gpu before prepare_input")),
        };
        let need = format.frame_len(self.size);
        if data.len() < need {
            return Err(EngineError::precondition(format!(
                "to_gpu needs {need} bytes for {}x{} {format:?}, got {}",
                self.size.width,
                self.size.height,
                data.len()
            )));
        }
        Ok(need)
    }

    pub(crate) fn planes(&self) -> impl Iterator<Item = &(Texture, usize)> {
        self.planes.iter()
    }

    pub(crate) fn yuv_textures(&self) -> Option<YuvTextures> {
        if !matches!(self.format, Some(PixelFormat::Yuv(_))) {
            return None;
        }
        let luma = self.planes.first()?.0.id()?;
        let chroma = match &self.planes[1..] {
            [(c, _)] => ChromaTextures::Interleaved {
                tex: c.id()?,
                format: c.format(),
            },
            [(u, _), (v, _)] => ChromaTextures::Planar {
                u: u.id()?,
                v: v.id()?,
            },
            _ => return None,
        };
        Some(YuvTextures { luma, chroma })
    }

    pub(crate) fn release(&mut self, gpu: &dyn Gpu) {
        for (t, _) in self.planes.iter_mut() {
            t.release(gpu);
        }
        self.planes.clear();
        self.format = None;
        self.size = Size2d::default();
    }
}

/// Copy a host frame into `dst`, swapping NV21 chroma pairs into UV order.
pub(crate) fn stage_frame(format: PixelFormat, size: Size2d, src: &[u8], dst: &mut [u8]) {
    let len = dst.len().min(src.len());
    dst[..len].copy_from_slice(&src[..len]);
    if format == PixelFormat::Yuv(YuvLayout::Nv21) {
        let chroma_start = size.area();
        for pair in dst[chroma_start..len].chunks_exact_mut(2) {
            pair.swap(0, 1);
        }
    }
}

/// Upload every input plane.
///
/// With a staged host slice each plane is fully re-specified; without one the
/// planes are partially updated from the bound unpack buffer.
pub(crate) fn upload_planes(
    gpu: &dyn Gpu,
    input: &InputSide,
    staged: Option<&[u8]>,
) -> Result<(), EngineError> {
    for (tex, offset) in input.planes() {
        let len = tex.size().area() * tex.format().bytes_per_pixel();
        match staged {
            Some(bytes) => tex.respecify(gpu, PixelSource::Slice(&bytes[*offset..*offset + len]))?,
            None => tex.update(gpu, PixelSource::UnpackOffset(*offset))?,
        }
    }
    Ok(())
}

/// Output texture plus the readback channel order.
#[derive(Debug)]
pub(crate) struct OutputSide {
    pub(crate) tex: Option<Texture>,
    pub(crate) format: TextureFormat,
}

impl Default for OutputSide {
    fn default() -> Self {
        Self {
            tex: None,
            format: TextureFormat::Rgba,
        }
    }
}

impl OutputSide {
    pub(crate) fn matches(&self, size: Size2d) -> bool {
        self.tex.as_ref().is_some_and(|t| t.is_live() && t.size() == size)
    }

    pub(crate) fn allocate(&mut self, gpu: &dyn Gpu, size: Size2d) -> Result<TextureId, EngineError> {
        self.release(gpu);
        let tex = Texture::create(gpu, size, TextureFormat::Rgba)?;
        let id = tex.handle()?;
        self.tex = Some(tex);
        Ok(id)
    }

    pub(crate) fn id(&self) -> Option<TextureId> {
        self.tex.as_ref().and_then(Texture::id)
    }

    pub(crate) fn size(&self) -> Size2d {
        self.tex.as_ref().map(Texture::size).unwrap_or_default()
    }

    /// Readback byte count, or a precondition error if nothing is prepared.
    pub(crate) fn frame_len(&self) -> Result<usize, EngineError> {
        if self.id().is_none() {
            return Err(EngineError::precondition("readback before prepare_output"));
        }
        Ok(self.size().area() * 4)
    }

    pub(crate) fn set_format(&mut self, format: TextureFormat) -> Result<(), EngineError> {
        if !format.is_rgba_family() {
            return Err(EngineError::unsupported(format!(
                "readback format {format:?} (only RGBA/BGRA)"
            )));
        }
        self.format = format;
        Ok(())
    }

    pub(crate) fn release(&mut self, gpu: &dyn Gpu) {
        if let Some(mut t) = self.tex.take() {
            t.release(gpu);
        }
    }
}

pub(crate) fn check_buf(buf: &[u8], need: usize) -> Result<(), EngineError> {
    if buf.len() < need {
        return Err(EngineError::precondition(format!(
            "readback buffer needs {need} bytes, got {}",
            buf.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv21_staging_swaps_chroma_pairs() {
        let size = Size2d::new(2, 2);
        let src = [1, 2, 3, 4, 10, 20];
        let mut dst = [0u8; 6];
        stage_frame(PixelFormat::Yuv(YuvLayout::Nv21), size, &src, &mut dst);
        assert_eq!(dst, [1, 2, 3, 4, 20, 10]);

        stage_frame(PixelFormat::NV12, size, &src, &mut dst);
        assert_eq!(dst, src);
    }
}
