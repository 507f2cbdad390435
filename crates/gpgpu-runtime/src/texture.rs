use gpgpu_core::{EngineError, Size2d, TextureFormat};

use crate::gpu::{Gpu, PixelSource, TextureId};

/// A GPU texture with its fixed size and format.
///
/// Resizing means `release` + `create`. `release` is idempotent; the handle
/// becomes `None` after the first call.
#[derive(Debug)]
pub struct Texture {
    id: Option<TextureId>,
    size: Size2d,
    format: TextureFormat,
}

impl Texture {
    /// Allocate storage with linear filtering and clamp-to-edge wrapping.
    pub fn create(gpu: &dyn Gpu, size: Size2d, format: TextureFormat) -> Result<Self, EngineError> {
        Self::create_with(gpu, size, format, PixelSource::None)
    }

    /// Allocate and fill from host memory (`size.area() * bpp` bytes).
    pub fn from_pixels(
        gpu: &dyn Gpu,
        size: Size2d,
        format: TextureFormat,
        pixels: &[u8],
    ) -> Result<Self, EngineError> {
        let need = size.area() * format.bytes_per_pixel();
        if pixels.len() < need {
            return Err(EngineError::precondition(format!(
                "texture upload needs {need} bytes, got {}",
                pixels.len()
            )));
        }
        Self::create_with(gpu, size, format, PixelSource::Slice(&pixels[..need]))
    }

    fn create_with(
        gpu: &dyn Gpu,
        size: Size2d,
        format: TextureFormat,
        src: PixelSource<'_>,
    ) -> Result<Self, EngineError> {
        if size.is_empty() {
            return Err(EngineError::precondition(format!(
                "texture size must be non-zero, got {}x{}",
                size.width, size.height
            )));
        }
        let id = gpu
            .create_texture()
            .map_err(|e| EngineError::resource("texture", e))?;
        gpu.bind_texture(Some(id));
        gpu.set_texture_sampling();
        gpu.tex_image_2d(format, size.width, size.height, src);
        gpu.bind_texture(None);
        tracing::debug!(tex = id.0.get(), w = size.width, h = size.height, ?format, "texture created");
        Ok(Self {
            id: Some(id),
            size,
            format,
        })
    }

    pub fn id(&self) -> Option<TextureId> {
        self.id
    }

    /// The live handle, or a precondition error once released.
    pub fn handle(&self) -> Result<TextureId, EngineError> {
        self.id
            .ok_or_else(|| EngineError::precondition("texture used after release"))
    }

    pub fn size(&self) -> Size2d {
        self.size
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn is_live(&self) -> bool {
        self.id.is_some()
    }

    /// Replace the full contents from the given source (slice or bound unpack buffer).
    pub fn update(&self, gpu: &dyn Gpu, src: PixelSource<'_>) -> Result<(), EngineError> {
        let id = self.handle()?;
        gpu.bind_texture(Some(id));
        gpu.tex_sub_image_2d(self.format, self.size.width, self.size.height, src);
        gpu.bind_texture(None);
        Ok(())
    }

    /// Re-specify storage with the same size and format and fill it.
    pub fn respecify(&self, gpu: &dyn Gpu, src: PixelSource<'_>) -> Result<(), EngineError> {
        let id = self.handle()?;
        gpu.bind_texture(Some(id));
        gpu.tex_image_2d(self.format, self.size.width, self.size.height, src);
        gpu.bind_texture(None);
        Ok(())
    }

    pub fn release(&mut self, gpu: &dyn Gpu) {
        if let Some(id) = self.id.take() {
            gpu.delete_texture(id);
            tracing::debug!(tex = id.0.get(), "texture released");
        }
    }
}
