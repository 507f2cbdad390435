use gpgpu_core::{EngineError, Size2d, TextureFormat};

use crate::gpu::{FramebufferId, Gpu, RenderbufferId, TextureId, FRAMEBUFFER_COMPLETE};
use crate::texture::Texture;

/// What a framebuffer renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    Texture(TextureId),
    Renderbuffer(RenderbufferId),
}

/// Off-screen render target with exactly one color attachment.
#[derive(Debug)]
pub struct FrameBuffer {
    id: Option<FramebufferId>,
    attachment: Option<Attachment>,
    size: Size2d,
}

impl FrameBuffer {
    pub fn create(gpu: &dyn Gpu) -> Result<Self, EngineError> {
        let id = gpu
            .create_framebuffer()
            .map_err(|e| EngineError::resource("framebuffer", e))?;
        Ok(Self {
            id: Some(id),
            attachment: None,
            size: Size2d::default(),
        })
    }

    pub fn id(&self) -> Option<FramebufferId> {
        self.id
    }

    pub fn attachment(&self) -> Option<Attachment> {
        self.attachment
    }

    pub fn size(&self) -> Size2d {
        self.size
    }

    /// Attach a live texture as color attachment 0 and verify completeness.
    pub fn attach_texture(&mut self, gpu: &dyn Gpu, tex: &Texture) -> Result<(), EngineError> {
        let tid = tex.handle()?;
        self.attach(gpu, Attachment::Texture(tid), tex.size())
    }

    pub fn attach_renderbuffer(
        &mut self,
        gpu: &dyn Gpu,
        rb: RenderbufferId,
        size: Size2d,
    ) -> Result<(), EngineError> {
        self.attach(gpu, Attachment::Renderbuffer(rb), size)
    }

    /// Attach `att` (of the given size) as color attachment 0 and verify completeness.
    pub fn attach(&mut self, gpu: &dyn Gpu, att: Attachment, size: Size2d) -> Result<(), EngineError> {
        let id = self
            .id
            .ok_or_else(|| EngineError::precondition("attach on released framebuffer"))?;
        gpu.bind_framebuffer(Some(id));
        match att {
            Attachment::Texture(t) => gpu.framebuffer_texture(Some(t)),
            Attachment::Renderbuffer(rb) => gpu.framebuffer_renderbuffer(Some(rb)),
        }
        let status = gpu.check_framebuffer_status();
        gpu.bind_framebuffer(None);
        if status != FRAMEBUFFER_COMPLETE {
            return Err(EngineError::resource(
                "framebuffer",
                format!("framebuffer incomplete: 0x{status:x}"),
            ));
        }
        self.attachment = Some(att);
        self.size = size;
        Ok(())
    }

    /// Attach `tex` unless it is already attached at `size`. GL recycles
    /// deleted names, so a `reallocated` texture is always re-attached even
    /// when its id matches the current attachment.
    pub fn ensure_texture(
        &mut self,
        gpu: &dyn Gpu,
        tex: TextureId,
        size: Size2d,
        reallocated: bool,
    ) -> Result<(), EngineError> {
        if !reallocated && self.attachment == Some(Attachment::Texture(tex)) && self.size == size {
            return Ok(());
        }
        self.attach(gpu, Attachment::Texture(tex), size)
    }

    /// Bind for drawing or reading. Must precede any draw call targeting it.
    pub fn bind(&self, gpu: &dyn Gpu) -> Result<(), EngineError> {
        let id = self
            .id
            .ok_or_else(|| EngineError::precondition("bind of released framebuffer"))?;
        if self.attachment.is_none() {
            return Err(EngineError::precondition("framebuffer has no attachment"));
        }
        gpu.bind_framebuffer(Some(id));
        Ok(())
    }

    pub fn unbind(gpu: &dyn Gpu) {
        gpu.bind_framebuffer(None);
    }

    pub fn release(&mut self, gpu: &dyn Gpu) {
        if let Some(id) = self.id.take() {
            gpu.delete_framebuffer(id);
        }
        self.attachment = None;
    }
}

/// Offscreen render target (FBO + owned color texture).
#[derive(Debug)]
pub struct RenderTarget {
    pub fbo: FrameBuffer,
    pub tex: Texture,
}

impl RenderTarget {
    pub fn size(&self) -> Size2d {
        self.tex.size()
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.tex.id()
    }

    /// Clear to opaque black so first-frame sampling is defined.
    pub fn clear(&self, gpu: &dyn Gpu) -> Result<(), EngineError> {
        self.fbo.bind(gpu)?;
        let (w, h) = self.size().as_i32();
        gpu.viewport(0, 0, w, h);
        gpu.clear([0.0, 0.0, 0.0, 1.0]);
        FrameBuffer::unbind(gpu);
        Ok(())
    }

    /// Reallocate at a new size. Handles change.
    pub fn resize(&mut self, gpu: &dyn Gpu, size: Size2d) -> Result<(), EngineError> {
        let format = self.tex.format();
        self.release(gpu);
        *self = create_render_target(gpu, size, format)?;
        Ok(())
    }

    pub fn release(&mut self, gpu: &dyn Gpu) {
        self.fbo.release(gpu);
        self.tex.release(gpu);
    }
}

pub fn create_render_target(
    gpu: &dyn Gpu,
    size: Size2d,
    format: TextureFormat,
) -> Result<RenderTarget, EngineError> {
    let mut tex = Texture::create(gpu, size, format)?;
    let mut fbo = match FrameBuffer::create(gpu) {
        Ok(f) => f,
        Err(e) => {
            tex.release(gpu);
            return Err(e);
        }
    };
    if let Err(e) = fbo.attach_texture(gpu, &tex) {
        // clean up
        fbo.release(gpu);
        tex.release(gpu);
        return Err(e);
    }
    Ok(RenderTarget { fbo, tex })
}
