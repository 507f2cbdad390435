//! The GPU capability surface the engine renders through.
//!
//! Backends (`gpgpu-runtime-glow`, `gpgpu-soft`) implement [`Gpu`] for one
//! context. All calls happen on the thread that owns that context, in program
//! order; bound-object state (active unit, bound framebuffer, bound buffers)
//! is global to the context, exactly like GL.

use std::fmt;
use std::num::NonZeroU32;

use gpgpu_core::{EngineError, RenderPhase, TextureFormat};

macro_rules! gpu_handle {
    ($($(#[$m:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$m])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub NonZeroU32);
        )*
    };
}

gpu_handle!(
    TextureId,
    FramebufferId,
    RenderbufferId,
    BufferId,
    ProgramId,
    VertexArrayId,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

pub const NO_ERROR: u32 = 0;
pub const INVALID_ENUM: u32 = 0x0500;
pub const INVALID_VALUE: u32 = 0x0501;
pub const INVALID_OPERATION: u32 = 0x0502;
pub const OUT_OF_MEMORY: u32 = 0x0505;
pub const INVALID_FRAMEBUFFER_OPERATION: u32 = 0x0506;

pub const FRAMEBUFFER_COMPLETE: u32 = 0x8CD5;
pub const FRAMEBUFFER_INCOMPLETE_ATTACHMENT: u32 = 0x8CD6;
pub const FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT: u32 = 0x8CD7;

pub fn error_name(code: u32) -> &'static str {
    match code {
        NO_ERROR => "NO_ERROR",
        INVALID_ENUM => "INVALID_ENUM",
        INVALID_VALUE => "INVALID_VALUE",
        INVALID_OPERATION => "INVALID_OPERATION",
        OUT_OF_MEMORY => "OUT_OF_MEMORY",
        INVALID_FRAMEBUFFER_OPERATION => "INVALID_FRAMEBUFFER_OPERATION",
        _ => "UNKNOWN",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Array,
    PixelPack,
    PixelUnpack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    StaticDraw,
    StreamDraw,
    StreamRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    TriangleStrip,
    Triangles,
}

/// Source of texel data for an upload.
#[derive(Debug, Clone, Copy)]
pub enum PixelSource<'a> {
    /// Allocate storage only.
    None,
    Slice(&'a [u8]),
    /// Byte offset into the buffer bound to [`BufferTarget::PixelUnpack`].
    UnpackOffset(usize),
}

/// Destination of a `read_pixels` call.
#[derive(Debug)]
pub enum PixelDest<'a> {
    Slice(&'a mut [u8]),
    /// Byte offset into the buffer bound to [`BufferTarget::PixelPack`].
    PackOffset(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    /// Column-major.
    Mat3([f32; 9]),
    /// Column-major.
    Mat4([f32; 16]),
}

/// What the context can do, probed once at backend creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuCaps {
    /// Pixel pack/unpack buffers with map-range support.
    pub pixel_buffers: bool,
    /// OpenGL ES (as opposed to desktop GL).
    pub embedded: bool,
    pub version: (u32, u32),
}

/// Object-safe view of one GPU context.
///
/// Methods mirror GL semantics: binding calls change context state, errors
/// are sticky until [`Gpu::get_error`] reads them, and map callbacks run while
/// the buffer is mapped.
pub trait Gpu: fmt::Debug {
    fn caps(&self) -> GpuCaps;

    // ---- Textures ----
    fn create_texture(&self) -> Result<TextureId, String>;
    fn delete_texture(&self, tex: TextureId);
    fn active_texture(&self, unit: u32);
    /// Bind to the 2D target of the active unit.
    fn bind_texture(&self, tex: Option<TextureId>);
    /// Linear filtering and clamp-to-edge wrapping on the bound texture.
    fn set_texture_sampling(&self);
    /// (Re)specify storage of the bound texture.
    fn tex_image_2d(&self, format: TextureFormat, width: u32, height: u32, src: PixelSource<'_>);
    /// Overwrite the full extent of the bound texture without re-specifying it.
    fn tex_sub_image_2d(&self, format: TextureFormat, width: u32, height: u32, src: PixelSource<'_>);

    // ---- Framebuffers / renderbuffers ----
    fn create_framebuffer(&self) -> Result<FramebufferId, String>;
    fn delete_framebuffer(&self, fbo: FramebufferId);
    /// `None` binds the default (window) framebuffer.
    fn bind_framebuffer(&self, fbo: Option<FramebufferId>);
    /// Attach to color attachment 0 of the bound framebuffer.
    fn framebuffer_texture(&self, tex: Option<TextureId>);
    fn create_renderbuffer(&self) -> Result<RenderbufferId, String>;
    fn delete_renderbuffer(&self, rb: RenderbufferId);
    fn bind_renderbuffer(&self, rb: Option<RenderbufferId>);
    fn renderbuffer_storage(&self, width: u32, height: u32);
    fn framebuffer_renderbuffer(&self, rb: Option<RenderbufferId>);
    fn check_framebuffer_status(&self) -> u32;
    fn viewport(&self, x: i32, y: i32, width: i32, height: i32);
    fn clear(&self, rgba: [f32; 4]);

    // ---- Buffers ----
    fn create_buffer(&self) -> Result<BufferId, String>;
    fn delete_buffer(&self, buf: BufferId);
    fn bind_buffer(&self, target: BufferTarget, buf: Option<BufferId>);
    fn buffer_data_size(&self, target: BufferTarget, size: usize, usage: BufferUsage);
    fn buffer_data(&self, target: BufferTarget, data: &[u8], usage: BufferUsage);
    /// Map `len` bytes of the bound buffer for writing. Returns false if mapping failed.
    fn map_buffer_write(&self, target: BufferTarget, len: usize, write: &mut dyn FnMut(&mut [u8])) -> bool;
    /// Map `len` bytes of the bound buffer for reading. Returns false if mapping failed.
    fn map_buffer_read(&self, target: BufferTarget, len: usize, read: &mut dyn FnMut(&[u8])) -> bool;
    /// Read from color attachment 0 of the bound framebuffer (row 0 = bottom).
    fn read_pixels(&self, width: u32, height: u32, format: TextureFormat, dest: PixelDest<'_>);

    // ---- Programs ----
    /// Compile and link. Returns `ShaderCompile` / `Link` / `Resource` errors.
    fn create_program(&self, vert: &str, frag: &str) -> Result<ProgramId, EngineError>;
    fn delete_program(&self, prog: ProgramId);
    fn use_program(&self, prog: Option<ProgramId>);
    fn attrib_location(&self, prog: ProgramId, name: &str) -> Option<u32>;
    fn uniform_location(&self, prog: ProgramId, name: &str) -> Option<UniformLocation>;
    /// Upload to the program in use.
    fn set_uniform(&self, loc: UniformLocation, value: UniformValue);

    // ---- Geometry ----
    fn create_vertex_array(&self) -> Result<VertexArrayId, String>;
    fn delete_vertex_array(&self, vao: VertexArrayId);
    fn bind_vertex_array(&self, vao: Option<VertexArrayId>);
    fn enable_vertex_attrib(&self, index: u32);
    /// Float attribute sourced from the bound array buffer.
    fn vertex_attrib_pointer(&self, index: u32, components: u32, stride: usize, offset: usize);
    fn draw_arrays(&self, mode: Primitive, first: u32, count: u32);

    /// Return and clear the oldest pending error code ([`NO_ERROR`] if none).
    fn get_error(&self) -> u32;
}

/// Surface a pending GPU error as a [`EngineError::Render`].
///
/// Drains the whole error queue so a stale code cannot be blamed on the next phase.
pub fn check_gpu_error(gpu: &dyn Gpu, proc: &str, phase: RenderPhase) -> Result<(), EngineError> {
    let code = gpu.get_error();
    if code == NO_ERROR {
        return Ok(());
    }
    // bounded: GL keeps at most one flag per error kind
    for _ in 0..8 {
        if gpu.get_error() == NO_ERROR {
            break;
        }
    }
    tracing::error!(proc, %phase, code, kind = error_name(code), "GPU error");
    Err(EngineError::Render {
        proc: proc.to_string(),
        phase,
        code,
    })
}
