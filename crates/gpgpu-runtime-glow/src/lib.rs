//! gpgpu runtime (glow/OpenGL backend)
//
// This crate only maps the engine's `Gpu` capability trait onto a current
// `glow::Context` (OpenGL ES 3.0 or desktop GL 3.3 core). Context creation,
// windowing and buffer swapping belong to the host.
#![allow(clippy::missing_safety_doc)]

use std::fmt;
use std::num::NonZeroU32;

use glow::HasContext;

use gpgpu_core::{ShaderStage, TextureFormat};
use gpgpu_runtime::gpu::{
    BufferId, BufferTarget, BufferUsage, FramebufferId, Gpu, GpuCaps, PixelDest, PixelSource,
    Primitive, ProgramId, RenderbufferId, TextureId, UniformLocation, UniformValue, VertexArrayId,
};

pub use gpgpu_core::EngineError;

pub const ES_HEADER: &str = "#version 300 es\nprecision highp float;\n";
pub const CORE_HEADER: &str = "#version 330 core\n";

// Legacy unsized formats; not exported by glow.
const LUMINANCE: u32 = 0x1909;
const LUMINANCE_ALPHA: u32 = 0x190A;

/// `(internal_format, format, type, swizzle)` for one texture format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GlFormat {
    internal: u32,
    format: u32,
    ty: u32,
    swizzle: Option<[u32; 4]>,
}

fn gl_format(format: TextureFormat, embedded: bool) -> GlFormat {
    let plain = |internal, format| GlFormat {
        internal,
        format,
        ty: glow::UNSIGNED_BYTE,
        swizzle: None,
    };
    match (format, embedded) {
        (TextureFormat::Rgba, _) => plain(glow::RGBA8, glow::RGBA),
        // BGRA8888 extension on ES; client-side reorder on desktop
        (TextureFormat::Bgra, true) => plain(glow::BGRA, glow::BGRA),
        (TextureFormat::Bgra, false) => plain(glow::RGBA8, glow::BGRA),
        (TextureFormat::Luminance, true) => plain(LUMINANCE, LUMINANCE),
        (TextureFormat::LuminanceAlpha, true) => plain(LUMINANCE_ALPHA, LUMINANCE_ALPHA),
        // core profiles dropped luminance: emulate with swizzles
        (TextureFormat::Luminance, false) => GlFormat {
            swizzle: Some([glow::RED, glow::RED, glow::RED, glow::ONE]),
            ..plain(glow::R8, glow::RED)
        },
        (TextureFormat::LuminanceAlpha, false) => GlFormat {
            swizzle: Some([glow::RED, glow::RED, glow::RED, glow::GREEN]),
            ..plain(glow::RG8, glow::RG)
        },
        (TextureFormat::Red, _) => plain(glow::R8, glow::RED),
        (TextureFormat::RedGreen, _) => plain(glow::RG8, glow::RG),
    }
}

fn buffer_target(t: BufferTarget) -> u32 {
    match t {
        BufferTarget::Array => glow::ARRAY_BUFFER,
        BufferTarget::PixelPack => glow::PIXEL_PACK_BUFFER,
        BufferTarget::PixelUnpack => glow::PIXEL_UNPACK_BUFFER,
    }
}

fn buffer_usage(u: BufferUsage) -> u32 {
    match u {
        BufferUsage::StaticDraw => glow::STATIC_DRAW,
        BufferUsage::StreamDraw => glow::STREAM_DRAW,
        BufferUsage::StreamRead => glow::STREAM_READ,
    }
}

fn primitive(p: Primitive) -> u32 {
    match p {
        Primitive::TriangleStrip => glow::TRIANGLE_STRIP,
        Primitive::Triangles => glow::TRIANGLES,
    }
}

/// Probe what the current context supports.
pub fn probe_caps(gl: &glow::Context) -> GpuCaps {
    let v = gl.version();
    let version = (v.major, v.minor);
    // map_buffer_range + pixel pack/unpack buffers: ES 3.0 / GL 3.0
    let pixel_buffers = if v.is_embedded {
        v.major >= 3
    } else {
        version >= (3, 0)
    };
    GpuCaps {
        pixel_buffers,
        embedded: v.is_embedded,
        version,
    }
}

/// [`Gpu`] over a `glow::Context`.
pub struct GlowGpu {
    gl: glow::Context,
    caps: GpuCaps,
}

impl fmt::Debug for GlowGpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlowGpu").field("caps", &self.caps).finish()
    }
}

impl GlowGpu {
    /// Wrap a context. It must be current on this thread for every call.
    pub unsafe fn new(gl: glow::Context) -> Self {
        let caps = probe_caps(&gl);
        gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
        gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
        tracing::info!(
            version = ?caps.version,
            embedded = caps.embedded,
            pixel_buffers = caps.pixel_buffers,
            "glow backend ready"
        );
        Self { gl, caps }
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    pub fn into_inner(self) -> glow::Context {
        self.gl
    }

    fn header(&self) -> &'static str {
        if self.caps.embedded {
            ES_HEADER
        } else {
            CORE_HEADER
        }
    }

    fn format(&self, format: TextureFormat) -> GlFormat {
        gl_format(format, self.caps.embedded)
    }

    unsafe fn compile(&self, stage: ShaderStage, src: &str) -> Result<glow::NativeShader, EngineError> {
        let kind = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };
        let gl = &self.gl;
        let sh = gl
            .create_shader(kind)
            .map_err(|e| EngineError::resource("shader", format!("create_shader({stage}) failed: {e}")))?;
        gl.shader_source(sh, &format!("{}{}", self.header(), src));
        gl.compile_shader(sh);
        if !gl.get_shader_compile_status(sh) {
            let log = gl.get_shader_info_log(sh);
            gl.delete_shader(sh);
            return Err(EngineError::ShaderCompile { stage, log });
        }
        Ok(sh)
    }
}

fn tex(id: TextureId) -> glow::NativeTexture {
    glow::NativeTexture(id.0)
}

impl Gpu for GlowGpu {
    fn caps(&self) -> GpuCaps {
        self.caps
    }

    // ---- Textures ----

    fn create_texture(&self) -> Result<TextureId, String> {
        unsafe { self.gl.create_texture().map(|t| TextureId(t.0)) }
    }

    fn delete_texture(&self, t: TextureId) {
        unsafe { self.gl.delete_texture(tex(t)) }
    }

    fn active_texture(&self, unit: u32) {
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) }
    }

    fn bind_texture(&self, t: Option<TextureId>) {
        unsafe { self.gl.bind_texture(glow::TEXTURE_2D, t.map(tex)) }
    }

    fn set_texture_sampling(&self) {
        let gl = &self.gl;
        unsafe {
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
        }
    }

    fn tex_image_2d(&self, format: TextureFormat, width: u32, height: u32, src: PixelSource<'_>) {
        let f = self.format(format);
        let gl = &self.gl;
        unsafe {
            let pixels = match src {
                PixelSource::Slice(s) => Some(s),
                // null pointer: storage only, or offset 0 of a bound unpack buffer
                PixelSource::None | PixelSource::UnpackOffset(_) => None,
            };
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                f.internal as i32,
                width as i32,
                height as i32,
                0,
                f.format,
                f.ty,
                pixels,
            );
            if let Some([r, g, b, a]) = f.swizzle {
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_SWIZZLE_R, r as i32);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_SWIZZLE_G, g as i32);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_SWIZZLE_B, b as i32);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_SWIZZLE_A, a as i32);
            }
        }
        if let PixelSource::UnpackOffset(off) = src {
            if off != 0 {
                self.tex_sub_image_2d(format, width, height, src);
            }
        }
    }

    fn tex_sub_image_2d(&self, format: TextureFormat, width: u32, height: u32, src: PixelSource<'_>) {
        let f = self.format(format);
        let data = match src {
            PixelSource::Slice(s) => glow::PixelUnpackData::Slice(s),
            PixelSource::UnpackOffset(off) => glow::PixelUnpackData::BufferOffset(off as u32),
            PixelSource::None => return,
        };
        unsafe {
            self.gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                0,
                0,
                width as i32,
                height as i32,
                f.format,
                f.ty,
                data,
            );
        }
    }

    // ---- Framebuffers / renderbuffers ----

    fn create_framebuffer(&self) -> Result<FramebufferId, String> {
        unsafe { self.gl.create_framebuffer().map(|f| FramebufferId(f.0)) }
    }

    fn delete_framebuffer(&self, fbo: FramebufferId) {
        unsafe { self.gl.delete_framebuffer(glow::NativeFramebuffer(fbo.0)) }
    }

    fn bind_framebuffer(&self, fbo: Option<FramebufferId>) {
        unsafe {
            self.gl
                .bind_framebuffer(glow::FRAMEBUFFER, fbo.map(|f| glow::NativeFramebuffer(f.0)))
        }
    }

    fn framebuffer_texture(&self, t: Option<TextureId>) {
        unsafe {
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                t.map(tex),
                0,
            )
        }
    }

    fn create_renderbuffer(&self) -> Result<RenderbufferId, String> {
        unsafe { self.gl.create_renderbuffer().map(|r| RenderbufferId(r.0)) }
    }

    fn delete_renderbuffer(&self, rb: RenderbufferId) {
        unsafe { self.gl.delete_renderbuffer(glow::NativeRenderbuffer(rb.0)) }
    }

    fn bind_renderbuffer(&self, rb: Option<RenderbufferId>) {
        unsafe {
            self.gl
                .bind_renderbuffer(glow::RENDERBUFFER, rb.map(|r| glow::NativeRenderbuffer(r.0)))
        }
    }

    fn renderbuffer_storage(&self, width: u32, height: u32) {
        unsafe {
            self.gl
                .renderbuffer_storage(glow::RENDERBUFFER, glow::RGBA8, width as i32, height as i32)
        }
    }

    fn framebuffer_renderbuffer(&self, rb: Option<RenderbufferId>) {
        unsafe {
            self.gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::RENDERBUFFER,
                rb.map(|r| glow::NativeRenderbuffer(r.0)),
            )
        }
    }

    fn check_framebuffer_status(&self) -> u32 {
        unsafe { self.gl.check_framebuffer_status(glow::FRAMEBUFFER) }
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        unsafe { self.gl.viewport(x, y, width, height) }
    }

    fn clear(&self, [r, g, b, a]: [f32; 4]) {
        unsafe {
            self.gl.clear_color(r, g, b, a);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }
    }

    // ---- Buffers ----

    fn create_buffer(&self) -> Result<BufferId, String> {
        unsafe { self.gl.create_buffer().map(|b| BufferId(b.0)) }
    }

    fn delete_buffer(&self, buf: BufferId) {
        unsafe { self.gl.delete_buffer(glow::NativeBuffer(buf.0)) }
    }

    fn bind_buffer(&self, target: BufferTarget, buf: Option<BufferId>) {
        unsafe {
            self.gl
                .bind_buffer(buffer_target(target), buf.map(|b| glow::NativeBuffer(b.0)))
        }
    }

    fn buffer_data_size(&self, target: BufferTarget, size: usize, usage: BufferUsage) {
        unsafe {
            self.gl
                .buffer_data_size(buffer_target(target), size as i32, buffer_usage(usage))
        }
    }

    fn buffer_data(&self, target: BufferTarget, data: &[u8], usage: BufferUsage) {
        unsafe {
            self.gl
                .buffer_data_u8_slice(buffer_target(target), data, buffer_usage(usage))
        }
    }

    fn map_buffer_write(&self, target: BufferTarget, len: usize, write: &mut dyn FnMut(&mut [u8])) -> bool {
        let t = buffer_target(target);
        unsafe {
            let ptr = self.gl.map_buffer_range(
                t,
                0,
                len as i32,
                glow::MAP_WRITE_BIT | glow::MAP_INVALIDATE_BUFFER_BIT,
            );
            if ptr.is_null() {
                return false;
            }
            write(std::slice::from_raw_parts_mut(ptr, len));
            self.gl.unmap_buffer(t);
        }
        true
    }

    fn map_buffer_read(&self, target: BufferTarget, len: usize, read: &mut dyn FnMut(&[u8])) -> bool {
        let t = buffer_target(target);
        unsafe {
            let ptr = self.gl.map_buffer_range(t, 0, len as i32, glow::MAP_READ_BIT);
            if ptr.is_null() {
                return false;
            }
            read(std::slice::from_raw_parts(ptr as *const u8, len));
            self.gl.unmap_buffer(t);
        }
        true
    }

    fn read_pixels(&self, width: u32, height: u32, format: TextureFormat, dest: PixelDest<'_>) {
        let gl_fmt = match format {
            TextureFormat::Bgra => glow::BGRA,
            _ => glow::RGBA,
        };
        let data = match dest {
            PixelDest::Slice(s) => glow::PixelPackData::Slice(s),
            PixelDest::PackOffset(off) => glow::PixelPackData::BufferOffset(off as u32),
        };
        unsafe {
            self.gl.read_pixels(
                0,
                0,
                width as i32,
                height as i32,
                gl_fmt,
                glow::UNSIGNED_BYTE,
                data,
            )
        }
    }

    // ---- Programs ----

    fn create_program(&self, vert: &str, frag: &str) -> Result<ProgramId, EngineError> {
        let gl = &self.gl;
        unsafe {
            let vs = self.compile(ShaderStage::Vertex, vert)?;
            let fs = match self.compile(ShaderStage::Fragment, frag) {
                Ok(fs) => fs,
                Err(e) => {
                    gl.delete_shader(vs);
                    return Err(e);
                }
            };
            let program = match gl.create_program() {
                Ok(p) => p,
                Err(e) => {
                    gl.delete_shader(vs);
                    gl.delete_shader(fs);
                    return Err(EngineError::resource("program", e));
                }
            };
            gl.attach_shader(program, vs);
            gl.attach_shader(program, fs);
            gl.link_program(program);

            gl.detach_shader(program, vs);
            gl.detach_shader(program, fs);
            gl.delete_shader(vs);
            gl.delete_shader(fs);

            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(EngineError::Link(log));
            }
            Ok(ProgramId(program.0))
        }
    }

    fn delete_program(&self, prog: ProgramId) {
        unsafe { self.gl.delete_program(glow::NativeProgram(prog.0)) }
    }

    fn use_program(&self, prog: Option<ProgramId>) {
        unsafe { self.gl.use_program(prog.map(|p| glow::NativeProgram(p.0))) }
    }

    fn attrib_location(&self, prog: ProgramId, name: &str) -> Option<u32> {
        unsafe { self.gl.get_attrib_location(glow::NativeProgram(prog.0), name) }
    }

    fn uniform_location(&self, prog: ProgramId, name: &str) -> Option<UniformLocation> {
        unsafe {
            self.gl
                .get_uniform_location(glow::NativeProgram(prog.0), name)
                .map(|l| UniformLocation(l.0))
        }
    }

    fn set_uniform(&self, loc: UniformLocation, value: UniformValue) {
        let l = glow::NativeUniformLocation(loc.0);
        let l = Some(&l);
        let gl = &self.gl;
        unsafe {
            match value {
                UniformValue::Int(v) => gl.uniform_1_i32(l, v),
                UniformValue::Float(v) => gl.uniform_1_f32(l, v),
                UniformValue::Vec2([x, y]) => gl.uniform_2_f32(l, x, y),
                UniformValue::Vec3([x, y, z]) => gl.uniform_3_f32(l, x, y, z),
                UniformValue::Vec4([x, y, z, w]) => gl.uniform_4_f32(l, x, y, z, w),
                UniformValue::Mat3(m) => gl.uniform_matrix_3_f32_slice(l, false, &m),
                UniformValue::Mat4(m) => gl.uniform_matrix_4_f32_slice(l, false, &m),
            }
        }
    }

    // ---- Geometry ----

    fn create_vertex_array(&self) -> Result<VertexArrayId, String> {
        unsafe { self.gl.create_vertex_array().map(|v| VertexArrayId(v.0)) }
    }

    fn delete_vertex_array(&self, vao: VertexArrayId) {
        unsafe { self.gl.delete_vertex_array(glow::NativeVertexArray(vao.0)) }
    }

    fn bind_vertex_array(&self, vao: Option<VertexArrayId>) {
        unsafe {
            self.gl
                .bind_vertex_array(vao.map(|v| glow::NativeVertexArray(v.0)))
        }
    }

    fn enable_vertex_attrib(&self, index: u32) {
        unsafe { self.gl.enable_vertex_attrib_array(index) }
    }

    fn vertex_attrib_pointer(&self, index: u32, components: u32, stride: usize, offset: usize) {
        unsafe {
            self.gl.vertex_attrib_pointer_f32(
                index,
                components as i32,
                glow::FLOAT,
                false,
                stride as i32,
                offset as i32,
            )
        }
    }

    fn draw_arrays(&self, mode: Primitive, first: u32, count: u32) {
        unsafe { self.gl.draw_arrays(primitive(mode), first as i32, count as i32) }
    }

    fn get_error(&self) -> u32 {
        unsafe { self.gl.get_error() }
    }
}

/// Texture handle of a host-created GL texture, for [`gpgpu_runtime::FrameData::Texture`].
pub fn texture_id(t: glow::NativeTexture) -> TextureId {
    TextureId(t.0)
}

/// Wrap a raw GL name (e.g. from a camera surface). `None` for the null name.
pub fn texture_from_raw(name: u32) -> Option<TextureId> {
    NonZeroU32::new(name).map(TextureId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luminance_is_swizzled_on_core_profiles() {
        let es = gl_format(TextureFormat::Luminance, true);
        assert_eq!((es.internal, es.format, es.swizzle), (LUMINANCE, LUMINANCE, None));

        let core = gl_format(TextureFormat::LuminanceAlpha, false);
        assert_eq!(core.internal, glow::RG8);
        assert_eq!(
            core.swizzle,
            Some([glow::RED, glow::RED, glow::RED, glow::GREEN])
        );
    }

    #[test]
    fn rgba_family_is_byte_typed() {
        for f in [TextureFormat::Rgba, TextureFormat::Bgra] {
            for embedded in [true, false] {
                assert_eq!(gl_format(f, embedded).ty, glow::UNSIGNED_BYTE);
            }
        }
    }

    #[test]
    fn raw_names() {
        assert_eq!(texture_from_raw(0), None);
        assert_eq!(texture_from_raw(9).map(|t| t.0.get()), Some(9));
    }
}
