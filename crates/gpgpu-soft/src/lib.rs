#![forbid(unsafe_code)]

//! CPU reference implementation of the engine's [`Gpu`] trait.
//!
//! `SoftGpu` keeps every GL object in host memory, rasterizes triangles at
//! pixel centres and runs shader programs as registered reference kernels
//! (see [`KernelRegistry`]). Errors are GL-style sticky codes. It exists so
//! whole pipelines can be exercised headlessly and bit-exactly in tests.
#![deny(missing_debug_implementations)]

mod kernels;
mod raster;
mod surface;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;

use gpgpu_core::{EngineError, ShaderStage, Size2d, TextureFormat};
use gpgpu_runtime::gpu::{
    BufferId, BufferTarget, BufferUsage, FramebufferId, Gpu, GpuCaps, PixelDest, PixelSource,
    Primitive, ProgramId, RenderbufferId, TextureId, UniformLocation, UniformValue, VertexArrayId,
    FRAMEBUFFER_COMPLETE, FRAMEBUFFER_INCOMPLETE_ATTACHMENT,
    FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT, INVALID_ENUM, INVALID_FRAMEBUFFER_OPERATION,
    INVALID_OPERATION, INVALID_VALUE, NO_ERROR,
};

pub use kernels::{ClipVertex, Fragment, FragmentKernel, KernelRegistry, VertexInput, VertexKernel};

use raster::Viewport;
use surface::Surface;

const TEXTURE_UNITS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FbAttachment {
    Texture(u32),
    Renderbuffer(u32),
}

#[derive(Debug, Clone)]
struct Program {
    vertex: VertexKernel,
    fragment: FragmentKernel,
    attribs: Vec<String>,
    uniform_names: Vec<String>,
    uniforms: HashMap<String, UniformValue>,
}

#[derive(Debug, Clone, Copy)]
struct AttribPointer {
    buffer: u32,
    components: u32,
    stride: usize,
    offset: usize,
}

#[derive(Debug, Default)]
struct VertexArray {
    pointers: HashMap<u32, AttribPointer>,
    enabled: HashSet<u32>,
}

#[derive(Debug)]
struct State {
    next_id: u32,
    freed_textures: Vec<u32>,
    textures: HashMap<u32, Surface>,
    framebuffers: HashMap<u32, Option<FbAttachment>>,
    renderbuffers: HashMap<u32, Surface>,
    buffers: HashMap<u32, Vec<u8>>,
    programs: HashMap<u32, Program>,
    vertex_arrays: HashMap<u32, VertexArray>,

    active_unit: usize,
    units: [Option<u32>; TEXTURE_UNITS],
    framebuffer: Option<u32>,
    renderbuffer: Option<u32>,
    bound_buffers: [Option<u32>; 3],
    program: Option<u32>,
    vertex_array: Option<u32>,
    viewport: Viewport,

    screen: Surface,
    errors: Vec<u32>,

    fail_textures: bool,
    recycle_textures: bool,
    texture_allocations: usize,
    draw_calls: usize,
}

impl State {
    fn new(screen: Size2d) -> Self {
        Self {
            next_id: 0,
            freed_textures: Vec::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            renderbuffers: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            vertex_arrays: HashMap::new(),
            active_unit: 0,
            units: [None; TEXTURE_UNITS],
            framebuffer: None,
            renderbuffer: None,
            bound_buffers: [None; 3],
            program: None,
            vertex_array: None,
            viewport: Viewport::default(),
            screen: Surface::new(TextureFormat::Rgba, screen),
            errors: Vec::new(),
            fail_textures: false,
            recycle_textures: false,
            texture_allocations: 0,
            draw_calls: 0,
        }
    }

    fn next(&mut self) -> NonZeroU32 {
        self.next_id += 1;
        NonZeroU32::MIN.saturating_add(self.next_id - 1)
    }

    /// Record an error; like GL, one pending flag per code.
    fn error(&mut self, code: u32) {
        if !self.errors.contains(&code) {
            self.errors.push(code);
        }
    }

    fn bound_buffer(&self, target: BufferTarget) -> Option<u32> {
        self.bound_buffers[slot_of(target)]
    }

    fn bound_texture(&self) -> Option<u32> {
        self.units[self.active_unit]
    }

    fn status(&self) -> u32 {
        let Some(fb) = self.framebuffer else {
            return FRAMEBUFFER_COMPLETE;
        };
        match self.framebuffers.get(&fb).copied().flatten() {
            None => FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT,
            Some(FbAttachment::Texture(t)) => match self.textures.get(&t) {
                Some(s) if s.is_specified() => FRAMEBUFFER_COMPLETE,
                _ => FRAMEBUFFER_INCOMPLETE_ATTACHMENT,
            },
            Some(FbAttachment::Renderbuffer(r)) => match self.renderbuffers.get(&r) {
                Some(s) if s.is_specified() => FRAMEBUFFER_COMPLETE,
                _ => FRAMEBUFFER_INCOMPLETE_ATTACHMENT,
            },
        }
    }

    fn target(&self) -> Option<&Surface> {
        match self.framebuffer {
            None => Some(&self.screen),
            Some(fb) => match self.framebuffers.get(&fb).copied().flatten()? {
                FbAttachment::Texture(t) => self.textures.get(&t),
                FbAttachment::Renderbuffer(r) => self.renderbuffers.get(&r),
            },
        }
    }

    fn target_mut(&mut self) -> Option<&mut Surface> {
        match self.framebuffer {
            None => Some(&mut self.screen),
            Some(fb) => match self.framebuffers.get(&fb).copied().flatten()? {
                FbAttachment::Texture(t) => self.textures.get_mut(&t),
                FbAttachment::Renderbuffer(r) => self.renderbuffers.get_mut(&r),
            },
        }
    }

    /// Bytes for a texture upload, from a host slice or the bound unpack buffer.
    fn unpack(&mut self, src: PixelSource<'_>, len: usize) -> Option<Option<Vec<u8>>> {
        let from_buffer = |st: &State, off: usize| -> Option<Vec<u8>> {
            let buf = st.buffers.get(&st.bound_buffer(BufferTarget::PixelUnpack)?)?;
            buf.get(off..off + len).map(<[u8]>::to_vec)
        };
        match src {
            PixelSource::Slice(s) => s.get(..len).map(|d| Some(d.to_vec())),
            PixelSource::UnpackOffset(off) => from_buffer(self, off).map(Some),
            PixelSource::None => match self.bound_buffer(BufferTarget::PixelUnpack) {
                Some(_) => from_buffer(self, 0).map(Some),
                None => Some(None),
            },
        }
    }
}

fn slot_of(target: BufferTarget) -> usize {
    match target {
        BufferTarget::Array => 0,
        BufferTarget::PixelPack => 1,
        BufferTarget::PixelUnpack => 2,
    }
}

/// Names declared as `<qualifier> <type> <name>;` in a shader source.
fn declared(src: &str, qualifier: &str) -> Vec<String> {
    src.lines()
        .filter_map(|l| l.trim().strip_prefix(qualifier))
        .filter_map(|rest| rest.split_whitespace().nth(1))
        .map(|name| name.trim_end_matches(';').to_string())
        .collect()
}

fn read_f32(bytes: &[u8], at: usize) -> Option<f32> {
    bytes
        .get(at..at + 4)
        .map(|b| bytemuck::pod_read_unaligned::<f32>(b))
}

/// CPU [`Gpu`] backend.
#[derive(Debug)]
pub struct SoftGpu {
    caps: GpuCaps,
    kernels: KernelRegistry,
    state: RefCell<State>,
}

impl Default for SoftGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftGpu {
    /// An ES 3.0-class device with pixel buffers and a 64x64 screen.
    pub fn new() -> Self {
        Self::with_caps(GpuCaps {
            pixel_buffers: true,
            embedded: true,
            version: (3, 0),
        })
    }

    /// An ES 2.0-class device: no pixel pack/unpack buffers, no mapping.
    pub fn without_pixel_buffers() -> Self {
        Self::with_caps(GpuCaps {
            pixel_buffers: false,
            embedded: true,
            version: (2, 0),
        })
    }

    pub fn with_caps(caps: GpuCaps) -> Self {
        Self {
            caps,
            kernels: KernelRegistry::builtin(),
            state: RefCell::new(State::new(Size2d::new(64, 64))),
        }
    }

    /// Register extra programs before creating them.
    pub fn kernels_mut(&mut self) -> &mut KernelRegistry {
        &mut self.kernels
    }

    /// Resize the default framebuffer. Contents are cleared to transparent black.
    pub fn set_screen_size(&self, size: Size2d) {
        self.state.borrow_mut().screen = Surface::new(TextureFormat::Rgba, size);
    }

    // ---- test hooks ----

    /// Make subsequent `create_texture` calls fail.
    pub fn fail_texture_creation(&self, fail: bool) {
        self.state.borrow_mut().fail_textures = fail;
    }

    /// Hand out deleted texture names again, most recently freed first, the
    /// way drivers commonly recycle `glGenTextures` names.
    pub fn recycle_texture_names(&self, on: bool) {
        let mut st = self.state.borrow_mut();
        st.recycle_textures = on;
        if !on {
            st.freed_textures.clear();
        }
    }

    /// Queue an error code as if a GL call had raised it.
    pub fn inject_error(&self, code: u32) {
        self.state.borrow_mut().error(code);
    }

    /// Number of texture storage (re)specifications so far.
    pub fn texture_allocations(&self) -> usize {
        self.state.borrow().texture_allocations
    }

    pub fn live_textures(&self) -> usize {
        self.state.borrow().textures.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state.borrow().framebuffers.len()
    }

    pub fn draw_calls(&self) -> usize {
        self.state.borrow().draw_calls
    }

    /// Default framebuffer as RGBA rows, bottom row first.
    pub fn screen_pixels(&self) -> Vec<u8> {
        let st = self.state.borrow();
        st.screen.read(st.screen.size.width, st.screen.size.height, false)
    }

    /// Texture contents expanded to RGBA rows, bottom row first.
    pub fn texture_pixels(&self, tex: TextureId) -> Option<Vec<u8>> {
        let st = self.state.borrow();
        let s = st.textures.get(&tex.0.get())?;
        Some(s.read(s.size.width, s.size.height, false))
    }

    pub fn texture_size(&self, tex: TextureId) -> Option<Size2d> {
        self.state.borrow().textures.get(&tex.0.get()).map(|s| s.size)
    }

    pub fn texture_format(&self, tex: TextureId) -> Option<TextureFormat> {
        self.state.borrow().textures.get(&tex.0.get()).map(|s| s.format)
    }

    /// Raw storage bytes of a renderbuffer (RGBA).
    pub fn renderbuffer_pixels(&self, rb: RenderbufferId) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .renderbuffers
            .get(&rb.0.get())
            .map(|s| s.data.clone())
    }

    fn draw(&self, st: &mut State, mode: Primitive, first: u32, count: u32) -> Result<(), u32> {
        let prog = st
            .program
            .and_then(|p| st.programs.get(&p))
            .ok_or(INVALID_OPERATION)?;
        let vao = st
            .vertex_array
            .and_then(|v| st.vertex_arrays.get(&v))
            .ok_or(INVALID_OPERATION)?;
        if st.status() != FRAMEBUFFER_COMPLETE {
            return Err(INVALID_FRAMEBUFFER_OPERATION);
        }

        let mut clip = Vec::with_capacity(count as usize);
        for i in first as usize..(first + count) as usize {
            let mut attribs: Vec<(&str, [f32; 4])> = Vec::with_capacity(prog.attribs.len());
            for (loc, name) in prog.attribs.iter().enumerate() {
                let loc = loc as u32;
                let Some(ptr) = vao.pointers.get(&loc).filter(|_| vao.enabled.contains(&loc)) else {
                    continue;
                };
                let buf = st.buffers.get(&ptr.buffer).ok_or(INVALID_OPERATION)?;
                let stride = if ptr.stride == 0 {
                    ptr.components as usize * 4
                } else {
                    ptr.stride
                };
                let base = ptr.offset + i * stride;
                let mut v = [0.0, 0.0, 0.0, 1.0];
                for (c, out) in v.iter_mut().enumerate().take(ptr.components as usize) {
                    *out = read_f32(buf, base + c * 4).ok_or(INVALID_OPERATION)?;
                }
                attribs.push((name.as_str(), v));
            }
            clip.push((prog.vertex)(&VertexInput {
                attribs: &attribs,
                uniforms: &prog.uniforms,
            }));
        }

        let units: Vec<Option<&Surface>> = st
            .units
            .iter()
            .map(|u| u.and_then(|id| st.textures.get(&id)).filter(|s| s.is_specified()))
            .collect();
        let target_size = st.target().map(|s| s.size).ok_or(INVALID_FRAMEBUFFER_OPERATION)?;

        let mut writes: Vec<(u32, u32, [f32; 4])> = Vec::new();
        for [a, b, c] in raster::assemble(mode == Primitive::TriangleStrip, clip.len()) {
            raster::triangle([&clip[a], &clip[b], &clip[c]], st.viewport, target_size, |x, y, uv| {
                let frag = Fragment {
                    uv,
                    uniforms: &prog.uniforms,
                    units: &units,
                };
                writes.push((x, y, (prog.fragment)(&frag)));
            });
        }

        let target = st.target_mut().ok_or(INVALID_FRAMEBUFFER_OPERATION)?;
        for (x, y, rgba) in writes {
            target.store(x, y, rgba);
        }
        st.draw_calls += 1;
        Ok(())
    }
}

impl Gpu for SoftGpu {
    fn caps(&self) -> GpuCaps {
        self.caps
    }

    // ---- Textures ----

    fn create_texture(&self) -> Result<TextureId, String> {
        let mut st = self.state.borrow_mut();
        if st.fail_textures {
            return Err("texture allocation failed (injected)".into());
        }
        let id = match st.freed_textures.pop().and_then(NonZeroU32::new) {
            Some(id) => id,
            None => st.next(),
        };
        st.textures.insert(id.get(), Surface::empty());
        Ok(TextureId(id))
    }

    fn delete_texture(&self, tex: TextureId) {
        let mut st = self.state.borrow_mut();
        let name = tex.0.get();
        if st.textures.remove(&name).is_none() {
            return;
        }
        for u in st.units.iter_mut() {
            if *u == Some(name) {
                *u = None;
            }
        }
        // GL leaves unbound framebuffers pointing at orphaned storage; detach
        // instead so a stale attachment fails the next draw.
        for att in st.framebuffers.values_mut() {
            if *att == Some(FbAttachment::Texture(name)) {
                *att = None;
            }
        }
        if st.recycle_textures {
            st.freed_textures.push(name);
        }
    }

    fn active_texture(&self, unit: u32) {
        let mut st = self.state.borrow_mut();
        if (unit as usize) < TEXTURE_UNITS {
            st.active_unit = unit as usize;
        } else {
            st.error(INVALID_ENUM);
        }
    }

    fn bind_texture(&self, tex: Option<TextureId>) {
        let mut st = self.state.borrow_mut();
        match tex {
            Some(t) if !st.textures.contains_key(&t.0.get()) => st.error(INVALID_OPERATION),
            _ => {
                let unit = st.active_unit;
                st.units[unit] = tex.map(|t| t.0.get());
            }
        }
    }

    fn set_texture_sampling(&self) {
        let mut st = self.state.borrow_mut();
        // always linear + clamp-to-edge
        if st.bound_texture().is_none() {
            st.error(INVALID_OPERATION);
        }
    }

    fn tex_image_2d(&self, format: TextureFormat, width: u32, height: u32, src: PixelSource<'_>) {
        let mut st = self.state.borrow_mut();
        let Some(id) = st.bound_texture() else {
            return st.error(INVALID_OPERATION);
        };
        let size = Size2d::new(width, height);
        let mut surface = Surface::new(format, size);
        match st.unpack(src, surface.byte_len()) {
            Some(Some(bytes)) => surface.data = bytes,
            Some(None) => {}
            None => return st.error(INVALID_OPERATION),
        }
        st.textures.insert(id, surface);
        st.texture_allocations += 1;
    }

    fn tex_sub_image_2d(&self, format: TextureFormat, width: u32, height: u32, src: PixelSource<'_>) {
        let mut st = self.state.borrow_mut();
        let Some(id) = st.bound_texture() else {
            return st.error(INVALID_OPERATION);
        };
        let (tex_format, tex_size) = match st.textures.get(&id) {
            Some(s) if s.is_specified() => (s.format, s.size),
            _ => return st.error(INVALID_OPERATION),
        };
        if tex_format != format || width > tex_size.width || height > tex_size.height {
            return st.error(INVALID_OPERATION);
        }
        let bpp = format.bytes_per_pixel();
        let row = width as usize * bpp;
        let bytes = match st.unpack(src, row * height as usize) {
            Some(Some(b)) => b,
            Some(None) => return,
            None => return st.error(INVALID_OPERATION),
        };
        if let Some(s) = st.textures.get_mut(&id) {
            let pitch = s.size.width as usize * bpp;
            for y in 0..height as usize {
                s.data[y * pitch..y * pitch + row].copy_from_slice(&bytes[y * row..(y + 1) * row]);
            }
        }
    }

    // ---- Framebuffers / renderbuffers ----

    fn create_framebuffer(&self) -> Result<FramebufferId, String> {
        let mut st = self.state.borrow_mut();
        let id = st.next();
        st.framebuffers.insert(id.get(), None);
        Ok(FramebufferId(id))
    }

    fn delete_framebuffer(&self, fbo: FramebufferId) {
        let mut st = self.state.borrow_mut();
        st.framebuffers.remove(&fbo.0.get());
        if st.framebuffer == Some(fbo.0.get()) {
            st.framebuffer = None;
        }
    }

    fn bind_framebuffer(&self, fbo: Option<FramebufferId>) {
        let mut st = self.state.borrow_mut();
        match fbo {
            Some(f) if !st.framebuffers.contains_key(&f.0.get()) => st.error(INVALID_OPERATION),
            _ => st.framebuffer = fbo.map(|f| f.0.get()),
        }
    }

    fn framebuffer_texture(&self, tex: Option<TextureId>) {
        let mut st = self.state.borrow_mut();
        let Some(fb) = st.framebuffer else {
            return st.error(INVALID_OPERATION);
        };
        st.framebuffers
            .insert(fb, tex.map(|t| FbAttachment::Texture(t.0.get())));
    }

    fn create_renderbuffer(&self) -> Result<RenderbufferId, String> {
        let mut st = self.state.borrow_mut();
        let id = st.next();
        st.renderbuffers.insert(id.get(), Surface::empty());
        Ok(RenderbufferId(id))
    }

    fn delete_renderbuffer(&self, rb: RenderbufferId) {
        let mut st = self.state.borrow_mut();
        st.renderbuffers.remove(&rb.0.get());
        if st.renderbuffer == Some(rb.0.get()) {
            st.renderbuffer = None;
        }
    }

    fn bind_renderbuffer(&self, rb: Option<RenderbufferId>) {
        let mut st = self.state.borrow_mut();
        match rb {
            Some(r) if !st.renderbuffers.contains_key(&r.0.get()) => st.error(INVALID_OPERATION),
            _ => st.renderbuffer = rb.map(|r| r.0.get()),
        }
    }

    fn renderbuffer_storage(&self, width: u32, height: u32) {
        let mut st = self.state.borrow_mut();
        let Some(rb) = st.renderbuffer else {
            return st.error(INVALID_OPERATION);
        };
        st.renderbuffers
            .insert(rb, Surface::new(TextureFormat::Rgba, Size2d::new(width, height)));
    }

    fn framebuffer_renderbuffer(&self, rb: Option<RenderbufferId>) {
        let mut st = self.state.borrow_mut();
        let Some(fb) = st.framebuffer else {
            return st.error(INVALID_OPERATION);
        };
        st.framebuffers
            .insert(fb, rb.map(|r| FbAttachment::Renderbuffer(r.0.get())));
    }

    fn check_framebuffer_status(&self) -> u32 {
        self.state.borrow().status()
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        let mut st = self.state.borrow_mut();
        if width < 0 || height < 0 {
            return st.error(INVALID_VALUE);
        }
        st.viewport = Viewport {
            x,
            y,
            w: width,
            h: height,
        };
    }

    fn clear(&self, rgba: [f32; 4]) {
        let mut st = self.state.borrow_mut();
        if st.status() != FRAMEBUFFER_COMPLETE {
            return st.error(INVALID_FRAMEBUFFER_OPERATION);
        }
        if let Some(t) = st.target_mut() {
            t.fill(rgba);
        }
    }

    // ---- Buffers ----

    fn create_buffer(&self) -> Result<BufferId, String> {
        let mut st = self.state.borrow_mut();
        let id = st.next();
        st.buffers.insert(id.get(), Vec::new());
        Ok(BufferId(id))
    }

    fn delete_buffer(&self, buf: BufferId) {
        let mut st = self.state.borrow_mut();
        st.buffers.remove(&buf.0.get());
        for b in st.bound_buffers.iter_mut() {
            if *b == Some(buf.0.get()) {
                *b = None;
            }
        }
    }

    fn bind_buffer(&self, target: BufferTarget, buf: Option<BufferId>) {
        let mut st = self.state.borrow_mut();
        if target != BufferTarget::Array && !self.caps.pixel_buffers {
            return st.error(INVALID_ENUM);
        }
        match buf {
            Some(b) if !st.buffers.contains_key(&b.0.get()) => st.error(INVALID_OPERATION),
            _ => st.bound_buffers[slot_of(target)] = buf.map(|b| b.0.get()),
        }
    }

    fn buffer_data_size(&self, target: BufferTarget, size: usize, _usage: BufferUsage) {
        let mut st = self.state.borrow_mut();
        match st.bound_buffer(target) {
            Some(b) => {
                st.buffers.insert(b, vec![0; size]);
            }
            None => st.error(INVALID_OPERATION),
        }
    }

    fn buffer_data(&self, target: BufferTarget, data: &[u8], _usage: BufferUsage) {
        let mut st = self.state.borrow_mut();
        match st.bound_buffer(target) {
            Some(b) => {
                st.buffers.insert(b, data.to_vec());
            }
            None => st.error(INVALID_OPERATION),
        }
    }

    fn map_buffer_write(&self, target: BufferTarget, len: usize, write: &mut dyn FnMut(&mut [u8])) -> bool {
        let (id, mut bytes) = {
            let mut st = self.state.borrow_mut();
            let Some(id) = st.bound_buffer(target).filter(|_| self.caps.pixel_buffers) else {
                st.error(INVALID_OPERATION);
                return false;
            };
            match st.buffers.get_mut(&id) {
                Some(b) if b.len() >= len => (id, std::mem::take(b)),
                _ => {
                    st.error(INVALID_VALUE);
                    return false;
                }
            }
        };
        // callback runs unborrowed, like a real mapping
        write(&mut bytes[..len]);
        self.state.borrow_mut().buffers.insert(id, bytes);
        true
    }

    fn map_buffer_read(&self, target: BufferTarget, len: usize, read: &mut dyn FnMut(&[u8])) -> bool {
        let (id, bytes) = {
            let mut st = self.state.borrow_mut();
            let Some(id) = st.bound_buffer(target).filter(|_| self.caps.pixel_buffers) else {
                st.error(INVALID_OPERATION);
                return false;
            };
            match st.buffers.get_mut(&id) {
                Some(b) if b.len() >= len => (id, std::mem::take(b)),
                _ => {
                    st.error(INVALID_VALUE);
                    return false;
                }
            }
        };
        read(&bytes[..len]);
        self.state.borrow_mut().buffers.insert(id, bytes);
        true
    }

    fn read_pixels(&self, width: u32, height: u32, format: TextureFormat, dest: PixelDest<'_>) {
        let mut st = self.state.borrow_mut();
        if !format.is_rgba_family() {
            return st.error(INVALID_ENUM);
        }
        if st.status() != FRAMEBUFFER_COMPLETE {
            return st.error(INVALID_FRAMEBUFFER_OPERATION);
        }
        let Some(bytes) = st.target().map(|s| s.read(width, height, format == TextureFormat::Bgra)) else {
            return st.error(INVALID_FRAMEBUFFER_OPERATION);
        };
        match dest {
            PixelDest::Slice(out) => match out.get_mut(..bytes.len()) {
                Some(o) => o.copy_from_slice(&bytes),
                None => st.error(INVALID_OPERATION),
            },
            PixelDest::PackOffset(off) => {
                let dst = st
                    .bound_buffer(BufferTarget::PixelPack)
                    .and_then(|b| st.buffers.get_mut(&b))
                    .and_then(|buf| buf.get_mut(off..off + bytes.len()));
                match dst {
                    Some(d) => d.copy_from_slice(&bytes),
                    None => st.error(INVALID_OPERATION),
                }
            }
        }
    }

    // ---- Programs ----

    fn create_program(&self, vert: &str, frag: &str) -> Result<ProgramId, EngineError> {
        let vertex = self.kernels.vertex(vert).ok_or_else(|| EngineError::ShaderCompile {
            stage: ShaderStage::Vertex,
            log: "no reference kernel registered for this source".into(),
        })?;
        let fragment = self.kernels.fragment(frag).ok_or_else(|| EngineError::ShaderCompile {
            stage: ShaderStage::Fragment,
            log: "no reference kernel registered for this source".into(),
        })?;
        let mut uniform_names = declared(vert, "uniform ");
        for u in declared(frag, "uniform ") {
            if !uniform_names.contains(&u) {
                uniform_names.push(u);
            }
        }
        let program = Program {
            vertex,
            fragment,
            attribs: declared(vert, "in "),
            uniform_names,
            uniforms: HashMap::new(),
        };
        let mut st = self.state.borrow_mut();
        let id = st.next();
        st.programs.insert(id.get(), program);
        tracing::trace!(program = id.get(), "soft program linked");
        Ok(ProgramId(id))
    }

    fn delete_program(&self, prog: ProgramId) {
        let mut st = self.state.borrow_mut();
        st.programs.remove(&prog.0.get());
        if st.program == Some(prog.0.get()) {
            st.program = None;
        }
    }

    fn use_program(&self, prog: Option<ProgramId>) {
        let mut st = self.state.borrow_mut();
        match prog {
            Some(p) if !st.programs.contains_key(&p.0.get()) => st.error(INVALID_OPERATION),
            _ => st.program = prog.map(|p| p.0.get()),
        }
    }

    fn attrib_location(&self, prog: ProgramId, name: &str) -> Option<u32> {
        let st = self.state.borrow();
        let p = st.programs.get(&prog.0.get())?;
        p.attribs.iter().position(|a| a == name).map(|i| i as u32)
    }

    fn uniform_location(&self, prog: ProgramId, name: &str) -> Option<UniformLocation> {
        let st = self.state.borrow();
        let p = st.programs.get(&prog.0.get())?;
        p.uniform_names
            .iter()
            .position(|u| u == name)
            .map(|i| UniformLocation(i as u32))
    }

    fn set_uniform(&self, loc: UniformLocation, value: UniformValue) {
        let mut st = self.state.borrow_mut();
        let prog = st.program;
        let Some(p) = prog.and_then(|p| st.programs.get_mut(&p)) else {
            return st.error(INVALID_OPERATION);
        };
        match p.uniform_names.get(loc.0 as usize).cloned() {
            Some(name) => {
                p.uniforms.insert(name, value);
            }
            None => st.error(INVALID_OPERATION),
        }
    }

    // ---- Geometry ----

    fn create_vertex_array(&self) -> Result<VertexArrayId, String> {
        let mut st = self.state.borrow_mut();
        let id = st.next();
        st.vertex_arrays.insert(id.get(), VertexArray::default());
        Ok(VertexArrayId(id))
    }

    fn delete_vertex_array(&self, vao: VertexArrayId) {
        let mut st = self.state.borrow_mut();
        st.vertex_arrays.remove(&vao.0.get());
        if st.vertex_array == Some(vao.0.get()) {
            st.vertex_array = None;
        }
    }

    fn bind_vertex_array(&self, vao: Option<VertexArrayId>) {
        let mut st = self.state.borrow_mut();
        match vao {
            Some(v) if !st.vertex_arrays.contains_key(&v.0.get()) => st.error(INVALID_OPERATION),
            _ => st.vertex_array = vao.map(|v| v.0.get()),
        }
    }

    fn enable_vertex_attrib(&self, index: u32) {
        let mut st = self.state.borrow_mut();
        let bound = st.vertex_array;
        match bound.and_then(|v| st.vertex_arrays.get_mut(&v)) {
            Some(vao) => {
                vao.enabled.insert(index);
            }
            None => st.error(INVALID_OPERATION),
        }
    }

    fn vertex_attrib_pointer(&self, index: u32, components: u32, stride: usize, offset: usize) {
        let mut st = self.state.borrow_mut();
        let buffer = st.bound_buffer(BufferTarget::Array);
        let bound = st.vertex_array;
        match (buffer, bound.and_then(|v| st.vertex_arrays.get_mut(&v))) {
            (Some(buffer), Some(vao)) if (1..=4).contains(&components) => {
                vao.pointers.insert(
                    index,
                    AttribPointer {
                        buffer,
                        components,
                        stride,
                        offset,
                    },
                );
            }
            _ => st.error(INVALID_OPERATION),
        }
    }

    fn draw_arrays(&self, mode: Primitive, first: u32, count: u32) {
        let mut st = self.state.borrow_mut();
        if let Err(code) = self.draw(&mut st, mode, first, count) {
            st.error(code);
        }
    }

    fn get_error(&self) -> u32 {
        let mut st = self.state.borrow_mut();
        if st.errors.is_empty() {
            NO_ERROR
        } else {
            st.errors.remove(0)
        }
    }
}
