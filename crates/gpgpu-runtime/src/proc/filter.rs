use std::any::Any;
use std::fmt;

use gpgpu_core::{EngineError, PixelFormat, RenderPhase, Size2d};

use super::{not_initialized, GpuCtx, ProcState, Processor, ResultTarget};
use crate::fbo::FrameBuffer;
use crate::geometry::{Geometry, GeometryBuffer, POSITION_ATTRIB, TEXCOORD_ATTRIB};
use crate::gpu::{TextureId, UniformValue};
use crate::shader::{Shader, ShaderSource};
use crate::transfer::MemTransfer;

pub const DEFAULT_VERT: &str = r#"
in vec4 a_pos;
in vec2 a_uv;
out vec2 v_uv;
void main() {
    gl_Position = a_pos;
    v_uv = a_uv;
}
"#;

/// Sampler uniform bound to each input slot unless a filter renames it.
pub const SAMPLER_NAMES: [&str; 4] = ["u_input", "u_input2", "u_input3", "u_input4"];

/// A leaf transformation: N input textures, one output, one shader program.
///
/// The engine treats the shader math as opaque; a filter only says which
/// sources to compile, how many inputs it samples and which uniforms to set.
pub trait Filter: fmt::Debug + 'static {
    fn name(&self) -> &'static str;

    fn vertex_source(&self) -> &'static str {
        DEFAULT_VERT
    }

    fn fragment_source(&self) -> &'static str;

    fn input_slots(&self) -> usize {
        1
    }

    /// Sampler uniform for input `slot`.
    fn sampler(&self, slot: usize) -> &'static str {
        SAMPLER_NAMES[slot.min(SAMPLER_NAMES.len() - 1)]
    }

    /// Stage per-frame uniforms (only changed values are re-uploaded).
    fn stage_uniforms(&self, _shader: &mut Shader) {}

    /// Custom geometry; `None` draws the full-screen quad.
    fn geometry(&self) -> Option<&Geometry> {
        None
    }
}

impl Filter for Box<dyn Filter> {
    fn name(&self) -> &'static str {
        (**self).name()
    }
    fn vertex_source(&self) -> &'static str {
        (**self).vertex_source()
    }
    fn fragment_source(&self) -> &'static str {
        (**self).fragment_source()
    }
    fn input_slots(&self) -> usize {
        (**self).input_slots()
    }
    fn sampler(&self, slot: usize) -> &'static str {
        (**self).sampler(slot)
    }
    fn stage_uniforms(&self, shader: &mut Shader) {
        (**self).stage_uniforms(shader)
    }
    fn geometry(&self) -> Option<&Geometry> {
        (**self).geometry()
    }
}

/// Output size policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputScale {
    /// Output = input scaled by the factor (rounded, at least 1 px).
    Factor(f32),
    Fixed(Size2d),
}

impl Default for OutputScale {
    fn default() -> Self {
        OutputScale::Factor(1.0)
    }
}

impl OutputScale {
    pub fn apply(self, input: Size2d) -> Size2d {
        match self {
            OutputScale::Factor(f) => input.scaled(f),
            OutputScale::Fixed(s) => s,
        }
    }
}

/// Where a pass draws.
#[derive(Debug, Clone, Copy)]
pub enum DrawTarget<'a> {
    Framebuffer(&'a FrameBuffer),
    /// Default framebuffer at a pixel offset.
    Screen { x: i32, y: i32, size: Size2d },
}

/// Shader, geometry and input bindings shared by every shader-driven processor.
///
/// [`FilterCore::run`] executes the four-phase protocol: prepare (bind target,
/// viewport, program), set coordinates (textures, uniforms, vertex arrays),
/// draw, cleanup (restore default bindings). The GPU error state is checked
/// after each phase.
#[derive(Debug)]
pub struct FilterCore {
    name: &'static str,
    shader: Option<Shader>,
    geometry: Option<GeometryBuffer>,
    quad: Geometry,
    attribs: (Option<u32>, Option<u32>),
    inputs: Vec<Option<TextureId>>,
}

impl FilterCore {
    pub fn new(name: &'static str, slots: usize) -> Self {
        Self {
            name,
            shader: None,
            geometry: None,
            quad: Geometry::quad(),
            attribs: (None, None),
            inputs: vec![None; slots.max(1)],
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_built(&self) -> bool {
        self.shader.is_some()
    }

    /// Compile the filter's program and create its vertex buffers.
    pub fn build(&mut self, ctx: &GpuCtx<'_>, filter: &dyn Filter) -> Result<(), EngineError> {
        self.release(ctx.gpu);
        let src = ShaderSource::new(filter.vertex_source(), filter.fragment_source())
            .with_origin(filter.name());
        let mut shader = Shader::build(ctx.gpu, &src)?;
        let pos = shader.attrib(ctx.gpu, POSITION_ATTRIB)?;
        let uv = shader.attrib(ctx.gpu, TEXCOORD_ATTRIB)?;
        let geometry = match GeometryBuffer::new(ctx.gpu) {
            Ok(g) => g,
            Err(e) => {
                shader.release(ctx.gpu);
                return Err(e);
            }
        };
        self.attribs = (pos, uv);
        self.shader = Some(shader);
        self.geometry = Some(geometry);
        if self.inputs.len() < filter.input_slots() {
            self.inputs.resize(filter.input_slots(), None);
        }
        Ok(())
    }

    pub fn shader_mut(&mut self) -> Option<&mut Shader> {
        self.shader.as_mut()
    }

    pub fn set_input(&mut self, slot: usize, tex: TextureId) -> Result<(), EngineError> {
        let n = self.inputs.len();
        let entry = self.inputs.get_mut(slot).ok_or_else(|| {
            EngineError::precondition(format!("input slot {slot} out of range ({n} slots)"))
        })?;
        *entry = Some(tex);
        Ok(())
    }

    pub fn input(&self, slot: usize) -> Option<TextureId> {
        self.inputs.get(slot).copied().flatten()
    }

    pub fn inputs_ready(&self) -> bool {
        self.inputs.iter().all(Option::is_some)
    }

    pub fn clear_inputs(&mut self) {
        self.inputs.iter_mut().for_each(|i| *i = None);
    }

    /// Render one pass of `filter` into `target`.
    pub fn run(
        &mut self,
        ctx: &GpuCtx<'_>,
        filter: &dyn Filter,
        target: DrawTarget<'_>,
    ) -> Result<(), EngineError> {
        let result = self.run_phases(ctx, filter, target);
        if result.is_err() {
            // leave default bindings for whoever handles the error
            self.cleanup(ctx);
        }
        result
    }

    fn run_phases(
        &mut self,
        ctx: &GpuCtx<'_>,
        filter: &dyn Filter,
        target: DrawTarget<'_>,
    ) -> Result<(), EngineError> {
        self.prepare(ctx, target)?;
        ctx.check(self.name, RenderPhase::Prepare)?;
        self.set_coords(ctx, filter)?;
        ctx.check(self.name, RenderPhase::SetCoords)?;
        self.draw(ctx);
        ctx.check(self.name, RenderPhase::Draw)?;
        self.cleanup(ctx);
        ctx.check(self.name, RenderPhase::Cleanup)
    }

    fn prepare(&mut self, ctx: &GpuCtx<'_>, target: DrawTarget<'_>) -> Result<(), EngineError> {
        let shader = self
            .shader
            .as_ref()
            .ok_or_else(|| not_initialized(self.name, "render"))?;
        match target {
            DrawTarget::Framebuffer(fbo) => {
                fbo.bind(ctx.gpu)?;
                let (w, h) = fbo.size().as_i32();
                ctx.gpu.viewport(0, 0, w, h);
            }
            DrawTarget::Screen { x, y, size } => {
                FrameBuffer::unbind(ctx.gpu);
                let (w, h) = size.as_i32();
                ctx.gpu.viewport(x, y, w, h);
            }
        }
        shader.use_program(ctx.gpu)
    }

    fn set_coords(&mut self, ctx: &GpuCtx<'_>, filter: &dyn Filter) -> Result<(), EngineError> {
        let gpu = ctx.gpu;
        let shader = self
            .shader
            .as_mut()
            .ok_or_else(|| not_initialized(self.name, "render"))?;

        for slot in 0..filter.input_slots() {
            let tex = self.inputs.get(slot).copied().flatten().ok_or_else(|| {
                EngineError::precondition(format!("{}: input slot {slot} not bound", self.name))
            })?;
            gpu.active_texture(slot as u32);
            gpu.bind_texture(Some(tex));
            shader.set(filter.sampler(slot), UniformValue::Int(slot as i32));
        }
        filter.stage_uniforms(shader);
        shader.apply(gpu)?;

        let geometry = self
            .geometry
            .as_mut()
            .ok_or_else(|| not_initialized(self.name, "render"))?;
        let custom = filter.geometry();
        geometry.upload(gpu, custom.unwrap_or(&self.quad), self.attribs.0, self.attribs.1)?;
        geometry.bind(gpu);
        if custom.is_some() {
            // meshes may not cover the whole target
            gpu.clear([0.0, 0.0, 0.0, 1.0]);
        }
        Ok(())
    }

    fn draw(&self, ctx: &GpuCtx<'_>) {
        if let Some(g) = &self.geometry {
            g.draw(ctx.gpu);
        }
    }

    fn cleanup(&self, ctx: &GpuCtx<'_>) {
        let gpu = ctx.gpu;
        gpu.bind_vertex_array(None);
        for slot in (0..self.inputs.len()).rev() {
            gpu.active_texture(slot as u32);
            gpu.bind_texture(None);
        }
        gpu.use_program(None);
        FrameBuffer::unbind(gpu);
    }

    pub fn release(&mut self, gpu: &dyn crate::gpu::Gpu) {
        if let Some(mut s) = self.shader.take() {
            s.release(gpu);
        }
        if let Some(mut g) = self.geometry.take() {
            g.release(gpu);
        }
        self.attribs = (None, None);
    }
}

/// Generic single-output processor driving one [`Filter`].
#[derive(Debug)]
pub struct FilterProc<F: Filter> {
    filter: F,
    core: FilterCore,
    scale: OutputScale,
    transfer: Option<Box<dyn MemTransfer>>,
    fbo: Option<FrameBuffer>,
    state: ProcState,
    in_size: Size2d,
    out_size: Size2d,
    order: usize,
    external_format: PixelFormat,
}

impl<F: Filter> FilterProc<F> {
    pub fn new(filter: F) -> Self {
        let core = FilterCore::new(filter.name(), filter.input_slots());
        Self {
            filter,
            core,
            scale: OutputScale::default(),
            transfer: None,
            fbo: None,
            state: ProcState::Uninitialized,
            in_size: Size2d::default(),
            out_size: Size2d::default(),
            order: 0,
            external_format: PixelFormat::RGBA,
        }
    }

    pub fn with_scale(filter: F, scale: OutputScale) -> Self {
        let mut p = Self::new(filter);
        p.scale = scale;
        p
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut F {
        &mut self.filter
    }

    /// Takes effect at the next (re)init.
    pub fn set_output_scale(&mut self, scale: OutputScale) {
        self.scale = scale;
    }

    pub fn output_scale(&self) -> OutputScale {
        self.scale
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn input_size(&self) -> Size2d {
        self.in_size
    }

    /// Size output, prepare the transfer's output texture and (re)attach the framebuffer.
    fn allocate(
        &mut self,
        ctx: &GpuCtx<'_>,
        in_size: Size2d,
        prepare_for_external_input: bool,
    ) -> Result<(), EngineError> {
        if in_size.is_empty() {
            return Err(EngineError::precondition(format!(
                "{}: init with zero input size",
                self.filter.name()
            )));
        }
        let out_size = self.scale.apply(in_size);
        let transfer = self.transfer.get_or_insert_with(|| ctx.transfers.create());

        if prepare_for_external_input {
            let tex = transfer.prepare_input(ctx.gpu, in_size, self.external_format, None)?;
            self.core.set_input(0, tex)?;
        } else if transfer.input_texture().is_some() {
            transfer.release_input(ctx.gpu);
        }

        let (out_tex, reallocated) = transfer.refresh_output(ctx.gpu, out_size)?;
        let fbo = match self.fbo.take() {
            Some(f) => f,
            None => FrameBuffer::create(ctx.gpu)?,
        };
        let fbo = self.fbo.insert(fbo);
        fbo.ensure_texture(ctx.gpu, out_tex, out_size, reallocated)?;

        self.in_size = in_size;
        self.out_size = out_size;
        Ok(())
    }
}

impl<F: Filter> Processor for FilterProc<F> {
    fn name(&self) -> &str {
        self.filter.name()
    }

    fn state(&self) -> ProcState {
        self.state
    }

    fn input_slots(&self) -> usize {
        self.filter.input_slots()
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
        self.core.build(ctx, &self.filter)?;
        self.allocate(ctx, in_size, prepare_for_external_input)?;
        self.state = ProcState::Initialized;
        tracing::debug!(
            proc = self.filter.name(),
            order,
            in_w = in_size.width,
            in_h = in_size.height,
            out_w = self.out_size.width,
            out_h = self.out_size.height,
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
        tracing::debug!(proc = self.filter.name(), w = in_size.width, h = in_size.height, "reinit");
        Ok(())
    }

    fn set_external_input_format(&mut self, format: PixelFormat) {
        self.external_format = format;
    }

    fn set_external_input_data(&mut self, ctx: &GpuCtx<'_>, data: &[u8]) -> Result<(), EngineError> {
        let transfer = self
            .transfer
            .as_mut()
            .ok_or_else(|| not_initialized(self.filter.name(), "set_external_input_data"))?;
        transfer.to_gpu(ctx.gpu, data)
    }

    fn use_texture(&mut self, slot: usize, tex: TextureId) -> Result<(), EngineError> {
        self.core.set_input(slot, tex)
    }

    fn render(&mut self, ctx: &GpuCtx<'_>, position: usize) -> Result<(), EngineError> {
        if self.state == ProcState::Uninitialized {
            return Err(not_initialized(self.filter.name(), "render"));
        }
        let fbo = self
            .fbo
            .as_ref()
            .ok_or_else(|| not_initialized(self.filter.name(), "render"))?;
        self.core.run(ctx, &self.filter, DrawTarget::Framebuffer(fbo))?;
        self.state = ProcState::Ready;
        tracing::trace!(proc = self.filter.name(), position, "rendered");
        Ok(())
    }

    fn input_texture(&self) -> Option<TextureId> {
        self.core.input(0)
    }

    fn output_texture(&self) -> Option<TextureId> {
        self.transfer.as_ref().and_then(|t| t.output_texture())
    }

    fn output_size(&self) -> Size2d {
        self.out_size
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
        let name = self.filter.name();
        let (fbo, transfer) = match (&self.fbo, &mut self.transfer) {
            (Some(f), Some(t)) => (f, t),
            _ => return Err(not_initialized(name, "result_data")),
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

    fn release(&mut self, gpu: &dyn crate::gpu::Gpu) {
        self.core.release(gpu);
        if let Some(t) = self.transfer.as_mut() {
            t.release(gpu);
        }
        self.transfer = None;
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
