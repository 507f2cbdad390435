use std::collections::HashMap;

use gpgpu_core::EngineError;

use crate::gpu::{Gpu, ProgramId, UniformLocation, UniformValue};

/// Version-less GLSL ES 3 source pair. Backends prepend the header for their API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub vert: String,
    pub frag: String,
    /// Optional human-friendly origin (filter name) for logs.
    pub origin: Option<String>,
}

impl ShaderSource {
    pub fn new(vert: &str, frag: &str) -> Self {
        Self {
            vert: vert.to_string(),
            frag: frag.to_string(),
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct StagedUniform {
    value: UniformValue,
    dirty: bool,
}

/// A linked program with cached locations and staged uniform values.
///
/// Uniforms are staged by name with [`Shader::set`] and only re-uploaded by
/// [`Shader::apply`] when their value changed.
#[derive(Debug)]
pub struct Shader {
    program: Option<ProgramId>,
    attribs: HashMap<String, Option<u32>>,
    locations: HashMap<String, Option<UniformLocation>>,
    staged: HashMap<String, StagedUniform>,
}

impl Shader {
    pub fn build(gpu: &dyn Gpu, src: &ShaderSource) -> Result<Self, EngineError> {
        let program = gpu.create_program(&src.vert, &src.frag).map_err(|e| {
            tracing::error!(origin = src.origin.as_deref().unwrap_or("?"), error = %e, "shader build failed");
            e
        })?;
        Ok(Self {
            program: Some(program),
            attribs: HashMap::new(),
            locations: HashMap::new(),
            staged: HashMap::new(),
        })
    }

    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    fn live(&self) -> Result<ProgramId, EngineError> {
        self.program
            .ok_or_else(|| EngineError::precondition("shader used after release"))
    }

    pub fn use_program(&self, gpu: &dyn Gpu) -> Result<(), EngineError> {
        gpu.use_program(Some(self.live()?));
        Ok(())
    }

    /// Attribute location, `None` if the linker dropped it.
    pub fn attrib(&mut self, gpu: &dyn Gpu, name: &str) -> Result<Option<u32>, EngineError> {
        let prog = self.live()?;
        Ok(*self
            .attribs
            .entry(name.to_string())
            .or_insert_with(|| gpu.attrib_location(prog, name)))
    }

    pub fn uniform(&mut self, gpu: &dyn Gpu, name: &str) -> Result<Option<UniformLocation>, EngineError> {
        let prog = self.live()?;
        Ok(*self
            .locations
            .entry(name.to_string())
            .or_insert_with(|| gpu.uniform_location(prog, name)))
    }

    /// Stage a uniform value. Marks it dirty only if it changed.
    pub fn set(&mut self, name: &str, value: UniformValue) {
        match self.staged.get_mut(name) {
            Some(s) if s.value == value => {}
            Some(s) => {
                s.value = value;
                s.dirty = true;
            }
            None => {
                self.staged
                    .insert(name.to_string(), StagedUniform { value, dirty: true });
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.staged.values().any(|s| s.dirty)
    }

    /// Upload dirty uniforms. The program must be in use.
    pub fn apply(&mut self, gpu: &dyn Gpu) -> Result<usize, EngineError> {
        let prog = self.live()?;
        let mut uploaded = 0;
        for (name, staged) in self.staged.iter_mut().filter(|(_, s)| s.dirty) {
            let loc = *self
                .locations
                .entry(name.clone())
                .or_insert_with(|| gpu.uniform_location(prog, name));
            // optimized-out uniforms are skipped, like GL does for location -1
            if let Some(loc) = loc {
                gpu.set_uniform(loc, staged.value);
                uploaded += 1;
            }
            staged.dirty = false;
        }
        Ok(uploaded)
    }

    pub fn release(&mut self, gpu: &dyn Gpu) {
        if let Some(p) = self.program.take() {
            gpu.delete_program(p);
        }
        self.attribs.clear();
        self.locations.clear();
        self.staged.clear();
    }
}
