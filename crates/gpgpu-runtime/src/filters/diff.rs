use crate::gpu::UniformValue;
use crate::proc::Filter;
use crate::shader::Shader;

pub const DIFF_FRAG: &str = r#"
in vec2 v_uv;
uniform sampler2D u_input;
uniform sampler2D u_input2;
uniform float u_strength;
out vec4 frag_color;
void main() {
    vec3 a = texture(u_input, v_uv).rgb;
    vec3 b = texture(u_input2, v_uv).rgb;
    frag_color = vec4(clamp((a - b) * u_strength, 0.0, 1.0), 1.0);
}
"#;

/// Two-input difference `clamp((slot0 - slot1) * strength)`, opaque.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Diff {
    pub strength: f32,
}

impl Default for Diff {
    fn default() -> Self {
        Self { strength: 1.0 }
    }
}

impl Diff {
    pub fn new(strength: f32) -> Self {
        Self { strength }
    }
}

impl Filter for Diff {
    fn name(&self) -> &'static str {
        "diff"
    }

    fn fragment_source(&self) -> &'static str {
        DIFF_FRAG
    }

    fn input_slots(&self) -> usize {
        2
    }

    fn stage_uniforms(&self, shader: &mut Shader) {
        shader.set("u_strength", UniformValue::Float(self.strength));
    }
}
