use crate::proc::{Filter, FilterProc, OutputScale};
use crate::shader::Shader;
use crate::gpu::UniformValue;

pub const GAIN_FRAG: &str = r#"
in vec2 v_uv;
uniform sampler2D u_input;
uniform float u_gain;
out vec4 frag_color;
void main() {
    vec4 c = texture(u_input, v_uv);
    frag_color = vec4(clamp(c.rgb * u_gain, 0.0, 1.0), c.a);
}
"#;

/// Multiplies RGB by a constant, saturating at the channel maximum. Alpha is kept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gain {
    pub gain: f32,
}

impl Default for Gain {
    fn default() -> Self {
        Self { gain: 1.0 }
    }
}

impl Gain {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }
}

impl Filter for Gain {
    fn name(&self) -> &'static str {
        "gain"
    }

    fn fragment_source(&self) -> &'static str {
        GAIN_FRAG
    }

    fn stage_uniforms(&self, shader: &mut Shader) {
        shader.set("u_gain", UniformValue::Float(self.gain));
    }
}

impl FilterProc<Gain> {
    pub fn gain(gain: f32) -> Self {
        FilterProc::new(Gain::new(gain))
    }

    /// Gain that also resamples its output.
    pub fn scaled_gain(gain: f32, scale: OutputScale) -> Self {
        FilterProc::with_scale(Gain::new(gain), scale)
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.filter_mut().gain = gain;
    }
}
