use crate::proc::Filter;

pub const PASSTHROUGH_FRAG: &str = r#"
in vec2 v_uv;
uniform sampler2D u_input;
out vec4 frag_color;
void main() {
    frag_color = texture(u_input, v_uv);
}
"#;

/// Copies its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Passthrough;

impl Filter for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn fragment_source(&self) -> &'static str {
        PASSTHROUGH_FRAG
    }
}
