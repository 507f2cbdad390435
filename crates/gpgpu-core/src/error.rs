use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Shader stage a compile error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Step of the render/transfer protocol after which a GPU error was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPhase {
    Prepare,
    SetCoords,
    Draw,
    Cleanup,
    Upload,
    Readback,
}

impl fmt::Display for RenderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RenderPhase::Prepare => "prepare",
            RenderPhase::SetCoords => "set-coords",
            RenderPhase::Draw => "draw",
            RenderPhase::Cleanup => "cleanup",
            RenderPhase::Upload => "upload",
            RenderPhase::Readback => "readback",
        };
        f.write_str(s)
    }
}

/// Engine-level errors used across the gpgpu crates.
///
/// Runtime crates re-export this type. None of the GPU variants are
/// recoverable inside a frame; callers decide whether to rebuild the context.
#[derive(Debug, Error)]
pub enum EngineError {
    // ---- GPU resources / render protocol ----
    /// Texture, buffer, framebuffer or program allocation failed.
    #[error("resource error: {what}: {detail}")]
    Resource { what: &'static str, detail: String },

    #[error("{stage} shader compile error: {log}")]
    ShaderCompile { stage: ShaderStage, log: String },

    #[error("program link error: {0}")]
    Link(String),

    /// A GPU error code was pending after a protocol phase.
    #[error("render error in {proc} ({phase}): GPU error 0x{code:04x}")]
    Render {
        proc: String,
        phase: RenderPhase,
        code: u32,
    },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("graph error: {0}")]
    Graph(String),

    // ---- Config ----
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json parse error at {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config at {}: {msg}", path.display())]
    InvalidConfig { path: PathBuf, msg: String },

    // ---- Fallback ----
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn other<T: Into<String>>(s: T) -> Self {
        EngineError::Other(s.into())
    }

    pub fn resource<T: Into<String>>(what: &'static str, detail: T) -> Self {
        EngineError::Resource {
            what,
            detail: detail.into(),
        }
    }

    pub fn precondition<T: Into<String>>(s: T) -> Self {
        EngineError::Precondition(s.into())
    }

    pub fn unsupported<T: Into<String>>(s: T) -> Self {
        EngineError::Unsupported(s.into())
    }

    pub fn graph<T: Into<String>>(s: T) -> Self {
        EngineError::Graph(s.into())
    }

    /// True for errors raised by the GPU side of the engine (as opposed to config/graph).
    pub fn is_gpu_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Resource { .. }
                | EngineError::ShaderCompile { .. }
                | EngineError::Link(_)
                | EngineError::Render { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_error_names_phase_and_code() {
        let e = EngineError::Render {
            proc: "GainProc".into(),
            phase: RenderPhase::SetCoords,
            code: 0x0502,
        };
        let msg = e.to_string();
        assert!(msg.contains("GainProc"), "{msg}");
        assert!(msg.contains("set-coords"), "{msg}");
        assert!(msg.contains("0x0502"), "{msg}");
        assert!(e.is_gpu_fatal());
    }

    #[test]
    fn config_errors_are_not_gpu_fatal() {
        let e = EngineError::InvalidConfig {
            path: PathBuf::from("p.json"),
            msg: "output_slots must be >= 1".into(),
        };
        assert!(!e.is_gpu_fatal());
        assert!(e.to_string().contains("p.json"));
    }
}
