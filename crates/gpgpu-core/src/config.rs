//! Pipeline configuration.
//!
//! Configuration is an explicit value handed to `VideoSource`/`Pipeline`
//! construction. Runtimes never consult process-wide state for it.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::EngineError;

/// YUV to RGB conversion standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YuvStandard {
    #[default]
    Bt601Video,
    Bt601Full,
    Bt709,
}

impl YuvStandard {
    /// Column-major 3x3 conversion matrix applied to `(y, u - 0.5, v - 0.5)`.
    pub fn matrix(self) -> [f32; 9] {
        match self {
            YuvStandard::Bt601Video => [1.164, 1.164, 1.164, 0.0, -0.392, 2.017, 1.596, -0.813, 0.0],
            YuvStandard::Bt601Full => [1.0, 1.0, 1.0, 0.0, -0.343, 1.765, 1.4, -0.711, 0.0],
            YuvStandard::Bt709 => [1.164, 1.164, 1.164, 0.0, -0.213, 2.112, 1.793, -0.533, 0.0],
        }
    }

    /// Offset subtracted from luma before conversion.
    pub fn luma_offset(self) -> f32 {
        match self {
            YuvStandard::Bt601Full => 0.0,
            YuvStandard::Bt601Video | YuvStandard::Bt709 => 16.0 / 255.0,
        }
    }
}

/// How chroma planes are presented to the conversion shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChromaChannels {
    /// Interleaved chroma in a luminance-alpha texture (`.ra`).
    LuminanceAlpha,
    /// Interleaved chroma in a red-green texture (`.rg`).
    #[default]
    RedGreen,
    /// Separate U and V textures.
    Planar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct YuvConfig {
    pub standard: YuvStandard,
    pub chroma: ChromaChannels,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Use the pixel-buffer transfer path when the context supports it.
    pub use_platform_optimizations: bool,
    /// Read-side transfer slots per node. Two or more enable ping-pong readback.
    pub output_slots: usize,
    /// Poll the GPU error state after every render phase.
    pub check_gpu_errors: bool,
    pub yuv: YuvConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            use_platform_optimizations: true,
            output_slots: 1,
            check_gpu_errors: true,
            yuv: YuvConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let cfg: PipelineConfig = load_typed_json(path)?;
        cfg.validate(path)?;
        Ok(cfg)
    }

    /// Parse from an in-memory document. `origin` only labels errors.
    pub fn from_json_str(json: &str, origin: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = origin.as_ref().to_path_buf();
        let cfg: PipelineConfig = serde_json::from_str(json).map_err(|source| EngineError::Json {
            path: path.clone(),
            source,
        })?;
        cfg.validate(&path)?;
        Ok(cfg)
    }

    pub fn validate(&self, path: &Path) -> Result<(), EngineError> {
        if self.output_slots == 0 {
            return Err(EngineError::InvalidConfig {
                path: path.to_path_buf(),
                msg: "output_slots must be >= 1".into(),
            });
        }
        Ok(())
    }
}

/// Read and deserialize a JSON file.
pub fn load_typed_json<T: DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
    let bytes = std::fs::read(path).map_err(|source| EngineError::Io {
        path: PathBuf::from(path),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| EngineError::Json {
        path: PathBuf::from(path),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let cfg = PipelineConfig::from_json_str("{}", "inline").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn nested_yuv_settings_parse() {
        let cfg = PipelineConfig::from_json_str(
            r#"{ "output_slots": 2, "yuv": { "standard": "bt709", "chroma": "planar" } }"#,
            "inline",
        )
        .unwrap();
        assert_eq!(cfg.output_slots, 2);
        assert_eq!(cfg.yuv.standard, YuvStandard::Bt709);
        assert_eq!(cfg.yuv.chroma, ChromaChannels::Planar);
    }

    #[test]
    fn zero_output_slots_rejected() {
        let err = PipelineConfig::from_json_str(r#"{ "output_slots": 0 }"#, "inline").unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig { .. }), "{err}");
    }

    #[test]
    fn full_range_has_no_luma_offset() {
        assert_eq!(YuvStandard::Bt601Full.luma_offset(), 0.0);
        assert!(YuvStandard::Bt601Video.luma_offset() > 0.06);
    }
}
