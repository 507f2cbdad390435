//! Shared vocabulary for the gpgpu pipeline crates.
//!
//! Nothing in here touches a GPU context: errors, sizes, pixel formats and the
//! pipeline configuration live here so that graph, runtime and backends agree
//! on them.
#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod format;
pub mod size;

pub use config::{load_typed_json, ChromaChannels, PipelineConfig, YuvConfig, YuvStandard};
pub use error::{EngineError, RenderPhase, ShaderStage};
pub use format::{PixelFormat, TextureFormat, YuvLayout, YuvPlane};
pub use size::Size2d;
