#![forbid(unsafe_code)]

//! Backend-agnostic execution engine.
//!
//! Everything here talks to the GPU through the object-safe [`Gpu`] trait, so
//! the same pipeline runs on `glow` (OpenGL ES 3 / GL 3.3 core) or on the CPU
//! reference backend. Processors, transfers and the pipeline orchestrator are
//! single-threaded and assume one current context.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod fbo;
pub mod filters;
pub mod geometry;
pub mod gpu;
pub mod pipeline;
pub mod proc;
pub mod shader;
pub mod texture;
pub mod transfer;
pub mod video;

pub use gpgpu_core::{
    ChromaChannels, EngineError, PipelineConfig, PixelFormat, RenderPhase, ShaderStage, Size2d,
    TextureFormat, YuvConfig, YuvLayout, YuvStandard,
};
pub use gpgpu_graph::NodeId;

pub use fbo::{create_render_target, Attachment, FrameBuffer, RenderTarget};
pub use geometry::{Geometry, GeometryBuffer};
pub use gpu::{check_gpu_error, Gpu, GpuCaps, Primitive, TextureId, UniformValue};
pub use pipeline::{FrameStats, Pipeline};
pub use proc::{
    DispProc, DrawTarget, Filter, FilterCore, FilterProc, GpuCtx, OutputScale, ProcState, Processor,
    ResultTarget,
};
pub use shader::{Shader, ShaderSource};
pub use texture::Texture;
pub use transfer::{
    ChromaTextures, FrameDelegate, MemTransfer, MemTransferFactory, TransferKind, YuvTextures,
};
pub use video::{FrameData, FrameInput, StageTimer, VideoSource};
