//! Frame ingestion: the entry point camera and decoder glue talk to.

use std::fmt;

use gpgpu_core::{ChromaChannels, EngineError, PipelineConfig, PixelFormat, Size2d, YuvLayout};
use gpgpu_graph::NodeId;

use crate::filters::Yuv2Rgb;
use crate::gpu::{Gpu, GpuCaps, TextureId};
use crate::pipeline::{FrameStats, Pipeline};
use crate::proc::{FilterProc, GpuCtx, Processor, ResultTarget};
use crate::transfer::{ChromaTextures, MemTransferFactory, TransferKind, YuvTextures};

/// Pixel payload of one frame.
#[derive(Debug, Clone, Copy)]
pub enum FrameData<'a> {
    /// Host pixels laid out per the frame's [`PixelFormat`].
    Pixels(&'a [u8]),
    /// An RGBA-family texture already on the GPU.
    Texture(TextureId),
    /// YUV planes already on the GPU (e.g. imported camera buffers).
    YuvTextures(YuvTextures),
}

#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub size: Size2d,
    pub format: PixelFormat,
    pub data: FrameData<'a>,
}

impl<'a> FrameInput<'a> {
    pub fn pixels(size: Size2d, format: PixelFormat, data: &'a [u8]) -> Self {
        Self {
            size,
            format,
            data: FrameData::Pixels(data),
        }
    }

    pub fn texture(size: Size2d, tex: TextureId) -> Self {
        Self {
            size,
            format: PixelFormat::RGBA,
            data: FrameData::Texture(tex),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ingest {
    HostRgba,
    HostYuv(YuvLayout),
    Texture,
    GpuYuv(ChromaChannels),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameKey {
    size: Size2d,
    format: PixelFormat,
    ingest: Ingest,
}

/// Receives named stage markers (`"upload"`, `"yuv2rgb"`, `"render"`) as each finishes.
pub type StageTimer = Box<dyn FnMut(&str)>;

/// Owns a [`Pipeline`] and feeds it frames.
///
/// YUV frames go through a dedicated conversion node first. Whenever the
/// frame size, format or ingestion kind differs from the previous frame, the
/// conversion node and the whole chain are reconfigured before rendering.
pub struct VideoSource {
    pipeline: Pipeline,
    factory: MemTransferFactory,
    config: PipelineConfig,
    yuv2rgb: Option<FilterProc<Yuv2Rgb>>,
    configured: Option<FrameKey>,
    timer: Option<StageTimer>,
}

impl fmt::Debug for VideoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoSource")
            .field("pipeline", &self.pipeline)
            .field("transfer", &self.factory.kind())
            .field("yuv2rgb", &self.yuv2rgb)
            .field("configured", &self.configured)
            .field("timer", &self.timer.is_some())
            .finish()
    }
}

impl VideoSource {
    pub fn new(config: PipelineConfig, caps: GpuCaps) -> Result<Self, EngineError> {
        config.validate(std::path::Path::new("<pipeline config>"))?;
        let factory = MemTransferFactory::new(&config, caps);
        Ok(Self {
            pipeline: Pipeline::new(),
            factory,
            config,
            yuv2rgb: None,
            configured: None,
            timer: None,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn transfer_kind(&self) -> TransferKind {
        self.factory.kind()
    }

    pub fn transfers(&self) -> &MemTransferFactory {
        &self.factory
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Topology edits take effect at the next frame (the chain is reconfigured).
    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        self.configured = None;
        &mut self.pipeline
    }

    /// Designate the pipeline entry node.
    pub fn set(&mut self, root: NodeId) -> Result<(), EngineError> {
        self.configured = None;
        self.pipeline.set_root(root)
    }

    pub fn set_timer(&mut self, timer: StageTimer) {
        self.timer = Some(timer);
    }

    pub fn yuv2rgb(&self) -> Option<&FilterProc<Yuv2Rgb>> {
        self.yuv2rgb.as_ref()
    }

    fn mark(&mut self, stage: &str) {
        if let Some(t) = self.timer.as_mut() {
            t(stage);
        }
    }

    fn frame_key(frame: &FrameInput<'_>) -> Result<FrameKey, EngineError> {
        let ingest = match (frame.data, frame.format) {
            (FrameData::Pixels(_), PixelFormat::Yuv(layout)) => Ingest::HostYuv(layout),
            (FrameData::Pixels(_), PixelFormat::Texture(t)) if t.is_rgba_family() => Ingest::HostRgba,
            (FrameData::Pixels(_), PixelFormat::Texture(t)) => {
                return Err(EngineError::unsupported(format!("frame format {t:?}")))
            }
            (FrameData::Texture(_), PixelFormat::Texture(_)) => Ingest::Texture,
            (FrameData::Texture(_), PixelFormat::Yuv(_)) => {
                return Err(EngineError::precondition(
                    "a single texture cannot carry a YUV frame; pass its planes",
                ))
            }
            (FrameData::YuvTextures(t), PixelFormat::Yuv(_)) => {
                Ingest::GpuYuv(Yuv2Rgb::chroma_of(&t))
            }
            (FrameData::YuvTextures(_), PixelFormat::Texture(_)) => {
                return Err(EngineError::precondition("YUV planes given with a non-YUV format"))
            }
        };
        Ok(FrameKey {
            size: frame.size,
            format: frame.format,
            ingest,
        })
    }

    /// Chroma presentation of host YUV uploads for this config.
    fn host_chroma(&self, layout: YuvLayout) -> ChromaChannels {
        match (layout, self.config.yuv.chroma) {
            (YuvLayout::I420, _) => ChromaChannels::Planar,
            (_, ChromaChannels::LuminanceAlpha) => ChromaChannels::LuminanceAlpha,
            _ => ChromaChannels::RedGreen,
        }
    }

    fn configure(&mut self, gpu: &dyn Gpu, key: FrameKey) -> Result<(), EngineError> {
        let standard = self.config.yuv.standard;
        let (chroma, external) = match key.ingest {
            Ingest::HostYuv(layout) => (Some(self.host_chroma(layout)), true),
            Ingest::GpuYuv(chroma) => (Some(chroma), false),
            Ingest::HostRgba | Ingest::Texture => (None, false),
        };

        let ctx = GpuCtx {
            gpu,
            transfers: &self.factory,
            check_errors: self.config.check_gpu_errors,
        };

        match chroma {
            Some(chroma) => {
                let wanted = Yuv2Rgb::new(standard, chroma);
                if self.yuv2rgb.as_ref().map(|p| *p.filter()) != Some(wanted) {
                    if let Some(mut old) = self.yuv2rgb.take() {
                        old.release(gpu);
                    }
                }
                let conv = self.yuv2rgb.get_or_insert_with(|| FilterProc::new(wanted));
                conv.set_external_input_format(key.format);
                if conv.state() == crate::proc::ProcState::Uninitialized {
                    conv.init(&ctx, key.size, 0, external)?;
                } else {
                    conv.reinit(&ctx, key.size, external)?;
                }
                if external {
                    let planes = conv
                        .mem_transfer()
                        .and_then(|t| t.yuv_textures())
                        .ok_or_else(|| EngineError::resource("texture", "YUV planes not allocated"))?;
                    bind_planes(conv, &planes)?;
                }
                self.pipeline.prepare(&ctx, key.size, None)?;
            }
            None => {
                if let Some(mut old) = self.yuv2rgb.take() {
                    old.release(gpu);
                }
                let ext = (key.ingest == Ingest::HostRgba).then_some(key.format);
                self.pipeline.prepare(&ctx, key.size, ext)?;
            }
        }
        tracing::info!(
            w = key.size.width,
            h = key.size.height,
            format = ?key.format,
            ingest = ?key.ingest,
            "video source configured"
        );
        self.configured = Some(key);
        Ok(())
    }

    /// Convert, upload and render one frame through the pipeline.
    pub fn process(&mut self, gpu: &dyn Gpu, frame: FrameInput<'_>) -> Result<FrameStats, EngineError> {
        let span = tracing::trace_span!("frame", w = frame.size.width, h = frame.size.height);
        let _enter = span.enter();

        if frame.size.is_empty() {
            return Err(EngineError::precondition("frame with zero dimensions"));
        }
        let key = Self::frame_key(&frame)?;
        if self.configured != Some(key) || !self.pipeline.is_prepared() {
            self.configure(gpu, key)?;
        }

        let input = match frame.data {
            FrameData::Pixels(data) if frame.format.is_yuv() => {
                let ctx = GpuCtx {
                    gpu,
                    transfers: &self.factory,
                    check_errors: self.config.check_gpu_errors,
                };
                let conv = self.yuv2rgb.as_mut().ok_or_else(|| {
                    EngineError::precondition("YUV frame without conversion node")
                })?;
                conv.set_external_input_data(&ctx, data)?;
                self.mark("upload");
                Some(self.convert(gpu)?)
            }
            FrameData::Pixels(data) => {
                let ctx = GpuCtx {
                    gpu,
                    transfers: &self.factory,
                    check_errors: self.config.check_gpu_errors,
                };
                self.pipeline.upload(&ctx, data)?;
                self.mark("upload");
                None
            }
            FrameData::Texture(tex) => Some(tex),
            FrameData::YuvTextures(planes) => {
                let conv = self.yuv2rgb.as_mut().ok_or_else(|| {
                    EngineError::precondition("YUV frame without conversion node")
                })?;
                bind_planes(conv, &planes)?;
                Some(self.convert(gpu)?)
            }
        };

        let ctx = GpuCtx {
            gpu,
            transfers: &self.factory,
            check_errors: self.config.check_gpu_errors,
        };
        let stats = self.pipeline.process(&ctx, input)?;
        self.mark("render");
        Ok(stats)
    }

    fn convert(&mut self, gpu: &dyn Gpu) -> Result<TextureId, EngineError> {
        let ctx = GpuCtx {
            gpu,
            transfers: &self.factory,
            check_errors: self.config.check_gpu_errors,
        };
        let conv = self
            .yuv2rgb
            .as_mut()
            .ok_or_else(|| EngineError::precondition("YUV frame without conversion node"))?;
        conv.render(&ctx, 0)?;
        let out = conv
            .output_texture()
            .ok_or_else(|| EngineError::resource("texture", "conversion output missing"))?;
        self.mark("yuv2rgb");
        Ok(out)
    }

    /// Read back a node's output.
    pub fn result_data(
        &mut self,
        gpu: &dyn Gpu,
        node: NodeId,
        target: ResultTarget<'_>,
        slot: usize,
    ) -> Result<(), EngineError> {
        let ctx = GpuCtx {
            gpu,
            transfers: &self.factory,
            check_errors: self.config.check_gpu_errors,
        };
        self.pipeline.result_data(&ctx, node, target, slot)
    }

    pub fn release(&mut self, gpu: &dyn Gpu) {
        if let Some(mut conv) = self.yuv2rgb.take() {
            conv.release(gpu);
        }
        self.pipeline.release(gpu);
        self.configured = None;
    }
}

fn bind_planes(conv: &mut FilterProc<Yuv2Rgb>, planes: &YuvTextures) -> Result<(), EngineError> {
    conv.use_texture(0, planes.luma)?;
    match planes.chroma {
        ChromaTextures::Interleaved { tex, .. } => conv.use_texture(1, tex),
        ChromaTextures::Planar { u, v } => {
            conv.use_texture(1, u)?;
            conv.use_texture(2, v)
        }
    }
}
