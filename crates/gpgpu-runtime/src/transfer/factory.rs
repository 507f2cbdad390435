use gpgpu_core::{ChromaChannels, PipelineConfig};

use super::{GenericTransfer, MemTransfer, TransferKind};
use crate::gpu::GpuCaps;

/// Chooses the transfer variant once and stamps out per-node transfers.
///
/// The choice is made at construction from explicit config and the probed
/// context caps, and never changes afterwards.
#[derive(Debug, Clone)]
pub struct MemTransferFactory {
    kind: TransferKind,
    output_slots: usize,
    chroma: ChromaChannels,
}

impl MemTransferFactory {
    pub fn new(config: &PipelineConfig, caps: GpuCaps) -> Self {
        let kind = Self::try_enable_platform_optimizations(config, caps);
        tracing::info!(?kind, slots = config.output_slots, "memory transfer selected");
        Self {
            kind,
            output_slots: config.output_slots.max(1),
            chroma: config.yuv.chroma,
        }
    }

    /// Factory that always yields the synchronous transfer.
    pub fn generic() -> Self {
        Self {
            kind: TransferKind::Generic,
            output_slots: 1,
            chroma: ChromaChannels::default(),
        }
    }

    /// Decide whether the optimized path is usable for this config and context.
    pub fn try_enable_platform_optimizations(config: &PipelineConfig, caps: GpuCaps) -> TransferKind {
        if !config.use_platform_optimizations {
            return TransferKind::Generic;
        }
        if !cfg!(feature = "pixel-buffers") {
            tracing::warn!("pixel-buffer transfer not compiled in; using generic transfer");
            return TransferKind::Generic;
        }
        if !caps.pixel_buffers {
            tracing::warn!(version = ?caps.version, "context lacks pixel buffers; using generic transfer");
            return TransferKind::Generic;
        }
        TransferKind::PixelBuffer
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    pub fn output_slots(&self) -> usize {
        match self.kind {
            TransferKind::Generic => 1,
            TransferKind::PixelBuffer => self.output_slots,
        }
    }

    pub fn chroma(&self) -> ChromaChannels {
        self.chroma
    }

    pub fn create(&self) -> Box<dyn MemTransfer> {
        match self.kind {
            #[cfg(feature = "pixel-buffers")]
            TransferKind::PixelBuffer => Box::new(super::PixelBufferTransfer::new(
                self.chroma,
                self.output_slots,
            )),
            _ => Box::new(GenericTransfer::new(self.chroma)),
        }
    }
}
