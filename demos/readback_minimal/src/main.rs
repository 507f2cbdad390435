//! Feed synthetic NV12 frames through gain -> blend(fifo delayed) and read the
//! result back with pixel-buffer ping-pong, on the CPU reference backend.
//!
//! Usage: `readback_minimal [pipeline.json]`. `RUST_LOG=debug` shows the
//! engine's lifecycle events.

use anyhow::{Context, Result};
use gpgpu_buffers::FifoProc;
use gpgpu_core::{PipelineConfig, PixelFormat, Size2d};
use gpgpu_runtime::filters::Blend;
use gpgpu_runtime::gpu::Gpu;
use gpgpu_runtime::{FilterProc, FrameInput, ResultTarget, TransferKind, VideoSource};
use gpgpu_soft::SoftGpu;
use tracing_subscriber::EnvFilter;

const FRAMES: u8 = 8;

fn nv12(size: Size2d, y: u8) -> Vec<u8> {
    let mut frame = vec![y; size.area()];
    frame.extend(std::iter::repeat(128u8).take(size.half_ceil().area() * 2));
    frame
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::from_json_path(&path)
            .with_context(|| format!("loading pipeline config {path}"))?,
        None => PipelineConfig {
            output_slots: 2,
            ..PipelineConfig::default()
        },
    };

    let gpu = SoftGpu::new();
    let mut vs = VideoSource::new(config, gpu.caps())?;
    let slots = vs.transfers().output_slots();
    tracing::info!(transfer = ?vs.transfer_kind(), slots, "video source ready");

    let p = vs.pipeline_mut();
    let gain = p.add_node(FilterProc::gain(1.5));
    let history = p.add_node(FifoProc::new(4));
    let trail = p.add_node(FilterProc::new(Blend::new(0.5)));
    p.add(gain, history, 0)?;
    p.add(history, trail, 0)?;
    p.add_delayed(history, trail, 1, 3)?;
    vs.set(gain)?;

    let size = Size2d::new(64, 36);
    let mut buf = vec![0u8; size.area() * 4];
    for i in 0..FRAMES {
        let frame = nv12(size, 16 + i * 20);
        let stats = vs.process(&gpu, FrameInput::pixels(size, PixelFormat::NV12, &frame))?;
        if !stats.pending.is_empty() {
            tracing::info!(frame = i, pending = stats.pending.len(), "delay line filling");
            continue;
        }

        match vs.transfer_kind() {
            TransferKind::Generic => {
                vs.result_data(&gpu, trail, ResultTarget::Buffer(&mut buf), 0)?;
            }
            TransferKind::PixelBuffer => {
                let slot = usize::from(i) % slots;
                vs.result_data(&gpu, trail, ResultTarget::Queue, slot)?;
                // consume the slot queued on the previous frame
                let prev = (slot + slots - 1) % slots;
                vs.result_data(&gpu, trail, ResultTarget::Buffer(&mut buf), prev)?;
            }
        }
        tracing::info!(frame = i, luma = buf[0], "read back");
    }

    vs.release(&gpu);
    Ok(())
}
