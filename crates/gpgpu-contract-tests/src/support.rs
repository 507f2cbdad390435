//! Shared helpers for pipeline-level tests on the soft backend.

use gpgpu_core::{PipelineConfig, PixelFormat, Size2d};
use gpgpu_runtime::gpu::Gpu;
use gpgpu_runtime::{FrameInput, NodeId, ResultTarget, VideoSource};
use gpgpu_soft::SoftGpu;

pub(crate) const SIZE: Size2d = Size2d {
    width: 8,
    height: 8,
};

/// Constant RGBA frame.
pub(crate) fn rgba_frame(size: Size2d, px: [u8; 4]) -> Vec<u8> {
    (0..size.area()).flat_map(|_| px).collect()
}

/// Constant-colour NV12 frame.
pub(crate) fn nv12_frame(size: Size2d, y: u8, u: u8, v: u8) -> Vec<u8> {
    let chroma = size.half_ceil().area();
    let mut out = vec![y; size.area()];
    out.extend((0..chroma).flat_map(|_| [u, v]));
    out
}

pub(crate) fn source(gpu: &SoftGpu, config: PipelineConfig) -> VideoSource {
    VideoSource::new(config, gpu.caps()).expect("video source")
}

/// Push one host RGBA frame.
pub(crate) fn push_rgba(vs: &mut VideoSource, gpu: &SoftGpu, size: Size2d, px: [u8; 4]) {
    let frame = rgba_frame(size, px);
    vs.process(gpu, FrameInput::pixels(size, PixelFormat::RGBA, &frame))
        .expect("process frame");
}

/// Synchronous readback of a node's output.
pub(crate) fn read_node(vs: &mut VideoSource, gpu: &SoftGpu, node: NodeId, size: Size2d) -> Vec<u8> {
    let mut buf = vec![0u8; size.area() * 4];
    vs.result_data(gpu, node, ResultTarget::Buffer(&mut buf), 0)
        .expect("result_data");
    buf
}

/// First pixel of a buffer.
pub(crate) fn px(buf: &[u8]) -> [u8; 4] {
    [buf[0], buf[1], buf[2], buf[3]]
}

pub(crate) fn assert_uniform(buf: &[u8], expected: [u8; 4], tolerance: u8) {
    for (i, p) in buf.chunks_exact(4).enumerate() {
        for c in 0..4 {
            assert!(
                p[c].abs_diff(expected[c]) <= tolerance,
                "pixel {i} channel {c}: got {:?}, expected {expected:?} (±{tolerance})",
                p
            );
        }
    }
}
