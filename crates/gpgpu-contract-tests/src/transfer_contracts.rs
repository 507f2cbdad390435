use gpgpu_core::{EngineError, PipelineConfig, PixelFormat, Size2d, TextureFormat};
use gpgpu_runtime::gpu::Gpu;
use gpgpu_runtime::MemTransfer;
use gpgpu_runtime::{
    FilterProc, FrameInput, GpuCtx, MemTransferFactory, ResultTarget, TransferKind,
};
use gpgpu_soft::SoftGpu;

use crate::support::{assert_uniform, push_rgba, px, read_node, rgba_frame, source, SIZE};

fn two_slots() -> PipelineConfig {
    PipelineConfig {
        output_slots: 2,
        ..PipelineConfig::default()
    }
}

#[test]
fn prepare_is_idempotent_for_unchanged_size() {
    for gpu in [SoftGpu::new(), SoftGpu::without_pixel_buffers()] {
        let factory = MemTransferFactory::new(&two_slots(), gpu.caps());
        let mut t = factory.create();

        let out = t.prepare_output(&gpu, SIZE).unwrap();
        let input = t.prepare_input(&gpu, SIZE, PixelFormat::RGBA, None).unwrap();
        let allocations = gpu.texture_allocations();

        assert_eq!(t.prepare_output(&gpu, SIZE).unwrap(), out);
        assert_eq!(t.prepare_input(&gpu, SIZE, PixelFormat::RGBA, None).unwrap(), input);
        assert_eq!(gpu.texture_allocations(), allocations, "{:?}", t.kind());

        // a new size reallocates
        t.prepare_output(&gpu, Size2d::new(4, 4)).unwrap();
        assert!(gpu.texture_allocations() > allocations);
        assert_eq!(t.output_size(), Size2d::new(4, 4));
        t.release(&gpu);
        assert_eq!(gpu.live_textures(), 0);
    }
}

#[test]
fn repeated_pipeline_prepare_keeps_resources() {
    let gpu = SoftGpu::new();
    let factory = MemTransferFactory::new(&PipelineConfig::default(), gpu.caps());
    let ctx = GpuCtx::new(&gpu, &factory);

    let mut p = gpgpu_runtime::Pipeline::new();
    let root = p.add_node(FilterProc::gain(1.0));
    let tail = p.add_node(FilterProc::gain(1.0));
    p.add(root, tail, 0).unwrap();
    p.set_root(root).unwrap();

    p.prepare(&ctx, SIZE, Some(PixelFormat::RGBA)).unwrap();
    let allocations = gpu.texture_allocations();
    let textures = gpu.live_textures();
    let out = p.output_texture(tail);

    p.prepare(&ctx, SIZE, Some(PixelFormat::RGBA)).unwrap();
    assert_eq!(gpu.texture_allocations(), allocations);
    assert_eq!(gpu.live_textures(), textures);
    assert_eq!(p.output_texture(tail), out);
    p.release(&gpu);
}

#[test]
fn transfer_calls_before_prepare_fail() {
    let gpu = SoftGpu::new();
    for factory in [
        MemTransferFactory::generic(),
        MemTransferFactory::new(&PipelineConfig::default(), gpu.caps()),
    ] {
        let mut t = factory.create();
        let frame = rgba_frame(SIZE, [1, 2, 3, 4]);
        let mut buf = vec![0u8; frame.len()];
        assert!(matches!(t.to_gpu(&gpu, &frame), Err(EngineError::Precondition(_))));
        assert!(matches!(t.from_gpu(&gpu, &mut buf), Err(EngineError::Precondition(_))));
        assert!(matches!(t.read_slot(&gpu, 0, &mut buf), Err(EngineError::Precondition(_))));
    }
}

#[test]
fn generic_transfer_has_no_async_or_delegate_readback() {
    let gpu = SoftGpu::new();
    let config = PipelineConfig {
        use_platform_optimizations: false,
        ..PipelineConfig::default()
    };
    let mut vs = source(&gpu, config);
    assert_eq!(vs.transfer_kind(), TransferKind::Generic);
    let root = vs.pipeline_mut().add_node(FilterProc::gain(1.0));
    vs.set(root).unwrap();
    push_rgba(&mut vs, &gpu, SIZE, [7, 7, 7, 255]);

    let err = vs.result_data(&gpu, root, ResultTarget::Queue, 0).unwrap_err();
    assert!(matches!(err, EngineError::Unsupported(_)), "{err}");

    let mut called = false;
    let mut delegate = |_: Size2d, _: &[u8], _: usize| called = true;
    let err = vs
        .result_data(&gpu, root, ResultTarget::Delegate(&mut delegate), 0)
        .unwrap_err();
    assert!(matches!(err, EngineError::Unsupported(_)), "{err}");
    assert!(!called);

    let mut buf = vec![0u8; SIZE.area() * 4];
    let err = vs
        .result_data(&gpu, root, ResultTarget::Buffer(&mut buf), 1)
        .unwrap_err();
    assert!(matches!(err, EngineError::Precondition(_)), "{err}");

    // synchronous readback still works
    assert_uniform(&read_node(&mut vs, &gpu, root, SIZE), [7, 7, 7, 255], 0);
}

#[test]
fn pixel_buffer_readback_ping_pongs_between_slots() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, two_slots());
    assert_eq!(vs.transfer_kind(), TransferKind::PixelBuffer);
    let root = vs.pipeline_mut().add_node(FilterProc::gain(1.0));
    vs.set(root).unwrap();

    let mut buf = vec![0u8; SIZE.area() * 4];
    for i in 0..5u8 {
        push_rgba(&mut vs, &gpu, SIZE, [i * 10, 1, 2, 255]);
        vs.result_data(&gpu, root, ResultTarget::Queue, usize::from(i % 2))
            .unwrap();
        if i > 0 {
            let prev = usize::from((i - 1) % 2);
            vs.result_data(&gpu, root, ResultTarget::Buffer(&mut buf), prev)
                .unwrap();
            // the slot consumed holds the previous frame, not the one just queued
            assert_uniform(&buf, [(i - 1) * 10, 1, 2, 255], 0);
        }
    }

    let err = vs
        .result_data(&gpu, root, ResultTarget::Queue, 2)
        .unwrap_err();
    assert!(matches!(err, EngineError::Precondition(_)), "{err}");
}

#[test]
fn unqueued_slot_reads_synchronously() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, two_slots());
    let root = vs.pipeline_mut().add_node(FilterProc::gain(2.0));
    vs.set(root).unwrap();
    push_rgba(&mut vs, &gpu, SIZE, [20, 30, 40, 255]);

    let mut buf = vec![0u8; SIZE.area() * 4];
    vs.result_data(&gpu, root, ResultTarget::Buffer(&mut buf), 1)
        .unwrap();
    assert_uniform(&buf, [40, 60, 80, 255], 0);
}

#[test]
fn pixel_buffer_delegate_sees_mapped_rows() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let root = vs.pipeline_mut().add_node(FilterProc::gain(1.0));
    vs.set(root).unwrap();
    let size = Size2d::new(6, 3);
    push_rgba(&mut vs, &gpu, size, [11, 22, 33, 255]);

    let mut seen = None;
    let mut delegate = |s: Size2d, bytes: &[u8], bpr: usize| {
        seen = Some((s, bytes.len(), bpr, px(bytes)));
    };
    vs.result_data(&gpu, root, ResultTarget::Delegate(&mut delegate), 0)
        .unwrap();
    let (s, len, bpr, first) = seen.expect("delegate was not called");
    assert_eq!(s, size);
    assert_eq!(bpr, 6 * 4);
    assert!(len >= bpr * 3);
    assert_eq!(first, [11, 22, 33, 255]);
}

#[test]
fn bgra_output_swaps_channels() {
    for config in [
        PipelineConfig::default(),
        PipelineConfig {
            use_platform_optimizations: false,
            ..PipelineConfig::default()
        },
    ] {
        let gpu = SoftGpu::new();
        let mut vs = source(&gpu, config);
        let root = vs.pipeline_mut().add_node(FilterProc::gain(1.0));
        vs.set(root).unwrap();
        push_rgba(&mut vs, &gpu, SIZE, [10, 20, 30, 255]);

        vs.pipeline_mut()
            .node_mut(root)
            .and_then(|n| n.mem_transfer_mut())
            .expect("gain has a transfer")
            .set_output_format(TextureFormat::Bgra)
            .unwrap();
        assert_uniform(&read_node(&mut vs, &gpu, root, SIZE), [30, 20, 10, 255], 0);
    }
}

#[test]
fn es2_context_still_processes_frames() {
    let gpu = SoftGpu::without_pixel_buffers();
    let mut vs = source(&gpu, two_slots());
    assert_eq!(vs.transfer_kind(), TransferKind::Generic);
    let root = vs.pipeline_mut().add_node(FilterProc::gain(3.0));
    vs.set(root).unwrap();

    let frame = rgba_frame(SIZE, [10, 20, 30, 255]);
    vs.process(&gpu, FrameInput::pixels(SIZE, PixelFormat::RGBA, &frame))
        .unwrap();
    assert_uniform(&read_node(&mut vs, &gpu, root, SIZE), [30, 60, 90, 255], 0);
}
