use std::cell::RefCell;
use std::rc::Rc;

use gpgpu_buffers::FifoProc;
use gpgpu_core::{EngineError, PipelineConfig, PixelFormat, RenderPhase, Size2d, TextureFormat, YuvLayout};
use gpgpu_passes::MultiPassProc;
use gpgpu_runtime::filters::{
    Blend, Diff, Gain, Mesh, Passthrough, Swizzle, SwizzleKind, TransformProc, IDENTITY,
};
use gpgpu_runtime::gpu::{Gpu, Primitive, INVALID_OPERATION};
use gpgpu_runtime::proc::Filter;
use gpgpu_runtime::{
    ChromaTextures, DispProc, FilterProc, FrameInput, Geometry, Processor, Texture, VideoSource,
    YuvTextures,
};
use gpgpu_soft::{Fragment, SoftGpu};

use crate::support::{
    assert_uniform, nv12_frame, push_rgba, px, read_node, rgba_frame, source, SIZE,
};

fn single(vs: &mut VideoSource, proc: impl Processor) -> gpgpu_runtime::NodeId {
    let id = vs.pipeline_mut().add_node(proc);
    vs.set(id).unwrap();
    id
}

// ---- Leaf filters ----

#[test]
fn gain_multiplies_and_saturates() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let gain = single(&mut vs, FilterProc::gain(10.0));

    push_rgba(&mut vs, &gpu, SIZE, [10, 10, 10, 255]);
    assert_uniform(&read_node(&mut vs, &gpu, gain, SIZE), [100, 100, 100, 255], 0);

    push_rgba(&mut vs, &gpu, SIZE, [30, 1, 0, 77]);
    // rgb saturates, alpha passes through
    assert_uniform(&read_node(&mut vs, &gpu, gain, SIZE), [255, 10, 0, 77], 0);
}

/// Root (x1) feeds a gain of 10 and slot 0 of a blend; the gain feeds slot 1.
fn fan_in(vs: &mut VideoSource, join: impl Processor) -> gpgpu_runtime::NodeId {
    let p = vs.pipeline_mut();
    let root = p.add_node(FilterProc::gain(1.0));
    let boost = p.add_node(FilterProc::gain(10.0));
    let join = p.add_node(join);
    p.add(root, boost, 0).unwrap();
    p.add(root, join, 0).unwrap();
    p.add(boost, join, 1).unwrap();
    vs.set(root).unwrap();
    join
}

#[test]
fn blend_weights_both_inputs() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let blend = fan_in(&mut vs, FilterProc::new(Blend::new(0.5)));

    push_rgba(&mut vs, &gpu, SIZE, [2, 2, 2, 255]);
    // 0.5 * 2 + 0.5 * 20
    assert_uniform(&read_node(&mut vs, &gpu, blend, SIZE), [11, 11, 11, 255], 1);
}

#[test]
fn diff_subtracts_second_input() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let p = vs.pipeline_mut();
    let root = p.add_node(FilterProc::gain(1.0));
    let boost = p.add_node(FilterProc::gain(10.0));
    let diff = p.add_node(FilterProc::new(Diff::new(1.0)));
    p.add(root, boost, 0).unwrap();
    p.add(boost, diff, 0).unwrap();
    p.add(root, diff, 1).unwrap();
    vs.set(root).unwrap();

    push_rgba(&mut vs, &gpu, SIZE, [2, 2, 2, 128]);
    assert_uniform(&read_node(&mut vs, &gpu, diff, SIZE), [18, 18, 18, 255], 1);
}

#[test]
fn swizzle_round_trips_through_inverse() {
    let gradient: Vec<u8> = (0..SIZE.area())
        .flat_map(|i| {
            let i = i as u8;
            [i.wrapping_mul(3), 255 - i, i.wrapping_mul(7), 100 + i]
        })
        .collect();

    for kind in SwizzleKind::ALL {
        let Some(inverse) = kind.inverse() else {
            continue;
        };
        let gpu = SoftGpu::new();
        let mut vs = source(&gpu, PipelineConfig::default());
        let p = vs.pipeline_mut();
        let fwd = p.add_node(FilterProc::new(Swizzle::new(kind)));
        let back = p.add_node(FilterProc::new(Swizzle::new(inverse)));
        p.add(fwd, back, 0).unwrap();
        vs.set(fwd).unwrap();

        vs.process(&gpu, FrameInput::pixels(SIZE, PixelFormat::RGBA, &gradient))
            .unwrap();

        let swizzled = read_node(&mut vs, &gpu, fwd, SIZE);
        assert_eq!(px(&swizzled), kind.apply(px(&gradient)), "{kind:?}");

        let restored = read_node(&mut vs, &gpu, back, SIZE);
        for (a, b) in restored.iter().zip(&gradient) {
            assert!(a.abs_diff(*b) <= 2, "{kind:?}: {a} vs {b}");
        }
    }
}

#[test]
fn transform_scales_the_image_and_blanks_the_rest() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let mut half_width = IDENTITY;
    half_width[0] = 0.5;
    let t = single(&mut vs, TransformProc::transform(half_width));

    push_rgba(&mut vs, &gpu, SIZE, [200, 200, 200, 255]);
    let out = read_node(&mut vs, &gpu, t, SIZE);
    let at = |x: usize, y: usize| px(&out[(y * 8 + x) * 4..]);
    assert_eq!(at(0, 0), [0, 0, 0, 255]);
    assert_eq!(at(7, 7), [0, 0, 0, 255]);
    assert_eq!(at(3, 4), [200, 200, 200, 255]);
    assert_eq!(at(4, 4), [200, 200, 200, 255]);
}

#[test]
fn mesh_draws_triangle_lists() {
    // lower-left half of the target
    let lower_left = Geometry {
        positions: vec![[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [-1.0, 1.0, 0.0]],
        coords: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
        primitive: Primitive::Triangles,
    };
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let mesh = single(&mut vs, FilterProc::new(Mesh::new(lower_left).unwrap()));

    push_rgba(&mut vs, &gpu, SIZE, [90, 90, 90, 255]);
    let out = read_node(&mut vs, &gpu, mesh, SIZE);
    assert_eq!(px(&out), [90, 90, 90, 255]);
    let top_right = (7 * 8 + 7) * 4;
    assert_eq!(px(&out[top_right..]), [0, 0, 0, 255]);

    let bad = Geometry {
        positions: vec![[0.0; 3]; 4],
        coords: vec![[0.0; 2]; 3],
        primitive: Primitive::TriangleStrip,
    };
    assert!(matches!(Mesh::new(bad), Err(EngineError::Precondition(_))));
}

#[test]
fn multi_pass_node_runs_inside_a_pipeline() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let stages: Vec<Box<dyn Filter>> = vec![Box::new(Gain::new(2.0)), Box::new(Gain::new(2.0))];
    let mp = single(&mut vs, MultiPassProc::new("gain4", stages).unwrap());

    push_rgba(&mut vs, &gpu, SIZE, [5, 6, 7, 255]);
    assert_uniform(&read_node(&mut vs, &gpu, mp, SIZE), [20, 24, 28, 255], 0);
}

// ---- YUV ingestion ----

fn assert_green(buf: &[u8]) {
    for p in buf.chunks_exact(4) {
        assert!(p[0] <= 8 && p[1] >= 250 && p[2] <= 8, "not green: {p:?}");
    }
}

#[test]
fn nv12_green_converts_to_rgb_green() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let root = single(&mut vs, FilterProc::new(Passthrough));

    let frame = nv12_frame(SIZE, 150, 44, 21);
    vs.process(&gpu, FrameInput::pixels(SIZE, PixelFormat::NV12, &frame))
        .unwrap();
    assert!(vs.yuv2rgb().is_some());
    assert_green(&read_node(&mut vs, &gpu, root, SIZE));
}

#[test]
fn nv21_and_i420_layouts_convert_alike() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let root = single(&mut vs, FilterProc::new(Passthrough));

    let luma = vec![150u8; SIZE.area()];
    let chroma = SIZE.half_ceil().area();

    let mut nv21 = luma.clone();
    nv21.extend((0..chroma).flat_map(|_| [21u8, 44]));
    vs.process(&gpu, FrameInput::pixels(SIZE, PixelFormat::Yuv(YuvLayout::Nv21), &nv21))
        .unwrap();
    assert_green(&read_node(&mut vs, &gpu, root, SIZE));

    let mut i420 = luma;
    i420.extend(std::iter::repeat(44u8).take(chroma));
    i420.extend(std::iter::repeat(21u8).take(chroma));
    vs.process(&gpu, FrameInput::pixels(SIZE, PixelFormat::Yuv(YuvLayout::I420), &i420))
        .unwrap();
    assert_green(&read_node(&mut vs, &gpu, root, SIZE));
}

#[test]
fn yuv_planes_already_on_gpu_are_converted() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let root = single(&mut vs, FilterProc::new(Passthrough));

    let half = SIZE.half_ceil();
    let luma = Texture::from_pixels(&gpu, SIZE, TextureFormat::Luminance, &vec![150; SIZE.area()])
        .unwrap();
    let uv: Vec<u8> = (0..half.area()).flat_map(|_| [44u8, 21]).collect();
    let chroma = Texture::from_pixels(&gpu, half, TextureFormat::RedGreen, &uv).unwrap();
    let planes = YuvTextures {
        luma: luma.handle().unwrap(),
        chroma: ChromaTextures::Interleaved {
            tex: chroma.handle().unwrap(),
            format: TextureFormat::RedGreen,
        },
    };

    let frame = FrameInput {
        size: SIZE,
        format: PixelFormat::NV12,
        data: gpgpu_runtime::FrameData::YuvTextures(planes),
    };
    vs.process(&gpu, frame).unwrap();
    assert_green(&read_node(&mut vs, &gpu, root, SIZE));
}

#[test]
fn texture_frames_skip_the_upload() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let gain = single(&mut vs, FilterProc::gain(2.0));

    let tex = Texture::from_pixels(&gpu, SIZE, TextureFormat::Rgba, &rgba_frame(SIZE, [40, 50, 60, 255]))
        .unwrap();
    vs.process(&gpu, FrameInput::texture(SIZE, tex.handle().unwrap()))
        .unwrap();
    assert_uniform(&read_node(&mut vs, &gpu, gain, SIZE), [80, 100, 120, 255], 0);
    assert!(vs.yuv2rgb().is_none());
}

// ---- Delay lines ----

#[test]
fn fifo_evicts_the_oldest_frame() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let fifo = single(&mut vs, FifoProc::new(3));

    for v in 1..=4u8 {
        push_rgba(&mut vs, &gpu, SIZE, [v * 10, 0, 0, 255]);
    }
    let node = vs.pipeline().node_as::<FifoProc>(fifo).unwrap();
    assert_eq!(node.len(), 3);
    let oldest = gpu.texture_pixels(node.get(0).unwrap()).unwrap();
    assert_eq!(oldest[0], 20, "slot 0 must hold the second frame once the first is evicted");
    let newest = gpu.texture_pixels(node.get(2).unwrap()).unwrap();
    assert_eq!(newest[0], 40);
    assert!(node.get(3).is_none());

    // the node's own output is the newest frame
    assert_eq!(px(&read_node(&mut vs, &gpu, fifo, SIZE)), [40, 0, 0, 255]);
}

#[test]
fn delayed_edge_sees_the_previous_frame() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let p = vs.pipeline_mut();
    let fifo = p.add_node(FifoProc::new(3));
    let diff = p.add_node(FilterProc::new(Diff::new(1.0)));
    p.add(fifo, diff, 0).unwrap();
    p.add_delayed(fifo, diff, 1, 1).unwrap();
    vs.set(fifo).unwrap();

    let first = rgba_frame(SIZE, [10, 10, 10, 255]);
    let stats = vs
        .process(&gpu, FrameInput::pixels(SIZE, PixelFormat::RGBA, &first))
        .unwrap();
    // no history yet
    assert_eq!(stats.rendered, vec![fifo]);
    assert_eq!(stats.pending, vec![diff]);

    let second = rgba_frame(SIZE, [30, 30, 30, 255]);
    let stats = vs
        .process(&gpu, FrameInput::pixels(SIZE, PixelFormat::RGBA, &second))
        .unwrap();
    assert_eq!(stats.rendered, vec![fifo, diff]);
    assert_uniform(&read_node(&mut vs, &gpu, diff, SIZE), [20, 20, 20, 255], 1);
}

#[test]
fn delayed_edges_need_history() {
    let mut vs = source(&SoftGpu::new(), PipelineConfig::default());
    let p = vs.pipeline_mut();
    let fifo = p.add_node(FifoProc::new(3));
    let gain = p.add_node(FilterProc::gain(1.0));
    let diff = p.add_node(FilterProc::new(Diff::new(1.0)));

    assert!(matches!(p.add_delayed(gain, diff, 1, 1), Err(EngineError::Graph(_))));
    assert!(matches!(p.add_delayed(fifo, diff, 1, 3), Err(EngineError::Graph(_))));
    assert!(matches!(p.add_delayed(fifo, diff, 1, 0), Err(EngineError::Graph(_))));
    assert!(p.add_delayed(fifo, diff, 1, 2).is_ok());
}

// ---- Topology and lifecycle ----

#[test]
fn cycles_are_rejected() {
    let mut vs = source(&SoftGpu::new(), PipelineConfig::default());
    let p = vs.pipeline_mut();
    let a = p.add_node(FilterProc::gain(1.0));
    let b = p.add_node(FilterProc::gain(1.0));
    p.add(a, b, 0).unwrap();
    assert!(matches!(p.add(b, a, 0), Err(EngineError::Graph(_))));
}

#[test]
fn processing_without_root_fails() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    vs.pipeline_mut().add_node(FilterProc::gain(1.0));
    let frame = rgba_frame(SIZE, [1, 2, 3, 4]);
    let err = vs
        .process(&gpu, FrameInput::pixels(SIZE, PixelFormat::RGBA, &frame))
        .unwrap_err();
    assert!(matches!(err, EngineError::Graph(_)), "{err}");

    let err = vs
        .process(&gpu, FrameInput::pixels(Size2d::new(0, 8), PixelFormat::RGBA, &frame))
        .unwrap_err();
    assert!(matches!(err, EngineError::Precondition(_)), "{err}");
}

#[test]
fn resizing_reallocates_every_node() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let p = vs.pipeline_mut();
    let root = p.add_node(FilterProc::gain(1.0));
    let tail = p.add_node(FilterProc::gain(2.0));
    p.add(root, tail, 0).unwrap();
    vs.set(root).unwrap();

    push_rgba(&mut vs, &gpu, SIZE, [10, 10, 10, 255]);
    let big = Size2d::new(16, 12);
    push_rgba(&mut vs, &gpu, big, [30, 30, 30, 255]);

    assert_eq!(vs.pipeline().frame_size(), Some(big));
    let tail_tex = vs.pipeline().output_texture(tail).unwrap();
    assert_eq!(gpu.texture_size(tail_tex), Some(big));
    let out = read_node(&mut vs, &gpu, tail, big);
    assert_eq!(out.len(), big.area() * 4);
    assert_uniform(&out, [60, 60, 60, 255], 0);
}

#[test]
fn resizing_reattaches_outputs_under_recycled_names() {
    let gpu = SoftGpu::new();
    gpu.recycle_texture_names(true);
    let mut vs = source(&gpu, PipelineConfig::default());
    let p = vs.pipeline_mut();
    let root = p.add_node(FilterProc::gain(1.0));
    let tail = p.add_node(FilterProc::gain(2.0));
    p.add(root, tail, 0).unwrap();
    vs.set(root).unwrap();

    push_rgba(&mut vs, &gpu, SIZE, [10, 10, 10, 255]);
    let before = vs.pipeline().output_texture(tail).unwrap();
    let big = Size2d::new(16, 12);
    push_rgba(&mut vs, &gpu, big, [30, 30, 30, 255]);

    let after = vs.pipeline().output_texture(tail).unwrap();
    assert_eq!(after, before, "the reallocated output should reuse the freed name");
    assert_eq!(gpu.texture_size(after), Some(big));
    assert_uniform(&read_node(&mut vs, &gpu, tail, big), [60, 60, 60, 255], 0);

    // and back down again
    push_rgba(&mut vs, &gpu, SIZE, [5, 5, 5, 255]);
    assert_uniform(&read_node(&mut vs, &gpu, tail, SIZE), [10, 10, 10, 255], 0);
}

#[test]
fn fifo_and_multi_pass_resize_under_recycled_names() {
    let big = Size2d::new(16, 12);

    let gpu = SoftGpu::new();
    gpu.recycle_texture_names(true);
    let mut vs = source(&gpu, PipelineConfig::default());
    let fifo = single(&mut vs, FifoProc::new(2));
    push_rgba(&mut vs, &gpu, SIZE, [10, 0, 0, 255]);
    push_rgba(&mut vs, &gpu, big, [20, 0, 0, 255]);
    assert_uniform(&read_node(&mut vs, &gpu, fifo, big), [20, 0, 0, 255], 0);

    let gpu = SoftGpu::new();
    gpu.recycle_texture_names(true);
    let mut vs = source(&gpu, PipelineConfig::default());
    let stages: Vec<Box<dyn Filter>> = vec![Box::new(Gain::new(2.0)), Box::new(Gain::new(2.0))];
    let mp = single(&mut vs, MultiPassProc::new("gain4", stages).unwrap());
    push_rgba(&mut vs, &gpu, SIZE, [5, 6, 7, 255]);
    push_rgba(&mut vs, &gpu, big, [10, 10, 10, 255]);
    assert_uniform(&read_node(&mut vs, &gpu, mp, big), [40, 40, 40, 255], 0);
}

#[test]
fn timer_reports_each_stage() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    single(&mut vs, FilterProc::new(Passthrough));
    let marks = Rc::new(RefCell::new(Vec::<String>::new()));
    let sink = Rc::clone(&marks);
    vs.set_timer(Box::new(move |stage| sink.borrow_mut().push(stage.to_string())));

    push_rgba(&mut vs, &gpu, SIZE, [1, 1, 1, 255]);
    assert_eq!(*marks.borrow(), vec!["upload", "render"]);

    marks.borrow_mut().clear();
    let frame = nv12_frame(SIZE, 150, 44, 21);
    vs.process(&gpu, FrameInput::pixels(SIZE, PixelFormat::NV12, &frame))
        .unwrap();
    assert_eq!(*marks.borrow(), vec!["upload", "yuv2rgb", "render"]);
}

#[test]
fn release_frees_every_gpu_object() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let p = vs.pipeline_mut();
    let root = p.add_node(FilterProc::gain(1.0));
    let fifo = p.add_node(FifoProc::new(2));
    p.add(root, fifo, 0).unwrap();
    vs.set(root).unwrap();

    let frame = nv12_frame(SIZE, 90, 128, 128);
    vs.process(&gpu, FrameInput::pixels(SIZE, PixelFormat::NV12, &frame))
        .unwrap();
    assert!(gpu.live_textures() > 0);
    vs.release(&gpu);
    assert_eq!(gpu.live_textures(), 0);
    assert_eq!(gpu.live_framebuffers(), 0);
    assert_eq!(gpu.live_buffers(), 0);
}

// ---- Display sink ----

#[test]
fn display_sink_draws_to_the_screen_at_an_offset() {
    let gpu = SoftGpu::new();
    gpu.set_screen_size(Size2d::new(32, 32));
    let mut vs = source(&gpu, PipelineConfig::default());
    let p = vs.pipeline_mut();
    let root = p.add_node(FilterProc::gain(1.0));
    let mut disp = DispProc::new();
    disp.set_output_translation(4, 4);
    let disp = p.add_node(disp);
    p.add(root, disp, 0).unwrap();
    vs.set(root).unwrap();

    push_rgba(&mut vs, &gpu, SIZE, [50, 60, 70, 255]);
    let screen = gpu.screen_pixels();
    let at = |x: usize, y: usize| px(&screen[(y * 32 + x) * 4..]);
    assert_eq!(at(0, 0), [0, 0, 0, 0]);
    assert_eq!(at(4, 4), [50, 60, 70, 255]);
    assert_eq!(at(11, 11), [50, 60, 70, 255]);
    assert_eq!(at(12, 12), [0, 0, 0, 0]);

    let mut buf = vec![0u8; SIZE.area() * 4];
    let err = vs
        .result_data(&gpu, disp, gpgpu_runtime::ResultTarget::Buffer(&mut buf), 0)
        .unwrap_err();
    assert!(matches!(err, EngineError::Unsupported(_)));
}

#[test]
fn display_sink_can_target_a_renderbuffer() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    let p = vs.pipeline_mut();
    let root = p.add_node(FilterProc::gain(1.0));
    let mut disp = DispProc::new();
    disp.set_resolution(0.5, 0.5);
    disp.set_renderbuffer_storage(Box::new(|gpu: &dyn Gpu, size: Size2d| {
        gpu.renderbuffer_storage(size.width, size.height);
        Ok(())
    }));
    let disp = p.add_node(disp);
    p.add(root, disp, 0).unwrap();
    vs.set(root).unwrap();

    push_rgba(&mut vs, &gpu, SIZE, [9, 8, 7, 255]);
    let node = vs.pipeline().node_as::<DispProc>(disp).unwrap();
    assert_eq!(node.view_size(), Size2d::new(4, 4));
    let pixels = gpu.renderbuffer_pixels(node.renderbuffer().unwrap()).unwrap();
    assert_eq!(pixels.len(), 4 * 4 * 4);
    assert_uniform(&pixels, [9, 8, 7, 255], 0);
    // nothing reached the screen
    assert!(gpu.screen_pixels().iter().all(|&b| b == 0));
}

// ---- Failure handling ----

fn gain_on_texture(gpu: &SoftGpu, config: PipelineConfig) -> (VideoSource, Texture) {
    let mut vs = source(gpu, config);
    single(&mut vs, FilterProc::gain(1.0));
    let tex = Texture::from_pixels(gpu, SIZE, TextureFormat::Rgba, &rgba_frame(SIZE, [1, 1, 1, 255]))
        .unwrap();
    (vs, tex)
}

#[test]
fn pending_gpu_error_aborts_the_frame() {
    let gpu = SoftGpu::new();
    let (mut vs, tex) = gain_on_texture(&gpu, PipelineConfig::default());
    let frame = FrameInput::texture(SIZE, tex.handle().unwrap());
    vs.process(&gpu, frame).unwrap();

    gpu.inject_error(INVALID_OPERATION);
    let err = vs.process(&gpu, frame).unwrap_err();
    match err {
        EngineError::Render { ref proc, phase, code } => {
            assert_eq!(proc, "gain");
            assert_eq!(phase, RenderPhase::Prepare);
            assert_eq!(code, INVALID_OPERATION);
        }
        ref other => panic!("expected Render error, got {other}"),
    }
    assert!(err.is_gpu_fatal());

    // the error queue was drained; the next frame renders
    vs.process(&gpu, frame).unwrap();
}

#[test]
fn error_checks_can_be_disabled() {
    let gpu = SoftGpu::new();
    let config = PipelineConfig {
        check_gpu_errors: false,
        ..PipelineConfig::default()
    };
    let (mut vs, tex) = gain_on_texture(&gpu, config);
    gpu.inject_error(INVALID_OPERATION);
    vs.process(&gpu, FrameInput::texture(SIZE, tex.handle().unwrap()))
        .unwrap();
}

#[test]
fn texture_allocation_failure_is_a_resource_error() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    single(&mut vs, FilterProc::gain(1.0));
    gpu.fail_texture_creation(true);
    let frame = rgba_frame(SIZE, [1, 1, 1, 255]);
    let err = vs
        .process(&gpu, FrameInput::pixels(SIZE, PixelFormat::RGBA, &frame))
        .unwrap_err();
    assert!(matches!(err, EngineError::Resource { what: "texture", .. }), "{err}");
    assert!(err.is_gpu_fatal());
}

const SEPIA_FRAG: &str = r#"
in vec2 v_uv;
uniform sampler2D u_input;
out vec4 frag_color;
void main() {
    vec4 c = texture(u_input, v_uv);
    float l = dot(c.rgb, vec3(0.299, 0.587, 0.114));
    frag_color = vec4(l * vec3(1.0, 0.8, 0.6), c.a);
}
"#;

#[derive(Debug)]
struct Sepia;

impl Filter for Sepia {
    fn name(&self) -> &'static str {
        "sepia"
    }

    fn fragment_source(&self) -> &'static str {
        SEPIA_FRAG
    }
}

fn sepia_kernel(f: &Fragment<'_>) -> [f32; 4] {
    let c = f.sample("u_input");
    let l = c[0] * 0.299 + c[1] * 0.587 + c[2] * 0.114;
    [l, l * 0.8, l * 0.6, c[3]]
}

#[test]
fn unknown_shader_fails_at_init() {
    let gpu = SoftGpu::new();
    let mut vs = source(&gpu, PipelineConfig::default());
    single(&mut vs, FilterProc::new(Sepia));
    let frame = rgba_frame(SIZE, [100, 100, 100, 255]);
    let err = vs
        .process(&gpu, FrameInput::pixels(SIZE, PixelFormat::RGBA, &frame))
        .unwrap_err();
    assert!(matches!(err, EngineError::ShaderCompile { .. }), "{err}");
}

#[test]
fn custom_filters_run_once_their_kernel_is_registered() {
    let mut gpu = SoftGpu::new();
    gpu.kernels_mut().register_fragment(SEPIA_FRAG, sepia_kernel);
    let mut vs = source(&gpu, PipelineConfig::default());
    let sepia = single(&mut vs, FilterProc::new(Sepia));
    push_rgba(&mut vs, &gpu, SIZE, [100, 100, 100, 255]);
    assert_uniform(&read_node(&mut vs, &gpu, sepia, SIZE), [100, 80, 60, 255], 1);
}
