use gpgpu_core::Size2d;

use crate::kernels::ClipVertex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Viewport {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

#[derive(Debug, Clone, Copy)]
struct ScreenVertex {
    x: f32,
    y: f32,
    inv_w: f32,
    uv_w: [f32; 2],
}

fn edge(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> f32 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

fn to_screen(v: &ClipVertex, vp: Viewport) -> Option<ScreenVertex> {
    let w = v.position[3];
    if w <= f32::EPSILON {
        return None;
    }
    let inv_w = 1.0 / w;
    let ndc = (v.position[0] * inv_w, v.position[1] * inv_w);
    Some(ScreenVertex {
        x: vp.x as f32 + (ndc.0 + 1.0) * 0.5 * vp.w as f32,
        y: vp.y as f32 + (ndc.1 + 1.0) * 0.5 * vp.h as f32,
        inv_w,
        uv_w: [v.uv[0] * inv_w, v.uv[1] * inv_w],
    })
}

/// Triangle corner indices for `count` vertices of the given primitive.
pub(crate) fn assemble(strip: bool, count: usize) -> Vec<[usize; 3]> {
    if strip {
        (0..count.saturating_sub(2)).map(|i| [i, i + 1, i + 2]).collect()
    } else {
        (0..count / 3).map(|t| [3 * t, 3 * t + 1, 3 * t + 2]).collect()
    }
}

/// Rasterize one triangle, calling `shade(x, y, uv)` for every covered
/// pixel centre inside both the viewport and the target.
pub(crate) fn triangle(
    verts: [&ClipVertex; 3],
    vp: Viewport,
    target: Size2d,
    mut shade: impl FnMut(u32, u32, [f32; 2]),
) {
    let (Some(a), Some(b), Some(c)) = (
        to_screen(verts[0], vp),
        to_screen(verts[1], vp),
        to_screen(verts[2], vp),
    ) else {
        return;
    };
    let (pa, pb, pc) = ((a.x, a.y), (b.x, b.y), (c.x, c.y));
    let area = edge(pa, pb, pc);
    if area.abs() < 1e-8 {
        return;
    }

    let clip_x0 = vp.x.max(0) as f32;
    let clip_y0 = vp.y.max(0) as f32;
    let clip_x1 = (vp.x + vp.w).min(target.width as i32) as f32;
    let clip_y1 = (vp.y + vp.h).min(target.height as i32) as f32;

    let min_x = a.x.min(b.x).min(c.x).max(clip_x0).floor() as i32;
    let max_x = a.x.max(b.x).max(c.x).min(clip_x1).ceil() as i32;
    let min_y = a.y.min(b.y).min(c.y).max(clip_y0).floor() as i32;
    let max_y = a.y.max(b.y).max(c.y).min(clip_y1).ceil() as i32;

    for py in min_y.max(0)..max_y {
        for px in min_x.max(0)..max_x {
            let p = (px as f32 + 0.5, py as f32 + 0.5);
            if p.0 >= clip_x1 || p.1 >= clip_y1 || p.0 < clip_x0 || p.1 < clip_y0 {
                continue;
            }
            let w0 = edge(pb, pc, p) / area;
            let w1 = edge(pc, pa, p) / area;
            let w2 = edge(pa, pb, p) / area;
            if w0 < -1e-6 || w1 < -1e-6 || w2 < -1e-6 {
                continue;
            }
            let inv_w = w0 * a.inv_w + w1 * b.inv_w + w2 * c.inv_w;
            let uv = [
                (w0 * a.uv_w[0] + w1 * b.uv_w[0] + w2 * c.uv_w[0]) / inv_w,
                (w0 * a.uv_w[1] + w1 * b.uv_w[1] + w2 * c.uv_w[1]) / inv_w,
            ];
            shade(px as u32, py as u32, uv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f32, y: f32, u: f32, t: f32) -> ClipVertex {
        ClipVertex {
            position: [x, y, 0.0, 1.0],
            uv: [u, t],
        }
    }

    #[test]
    fn full_screen_strip_covers_every_pixel_once_per_triangle() {
        let quad = [
            v(-1.0, -1.0, 0.0, 0.0),
            v(1.0, -1.0, 1.0, 0.0),
            v(-1.0, 1.0, 0.0, 1.0),
            v(1.0, 1.0, 1.0, 1.0),
        ];
        let size = Size2d::new(4, 3);
        let vp = Viewport { x: 0, y: 0, w: 4, h: 3 };
        let mut hits = vec![0u32; 12];
        for [i, j, k] in assemble(true, 4) {
            triangle([&quad[i], &quad[j], &quad[k]], vp, size, |x, y, uv| {
                hits[(y * 4 + x) as usize] += 1;
                assert!((uv[0] - (x as f32 + 0.5) / 4.0).abs() < 1e-5);
                assert!((uv[1] - (y as f32 + 0.5) / 3.0).abs() < 1e-5);
            });
        }
        assert!(hits.iter().all(|&h| h >= 1));
    }

    #[test]
    fn viewport_offset_limits_coverage() {
        let tri = [v(-1.0, -1.0, 0.0, 0.0), v(3.0, -1.0, 2.0, 0.0), v(-1.0, 3.0, 0.0, 2.0)];
        let vp = Viewport { x: 2, y: 1, w: 2, h: 2 };
        let mut covered = Vec::new();
        triangle([&tri[0], &tri[1], &tri[2]], vp, Size2d::new(8, 8), |x, y, _| covered.push((x, y)));
        covered.sort();
        assert_eq!(covered, vec![(2, 1), (2, 2), (3, 1), (3, 2)]);
    }

    #[test]
    fn triangle_list_assembly() {
        assert_eq!(assemble(false, 7), vec![[0, 1, 2], [3, 4, 5]]);
        assert_eq!(assemble(true, 2), Vec::<[usize; 3]>::new());
    }
}
