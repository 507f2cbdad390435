use gpgpu_core::{Size2d, TextureFormat};

/// CPU texel storage in the texture's own format. Row 0 is the bottom row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Surface {
    pub format: TextureFormat,
    pub size: Size2d,
    pub data: Vec<u8>,
}

fn unorm(b: u8) -> f32 {
    b as f32 / 255.0
}

fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl Surface {
    pub fn new(format: TextureFormat, size: Size2d) -> Self {
        Self {
            format,
            size,
            data: vec![0; size.area() * format.bytes_per_pixel()],
        }
    }

    /// Unspecified texture (created, no storage yet).
    pub fn empty() -> Self {
        Self::new(TextureFormat::Rgba, Size2d::default())
    }

    pub fn is_specified(&self) -> bool {
        !self.size.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Texel as normalized RGBA, following GL's expansion rules per format.
    pub fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        let bpp = self.format.bytes_per_pixel();
        let i = (y as usize * self.size.width as usize + x as usize) * bpp;
        let d = &self.data[i..i + bpp];
        match self.format {
            TextureFormat::Rgba => [unorm(d[0]), unorm(d[1]), unorm(d[2]), unorm(d[3])],
            TextureFormat::Bgra => [unorm(d[2]), unorm(d[1]), unorm(d[0]), unorm(d[3])],
            TextureFormat::Luminance => {
                let l = unorm(d[0]);
                [l, l, l, 1.0]
            }
            TextureFormat::LuminanceAlpha => {
                let l = unorm(d[0]);
                [l, l, l, unorm(d[1])]
            }
            TextureFormat::Red => [unorm(d[0]), 0.0, 0.0, 1.0],
            TextureFormat::RedGreen => [unorm(d[0]), unorm(d[1]), 0.0, 1.0],
        }
    }

    pub fn store(&mut self, x: u32, y: u32, rgba: [f32; 4]) {
        let bpp = self.format.bytes_per_pixel();
        let i = (y as usize * self.size.width as usize + x as usize) * bpp;
        let [r, g, b, a] = rgba.map(to_byte);
        let d = &mut self.data[i..i + bpp];
        match self.format {
            TextureFormat::Rgba => d.copy_from_slice(&[r, g, b, a]),
            TextureFormat::Bgra => d.copy_from_slice(&[b, g, r, a]),
            TextureFormat::Luminance | TextureFormat::Red => d[0] = r,
            TextureFormat::LuminanceAlpha => d.copy_from_slice(&[r, a]),
            TextureFormat::RedGreen => d.copy_from_slice(&[r, g]),
        }
    }

    pub fn fill(&mut self, rgba: [f32; 4]) {
        for y in 0..self.size.height {
            for x in 0..self.size.width {
                self.store(x, y, rgba);
            }
        }
    }

    /// Bilinear sample with clamp-to-edge addressing.
    pub fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        if !self.is_specified() {
            return [0.0, 0.0, 0.0, 1.0];
        }
        let (w, h) = (self.size.width as f32, self.size.height as f32);
        let fx = (uv[0] * w - 0.5).clamp(0.0, w - 1.0);
        let fy = (uv[1] * h - 0.5).clamp(0.0, h - 1.0);
        let (x0, y0) = (fx.floor() as u32, fy.floor() as u32);
        let x1 = (x0 + 1).min(self.size.width - 1);
        let y1 = (y0 + 1).min(self.size.height - 1);
        let (tx, ty) = (fx - x0 as f32, fy - y0 as f32);

        let (a, b) = (self.texel(x0, y0), self.texel(x1, y0));
        let (c, d) = (self.texel(x0, y1), self.texel(x1, y1));
        let mut out = [0.0; 4];
        for i in 0..4 {
            let top = a[i] + (b[i] - a[i]) * tx;
            let bottom = c[i] + (d[i] - c[i]) * tx;
            out[i] = top + (bottom - top) * ty;
        }
        out
    }

    /// Rows `0..height`, columns `0..width` as packed RGBA or BGRA bytes.
    pub fn read(&self, width: u32, height: u32, bgra: bool) -> Vec<u8> {
        let w = width.min(self.size.width);
        let h = height.min(self.size.height);
        let mut out = vec![0u8; width as usize * height as usize * 4];
        for y in 0..h {
            for x in 0..w {
                let [r, g, b, a] = self.texel(x, y).map(to_byte);
                let i = (y as usize * width as usize + x as usize) * 4;
                let px = if bgra { [b, g, r, a] } else { [r, g, b, a] };
                out[i..i + 4].copy_from_slice(&px);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_texture_samples_exactly() {
        let mut s = Surface::new(TextureFormat::Rgba, Size2d::new(4, 4));
        s.fill([10.0 / 255.0, 0.0, 1.0, 1.0]);
        for uv in [[0.0, 0.0], [0.5, 0.5], [1.0, 1.0], [0.13, 0.87]] {
            let px = s.sample(uv).map(to_byte);
            assert_eq!(px, [10, 0, 255, 255]);
        }
    }

    #[test]
    fn luminance_expands_to_grey() {
        let mut s = Surface::new(TextureFormat::LuminanceAlpha, Size2d::new(1, 1));
        s.data.copy_from_slice(&[51, 204]);
        assert_eq!(s.texel(0, 0).map(to_byte), [51, 51, 51, 204]);
        assert_eq!(s.read(1, 1, true), vec![51, 51, 51, 204]);
    }

    #[test]
    fn bgra_storage_reads_back_in_either_order() {
        let mut s = Surface::new(TextureFormat::Bgra, Size2d::new(1, 1));
        s.store(0, 0, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(s.data, vec![0, 0, 255, 255]);
        assert_eq!(s.read(1, 1, false), vec![255, 0, 0, 255]);
    }
}
