use serde::{Deserialize, Serialize};

/// Pixel dimensions of a texture, frame or viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size2d {
    pub width: u32,
    pub height: u32,
}

impl Size2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Scale both axes, rounding to nearest and never going below one pixel.
    pub fn scaled(&self, factor: f32) -> Size2d {
        let s = |v: u32| ((v as f32 * factor).round() as u32).max(1);
        Size2d::new(s(self.width), s(self.height))
    }

    /// Half size rounded up, as used by subsampled chroma planes.
    pub fn half_ceil(&self) -> Size2d {
        Size2d::new(self.width.div_ceil(2), self.height.div_ceil(2))
    }

    pub fn as_i32(&self) -> (i32, i32) {
        (self.width as i32, self.height as i32)
    }
}

impl From<(u32, u32)> for Size2d {
    fn from((width, height): (u32, u32)) -> Self {
        Size2d { width, height }
    }
}
