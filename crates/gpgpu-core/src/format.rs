use serde::{Deserialize, Serialize};

use crate::{EngineError, Size2d};

// GL enum values used as raw format codes at the ingestion boundary.
pub const RAW_YUV_SENTINEL: u32 = 0;
pub const RAW_RED: u32 = 0x1903;
pub const RAW_RGBA: u32 = 0x1908;
pub const RAW_LUMINANCE: u32 = 0x1909;
pub const RAW_LUMINANCE_ALPHA: u32 = 0x190A;
pub const RAW_RG: u32 = 0x8227;
pub const RAW_BGRA: u32 = 0x80E1;

/// Storage format of a GPU texture. Fixed for the texture's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    Rgba,
    Bgra,
    Luminance,
    LuminanceAlpha,
    Red,
    RedGreen,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Rgba | TextureFormat::Bgra => 4,
            TextureFormat::LuminanceAlpha | TextureFormat::RedGreen => 2,
            TextureFormat::Luminance | TextureFormat::Red => 1,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            TextureFormat::Rgba => RAW_RGBA,
            TextureFormat::Bgra => RAW_BGRA,
            TextureFormat::Luminance => RAW_LUMINANCE,
            TextureFormat::LuminanceAlpha => RAW_LUMINANCE_ALPHA,
            TextureFormat::Red => RAW_RED,
            TextureFormat::RedGreen => RAW_RG,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            RAW_RGBA => TextureFormat::Rgba,
            RAW_BGRA => TextureFormat::Bgra,
            RAW_LUMINANCE => TextureFormat::Luminance,
            RAW_LUMINANCE_ALPHA => TextureFormat::LuminanceAlpha,
            RAW_RED => TextureFormat::Red,
            RAW_RG => TextureFormat::RedGreen,
            _ => return None,
        })
    }

    /// Four-channel formats are the only ones readback produces.
    pub fn is_rgba_family(self) -> bool {
        matches!(self, TextureFormat::Rgba | TextureFormat::Bgra)
    }
}

/// Memory layout of a YUV 4:2:0 camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YuvLayout {
    /// Y plane followed by interleaved UV.
    Nv12,
    /// Y plane followed by interleaved VU.
    Nv21,
    /// Y plane, then U plane, then V plane.
    I420,
}

/// One plane of a YUV frame inside a contiguous host buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YuvPlane {
    pub offset: usize,
    pub size: Size2d,
    /// Interleaved channels per texel (1 for luma and planar chroma, 2 for UV pairs).
    pub channels: usize,
}

impl YuvPlane {
    pub fn len(&self) -> usize {
        self.size.area() * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl YuvLayout {
    /// Plane descriptions for a frame of `size`, in buffer order.
    pub fn planes(self, size: Size2d) -> Vec<YuvPlane> {
        let luma = YuvPlane {
            offset: 0,
            size,
            channels: 1,
        };
        let half = size.half_ceil();
        match self {
            YuvLayout::Nv12 | YuvLayout::Nv21 => vec![
                luma,
                YuvPlane {
                    offset: luma.len(),
                    size: half,
                    channels: 2,
                },
            ],
            YuvLayout::I420 => {
                let u = YuvPlane {
                    offset: luma.len(),
                    size: half,
                    channels: 1,
                };
                let v = YuvPlane {
                    offset: u.offset + u.len(),
                    ..u
                };
                vec![luma, u, v]
            }
        }
    }

    /// Total host bytes for a frame of `size`.
    pub fn frame_len(self, size: Size2d) -> usize {
        self.planes(size).iter().map(YuvPlane::len).sum()
    }
}

/// Format of a frame handed to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Yuv(YuvLayout),
    Texture(TextureFormat),
}

impl PixelFormat {
    pub const RGBA: PixelFormat = PixelFormat::Texture(TextureFormat::Rgba);
    pub const BGRA: PixelFormat = PixelFormat::Texture(TextureFormat::Bgra);
    pub const NV12: PixelFormat = PixelFormat::Yuv(YuvLayout::Nv12);

    /// Decode a raw ingestion code. `0` denotes biplanar YUV (NV12).
    pub fn from_raw(raw: u32) -> Result<Self, EngineError> {
        if raw == RAW_YUV_SENTINEL {
            return Ok(PixelFormat::NV12);
        }
        TextureFormat::from_raw(raw)
            .map(PixelFormat::Texture)
            .ok_or_else(|| EngineError::unsupported(format!("pixel format 0x{raw:04x}")))
    }

    pub fn raw(self) -> u32 {
        match self {
            PixelFormat::Yuv(_) => RAW_YUV_SENTINEL,
            PixelFormat::Texture(t) => t.raw(),
        }
    }

    pub fn is_yuv(self) -> bool {
        matches!(self, PixelFormat::Yuv(_))
    }

    /// Host bytes a frame of this format occupies.
    pub fn frame_len(self, size: Size2d) -> usize {
        match self {
            PixelFormat::Yuv(layout) => layout.frame_len(size),
            PixelFormat::Texture(t) => size.area() * t.bytes_per_pixel(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_zero_is_yuv() {
        assert_eq!(PixelFormat::from_raw(0).unwrap(), PixelFormat::NV12);
        assert_eq!(
            PixelFormat::from_raw(RAW_BGRA).unwrap(),
            PixelFormat::Texture(TextureFormat::Bgra)
        );
        assert!(matches!(
            PixelFormat::from_raw(0xdead),
            Err(EngineError::Unsupported(_))
        ));
    }

    #[test]
    fn nv12_planes_for_odd_size() {
        let planes = YuvLayout::Nv12.planes(Size2d::new(5, 3));
        assert_eq!(planes.len(), 2);
        assert_eq!(planes[1].offset, 15);
        assert_eq!(planes[1].size, Size2d::new(3, 2));
        assert_eq!(YuvLayout::Nv12.frame_len(Size2d::new(5, 3)), 15 + 12);
    }

    #[test]
    fn i420_planes_are_contiguous() {
        let size = Size2d::new(4, 4);
        let planes = YuvLayout::I420.planes(size);
        assert_eq!(planes[1].offset, 16);
        assert_eq!(planes[2].offset, 20);
        assert_eq!(YuvLayout::I420.frame_len(size), 24);
    }
}
