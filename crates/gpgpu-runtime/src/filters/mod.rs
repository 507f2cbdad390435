//! Built-in leaf filters.
//!
//! Each filter is a pair of shader sources plus the uniforms it stages; the
//! engine treats the shader math as opaque data. Drive one with
//! [`FilterProc`](crate::proc::FilterProc).

mod blend;
mod diff;
mod gain;
mod mesh;
mod passthrough;
mod swizzle;
mod yuv2rgb;

pub use blend::{Blend, BLEND_FRAG};
pub use diff::{Diff, DIFF_FRAG};
pub use gain::{Gain, GAIN_FRAG};
pub use mesh::{Mesh, TransformProc, IDENTITY, MESH_VERT};
pub use passthrough::{Passthrough, PASSTHROUGH_FRAG};
pub use swizzle::{Swizzle, SwizzleKind};
pub use yuv2rgb::{Yuv2Rgb, YUV2RGB_LA_FRAG, YUV2RGB_PLANAR_FRAG, YUV2RGB_RG_FRAG};
