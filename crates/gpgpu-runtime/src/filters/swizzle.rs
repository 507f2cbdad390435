use crate::proc::Filter;

macro_rules! swizzle_frag {
    ($sel:literal) => {
        concat!(
            "\nin vec2 v_uv;\nuniform sampler2D u_input;\nout vec4 frag_color;\n",
            "void main() {\n    frag_color = texture(u_input, v_uv).",
            $sel,
            ";\n}\n"
        )
    };
}

/// Output channel order, named by which input channel lands in R, G, B, A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SwizzleKind {
    #[default]
    Rgba,
    Bgra,
    Argb,
    Abgr,
    Grab,
}

impl SwizzleKind {
    pub const ALL: [SwizzleKind; 5] = [
        SwizzleKind::Rgba,
        SwizzleKind::Bgra,
        SwizzleKind::Argb,
        SwizzleKind::Abgr,
        SwizzleKind::Grab,
    ];

    /// `out[i] = in[perm[i]]`.
    pub fn permutation(self) -> [usize; 4] {
        match self {
            SwizzleKind::Rgba => [0, 1, 2, 3],
            SwizzleKind::Bgra => [2, 1, 0, 3],
            SwizzleKind::Argb => [3, 0, 1, 2],
            SwizzleKind::Abgr => [3, 2, 1, 0],
            SwizzleKind::Grab => [1, 0, 3, 2],
        }
    }

    /// The kind undoing this one, if it is in the set.
    pub fn inverse(self) -> Option<SwizzleKind> {
        let p = self.permutation();
        let mut inv = [0usize; 4];
        for (i, &src) in p.iter().enumerate() {
            inv[src] = i;
        }
        Self::ALL.into_iter().find(|k| k.permutation() == inv)
    }

    pub fn fragment_source(self) -> &'static str {
        match self {
            SwizzleKind::Rgba => swizzle_frag!("rgba"),
            SwizzleKind::Bgra => swizzle_frag!("bgra"),
            SwizzleKind::Argb => swizzle_frag!("argb"),
            SwizzleKind::Abgr => swizzle_frag!("abgr"),
            SwizzleKind::Grab => swizzle_frag!("grab"),
        }
    }

    /// Apply to one host pixel.
    pub fn apply(self, px: [u8; 4]) -> [u8; 4] {
        let p = self.permutation();
        [px[p[0]], px[p[1]], px[p[2]], px[p[3]]]
    }
}

/// Channel reorder (e.g. RGBA to BGRA).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Swizzle {
    pub kind: SwizzleKind,
}

impl Swizzle {
    pub fn new(kind: SwizzleKind) -> Self {
        Self { kind }
    }
}

impl Filter for Swizzle {
    fn name(&self) -> &'static str {
        "swizzle"
    }

    fn fragment_source(&self) -> &'static str {
        self.kind.fragment_source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverses_round_trip() {
        let px = [10, 20, 30, 40];
        for k in SwizzleKind::ALL {
            if let Some(inv) = k.inverse() {
                assert_eq!(inv.apply(k.apply(px)), px, "{k:?}");
            }
        }
        assert_eq!(SwizzleKind::Bgra.inverse(), Some(SwizzleKind::Bgra));
        assert_eq!(SwizzleKind::Argb.inverse(), None);
        assert_eq!(SwizzleKind::Argb.apply(px), [40, 10, 20, 30]);
    }

    #[test]
    fn sources_select_channels() {
        assert!(SwizzleKind::Bgra.fragment_source().contains("texture(u_input, v_uv).bgra;"));
        assert!(SwizzleKind::Grab.fragment_source().contains(".grab;"));
    }
}
