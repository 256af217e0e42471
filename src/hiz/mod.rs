//! Hierarchical depth (Hi-Z) pyramid
//!
//! The pyramid is a square power-of-two mip chain over the camera depth.
//! Each texel keeps the farthest depth of its footprint, so a box whose
//! nearest depth lies beyond the stored value is fully hidden. The GPU
//! builder lives in `render::pipeline::hiz`; [`reference`] is the CPU model.

pub mod reference;

pub use reference::{DepthPyramid, Occluder};

/// Mips written per GPU pass
pub const MIPS_PER_PASS: u32 = 4;

/// Thread-group footprint of the reduction kernel along one axis
pub const HIZ_GROUP_SIZE: u32 = 8;

/// Which end of the depth range is near
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DepthConvention {
    /// Near = 0, far = 1
    #[default]
    Standard,
    /// Near = 1, far = 0
    Reversed,
}

impl DepthConvention {
    /// Depth of the near plane, the identity for a farthest-reduction
    pub fn near_value(self) -> f32 {
        match self {
            Self::Standard => 0.0,
            Self::Reversed => 1.0,
        }
    }

    /// Depth of the far plane
    pub fn far_value(self) -> f32 {
        1.0 - self.near_value()
    }

    pub fn farthest(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Standard => a.max(b),
            Self::Reversed => a.min(b),
        }
    }

    pub fn nearest(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Standard => a.min(b),
            Self::Reversed => a.max(b),
        }
    }

    /// True when `depth` lies strictly behind `occluder`
    pub fn is_behind(self, depth: f32, occluder: f32) -> bool {
        match self {
            Self::Standard => depth > occluder,
            Self::Reversed => depth < occluder,
        }
    }

    pub fn is_reversed(self) -> bool {
        self == Self::Reversed
    }
}

/// Pyramid side length for a viewport: `next_pow2(max(width, height))`
pub fn hiz_size(width: u32, height: u32) -> u32 {
    width.max(height).max(1).next_power_of_two()
}

/// Mips in a pyramid of side `size` (down to 1×1)
pub fn hiz_mip_count(size: u32) -> u32 {
    size.max(1).ilog2() + 1
}

/// One GPU reduction pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HizPass {
    pub index: u32,
    /// First mip written by this pass
    pub first_mip: u32,
    /// Mips written (1..=4)
    pub mip_count: u32,
    /// Side length of `first_mip`
    pub dst_size: u32,
    /// Thread groups along each axis
    pub groups: u32,
}

impl HizPass {
    /// Pass 0 reduces camera depth, later passes read the scratch copy
    pub fn reads_depth(&self) -> bool {
        self.index == 0
    }

    pub fn last_mip(&self) -> u32 {
        self.first_mip + self.mip_count - 1
    }

    /// Ping-pong scratch slot this pass writes its last mip into
    pub fn scratch_write(&self) -> usize {
        (self.index % 2) as usize
    }

    /// Scratch slot read by this pass (pass 0 reads depth instead)
    pub fn scratch_read(&self) -> Option<usize> {
        (self.index > 0).then(|| ((self.index - 1) % 2) as usize)
    }
}

/// Passes needed to build a pyramid of side `size`: `ceil(mips / 4)`
pub fn hiz_passes(size: u32) -> Vec<HizPass> {
    let mips = hiz_mip_count(size);
    (0..mips.div_ceil(MIPS_PER_PASS))
        .map(|index| {
            let first_mip = index * MIPS_PER_PASS;
            let dst_size = (size >> first_mip).max(1);
            HizPass {
                index,
                first_mip,
                mip_count: (mips - first_mip).min(MIPS_PER_PASS),
                dst_size,
                groups: dst_size.div_ceil(HIZ_GROUP_SIZE),
            }
        })
        .collect()
}

/// Side length of each ping-pong scratch texture
pub fn hiz_scratch_size(size: u32) -> u32 {
    (size >> (MIPS_PER_PASS - 1)).max(1)
}
