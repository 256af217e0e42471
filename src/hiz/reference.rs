//! CPU depth pyramid with the same reduction and occlusion test as the kernels

use std::path::Path;

use super::{hiz_mip_count, hiz_size, DepthConvention};
use crate::core::types::{Mat4, Vec2};
use crate::core::{Error, Result};
use crate::math::Aabb;

/// Mip chain of farthest depths, mip 0 first
#[derive(Clone, Debug)]
pub struct DepthPyramid {
    size: u32,
    convention: DepthConvention,
    mips: Vec<Vec<f32>>,
}

impl DepthPyramid {
    /// Reduce a `width × height` row-major depth buffer.
    ///
    /// The depth image is stretched over the square mip 0; each mip-0 texel
    /// takes the farthest of every screen pixel its footprint touches.
    pub fn build(depth: &[f32], width: u32, height: u32, convention: DepthConvention) -> Result<Self> {
        if width == 0 || height == 0 || depth.len() != (width * height) as usize {
            return Err(Error::Config(format!(
                "depth buffer has {} samples, expected {}x{}",
                depth.len(),
                width,
                height
            )));
        }
        let size = hiz_size(width, height);
        let mut mips = Vec::with_capacity(hiz_mip_count(size) as usize);

        let mut mip0 = vec![convention.near_value(); (size * size) as usize];
        for ty in 0..size {
            let (y0, y1) = footprint(ty, size, height);
            for tx in 0..size {
                let (x0, x1) = footprint(tx, size, width);
                let mut farthest = convention.near_value();
                for py in y0..y1 {
                    for px in x0..x1 {
                        farthest = convention.farthest(farthest, depth[(py * width + px) as usize]);
                    }
                }
                mip0[(ty * size + tx) as usize] = farthest;
            }
        }
        mips.push(mip0);

        let mut dim = size;
        while dim > 1 {
            let prev = mips.last().map(Vec::as_slice).unwrap_or_default();
            let next_dim = dim / 2;
            let mut next = vec![convention.near_value(); (next_dim * next_dim) as usize];
            for y in 0..next_dim {
                for x in 0..next_dim {
                    let at = |dx: u32, dy: u32| prev[((y * 2 + dy) * dim + x * 2 + dx) as usize];
                    let a = convention.farthest(at(0, 0), at(1, 0));
                    let b = convention.farthest(at(0, 1), at(1, 1));
                    next[(y * next_dim + x) as usize] = convention.farthest(a, b);
                }
            }
            mips.push(next);
            dim = next_dim;
        }

        Ok(Self { size, convention, mips })
    }

    /// Uniform depth, e.g. a cleared depth buffer
    pub fn uniform(width: u32, height: u32, depth: f32, convention: DepthConvention) -> Result<Self> {
        Self::build(&vec![depth; (width * height) as usize], width, height, convention)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn mip_count(&self) -> u32 {
        self.mips.len() as u32
    }

    pub fn convention(&self) -> DepthConvention {
        self.convention
    }

    pub fn mip_size(&self, mip: u32) -> u32 {
        (self.size >> mip).max(1)
    }

    pub fn mip(&self, mip: u32) -> &[f32] {
        &self.mips[mip as usize]
    }

    pub fn texel(&self, mip: u32, x: u32, y: u32) -> f32 {
        let dim = self.mip_size(mip);
        self.mips[mip as usize][(y.min(dim - 1) * dim + x.min(dim - 1)) as usize]
    }

    /// True when `bounds`, grown by `bias` world units, lies entirely behind
    /// the stored depths. Boxes crossing the camera plane are never occluded.
    pub fn is_occluded(&self, bounds: &Aabb, view_proj: &Mat4, bias: f32) -> bool {
        let bounds = bounds.inflated(bias);
        let mut min_uv = Vec2::splat(f32::MAX);
        let mut max_uv = Vec2::splat(f32::MIN);
        let mut nearest = self.convention.far_value();

        for corner in bounds.corners() {
            let clip = *view_proj * corner.extend(1.0);
            if clip.w <= 0.0 {
                return false;
            }
            let ndc = clip.truncate() / clip.w;
            let uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
            min_uv = min_uv.min(uv);
            max_uv = max_uv.max(uv);
            nearest = self.convention.nearest(nearest, ndc.z);
        }

        let min_uv = min_uv.clamp(Vec2::ZERO, Vec2::ONE);
        let max_uv = max_uv.clamp(Vec2::ZERO, Vec2::ONE);
        let extent = (max_uv - min_uv) * self.size as f32;
        let mip = (extent.x.max(extent.y).max(1.0).log2().ceil() as u32).min(self.mip_count() - 1);

        let dim = self.mip_size(mip) as f32;
        let tx = (min_uv.x * dim).floor().min(dim - 1.0) as u32;
        let ty = (min_uv.y * dim).floor().min(dim - 1.0) as u32;
        let occluder = [(0, 0), (1, 0), (0, 1), (1, 1)]
            .iter()
            .map(|&(dx, dy)| self.texel(mip, tx + dx, ty + dy))
            .fold(self.convention.near_value(), |acc, d| self.convention.farthest(acc, d));

        self.convention.is_behind(nearest, occluder)
    }

    /// Write one mip as an 8-bit grayscale PNG (near = black)
    pub fn save_mip_png(&self, mip: u32, path: impl AsRef<Path>) -> Result<()> {
        let dim = self.mip_size(mip);
        let near = self.convention.near_value();
        let pixels = self.mip(mip).iter().map(|d| ((d - near).abs().clamp(0.0, 1.0) * 255.0) as u8).collect();
        let img = image::GrayImage::from_raw(dim, dim, pixels)
            .ok_or_else(|| Error::Config(format!("mip {} has unexpected size", mip)))?;
        img.save(path).map_err(|e| Error::Io(std::io::Error::other(e)))
    }
}

/// Screen pixel range `[start, end)` touched by texel `t` of a `size`-wide mip 0
fn footprint(t: u32, size: u32, screen: u32) -> (u32, u32) {
    let start = (t as u64 * screen as u64 / size as u64) as u32;
    let end = ((t as u64 + 1) * screen as u64).div_ceil(size as u64) as u32;
    (start.min(screen - 1), end.clamp(start + 1, screen))
}

/// A built pyramid plus the view-projection it was built with
#[derive(Clone, Copy, Debug)]
pub struct Occluder<'a> {
    pub pyramid: &'a DepthPyramid,
    pub view_proj: Mat4,
}

impl Occluder<'_> {
    pub fn is_occluded(&self, bounds: &Aabb, bias: f32) -> bool {
        self.pyramid.is_occluded(bounds, &self.view_proj, bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;

    fn ramp(width: u32, height: u32) -> Vec<f32> {
        (0..width * height).map(|i| (i % 97) as f32 / 97.0).collect()
    }

    #[test]
    fn test_mip_texel_is_farthest_of_footprint() {
        let (w, h) = (64, 64);
        let depth = ramp(w, h);
        let pyramid = DepthPyramid::build(&depth, w, h, DepthConvention::Standard).unwrap();
        assert_eq!(pyramid.mip_count(), 7);

        for k in 0..pyramid.mip_count() {
            let dim = pyramid.mip_size(k);
            let span = 1 << k;
            for ty in 0..dim {
                for tx in 0..dim {
                    let mut expected = 0.0f32;
                    for y in ty * span..(ty + 1) * span {
                        for x in tx * span..(tx + 1) * span {
                            expected = expected.max(depth[(y * w + x) as usize]);
                        }
                    }
                    assert_eq!(pyramid.texel(k, tx, ty), expected, "mip {} texel ({}, {})", k, tx, ty);
                }
            }
        }
    }

    #[test]
    fn test_reversed_keeps_minimum() {
        let depth = [0.9, 0.4, 0.6, 0.8];
        let pyramid = DepthPyramid::build(&depth, 2, 2, DepthConvention::Reversed).unwrap();
        assert_eq!(pyramid.texel(1, 0, 0), 0.4);
    }

    #[test]
    fn test_non_square_viewport_is_conservative() {
        let (w, h) = (6, 3);
        let mut depth = vec![0.1; 18];
        depth[17] = 0.95;
        let pyramid = DepthPyramid::build(&depth, w, h, DepthConvention::Standard).unwrap();
        assert_eq!(pyramid.size(), 8);
        assert_eq!(pyramid.texel(0, 7, 7), 0.95);
        assert_eq!(pyramid.texel(pyramid.mip_count() - 1, 0, 0), 0.95);
    }

    #[test]
    fn test_rejects_wrong_buffer_size() {
        assert!(DepthPyramid::build(&[0.0; 3], 2, 2, DepthConvention::Standard).is_err());
    }

    fn view_proj() -> Mat4 {
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 1.0, 1000.0);
        proj * Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y)
    }

    #[test]
    fn test_box_behind_wall_is_occluded() {
        let vp = view_proj();
        // Wall at distance 10 covering the whole view
        let wall_depth = vp.project_point3(Vec3::new(0.0, 0.0, -10.0)).z;
        let pyramid = DepthPyramid::uniform(64, 64, wall_depth, DepthConvention::Standard).unwrap();

        let far_box = Aabb::new(Vec3::new(-5.0, -5.0, -120.0), Vec3::new(5.0, 5.0, -100.0));
        let near_box = Aabb::new(Vec3::new(-1.0, -1.0, -6.0), Vec3::new(1.0, 1.0, -4.0));
        assert!(pyramid.is_occluded(&far_box, &vp, 1.0));
        assert!(!pyramid.is_occluded(&near_box, &vp, 1.0));
    }

    #[test]
    fn test_box_crossing_camera_is_visible() {
        let vp = view_proj();
        let pyramid = DepthPyramid::uniform(16, 16, 0.0, DepthConvention::Standard).unwrap();
        let around_camera = Aabb::new(Vec3::splat(-50.0), Vec3::splat(50.0));
        assert!(!pyramid.is_occluded(&around_camera, &vp, 0.01));
    }

    #[test]
    fn test_cleared_depth_never_occludes() {
        let vp = view_proj();
        let pyramid = DepthPyramid::uniform(32, 32, 1.0, DepthConvention::Standard).unwrap();
        let box_far = Aabb::new(Vec3::new(-5.0, -5.0, -900.0), Vec3::new(5.0, 5.0, -800.0));
        assert!(!pyramid.is_occluded(&box_far, &vp, 0.01));
    }

    #[test]
    fn test_png_export() {
        let dir = tempfile::tempdir().unwrap();
        let pyramid = DepthPyramid::build(&ramp(16, 16), 16, 16, DepthConvention::Standard).unwrap();
        let path = dir.path().join("mip2.png");
        pyramid.save_mip_png(2, &path).unwrap();
        assert!(path.exists());
    }
}
