//! Noise-based synthetic height field for tooling, benches and tests

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

/// Parameters controlling the height field
#[derive(Clone, Debug)]
pub struct SyntheticParams {
    pub seed: u32,
    pub scale: f32,        // Horizontal scale (larger = smoother)
    pub height_scale: f32, // Vertical scale (max height)
    pub octaves: u32,      // FBM octaves (detail levels)
    pub persistence: f32,  // FBM persistence (0.5 typical)
    pub lacunarity: f32,   // FBM lacunarity (2.0 typical)
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            scale: 2000.0,
            height_scale: 1200.0,
            octaves: 5,
            persistence: 0.5,
            lacunarity: 2.0,
        }
    }
}

/// Fractal Brownian motion height source
pub struct SyntheticHeight {
    params: SyntheticParams,
    noise: Fbm<Perlin>,
}

impl SyntheticHeight {
    pub fn new(params: SyntheticParams) -> Self {
        let noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(params.persistence as f64)
            .set_lacunarity(params.lacunarity as f64);

        Self { params, noise }
    }

    pub fn params(&self) -> &SyntheticParams {
        &self.params
    }

    /// Height at world position (x, z), in `[0, height_scale]`
    pub fn height_at(&self, x: f32, z: f32) -> f32 {
        let nx = (x / self.params.scale) as f64;
        let nz = (z / self.params.scale) as f64;

        // Fbm output is roughly [-1, 1]
        let normalized = ((self.noise.get([nx, nz]) + 1.0) * 0.5).clamp(0.0, 1.0);
        (normalized * self.params.height_scale as f64) as f32
    }
}
