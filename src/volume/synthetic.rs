/// Procedural CT volumes for demos and regression tests

use serde::{Deserialize, Serialize};
use tokio::task;

use super::dataset::{Rescale, VolumeDataset};
use crate::error::DatasetError;

/// HU of air, used as background
pub const AIR_HU: i16 = -1000;

/// Shapes the generator knows how to synthesize
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SyntheticVolume {
    /// Every voxel holds the same HU value
    Uniform { hu: i16 },
    /// Dense sphere centred in the volume, surrounded by air
    Sphere { radius: f32, hu: i16 },
    /// Alternating cubes whose values also change with depth
    Checkerboard { cell: u32 },
    /// Linear ramp along x, stored with anisotropic spacing
    Gradient { low: i16, high: i16 },
}

impl SyntheticVolume {
    /// Parse the short names accepted on the command line
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "uniform" => Some(Self::Uniform { hu: 0 }),
            "sphere" => Some(Self::Sphere { radius: 0.35, hu: 400 }),
            "checkerboard" => Some(Self::Checkerboard { cell: 8 }),
            "gradient" => Some(Self::Gradient { low: -1000, high: 1000 }),
            _ => None,
        }
    }

    /// Voxel spacing used for this shape
    pub fn spacing(&self) -> [f32; 3] {
        match self {
            Self::Gradient { .. } => [0.7, 0.7, 2.5],
            _ => [1.0, 1.0, 1.0],
        }
    }

    /// Generate the dataset on the calling thread
    pub fn generate(&self, dimensions: [u32; 3]) -> Result<VolumeDataset, DatasetError> {
        let [dx, dy, dz] = dimensions;
        let mut voxels = Vec::with_capacity(dx as usize * dy as usize * dz as usize);

        for z in 0..dz {
            for y in 0..dy {
                for x in 0..dx {
                    voxels.push(self.value_at([x, y, z], dimensions));
                }
            }
        }

        let dataset = VolumeDataset::new(dimensions, self.spacing(), voxels, Rescale::default())?;
        Ok(dataset.with_description(self.description()))
    }

    /// Generate on tokio's blocking pool; large volumes take a while
    pub async fn generate_async(self, dimensions: [u32; 3]) -> Result<VolumeDataset, DatasetError> {
        match task::spawn_blocking(move || self.generate(dimensions)).await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("⚠️  Synthetic generation task failed ({}), generating inline", e);
                self.generate(dimensions)
            }
        }
    }

    fn description(&self) -> String {
        match self {
            Self::Uniform { hu } => format!("Synthetic uniform {} HU", hu),
            Self::Sphere { radius, hu } => format!("Synthetic sphere r={:.2} at {} HU", radius, hu),
            Self::Checkerboard { cell } => format!("Synthetic checkerboard ({} voxel cells)", cell),
            Self::Gradient { low, high } => format!("Synthetic gradient {}..{} HU", low, high),
        }
    }

    fn value_at(&self, voxel: [u32; 3], dimensions: [u32; 3]) -> i16 {
        // Normalized voxel centre in [0,1]^3
        let p = [
            (voxel[0] as f32 + 0.5) / dimensions[0] as f32,
            (voxel[1] as f32 + 0.5) / dimensions[1] as f32,
            (voxel[2] as f32 + 0.5) / dimensions[2] as f32,
        ];

        match *self {
            Self::Uniform { hu } => hu,
            Self::Sphere { radius, hu } => {
                let d2 = (p[0] - 0.5).powi(2) + (p[1] - 0.5).powi(2) + (p[2] - 0.5).powi(2);
                if d2 <= radius * radius {
                    hu
                } else {
                    AIR_HU
                }
            }
            Self::Checkerboard { cell } => {
                let cell = cell.max(1);
                let parity = (voxel[0] / cell + voxel[1] / cell + voxel[2] / cell) % 2;
                // Each layer of cells along z gets a brighter "on" value, saturating at i16::MAX
                let layer = (voxel[2] / cell).min(i32::MAX as u32) as i32;
                if parity == 0 {
                    layer.saturating_mul(150).saturating_add(200).min(i16::MAX as i32) as i16
                } else {
                    -600
                }
            }
            Self::Gradient { low, high } => {
                let t = p[0];
                (low as f32 + (high as f32 - low as f32) * t).round() as i16
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_volume() {
        let dataset = SyntheticVolume::Uniform { hu: 0 }.generate([4, 4, 4]).unwrap();
        assert!(dataset.voxels().iter().all(|&v| v == 0));
        assert_eq!(dataset.intensity_range().lower, 0);
        assert_eq!(dataset.intensity_range().upper, 0);
    }

    #[test]
    fn test_sphere_centre_and_corner() {
        let dataset = SyntheticVolume::Sphere { radius: 0.35, hu: 400 }
            .generate([16, 16, 16])
            .unwrap();
        assert_eq!(dataset.sample(8, 8, 8), 400);
        assert_eq!(dataset.sample(0, 0, 0), AIR_HU);
    }

    #[test]
    fn test_gradient_is_anisotropic_and_monotonic() {
        let shape = SyntheticVolume::from_name("gradient").unwrap();
        let dataset = shape.generate([8, 2, 2]).unwrap();
        assert_eq!(dataset.spacing(), [0.7, 0.7, 2.5]);
        let row: Vec<i16> = (0..8).map(|x| dataset.sample(x, 0, 0)).collect();
        assert!(row.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_checkerboard_alternates() {
        let dataset = SyntheticVolume::Checkerboard { cell: 2 }.generate([4, 4, 4]).unwrap();
        assert_ne!(dataset.sample(0, 0, 0), dataset.sample(2, 0, 0));
        assert_eq!(dataset.sample(0, 0, 0), dataset.sample(1, 1, 1));
    }

    #[test]
    fn test_deep_checkerboard_saturates() {
        // 256 single-voxel layers push the "on" value past i16::MAX
        let dataset = SyntheticVolume::Checkerboard { cell: 1 }.generate([2, 2, 256]).unwrap();
        assert_eq!(dataset.sample(0, 0, 0), 200);
        assert_eq!(dataset.sample(0, 0, 2), 500);
        assert_eq!(dataset.sample(0, 0, 254), i16::MAX);
        assert_eq!(dataset.sample(1, 0, 254), -600);
    }

    #[tokio::test]
    async fn test_generate_async() {
        let dataset = SyntheticVolume::from_name("sphere")
            .unwrap()
            .generate_async([8, 8, 8])
            .await
            .unwrap();
        assert_eq!(dataset.dimensions(), [8, 8, 8]);
        assert!(dataset.description().contains("sphere"));
    }
}
