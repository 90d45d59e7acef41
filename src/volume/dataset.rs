/// Immutable CT volume held in host memory
///
/// A dataset is created once per import or synthesis, uploaded once to the
/// GPU, and replaced wholesale when a new series arrives. Voxels are signed
/// 16-bit, row-major with x varying fastest.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// Size of one voxel in bytes (signed 16-bit)
pub const BYTES_PER_VOXEL: usize = 2;

static NEXT_DATASET_ID: AtomicU64 = AtomicU64::new(1);

/// Storage format of the voxel buffer. Fixed for this core.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Int16,
}

/// Hounsfield range actually present in a dataset
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntensityRange {
    pub lower: i32,
    pub upper: i32,
}

impl IntensityRange {
    pub fn new(lower: i32, upper: i32) -> Result<Self, DatasetError> {
        if lower > upper {
            return Err(DatasetError::InvertedRange { lower, upper });
        }
        Ok(Self { lower, upper })
    }

    /// Number of distinct integer HU values in the range
    pub fn span(&self) -> i64 {
        self.upper as i64 - self.lower as i64 + 1
    }
}

/// Linear mapping from stored sample to Hounsfield units
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    pub slope: f32,
    pub intercept: f32,
}

impl Default for Rescale {
    fn default() -> Self {
        Self { slope: 1.0, intercept: 0.0 }
    }
}

impl Rescale {
    pub fn apply(&self, raw: f32) -> f32 {
        raw * self.slope + self.intercept
    }
}

/// A validated CT volume
#[derive(Debug, Clone)]
pub struct VolumeDataset {
    id: u64,
    dimensions: [u32; 3],
    spacing: [f32; 3],
    pixel_format: PixelFormat,
    intensity_range: IntensityRange,
    rescale: Rescale,
    orientation: [[f32; 3]; 3],
    origin: [f32; 3],
    description: String,
    voxels: Arc<[i16]>,
}

impl VolumeDataset {
    /// Build a dataset from voxel samples, computing the HU range present
    pub fn new(
        dimensions: [u32; 3],
        spacing: [f32; 3],
        voxels: Vec<i16>,
        rescale: Rescale,
    ) -> Result<Self, DatasetError> {
        if dimensions.iter().any(|&d| d == 0) {
            return Err(DatasetError::ZeroDimension(dimensions));
        }
        if spacing.iter().any(|&s| !(s.is_finite() && s > 0.0)) {
            return Err(DatasetError::InvalidSpacing(spacing));
        }

        let expected = voxel_count(dimensions);
        if voxels.len() != expected {
            return Err(DatasetError::BufferLength {
                expected: expected * BYTES_PER_VOXEL,
                actual: voxels.len() * BYTES_PER_VOXEL,
            });
        }

        let intensity_range = hounsfield_range(&voxels, rescale)?;

        Ok(Self {
            id: NEXT_DATASET_ID.fetch_add(1, Ordering::Relaxed),
            dimensions,
            spacing,
            pixel_format: PixelFormat::Int16,
            intensity_range,
            rescale,
            orientation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            origin: [0.0; 3],
            description: String::new(),
            voxels: voxels.into(),
        })
    }

    /// Build a dataset from a little-endian byte buffer of `dimensions.x*y*z*2` bytes
    pub fn from_le_bytes(
        dimensions: [u32; 3],
        spacing: [f32; 3],
        bytes: &[u8],
        rescale: Rescale,
    ) -> Result<Self, DatasetError> {
        let expected = voxel_count(dimensions) * BYTES_PER_VOXEL;
        if bytes.len() != expected {
            return Err(DatasetError::BufferLength {
                expected,
                actual: bytes.len(),
            });
        }
        let voxels = bytes
            .chunks_exact(BYTES_PER_VOXEL)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(dimensions, spacing, voxels, rescale)
    }

    /// Attach patient-space placement reported by the loader
    pub fn with_placement(mut self, orientation: [[f32; 3]; 3], origin: [f32; 3]) -> Self {
        self.orientation = orientation;
        self.origin = origin;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Process-unique identity, distinct for every constructed dataset
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dimensions(&self) -> [u32; 3] {
        self.dimensions
    }

    pub fn spacing(&self) -> [f32; 3] {
        self.spacing
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn intensity_range(&self) -> IntensityRange {
        self.intensity_range
    }

    pub fn rescale(&self) -> Rescale {
        self.rescale
    }

    pub fn orientation(&self) -> [[f32; 3]; 3] {
        self.orientation
    }

    pub fn origin(&self) -> [f32; 3] {
        self.origin
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn voxels(&self) -> &[i16] {
        &self.voxels
    }

    /// Raw voxel bytes in native order, ready for a texture upload
    pub fn voxel_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.voxels)
    }

    pub fn voxel_count(&self) -> usize {
        self.voxels.len()
    }

    /// Linear index of voxel (x, y, z)
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        let [dx, dy, _] = self.dimensions;
        (z as usize * dy as usize + y as usize) * dx as usize + x as usize
    }

    /// Stored sample at (x, y, z); coordinates are clamped to the volume
    pub fn sample(&self, x: u32, y: u32, z: u32) -> i16 {
        let [dx, dy, dz] = self.dimensions;
        self.voxels[self.index(x.min(dx - 1), y.min(dy - 1), z.min(dz - 1))]
    }

    /// Hounsfield value at (x, y, z)
    pub fn hounsfield(&self, x: u32, y: u32, z: u32) -> f32 {
        self.rescale.apply(self.sample(x, y, z) as f32)
    }

    /// Physical size of the volume along each axis
    pub fn physical_extent(&self) -> [f32; 3] {
        [
            self.dimensions[0] as f32 * self.spacing[0],
            self.dimensions[1] as f32 * self.spacing[1],
            self.dimensions[2] as f32 * self.spacing[2],
        ]
    }
}

fn voxel_count(dimensions: [u32; 3]) -> usize {
    dimensions.iter().map(|&d| d as usize).product()
}

fn hounsfield_range(voxels: &[i16], rescale: Rescale) -> Result<IntensityRange, DatasetError> {
    let (min_raw, max_raw) = voxels
        .iter()
        .fold((i16::MAX, i16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    let a = rescale.apply(min_raw as f32);
    let b = rescale.apply(max_raw as f32);
    IntensityRange::new(a.min(b).floor() as i32, a.max(b).ceil() as i32)
}
