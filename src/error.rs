/// Error types shared across the crate
///
/// GPU-resource errors are local to a single render call, import errors are
/// reported once per import attempt. Nothing here is retained between calls.

use thiserror::Error;

/// Failures of the GPU side: device setup, allocation, dispatch and readback
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no compatible GPU adapter found")]
    AdapterUnavailable,

    #[error("failed to create device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("invalid output size {width}x{height} (device maximum {max})")]
    InvalidOutputSize { width: u32, height: u32, max: u32 },

    #[error("volume {dimensions:?} exceeds the device 3D texture limit of {max}")]
    VolumeTooLarge { dimensions: [u32; 3], max: u32 },

    #[error("GPU allocation failed for {label}: {reason}")]
    Allocation { label: String, reason: String },

    #[error("failed to compile {label}: {reason}")]
    PipelineCompilation { label: String, reason: String },

    #[error("failed to map buffer for readback: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("readback channel closed before the GPU finished")]
    ReadbackInterrupted,

    #[error("histogram plan has {channel_count} channels; rendered frames carry 1 to 4")]
    InvalidHistogramChannels { channel_count: u32 },
}

/// Invariant violations when constructing a `VolumeDataset`
#[derive(Debug, Error, PartialEq)]
pub enum DatasetError {
    #[error("volume dimensions must be positive, got {0:?}")]
    ZeroDimension([u32; 3]),

    #[error("voxel spacing must be positive and finite, got {0:?}")]
    InvalidSpacing([f32; 3]),

    #[error("voxel buffer holds {actual} bytes, expected {expected}")]
    BufferLength { expected: usize, actual: usize },

    #[error("intensity range is inverted: {lower} > {upper}")]
    InvertedRange { lower: i32, upper: i32 },
}

/// Problems with a transfer-function document
#[derive(Debug, Error)]
pub enum TransferFunctionError {
    #[error("failed to parse transfer function: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read transfer function file: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer function domain is empty: min {min} >= max {max}")]
    EmptyDomain { min: f32, max: f32 },

    #[error("transfer function has no {0} points")]
    NoPoints(&'static str),

    #[error("{0} points are not ordered by dataValue")]
    Unordered(&'static str),

    #[error("{kind} points span [{first}, {last}] which does not cover the domain [{min}, {max}]")]
    DomainNotCovered {
        kind: &'static str,
        first: f32,
        last: f32,
        min: f32,
        max: f32,
    },
}

/// Failures surfaced by the DICOM import boundary
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImportError {
    /// Opaque failure reported by the native series loader
    #[error("native loader error {domain}:{code}")]
    Bridge { domain: String, code: i64 },

    #[error("native series loader is unavailable")]
    Unavailable,

    #[error("no DICOM files found")]
    NoFiles,

    #[error("unsupported pixel bit depth: {0} bits allocated")]
    UnsupportedBitDepth(u32),

    #[error("series produced an invalid volume: {0}")]
    InvalidVolume(String),

    #[error("import progress stream out of order: {0}")]
    ProtocolViolation(&'static str),
}

impl From<DatasetError> for ImportError {
    fn from(err: DatasetError) -> Self {
        ImportError::InvalidVolume(err.to_string())
    }
}
