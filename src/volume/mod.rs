/// CT volume data module
///
/// This module handles:
/// - The immutable host-side dataset (`dataset.rs`)
/// - Procedural volumes for demos and tests (`synthetic.rs`)
/// - The DICOM import boundary and its progress stream (`import.rs`)

pub mod dataset;
pub mod import;
pub mod synthetic;

pub use dataset::{IntensityRange, PixelFormat, Rescale, VolumeDataset};
pub use import::{
    import_series, DicomImportEvent, DicomImportResult, DicomSeriesVolume, ImportOptions,
    ImportSession, SeriesLoader,
};
pub use synthetic::SyntheticVolume;
