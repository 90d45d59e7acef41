/// DICOM import boundary
///
/// The native series loader (GDCM behind a bridge) is an external
/// collaborator. This module describes what it hands us, converts its output
/// into a `VolumeDataset`, and drives/validates the progress stream the UI
/// consumes:
///
/// `Started` once, then any mix of `Reading` and `PartialPreview`, then
/// exactly one `Success` or `Failure`.

use std::path::Path;

use super::dataset::{Rescale, VolumeDataset};
use crate::error::ImportError;

/// Error domain string used by the native bridge
pub const NATIVE_ERROR_DOMAIN: &str = "DICOMSeriesLoaderErrorDomain";

/// Native error codes, in the bridge's declaration order
pub const NATIVE_ERROR_NO_FILES: i64 = 1;
pub const NATIVE_ERROR_UNSUPPORTED_FORMAT: i64 = 2;
pub const NATIVE_ERROR_NATIVE: i64 = 3;
pub const NATIVE_ERROR_UNAVAILABLE: i64 = 4;

/// Volume exactly as the native loader produces it
#[derive(Debug, Clone, PartialEq)]
pub struct DicomSeriesVolume {
    /// Little-endian samples, `width*height*depth*bits_allocated/8` bytes
    pub voxels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub spacing: [f64; 3],
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    pub signed_pixel: bool,
    pub bits_allocated: u32,
    pub series_description: String,
    pub orientation: [[f32; 3]; 3],
    pub origin: [f32; 3],
}

impl ImportError {
    /// Map a native (domain, code) pair onto the typed taxonomy
    pub fn from_native(domain: &str, code: i64) -> Self {
        if domain != NATIVE_ERROR_DOMAIN {
            return ImportError::Bridge { domain: domain.to_string(), code };
        }
        match code {
            NATIVE_ERROR_NO_FILES => ImportError::NoFiles,
            NATIVE_ERROR_UNAVAILABLE => ImportError::Unavailable,
            NATIVE_ERROR_UNSUPPORTED_FORMAT => ImportError::InvalidVolume("unsupported format".into()),
            _ => ImportError::Bridge { domain: domain.to_string(), code },
        }
    }
}

impl VolumeDataset {
    /// Convert a complete native volume
    pub fn from_series(volume: &DicomSeriesVolume) -> Result<Self, ImportError> {
        Self::from_series_slices(volume, volume.depth)
    }

    /// Convert the first `slices` slices of a native volume (partial previews)
    ///
    /// Signed 16-bit samples are kept and the rescale stored alongside.
    /// Unsigned samples are rescaled to HU up front and clamped into `i16`.
    pub fn from_series_slices(volume: &DicomSeriesVolume, slices: u32) -> Result<Self, ImportError> {
        if volume.bits_allocated != 16 {
            return Err(ImportError::UnsupportedBitDepth(volume.bits_allocated));
        }

        let slices = slices.min(volume.depth);
        let slice_bytes = volume.width as usize * volume.height as usize * 2;
        let needed = slice_bytes * slices as usize;
        if volume.voxels.len() < needed {
            return Err(ImportError::InvalidVolume(format!(
                "{} slices need {} bytes, loader delivered {}",
                slices,
                needed,
                volume.voxels.len()
            )));
        }
        let bytes = &volume.voxels[..needed];

        let dimensions = [volume.width, volume.height, slices];
        let spacing = [
            volume.spacing[0] as f32,
            volume.spacing[1] as f32,
            volume.spacing[2] as f32,
        ];

        let dataset = if volume.signed_pixel {
            let rescale = Rescale {
                slope: volume.rescale_slope as f32,
                intercept: volume.rescale_intercept as f32,
            };
            VolumeDataset::from_le_bytes(dimensions, spacing, bytes, rescale)?
        } else {
            let voxels = bytes
                .chunks_exact(2)
                .map(|pair| {
                    let raw = u16::from_le_bytes([pair[0], pair[1]]) as f64;
                    let hu = raw * volume.rescale_slope + volume.rescale_intercept;
                    hu.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
                })
                .collect();
            VolumeDataset::new(dimensions, spacing, voxels, Rescale::default())?
        };

        Ok(dataset
            .with_placement(volume.orientation, volume.origin)
            .with_description(volume.series_description.clone()))
    }
}

/// Final product of a successful import
#[derive(Debug, Clone)]
pub struct DicomImportResult {
    pub dataset: VolumeDataset,
    pub series_description: String,
}

/// One element of the import progress stream
#[derive(Debug, Clone)]
pub enum DicomImportEvent {
    Started {
        total_slice_count: usize,
        preview_slice_count: usize,
    },
    Reading,
    PartialPreview {
        dataset: VolumeDataset,
        fraction_complete: f64,
    },
    Success(DicomImportResult),
    Failure(ImportError),
}

/// Progress report from the native loader while it reads slices
pub struct SeriesProgress<'a> {
    pub fraction: f64,
    pub slices_loaded: usize,
    pub volume: &'a DicomSeriesVolume,
}

/// The native series loader, seen from this side of the bridge
pub trait SeriesLoader {
    fn load_series(
        &self,
        path: &Path,
        progress: &mut dyn FnMut(SeriesProgress<'_>),
    ) -> Result<DicomSeriesVolume, ImportError>;
}

/// How often partial previews are emitted
#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    /// Emit a preview every this many loaded slices
    pub preview_every: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self { preview_every: 16 }
    }
}

/// Where an import stream currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    Idle,
    Loading,
    Finished,
}

/// Checks that a stream of events follows the import protocol
#[derive(Debug, Clone)]
pub struct ImportSession {
    phase: ImportPhase,
    total_slice_count: usize,
    previews: usize,
}

impl Default for ImportSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportSession {
    pub fn new() -> Self {
        Self {
            phase: ImportPhase::Idle,
            total_slice_count: 0,
            previews: 0,
        }
    }

    pub fn phase(&self) -> ImportPhase {
        self.phase
    }

    pub fn total_slice_count(&self) -> usize {
        self.total_slice_count
    }

    pub fn preview_count(&self) -> usize {
        self.previews
    }

    /// Feed the next event; errors describe the first protocol violation
    pub fn observe(&mut self, event: &DicomImportEvent) -> Result<ImportPhase, ImportError> {
        match (self.phase, event) {
            (ImportPhase::Idle, DicomImportEvent::Started { total_slice_count, .. }) => {
                self.total_slice_count = *total_slice_count;
                self.phase = ImportPhase::Loading;
            }
            (ImportPhase::Idle, _) => {
                return Err(ImportError::ProtocolViolation("event before started"));
            }
            (ImportPhase::Loading, DicomImportEvent::Started { .. }) => {
                return Err(ImportError::ProtocolViolation("started emitted twice"));
            }
            (ImportPhase::Loading, DicomImportEvent::Reading) => {}
            (ImportPhase::Loading, DicomImportEvent::PartialPreview { fraction_complete, .. }) => {
                if !(*fraction_complete > 0.0 && *fraction_complete < 1.0) {
                    return Err(ImportError::ProtocolViolation("preview fraction outside (0, 1)"));
                }
                self.previews += 1;
            }
            (ImportPhase::Loading, DicomImportEvent::Success(_))
            | (ImportPhase::Loading, DicomImportEvent::Failure(_)) => {
                self.phase = ImportPhase::Finished;
            }
            (ImportPhase::Finished, _) => {
                return Err(ImportError::ProtocolViolation("event after terminal result"));
            }
        }
        Ok(self.phase)
    }
}

/// Run a loader and translate its callbacks into the import event stream
///
/// Returns the terminal result as well, so callers that only care about the
/// dataset can ignore the events.
pub fn import_series(
    loader: &dyn SeriesLoader,
    path: &Path,
    options: ImportOptions,
    mut emit: impl FnMut(DicomImportEvent),
) -> Result<DicomImportResult, ImportError> {
    let preview_every = options.preview_every.max(1);
    let mut started = false;
    let mut last_preview_slices = 0usize;

    let loaded = {
        let mut on_progress = |progress: SeriesProgress<'_>| {
            if !started {
                let total = progress.volume.depth as usize;
                emit(DicomImportEvent::Started {
                    total_slice_count: total,
                    preview_slice_count: preview_every.min(total),
                });
                started = true;
            }
            emit(DicomImportEvent::Reading);

            let due = progress.slices_loaded >= last_preview_slices + preview_every;
            let fraction = progress.fraction;
            if due && fraction > 0.0 && fraction < 1.0 {
                match VolumeDataset::from_series_slices(progress.volume, progress.slices_loaded as u32) {
                    Ok(dataset) => {
                        last_preview_slices = progress.slices_loaded;
                        emit(DicomImportEvent::PartialPreview {
                            dataset,
                            fraction_complete: fraction,
                        });
                    }
                    Err(e) => log::debug!("Skipping partial preview: {}", e),
                }
            }
        };
        loader.load_series(path, &mut on_progress)
    };

    if let Ok(volume) = &loaded {
        if !started {
            emit(DicomImportEvent::Started {
                total_slice_count: volume.depth as usize,
                preview_slice_count: preview_every.min(volume.depth as usize),
            });
            started = true;
        }
    }

    let result = loaded.and_then(|volume| {
        let dataset = VolumeDataset::from_series(&volume)?;
        Ok(DicomImportResult {
            series_description: volume.series_description.clone(),
            dataset,
        })
    });

    match &result {
        Ok(imported) => {
            log::info!(
                "✅ Imported {:?} \"{}\"",
                imported.dataset.dimensions(),
                imported.series_description
            );
            emit(DicomImportEvent::Success(imported.clone()));
        }
        Err(e) => {
            log::warn!("⚠️  Import failed: {}", e);
            if !started {
                // Loader refused before reporting any slices
                emit(DicomImportEvent::Started {
                    total_slice_count: 0,
                    preview_slice_count: 0,
                });
            }
            emit(DicomImportEvent::Failure(e.clone()));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(width: u32, height: u32, depth: u32, signed: bool, bits: u32) -> DicomSeriesVolume {
        let count = (width * height * depth) as usize;
        let voxels = (0..count)
            .flat_map(|i| ((i % 100) as u16 * 10).to_le_bytes())
            .collect();
        DicomSeriesVolume {
            voxels,
            width,
            height,
            depth,
            spacing: [0.5, 0.5, 1.25],
            rescale_slope: 1.0,
            rescale_intercept: -1024.0,
            signed_pixel: signed,
            bits_allocated: bits,
            series_description: "CHEST 1.25mm".to_string(),
            orientation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            origin: [0.0; 3],
        }
    }

    struct FakeLoader {
        volume: Result<DicomSeriesVolume, ImportError>,
    }

    impl SeriesLoader for FakeLoader {
        fn load_series(
            &self,
            _path: &Path,
            progress: &mut dyn FnMut(SeriesProgress<'_>),
        ) -> Result<DicomSeriesVolume, ImportError> {
            let volume = self.volume.clone()?;
            for slice in 1..=volume.depth as usize {
                progress(SeriesProgress {
                    fraction: slice as f64 / volume.depth as f64,
                    slices_loaded: slice,
                    volume: &volume,
                });
            }
            Ok(volume)
        }
    }

    #[test]
    fn test_signed_series_keeps_rescale() {
        let dataset = VolumeDataset::from_series(&series(4, 4, 2, true, 16)).unwrap();
        assert_eq!(dataset.rescale().intercept, -1024.0);
        assert_eq!(dataset.hounsfield(1, 0, 0), 10.0 - 1024.0);
        assert_eq!(dataset.spacing(), [0.5, 0.5, 1.25]);
        assert_eq!(dataset.description(), "CHEST 1.25mm");
    }

    #[test]
    fn test_unsigned_series_is_converted_to_hu() {
        let dataset = VolumeDataset::from_series(&series(4, 4, 2, false, 16)).unwrap();
        assert_eq!(dataset.rescale(), Rescale::default());
        assert_eq!(dataset.sample(1, 0, 0), 10 - 1024);
    }

    #[test]
    fn test_unsupported_bit_depth() {
        let err = VolumeDataset::from_series(&series(4, 4, 2, true, 8)).unwrap_err();
        assert_eq!(err, ImportError::UnsupportedBitDepth(8));
    }

    #[test]
    fn test_native_error_mapping() {
        assert_eq!(
            ImportError::from_native(NATIVE_ERROR_DOMAIN, NATIVE_ERROR_UNAVAILABLE),
            ImportError::Unavailable
        );
        assert_eq!(
            ImportError::from_native(NATIVE_ERROR_DOMAIN, NATIVE_ERROR_NATIVE),
            ImportError::Bridge { domain: NATIVE_ERROR_DOMAIN.to_string(), code: 3 }
        );
        assert!(matches!(
            ImportError::from_native("NSCocoaErrorDomain", 260),
            ImportError::Bridge { code: 260, .. }
        ));
    }

    #[test]
    fn test_import_stream_is_well_formed() {
        let loader = FakeLoader { volume: Ok(series(4, 4, 8, true, 16)) };
        let mut events = Vec::new();
        let result = import_series(
            &loader,
            Path::new("/series"),
            ImportOptions { preview_every: 3 },
            |event| events.push(event),
        )
        .unwrap();
        assert_eq!(result.dataset.dimensions(), [4, 4, 8]);

        let mut session = ImportSession::new();
        for event in &events {
            session.observe(event).unwrap();
        }
        assert_eq!(session.phase(), ImportPhase::Finished);
        assert_eq!(session.total_slice_count(), 8);
        // Previews at 3 and 6 slices; slice 8 is the final result
        assert_eq!(session.preview_count(), 2);
        assert!(matches!(events.first(), Some(DicomImportEvent::Started { .. })));
        assert!(matches!(events.last(), Some(DicomImportEvent::Success(_))));

        let preview_depths: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                DicomImportEvent::PartialPreview { dataset, .. } => Some(dataset.dimensions()[2]),
                _ => None,
            })
            .collect();
        assert_eq!(preview_depths, vec![3, 6]);
    }

    #[test]
    fn test_import_failure_terminates_stream() {
        let loader = FakeLoader { volume: Err(ImportError::Unavailable) };
        let mut events = Vec::new();
        let err = import_series(&loader, Path::new("/series"), ImportOptions::default(), |e| {
            events.push(e)
        })
        .unwrap_err();
        assert_eq!(err, ImportError::Unavailable);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DicomImportEvent::Started { total_slice_count: 0, .. }));
        assert!(matches!(events[1], DicomImportEvent::Failure(ImportError::Unavailable)));

        let mut session = ImportSession::new();
        for event in &events {
            session.observe(event).unwrap();
        }
        assert_eq!(session.phase(), ImportPhase::Finished);
    }

    #[test]
    fn test_session_rejects_out_of_order_events() {
        let mut session = ImportSession::new();
        assert!(session.observe(&DicomImportEvent::Reading).is_err());

        let started = DicomImportEvent::Started { total_slice_count: 4, preview_slice_count: 2 };
        session.observe(&started).unwrap();
        assert!(session.observe(&started).is_err());

        let dataset = VolumeDataset::from_series(&series(2, 2, 1, true, 16)).unwrap();
        let bad_preview = DicomImportEvent::PartialPreview { dataset, fraction_complete: 1.0 };
        assert!(session.observe(&bad_preview).is_err());
    }
}
