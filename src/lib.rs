/// GPU ray casting for CT volumes
///
/// - `volume` - host-side datasets, synthetic volumes, DICOM import boundary
/// - `transfer` - transfer functions, their JSON format and lookup images
/// - `state` - HU window, render settings, camera, MPR slices
/// - `raymarch` - CPU ray marcher mirroring the WGSL kernels
/// - `gpu` - wgpu context, compute renderer, dispatch tuning, histograms
/// - `diagnostics` - image comparison, frame stats, PNG output

pub mod diagnostics;
pub mod error;
pub mod gpu;
pub mod raymarch;
pub mod state;
pub mod transfer;
pub mod volume;

pub use error::{DatasetError, ImportError, RenderError, TransferFunctionError};
pub use gpu::{FragmentReferenceRenderer, FrameHistogram, GpuContext, VolumeComputeRenderer, VolumeTexture};
pub use raymarch::CpuReferenceRenderer;
pub use state::{CameraParameters, HuWindow, RenderMethod, RenderSettings, RendererConfig};
pub use transfer::{TransferFunction, TransferLookup};
pub use volume::{SyntheticVolume, VolumeDataset};
