/// Render state owned by the caller
///
/// This module handles:
/// - HU window, render method and renderer configuration (settings.rs)
/// - Camera matrices for the ray-march shaders (camera.rs)
/// - The dirty-flag gated MPR slice path (slice.rs)

pub mod camera;
pub mod settings;
pub mod slice;

pub use camera::CameraParameters;
pub use settings::{HuWindow, RenderMethod, RenderSettings, RendererConfig};
pub use slice::{SliceAxis, SliceImage, SliceRenderer};
