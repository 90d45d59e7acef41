/// Per-frame render settings and renderer configuration
///
/// `RenderSettings` is owned by the caller and passed into every render
/// call. `RendererConfig` is read once when a renderer is created. Both
/// serialize to JSON so hosts can persist them next to their own state.

use serde::{Deserialize, Serialize};

/// Smallest window width used when normalizing, avoids division by zero
pub const WINDOW_EPSILON: f32 = 1e-5;

/// Hounsfield window mapped onto [0, 1] before the transfer-function lookup
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct HuWindow {
    /// HU value mapped to 0.0
    pub min_hu: f32,
    /// HU value mapped to 1.0
    pub max_hu: f32,
}

impl Default for HuWindow {
    /// Full CT range
    fn default() -> Self {
        Self { min_hu: -1024.0, max_hu: 3071.0 }
    }
}

impl HuWindow {
    pub fn new(min_hu: f32, max_hu: f32) -> Self {
        Self { min_hu, max_hu }
    }

    /// Build from the radiology convention (level = centre, width = span)
    pub fn from_level_width(level: f32, width: f32) -> Self {
        Self {
            min_hu: level - width * 0.5,
            max_hu: level + width * 0.5,
        }
    }

    /// `clamp((hu - min) / (max - min), 0, 1)`.
    /// Matches `normalize_window` in the WGSL ray-march library.
    pub fn normalize(&self, hu: f32) -> f32 {
        let width = (self.max_hu - self.min_hu).max(WINDOW_EPSILON);
        ((hu - self.min_hu) / width).clamp(0.0, 1.0)
    }
}

/// How samples along a ray are combined
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderMethod {
    /// Direct volume rendering with transfer-function compositing
    #[default]
    Dvr,
    /// Maximum intensity projection
    Mip,
    /// Minimum intensity projection
    MinIp,
    /// Average intensity projection
    Aip,
}

impl RenderMethod {
    /// Discriminant passed to the shaders
    pub fn shader_id(&self) -> u32 {
        match self {
            Self::Dvr => 0,
            Self::Mip => 1,
            Self::MinIp => 2,
            Self::Aip => 3,
        }
    }
}

/// Settings consumed by a single render call
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    /// Active HU window
    pub window: HuWindow,

    /// Ray-march step count
    /// - values <= 0 fall back to the output width
    pub quality: i32,

    /// Sample accumulation policy
    pub method: RenderMethod,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            window: HuWindow::default(),
            quality: 256,
            method: RenderMethod::Dvr,
        }
    }
}

impl RenderSettings {
    /// Step count actually marched for an output of `output_width` pixels
    pub fn resolved_steps(&self, output_width: u32) -> u32 {
        if self.quality > 0 {
            self.quality as u32
        } else {
            output_width.max(1)
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Renderer-wide configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    /// SIMD width assumed for dispatch tuning.
    /// wgpu does not report the hardware value, 32 fits most desktop GPUs.
    pub thread_execution_width: u32,

    /// Accumulated opacity at which DVR rays stop marching
    pub early_termination_alpha: f32,

    /// Histogram bin count used when a request asks for zero bins
    pub default_histogram_bins: u32,

    /// Request timestamp queries for kernel timings when the adapter has them
    pub enable_timestamps: bool,

    /// Prefer a discrete GPU when several adapters exist
    pub high_performance: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            thread_execution_width: 32,
            early_termination_alpha: 0.99,
            default_histogram_bins: 512,
            enable_timestamps: true,
            high_performance: true,
        }
    }
}

impl RendererConfig {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
