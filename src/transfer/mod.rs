/// Transfer functions: data value → colour and opacity
///
/// A transfer function is stored as one JSON document per curve:
///
/// ```json
/// { "version": 1, "name": "ct_bone", "min": -1024, "max": 3071, "shift": 0,
///   "colourPoints": [ { "dataValue": -1024, "colourValue": { "r": 0, "g": 0, "b": 0, "a": 1 } } ],
///   "alphaPoints":  [ { "dataValue": -1024, "alphaValue": 0 } ] }
/// ```
///
/// For rendering, both point lists are resampled into a fixed 512×2 RGBA32F
/// lookup image. The shaders index that image with the HU-window-normalized
/// sample value and interpolate linearly between texels.

pub mod presets;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TransferFunctionError;

/// Width of the lookup image in texels
pub const LOOKUP_WIDTH: usize = 512;

/// Height of the lookup image; both rows hold the same curve
pub const LOOKUP_HEIGHT: usize = 2;

/// Current file format version written by `to_json`
pub const FORMAT_VERSION: i32 = 1;

/// RGBA colour with components in 0..1
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Colour {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Colour {
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColourPoint {
    pub data_value: f32,
    pub colour_value: Colour,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlphaPoint {
    pub data_value: f32,
    pub alpha_value: f32,
}

/// One transfer-function curve, as stored on disk
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferFunction {
    pub version: i32,
    pub name: String,
    pub min: f32,
    pub max: f32,
    /// Offset added to every control point before evaluation
    #[serde(default)]
    pub shift: f32,
    pub colour_points: Vec<ColourPoint>,
    pub alpha_points: Vec<AlphaPoint>,
}

impl TransferFunction {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, TransferFunctionError> {
        let tf: Self = serde_json::from_str(json)?;
        tf.validate()?;
        Ok(tf)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Read and validate a transfer-function file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TransferFunctionError> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        let tf = Self::from_json(&json)?;
        log::info!(
            "🎨 Loaded transfer function \"{}\" ({} colour, {} alpha points)",
            tf.name,
            tf.colour_points.len(),
            tf.alpha_points.len()
        );
        Ok(tf)
    }

    /// Write the curve to disk as JSON
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), TransferFunctionError> {
        let json = self.to_json()?;
        tokio::fs::write(path.as_ref(), json).await?;
        Ok(())
    }

    /// Check the document invariants: non-empty domain, ordered points that
    /// cover `[min, max]`
    pub fn validate(&self) -> Result<(), TransferFunctionError> {
        if !(self.min < self.max) {
            return Err(TransferFunctionError::EmptyDomain { min: self.min, max: self.max });
        }

        let colour: Vec<f32> = self.colour_points.iter().map(|p| p.data_value).collect();
        let alpha: Vec<f32> = self.alpha_points.iter().map(|p| p.data_value).collect();
        self.validate_points("colour", &colour)?;
        self.validate_points("alpha", &alpha)?;
        Ok(())
    }

    fn validate_points(&self, kind: &'static str, values: &[f32]) -> Result<(), TransferFunctionError> {
        let (first, last) = match (values.first(), values.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return Err(TransferFunctionError::NoPoints(kind)),
        };
        if values.windows(2).any(|w| w[0] > w[1]) {
            return Err(TransferFunctionError::Unordered(kind));
        }
        if first > self.min || last < self.max {
            return Err(TransferFunctionError::DomainNotCovered {
                kind,
                first,
                last,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Colour (rgb) and opacity at a data value; outside the points it clamps
    pub fn evaluate(&self, data_value: f32) -> [f32; 4] {
        let value = data_value - self.shift;

        let colour = interpolate(&self.colour_points, value, |p| p.data_value, |a, b, t| {
            Colour {
                r: lerp(a.colour_value.r, b.colour_value.r, t),
                g: lerp(a.colour_value.g, b.colour_value.g, t),
                b: lerp(a.colour_value.b, b.colour_value.b, t),
                a: lerp(a.colour_value.a, b.colour_value.a, t),
            }
        }, |p| p.colour_value)
        .unwrap_or(Colour { r: 0.0, g: 0.0, b: 0.0, a: 0.0 });

        let alpha = interpolate(
            &self.alpha_points,
            value,
            |p| p.data_value,
            |a, b, t| lerp(a.alpha_value, b.alpha_value, t),
            |p| p.alpha_value,
        )
        .unwrap_or(0.0);

        [colour.r, colour.g, colour.b, alpha.clamp(0.0, 1.0)]
    }

    /// Resample the curve into the 512×2 lookup image
    pub fn lookup(&self) -> TransferLookup {
        let mut row = Vec::with_capacity(LOOKUP_WIDTH);
        for i in 0..LOOKUP_WIDTH {
            let t = i as f32 / (LOOKUP_WIDTH - 1) as f32;
            row.push(self.evaluate(self.min + t * (self.max - self.min)));
        }

        let mut texels = Vec::with_capacity(LOOKUP_WIDTH * LOOKUP_HEIGHT);
        for _ in 0..LOOKUP_HEIGHT {
            texels.extend_from_slice(&row);
        }
        TransferLookup { texels }
    }
}

/// Resampled 512×2 lookup image, row-major RGBA32F
#[derive(Debug, Clone, PartialEq)]
pub struct TransferLookup {
    texels: Vec<[f32; 4]>,
}

impl TransferLookup {
    /// A lookup that maps everything to transparent black
    pub fn transparent() -> Self {
        Self {
            texels: vec![[0.0; 4]; LOOKUP_WIDTH * LOOKUP_HEIGHT],
        }
    }

    pub fn texels(&self) -> &[[f32; 4]] {
        &self.texels
    }

    /// Texel data as bytes for a texture upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }

    /// Linearly interpolated lookup at a normalized coordinate in [0, 1].
    /// Matches `transfer_lookup` in the WGSL ray-march library.
    pub fn sample(&self, normalized: f32) -> [f32; 4] {
        let position = normalized.clamp(0.0, 1.0) * (LOOKUP_WIDTH - 1) as f32;
        let lower = (position.floor() as usize).min(LOOKUP_WIDTH - 1);
        let upper = (lower + 1).min(LOOKUP_WIDTH - 1);
        let fraction = position - lower as f32;

        let a = self.texels[lower];
        let b = self.texels[upper];
        [
            mix(a[0], b[0], fraction),
            mix(a[1], b[1], fraction),
            mix(a[2], b[2], fraction),
            mix(a[3], b[3], fraction),
        ]
    }
}

/// WGSL-style `mix`: `a * (1 - t) + b * t`
pub(crate) fn mix(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Piecewise-linear interpolation over ordered points, clamped at both ends
fn interpolate<P, V>(
    points: &[P],
    value: f32,
    key: impl Fn(&P) -> f32,
    blend: impl Fn(&P, &P, f32) -> V,
    exact: impl Fn(&P) -> V,
) -> Option<V> {
    let first = points.first()?;
    let last = points.last()?;
    if value <= key(first) {
        return Some(exact(first));
    }
    if value >= key(last) {
        return Some(exact(last));
    }

    let upper = points.iter().position(|p| key(p) >= value)?;
    let a = &points[upper - 1];
    let b = &points[upper];
    let span = key(b) - key(a);
    if span <= 0.0 {
        return Some(exact(b));
    }
    Some(blend(a, b, (value - key(a)) / span))
}
