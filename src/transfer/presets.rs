/// Built-in transfer functions for CT data
///
/// All presets span the full 12-bit CT domain so they pass validation for
/// any HU window; the window decides which part of the curve is used.

use super::{AlphaPoint, Colour, ColourPoint, TransferFunction, FORMAT_VERSION};

const CT_MIN: f32 = -1024.0;
const CT_MAX: f32 = 3071.0;

fn colour(data_value: f32, r: f32, g: f32, b: f32) -> ColourPoint {
    ColourPoint { data_value, colour_value: Colour::rgb(r, g, b) }
}

fn alpha(data_value: f32, alpha_value: f32) -> AlphaPoint {
    AlphaPoint { data_value, alpha_value }
}

/// Linear grey ramp with opacity rising from zero
pub fn grayscale_ramp() -> TransferFunction {
    TransferFunction {
        version: FORMAT_VERSION,
        name: "grayscale_ramp".to_string(),
        min: CT_MIN,
        max: CT_MAX,
        shift: 0.0,
        colour_points: vec![colour(CT_MIN, 0.0, 0.0, 0.0), colour(CT_MAX, 1.0, 1.0, 1.0)],
        alpha_points: vec![alpha(CT_MIN, 0.0), alpha(CT_MAX, 1.0)],
    }
}

/// Transparent soft tissue, ivory bone
pub fn ct_bone() -> TransferFunction {
    TransferFunction {
        version: FORMAT_VERSION,
        name: "ct_bone".to_string(),
        min: CT_MIN,
        max: CT_MAX,
        shift: 0.0,
        colour_points: vec![
            colour(CT_MIN, 0.0, 0.0, 0.0),
            colour(1200.0, 0.75, 0.55, 0.35),
            colour(2200.0, 0.95, 0.92, 0.85),
            colour(CT_MAX, 1.0, 1.0, 1.0),
        ],
        alpha_points: vec![
            alpha(CT_MIN, 0.0),
            alpha(1000.0, 0.0),
            alpha(1600.0, 0.35),
            alpha(CT_MAX, 0.9),
        ],
    }
}

/// Reddish soft tissue with a faint opacity plateau
pub fn ct_soft_tissue() -> TransferFunction {
    TransferFunction {
        version: FORMAT_VERSION,
        name: "ct_soft_tissue".to_string(),
        min: CT_MIN,
        max: CT_MAX,
        shift: 0.0,
        colour_points: vec![
            colour(CT_MIN, 0.0, 0.0, 0.0),
            colour(0.0, 0.55, 0.25, 0.15),
            colour(1000.0, 0.9, 0.6, 0.45),
            colour(CT_MAX, 1.0, 0.95, 0.9),
        ],
        alpha_points: vec![
            alpha(CT_MIN, 0.0),
            alpha(-200.0, 0.0),
            alpha(400.0, 0.08),
            alpha(1500.0, 0.25),
            alpha(CT_MAX, 0.6),
        ],
    }
}

/// Look up a preset by name
pub fn by_name(name: &str) -> Option<TransferFunction> {
    match name {
        "grayscale_ramp" => Some(grayscale_ramp()),
        "ct_bone" => Some(ct_bone()),
        "ct_soft_tissue" => Some(ct_soft_tissue()),
        _ => None,
    }
}

/// Names accepted by `by_name`
pub const PRESET_NAMES: [&str; 3] = ["grayscale_ramp", "ct_bone", "ct_soft_tissue"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for name in PRESET_NAMES {
            let tf = by_name(name).unwrap();
            tf.validate().unwrap();
            assert_eq!(tf.name, name);
        }
        assert!(by_name("unknown").is_none());
    }

    #[test]
    fn test_presets_are_transparent_at_domain_start() {
        for name in PRESET_NAMES {
            let lookup = by_name(name).unwrap().lookup();
            assert_eq!(lookup.sample(0.0)[3], 0.0, "{name}");
            assert!(lookup.sample(1.0)[3] > 0.0, "{name}");
        }
    }
}
