// ============================================================================
// ADJUSTMENT OPERATIONS: colour temperature on a single layer
// ============================================================================
//
// Only RGB is touched; alpha is carried through unchanged.
// Rows are processed in parallel via rayon.
// ============================================================================

use rayon::prelude::*;

use crate::canvas::Canvas;
use crate::layer::Layer;

/// Range offered by the temperature controls, in Kelvin.
pub const MIN_KELVIN: f32 = 1000.0;
pub const MAX_KELVIN: f32 = 15000.0;
/// Neutral daylight white.
pub const NEUTRAL_KELVIN: f32 = 6500.0;

const SCALE_EPSILON: f32 = 1e-6;

/// Approximate RGB colour of a black body at `kelvin`, each channel in `[0, 255]`.
///
/// Piecewise fit after Tanner Helland, with `T = kelvin / 100`. Input is
/// clamped to `MIN_KELVIN..=MAX_KELVIN`; NaN reads as `NEUTRAL_KELVIN`.
pub fn kelvin_to_rgb(kelvin: f32) -> [f32; 3] {
    let kelvin = if kelvin.is_nan() {
        NEUTRAL_KELVIN
    } else {
        kelvin.clamp(MIN_KELVIN, MAX_KELVIN)
    };
    let t = kelvin / 100.0;

    let red = if t <= 66.0 {
        255.0
    } else {
        (329.698_73 * (t - 60.0).powf(-0.133_204_76)).clamp(0.0, 255.0)
    };

    let green = if t <= 66.0 {
        99.470_8 * t.ln() - 161.119_57
    } else {
        288.122_17 * (t - 60.0).powf(-0.075_514_85)
    };
    let green = green.clamp(0.0, 255.0);

    let blue = if t >= 66.0 {
        255.0
    } else if t <= 19.0 {
        0.0
    } else {
        (138.517_73 * (t - 10.0).ln() - 305.044_8).clamp(0.0, 255.0)
    };

    [red, green, blue]
}

/// Per-channel multipliers that move a pixel lit at `original` toward `target`.
pub fn temperature_scale(original_kelvin: f32, target_kelvin: f32) -> [f32; 3] {
    let from = kelvin_to_rgb(original_kelvin);
    let to = kelvin_to_rgb(target_kelvin);
    [
        (to[0] / 255.0) / (from[0] / 255.0 + SCALE_EPSILON),
        (to[1] / 255.0) / (from[1] / 255.0 + SCALE_EPSILON),
        (to[2] / 255.0) / (from[2] / 255.0 + SCALE_EPSILON),
    ]
}

impl Layer {
    /// Re-light the layer from `original_kelvin` to `target_kelvin`.
    ///
    /// `opacity` (clamped to `[0, 1]`) blends between the untouched RGB (0)
    /// and the fully scaled RGB (1). Equal temperatures or zero opacity leave
    /// the pixels bit-identical.
    pub fn adjust_color_temperature(&mut self, original_kelvin: f32, target_kelvin: f32, opacity: f32) {
        let opacity = opacity.clamp(0.0, 1.0);
        if original_kelvin == target_kelvin || opacity == 0.0 || self.is_empty() {
            return;
        }

        let scale = temperature_scale(original_kelvin, target_kelvin);
        let stride = self.width() as usize * 4;

        self.pixels_mut().par_chunks_mut(stride).for_each(|row| {
            for px in row.chunks_exact_mut(4) {
                for c in 0..3 {
                    let v = px[c] as f32 / 255.0;
                    let adjusted = (v * scale[c]).clamp(0.0, 1.0);
                    let mixed = v * (1.0 - opacity) + adjusted * opacity;
                    // Truncate, matching an 8-bit cast of the float result.
                    px[c] = (mixed * 255.0) as u8;
                }
            }
        });
    }
}

/// Apply a temperature change to one layer of a document.
pub fn adjust_temperature(
    canvas: &mut Canvas,
    layer_idx: usize,
    original_kelvin: f32,
    target_kelvin: f32,
    opacity: f32,
) -> bool {
    let Some(layer) = canvas.layer_mut(layer_idx) else {
        log::debug!("adjust_temperature: no layer at index {layer_idx}");
        return false;
    };
    layer.adjust_color_temperature(original_kelvin, target_kelvin, opacity);
    canvas.mark_dirty(None);
    true
}
