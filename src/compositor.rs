// ============================================================================
// COMPOSITOR: flatten a layer stack into one RGBA image
// ============================================================================
//
// Two interchangeable back-ends:
//
//   1. **NativeCompositor**: walks the clipped overlap with the image
//      crate's pixel API and blends in exact 8-bit integer math.
//
//   2. **FloatCompositor**: the same blend evaluated in normalized f32,
//      rows processed in parallel.
//
// Both start from an opaque black accumulator of the document shape, walk
// the layers bottom-to-top, skip hidden ones, quantize `alpha * opacity` to
// 8 bits and run the layer's blend-mode channel function before blending.
//
// The blend is `out = src * a + dst * (1 - a)` on all four channels, alpha
// included, with `a` the effective source alpha. Integer and float results
// are identical: `(s*a + d*(255-a)) / 255` is never exactly halfway between
// two integers, so rounding cannot split them.
// ============================================================================

use std::borrow::Cow;

use image::{imageops, Pixel, Rgba, RgbaImage};
use rayon::prelude::*;

use crate::layer::{BlendMode, Layer};

/// How a layer whose size or origin differs from the document is mapped onto it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Placement {
    /// Paste at `layer.position`, clipping whatever falls outside.
    #[default]
    Offset,
    /// Ignore `position`; resample (nearest) to the document size.
    Stretch,
}

pub trait Compositor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Flatten `layers` (bottom first) into a `shape = (height, width)` image.
    fn composite(&self, shape: (u32, u32), layers: &[Layer], placement: Placement) -> RgbaImage;
}

/// Fresh accumulator: colour 0, alpha 255.
fn opaque_base(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]))
}

/// A layer's pixels as they should be laid onto the document.
struct Placed<'a> {
    pixels: Cow<'a, [u8]>,
    width: u32,
    height: u32,
    origin: (i32, i32),
}

fn place<'a>(layer: &'a Layer, shape: (u32, u32), placement: Placement) -> Placed<'a> {
    let (doc_h, doc_w) = shape;
    match placement {
        Placement::Offset => Placed {
            pixels: Cow::Borrowed(layer.pixels()),
            width: layer.width(),
            height: layer.height(),
            origin: layer.position,
        },
        Placement::Stretch if layer.width() == doc_w && layer.height() == doc_h => Placed {
            pixels: Cow::Borrowed(layer.pixels()),
            width: doc_w,
            height: doc_h,
            origin: (0, 0),
        },
        Placement::Stretch => {
            let resized = imageops::resize(
                &layer.to_rgba_image(),
                doc_w,
                doc_h,
                imageops::FilterType::Nearest,
            );
            Placed {
                pixels: Cow::Owned(resized.into_raw()),
                width: doc_w,
                height: doc_h,
                origin: (0, 0),
            }
        }
    }
}

/// Source alpha scaled by layer opacity, rounded to 8 bits.
#[inline]
fn effective_alpha(alpha: u8, opacity: f32) -> u8 {
    if opacity >= 1.0 {
        alpha
    } else {
        (alpha as f32 * opacity.max(0.0)).round() as u8
    }
}

/// Run the blend-mode channel function against the destination pixel and
/// apply layer opacity, giving the pixel that source-over lays down.
#[inline]
fn premix(src: [u8; 4], dst: [u8; 4], mode: BlendMode, opacity: f32) -> [u8; 4] {
    let a = effective_alpha(src[3], opacity);
    if mode == BlendMode::Normal {
        return [src[0], src[1], src[2], a];
    }
    let mut out = [0, 0, 0, a];
    for c in 0..3 {
        let mixed = mode.apply(src[c] as f32 / 255.0, dst[c] as f32 / 255.0);
        out[c] = (mixed.clamp(0.0, 1.0) * 255.0).round() as u8;
    }
    out
}

/// Integer source-over of one channel: `round((s*a + d*(255-a)) / 255)`.
#[inline]
fn lerp_u8(src: u8, dst: u8, a: u8) -> u8 {
    let a = a as u32;
    ((src as u32 * a + dst as u32 * (255 - a) + 127) / 255) as u8
}

/// Float source-over of one channel in normalized [0, 1].
#[inline]
fn lerp_f32(src: u8, dst: u8, a: f32) -> u8 {
    let s = src as f32 / 255.0;
    let d = dst as f32 / 255.0;
    ((s * a + d * (1.0 - a)) * 255.0).round() as u8
}

/// Document-space rectangle `(x0, y0, x1, y1)` covered by a placed layer.
fn overlap(placed: &Placed<'_>, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let (ox, oy) = (placed.origin.0 as i64, placed.origin.1 as i64);
    let x0 = ox.max(0);
    let y0 = oy.max(0);
    let x1 = (ox + placed.width as i64).min(width as i64);
    let y1 = (oy + placed.height as i64).min(height as i64);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
}

// ============================================================================
// NATIVE: image crate pixel API, integer blend
// ============================================================================

#[derive(Clone, Copy, Debug, Default)]
pub struct NativeCompositor;

impl Compositor for NativeCompositor {
    fn name(&self) -> &'static str {
        "native"
    }

    fn composite(&self, shape: (u32, u32), layers: &[Layer], placement: Placement) -> RgbaImage {
        let (height, width) = shape;
        let mut acc = opaque_base(width, height);

        for layer in layers.iter().filter(|l| l.visible) {
            let placed = place(layer, shape, placement);
            let origin = placed.origin;
            let Some((x0, y0, x1, y1)) = overlap(&placed, width, height) else {
                continue;
            };
            let Some(top) = RgbaImage::from_raw(placed.width, placed.height, placed.pixels.into_owned())
            else {
                log::warn!("compositor: layer '{}' has inconsistent storage, skipped", layer.name);
                continue;
            };

            for y in y0..y1 {
                for x in x0..x1 {
                    let lx = (x as i64 - origin.0 as i64) as u32;
                    let ly = (y as i64 - origin.1 as i64) as u32;
                    let dst = acc.get_pixel_mut(x, y);
                    let fg = Rgba(premix(top.get_pixel(lx, ly).0, dst.0, layer.blend_mode, layer.opacity));
                    let a = fg[3];
                    *dst = dst.map2(&fg, |d, s| lerp_u8(s, d, a));
                }
            }
        }
        acc
    }
}

// ============================================================================
// FLOAT: manual per-pixel source-over, parallel rows
// ============================================================================

#[derive(Clone, Copy, Debug, Default)]
pub struct FloatCompositor;

impl Compositor for FloatCompositor {
    fn name(&self) -> &'static str {
        "float"
    }

    fn composite(&self, shape: (u32, u32), layers: &[Layer], placement: Placement) -> RgbaImage {
        let (height, width) = shape;
        let mut acc = opaque_base(width, height);
        if width == 0 || height == 0 {
            return acc;
        }
        let row_bytes = width as usize * 4;

        for layer in layers.iter().filter(|l| l.visible) {
            let placed = place(layer, shape, placement);
            let (ox, oy) = placed.origin;
            let src_stride = placed.width as usize * 4;
            let src = &placed.pixels[..];
            if src.len() != src_stride * placed.height as usize {
                log::warn!("compositor: layer '{}' has inconsistent storage, skipped", layer.name);
                continue;
            }
            let mode = layer.blend_mode;
            let opacity = layer.opacity;

            acc.par_chunks_mut(row_bytes).enumerate().for_each(|(y, row)| {
                let ly = y as i64 - oy as i64;
                if ly < 0 || ly >= placed.height as i64 {
                    return;
                }
                let src_row = &src[ly as usize * src_stride..(ly as usize + 1) * src_stride];
                for x in 0..width as usize {
                    let lx = x as i64 - ox as i64;
                    if lx < 0 || lx >= placed.width as i64 {
                        continue;
                    }
                    let s = lx as usize * 4;
                    let fg = [src_row[s], src_row[s + 1], src_row[s + 2], src_row[s + 3]];
                    let d = x * 4;
                    let bg = &mut row[d..d + 4];
                    let fg = premix(fg, [bg[0], bg[1], bg[2], bg[3]], mode, opacity);
                    let a = fg[3] as f32 / 255.0;
                    for c in 0..4 {
                        bg[c] = lerp_f32(fg[c], bg[c], a);
                    }
                }
            });
        }
        acc
    }
}
