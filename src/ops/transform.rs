// ============================================================================
// TRANSFORM OPERATIONS: flip, rotate, affine for layers and the whole canvas
// ============================================================================
//
// Every transform here builds a fresh pixel allocation and swaps it in via
// `Layer::replace_storage`, so callers holding a view over the old buffer
// must rebuild it. The canvas-level wrappers send that notification.

use rayon::prelude::*;

use crate::canvas::Canvas;
use crate::layer::Layer;

/// 2×3 affine matrix `[[a, b, tx], [c, d, ty]]` mapping source → destination.
pub type Affine = [[f32; 3]; 2];

pub const IDENTITY: Affine = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

// ---------------------------------------------------------------------------
//  Layer-level transforms
// ---------------------------------------------------------------------------

impl Layer {
    /// Mirror left↔right.
    pub fn flip_horizontal(&mut self) {
        let (w, h) = (self.width(), self.height());
        self.remap(w, h, |x, y| (w - 1 - x, y));
    }

    /// Mirror top↔bottom.
    pub fn flip_vertical(&mut self) {
        let (w, h) = (self.width(), self.height());
        self.remap(w, h, |x, y| (x, h - 1 - y));
    }

    /// Rotate 90° clockwise. Width and height swap.
    pub fn rotate_90_clockwise(&mut self) {
        let (w, h) = (self.width(), self.height());
        // dst is h wide, w tall
        self.remap(h, w, |x, y| (y, h - 1 - x));
    }

    /// Rotate 90° counter-clockwise. Width and height swap.
    pub fn rotate_90_counterclockwise(&mut self) {
        let (w, h) = (self.width(), self.height());
        self.remap(h, w, |x, y| (w - 1 - y, x));
    }

    pub fn rotate_180(&mut self) {
        let (w, h) = (self.width(), self.height());
        self.remap(w, h, |x, y| (w - 1 - x, h - 1 - y));
    }

    /// Apply a forward affine transform, keeping the layer size.
    ///
    /// Each destination pixel is bilinearly sampled from the inverse-mapped
    /// source point; samples falling outside the source read as transparent
    /// black. A singular matrix leaves the layer untouched and returns `false`.
    pub fn warp_affine(&mut self, matrix: Affine) -> bool {
        let Some(inv) = invert_affine(matrix) else {
            return false;
        };
        let (w, h) = (self.width(), self.height());
        if w == 0 || h == 0 {
            return true;
        }

        let src = self.pixels();
        let src_w = w as i32;
        let src_h = h as i32;
        let stride = w as usize * 4;
        let mut dst = vec![0u8; src.len()];

        dst.par_chunks_mut(stride).enumerate().for_each(|(dy, row)| {
            let v = dy as f32;
            for dx in 0..w as usize {
                let u = dx as f32;
                let sx = inv[0][0] * u + inv[0][1] * v + inv[0][2];
                let sy = inv[1][0] * u + inv[1][1] * v + inv[1][2];

                let x0 = sx.floor() as i32;
                let y0 = sy.floor() as i32;
                if x0 < -1 || y0 < -1 || x0 >= src_w || y0 >= src_h {
                    continue;
                }
                let fx = sx - x0 as f32;
                let fy = sy - y0 as f32;

                let sample = |px: i32, py: i32| -> [f32; 4] {
                    if px < 0 || py < 0 || px >= src_w || py >= src_h {
                        [0.0; 4]
                    } else {
                        let i = py as usize * stride + px as usize * 4;
                        [src[i] as f32, src[i + 1] as f32, src[i + 2] as f32, src[i + 3] as f32]
                    }
                };

                let tl = sample(x0, y0);
                let tr = sample(x0 + 1, y0);
                let bl = sample(x0, y0 + 1);
                let br = sample(x0 + 1, y0 + 1);

                let px = dx * 4;
                for c in 0..4 {
                    let top = tl[c] + (tr[c] - tl[c]) * fx;
                    let bot = bl[c] + (br[c] - bl[c]) * fx;
                    row[px + c] = (top + (bot - top) * fy).round().clamp(0.0, 255.0) as u8;
                }
            }
        });

        self.replace_storage(w, h, dst);
        true
    }

    /// Build a `dst_w × dst_h` buffer where each destination pixel `(x, y)`
    /// reads the source pixel at `source_of(x, y)`.
    fn remap<F>(&mut self, dst_w: u32, dst_h: u32, source_of: F)
    where
        F: Fn(u32, u32) -> (u32, u32) + Sync,
    {
        let src_stride = self.width() as usize * 4;
        let src = self.pixels();
        let mut dst = vec![0u8; src.len()];
        if dst_w > 0 {
            dst.par_chunks_mut(dst_w as usize * 4)
                .enumerate()
                .for_each(|(y, row)| {
                    for x in 0..dst_w {
                        let (sx, sy) = source_of(x, y as u32);
                        let s = sy as usize * src_stride + sx as usize * 4;
                        let d = x as usize * 4;
                        row[d..d + 4].copy_from_slice(&src[s..s + 4]);
                    }
                });
        }
        self.replace_storage(dst_w, dst_h, dst);
    }
}

/// Invert a 2×3 affine. `None` when the linear part is singular.
pub fn invert_affine(m: Affine) -> Option<Affine> {
    let [[a, b, tx], [c, d, ty]] = m;
    let det = a * d - b * c;
    if !det.is_finite() || det.abs() < 1e-12 {
        return None;
    }
    let inv = 1.0 / det;
    let ia = d * inv;
    let ib = -b * inv;
    let ic = -c * inv;
    let id = a * inv;
    Some([
        [ia, ib, -(ia * tx + ib * ty)],
        [ic, id, -(ic * tx + id * ty)],
    ])
}

/// Affine that rotates by `degrees` (clockwise on screen) about `(cx, cy)`.
pub fn rotation_about(degrees: f32, cx: f32, cy: f32) -> Affine {
    let (s, c) = degrees.to_radians().sin_cos();
    [
        [c, -s, cx - c * cx + s * cy],
        [s, c, cy - s * cx - c * cy],
    ]
}

// ---------------------------------------------------------------------------
//  Single-layer transforms on a canvas
// ---------------------------------------------------------------------------

fn with_layer(canvas: &mut Canvas, layer_idx: usize, op: impl FnOnce(&mut Layer)) -> bool {
    let Some(layer) = canvas.layer_mut(layer_idx) else {
        log::debug!("transform: no layer at index {layer_idx}");
        return false;
    };
    op(layer);
    canvas.mark_layer_reallocated(layer_idx);
    true
}

pub fn flip_layer_horizontal(canvas: &mut Canvas, layer_idx: usize) -> bool {
    with_layer(canvas, layer_idx, Layer::flip_horizontal)
}

pub fn flip_layer_vertical(canvas: &mut Canvas, layer_idx: usize) -> bool {
    with_layer(canvas, layer_idx, Layer::flip_vertical)
}

pub fn rotate_layer_90cw(canvas: &mut Canvas, layer_idx: usize) -> bool {
    with_layer(canvas, layer_idx, Layer::rotate_90_clockwise)
}

pub fn rotate_layer_90ccw(canvas: &mut Canvas, layer_idx: usize) -> bool {
    with_layer(canvas, layer_idx, Layer::rotate_90_counterclockwise)
}

pub fn rotate_layer_180(canvas: &mut Canvas, layer_idx: usize) -> bool {
    with_layer(canvas, layer_idx, Layer::rotate_180)
}

/// Warp one layer. Returns `false` for a bad index or a singular matrix.
pub fn warp_layer(canvas: &mut Canvas, layer_idx: usize, matrix: Affine) -> bool {
    let Some(layer) = canvas.layer_mut(layer_idx) else {
        return false;
    };
    if !layer.warp_affine(matrix) {
        log::warn!("warp_affine: singular matrix {matrix:?}, layer left unchanged");
        return false;
    }
    canvas.mark_layer_reallocated(layer_idx);
    true
}

// ---------------------------------------------------------------------------
//  Whole-canvas transforms (affect ALL layers and their offsets)
// ---------------------------------------------------------------------------

fn for_all_layers(
    canvas: &mut Canvas,
    op: fn(&mut Layer),
    reposition: impl Fn((i32, i32), (i32, i32), (i32, i32)) -> (i32, i32) + Sync,
) {
    let doc = (canvas.width() as i32, canvas.height() as i32);
    canvas.layers_mut().par_iter_mut().for_each(|layer| {
        let size = (layer.width() as i32, layer.height() as i32);
        let pos = layer.position;
        op(layer);
        layer.position = reposition(doc, pos, size);
    });
    for i in 0..canvas.len() {
        canvas.mark_layer_reallocated(i);
    }
}

/// Mirror the whole document left↔right.
pub fn flip_canvas_horizontal(canvas: &mut Canvas) {
    for_all_layers(canvas, Layer::flip_horizontal, |(dw, _), (px, py), (lw, _)| {
        (dw - px - lw, py)
    });
}

/// Mirror the whole document top↔bottom.
pub fn flip_canvas_vertical(canvas: &mut Canvas) {
    for_all_layers(canvas, Layer::flip_vertical, |(_, dh), (px, py), (_, lh)| {
        (px, dh - py - lh)
    });
}

/// Rotate the whole document 90° clockwise (swaps W↔H).
pub fn rotate_canvas_90cw(canvas: &mut Canvas) {
    for_all_layers(canvas, Layer::rotate_90_clockwise, |(_, dh), (px, py), (_, lh)| {
        (dh - py - lh, px)
    });
    let (h, w) = canvas.shape();
    canvas.set_shape(w, h);
}

/// Rotate the whole document 90° counter-clockwise (swaps W↔H).
pub fn rotate_canvas_90ccw(canvas: &mut Canvas) {
    for_all_layers(canvas, Layer::rotate_90_counterclockwise, |(dw, _), (px, py), (lw, _)| {
        (py, dw - px - lw)
    });
    let (h, w) = canvas.shape();
    canvas.set_shape(w, h);
}

pub fn rotate_canvas_180(canvas: &mut Canvas) {
    for_all_layers(canvas, Layer::rotate_180, |(dw, dh), (px, py), (lw, lh)| {
        (dw - px - lw, dh - py - lh)
    });
}
