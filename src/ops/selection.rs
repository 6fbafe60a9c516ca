// ============================================================================
// SELECTION REGIONS: rectangle / ellipse masks and region editing on layers
// ============================================================================
//
// These are the validated editing paths: every operation clamps to the
// layer bounds and treats zero-area or fully outside rectangles as no-ops.

use image::{Rgba, RgbaImage};

use crate::layer::Layer;

/// Axis-aligned rectangle in pixel coordinates. May extend past any buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Normalized rectangle spanning two drag points (any order).
    pub fn from_corners(a: (i32, i32), b: (i32, i32)) -> Self {
        let x = a.0.min(b.0);
        let y = a.1.min(b.1);
        Self {
            x,
            y,
            width: a.0.abs_diff(b.0),
            height: a.1.abs_diff(b.1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            ..*self
        }
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        Rect::new(x0, y0, (x1 - x0 as i64) as u32, (y1 - y0 as i64) as u32)
    }

    /// Clamp to a `width × height` buffer.
    /// Returns `(x0, y0, x1, y1)` with exclusive ends, or `None` for zero area.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = (self.x as i64).clamp(0, width as i64);
        let y0 = (self.y as i64).clamp(0, height as i64);
        let x1 = self.right().clamp(0, width as i64);
        let y1 = self.bottom().clamp(0, height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }
}

/// Shape drawn inside a selection's bounding rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SelectionShape {
    #[default]
    Rectangle,
    Ellipse,
}

impl SelectionShape {
    /// Whether the pixel at absolute `(x, y)` lies inside this shape drawn in `rect`.
    ///
    /// The ellipse is inscribed in the box and tested at pixel centers:
    /// `((px - cx) / cx)^2 + ((py - cy) / cy)^2 <= 1` with `cx = w/2`, `cy = h/2`.
    pub fn contains(&self, rect: &Rect, x: i64, y: i64) -> bool {
        let lx = x - rect.x as i64;
        let ly = y - rect.y as i64;
        if lx < 0 || ly < 0 || lx >= rect.width as i64 || ly >= rect.height as i64 {
            return false;
        }
        match self {
            SelectionShape::Rectangle => true,
            SelectionShape::Ellipse => {
                let cx = rect.width as f64 / 2.0;
                let cy = rect.height as f64 / 2.0;
                let dx = (lx as f64 + 0.5 - cx) / cx;
                let dy = (ly as f64 + 0.5 - cy) / cy;
                dx * dx + dy * dy <= 1.0
            }
        }
    }
}

/// Active selection on a document: a rectangle plus its shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    pub rect: Rect,
    pub shape: SelectionShape,
}

impl Selection {
    pub fn new(rect: Rect, shape: SelectionShape) -> Self {
        Self { rect, shape }
    }
}

// ---------------------------------------------------------------------------
//  Region editing on a single layer (layer-local coordinates)
// ---------------------------------------------------------------------------

impl Layer {
    /// Detached copy of the pixels under `rect`, clamped to the layer.
    /// `None` when the clamped area is empty.
    pub fn copy_region(&self, rect: Rect) -> Option<RgbaImage> {
        let (x0, y0, x1, y1) = rect.clamp_to(self.width(), self.height())?;
        let w = x1 - x0;
        let row_bytes = w as usize * 4;
        let mut out = Vec::with_capacity(row_bytes * (y1 - y0) as usize);
        for y in y0..y1 {
            let start = self.offset(x0, y);
            out.extend_from_slice(&self.pixels()[start..start + row_bytes]);
        }
        RgbaImage::from_raw(w, y1 - y0, out)
    }

    /// Make every masked pixel fully transparent.
    pub fn delete_region(&mut self, rect: Rect, shape: SelectionShape) -> bool {
        self.fill_region(rect, Rgba([0, 0, 0, 0]), shape)
    }

    /// Overwrite every masked pixel with `color`.
    pub fn fill_region(&mut self, rect: Rect, color: Rgba<u8>, shape: SelectionShape) -> bool {
        let Some((x0, y0, x1, y1)) = rect.clamp_to(self.width(), self.height()) else {
            return false;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                if shape.contains(&rect, x as i64, y as i64) {
                    let i = self.offset(x, y);
                    self.pixels_mut()[i..i + 4].copy_from_slice(&color.0);
                }
            }
        }
        true
    }

    /// Move the masked pixels of `source` so its top-left lands on `dest`.
    ///
    /// With `clear_source` the vacated pixels become transparent first.
    /// Pixels that would land outside the layer are dropped, never wrapped.
    pub fn move_region(
        &mut self,
        source: Rect,
        dest: (i32, i32),
        shape: SelectionShape,
        clear_source: bool,
    ) -> bool {
        let Some((x0, y0, x1, y1)) = source.clamp_to(self.width(), self.height()) else {
            return false;
        };

        // (offset inside the source box, pixel)
        let mut lifted: Vec<(i64, i64, [u8; 4])> = Vec::new();
        for y in y0..y1 {
            for x in x0..x1 {
                if shape.contains(&source, x as i64, y as i64) {
                    let i = self.offset(x, y);
                    let p = &self.pixels()[i..i + 4];
                    lifted.push((
                        x as i64 - source.x as i64,
                        y as i64 - source.y as i64,
                        [p[0], p[1], p[2], p[3]],
                    ));
                }
            }
        }

        if clear_source {
            self.delete_region(source, shape);
        }

        let (w, h) = (self.width() as i64, self.height() as i64);
        for (bx, by, px) in lifted {
            let tx = dest.0 as i64 + bx;
            let ty = dest.1 as i64 + by;
            if tx < 0 || ty < 0 || tx >= w || ty >= h {
                continue;
            }
            let i = self.offset(tx as u32, ty as u32);
            self.pixels_mut()[i..i + 4].copy_from_slice(&px);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn covered(layer: &Layer) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        for y in 0..layer.height() {
            for x in 0..layer.width() {
                if layer.get_pixel(x, y) == Some(RED) {
                    out.push((x, y));
                }
            }
        }
        out
    }

    #[test]
    fn corners_are_normalized() {
        let r = Rect::from_corners((10, 2), (4, 8));
        assert_eq!(r, Rect::new(4, 2, 6, 6));
    }

    #[test]
    fn clamp_rejects_outside_and_empty_rects() {
        assert_eq!(Rect::new(-5, -5, 3, 3).clamp_to(10, 10), None);
        assert_eq!(Rect::new(2, 2, 0, 4).clamp_to(10, 10), None);
        assert_eq!(Rect::new(8, 8, 5, 5).clamp_to(10, 10), Some((8, 8, 10, 10)));
    }

    #[test]
    fn copy_region_clamps() {
        let mut layer = Layer::new("L".into(), 4, 4, CLEAR);
        layer.put_pixel(3, 3, RED);
        let block = layer.copy_region(Rect::new(2, 2, 10, 10)).unwrap();
        assert_eq!(block.dimensions(), (2, 2));
        assert_eq!(*block.get_pixel(1, 1), RED);
        assert!(layer.copy_region(Rect::new(10, 10, 2, 2)).is_none());
    }

    #[test]
    fn rectangle_fill_covers_whole_box() {
        let mut layer = Layer::new("L".into(), 6, 6, CLEAR);
        assert!(layer.fill_region(Rect::new(1, 1, 3, 2), RED, SelectionShape::Rectangle));
        assert_eq!(covered(&layer).len(), 6);
    }

    #[test]
    fn ellipse_fill_is_point_symmetric() {
        let mut layer = Layer::new("L".into(), 9, 9, CLEAR);
        let rect = Rect::new(0, 0, 9, 9);
        layer.fill_region(rect, RED, SelectionShape::Ellipse);

        let set = covered(&layer);
        assert!(!set.is_empty());
        // Corners lie outside the inscribed ellipse.
        assert!(!set.contains(&(0, 0)));
        for &(x, y) in &set {
            assert!(set.contains(&(8 - x, 8 - y)));
        }
    }

    #[test]
    fn delete_region_clears_to_transparent() {
        let mut layer = Layer::new("L".into(), 4, 4, RED);
        layer.delete_region(Rect::new(0, 0, 2, 2), SelectionShape::Rectangle);
        assert_eq!(layer.get_pixel(0, 0), Some(CLEAR));
        assert_eq!(layer.get_pixel(2, 2), Some(RED));
    }

    #[test]
    fn degenerate_regions_are_noops() {
        let mut layer = Layer::new("L".into(), 4, 4, RED);
        let before = layer.pixels().to_vec();
        assert!(!layer.delete_region(Rect::new(1, 1, 0, 0), SelectionShape::Rectangle));
        assert!(!layer.move_region(Rect::new(20, 20, 2, 2), (0, 0), SelectionShape::Rectangle, true));
        assert_eq!(layer.pixels(), &before[..]);
    }

    #[test]
    fn move_region_truncates_at_edges() {
        let mut layer = Layer::new("L".into(), 4, 4, CLEAR);
        layer.fill_region(Rect::new(0, 0, 2, 2), RED, SelectionShape::Rectangle);
        layer.move_region(Rect::new(0, 0, 2, 2), (3, 3), SelectionShape::Rectangle, true);
        assert_eq!(covered(&layer), vec![(3, 3)]);
    }

    #[test]
    fn move_region_without_clear_duplicates() {
        let mut layer = Layer::new("L".into(), 4, 1, CLEAR);
        layer.put_pixel(0, 0, RED);
        layer.move_region(Rect::new(0, 0, 1, 1), (2, 0), SelectionShape::Rectangle, false);
        assert_eq!(covered(&layer), vec![(0, 0), (2, 0)]);
    }
}
