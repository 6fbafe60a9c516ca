// ============================================================================
// TOOLS: interactive pointer tools writing straight into layer memory
// ============================================================================
//
// Painting tools use `Layer::pixels_mut`, the unchecked fast path, instead of
// the masked selection API. Each event returns the layer-local rectangle
// that changed so the caller can refresh just that area.

use image::Rgba;

use crate::layer::Layer;
use crate::ops::selection::{Rect, Selection, SelectionShape};

/// Pointer position in layer pixel coordinates.
pub type Point = (f32, f32);

pub trait Tool {
    fn name(&self) -> &str;
    fn press(&mut self, pos: Point, layer: &mut Layer) -> Option<Rect>;
    fn drag(&mut self, pos: Point, layer: &mut Layer) -> Option<Rect>;
    fn release(&mut self, pos: Point, layer: &mut Layer) -> Option<Rect>;
}

fn union(a: Option<Rect>, b: Option<Rect>) -> Option<Rect> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union(&b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Porter-Duff "over" of a paint colour onto a layer pixel, straight alpha.
#[inline]
fn paint_over(bg: &mut [u8], fg: [u8; 4]) {
    if fg[3] == 0 {
        return;
    }
    if fg[3] == 255 {
        bg.copy_from_slice(&fg);
        return;
    }

    let bg_a = bg[3] as f32 / 255.0;
    let fg_a = fg[3] as f32 / 255.0;
    let alpha_final = bg_a + fg_a - bg_a * fg_a;
    for c in 0..3 {
        let b = bg[c] as f32 / 255.0;
        let f = fg[c] as f32 / 255.0;
        let out = (f * fg_a + b * bg_a * (1.0 - fg_a)) / alpha_final;
        bg[c] = (out * 255.0).round() as u8;
    }
    bg[3] = (alpha_final * 255.0).round() as u8;
}

/// Stamp a filled circle of `diameter` centred on `pos`.
/// `erase` replaces pixels with transparent black instead of blending `color`.
fn stamp_circle(layer: &mut Layer, pos: Point, diameter: f32, color: Rgba<u8>, erase: bool) -> Option<Rect> {
    let radius = diameter / 2.0;
    if radius <= 0.0 {
        return None;
    }
    let (cx, cy) = pos;
    let bounds = Rect::new(
        (cx - radius).floor() as i32,
        (cy - radius).floor() as i32,
        (diameter.ceil() as u32).saturating_add(1),
        (diameter.ceil() as u32).saturating_add(1),
    );
    let (x0, y0, x1, y1) = bounds.clamp_to(layer.width(), layer.height())?;
    let radius_sq = radius * radius;
    let stride = layer.width() as usize * 4;
    let pixels = layer.pixels_mut();

    for y in y0..y1 {
        let dy = y as f32 + 0.5 - cy;
        for x in x0..x1 {
            let dx = x as f32 + 0.5 - cx;
            if dx * dx + dy * dy > radius_sq {
                continue;
            }
            let i = y as usize * stride + x as usize * 4;
            let px = &mut pixels[i..i + 4];
            if erase {
                px.copy_from_slice(&[0, 0, 0, 0]);
            } else {
                paint_over(px, color.0);
            }
        }
    }
    Some(Rect::new(x0 as i32, y0 as i32, x1 - x0, y1 - y0))
}

/// Dab positions along a stroke, spaced `step` apart, carrying the remainder.
struct StrokeSpacer {
    last: Option<Point>,
}

impl StrokeSpacer {
    fn new() -> Self {
        Self { last: None }
    }

    fn start(&mut self, pos: Point) {
        self.last = Some(pos);
    }

    fn end(&mut self) {
        self.last = None;
    }

    /// Dabs between the last dab and `pos`, excluding the last dab itself.
    fn advance(&mut self, pos: Point, step: f32) -> Vec<Point> {
        let Some((lx, ly)) = self.last else {
            self.last = Some(pos);
            return vec![pos];
        };
        let (dx, dy) = (pos.0 - lx, pos.1 - ly);
        let dist = (dx * dx + dy * dy).sqrt();
        let step = step.max(1.0);
        let n = (dist / step).floor() as usize;
        if n == 0 {
            return Vec::new();
        }
        let (ux, uy) = (dx / dist * step, dy / dist * step);
        let dabs: Vec<Point> = (1..=n)
            .map(|i| (lx + ux * i as f32, ly + uy * i as f32))
            .collect();
        self.last = dabs.last().copied();
        dabs
    }
}

// ============================================================================
// BRUSH
// ============================================================================

pub struct Brush {
    /// Dab diameter in pixels.
    pub size: f32,
    pub color: Rgba<u8>,
    /// Distance between dabs as a fraction of `size`.
    pub spacing: f32,
    stroke: StrokeSpacer,
}

impl Brush {
    pub fn new(size: f32, color: Rgba<u8>) -> Self {
        Self {
            size,
            color,
            spacing: 0.25,
            stroke: StrokeSpacer::new(),
        }
    }

    fn dab_all(&self, dabs: &[Point], layer: &mut Layer) -> Option<Rect> {
        dabs.iter().fold(None, |dirty, &p| {
            union(dirty, stamp_circle(layer, p, self.size, self.color, false))
        })
    }
}

impl Default for Brush {
    fn default() -> Self {
        Self::new(20.0, Rgba([0, 0, 0, 255]))
    }
}

impl Tool for Brush {
    fn name(&self) -> &str {
        "Brush"
    }

    fn press(&mut self, pos: Point, layer: &mut Layer) -> Option<Rect> {
        self.stroke.start(pos);
        stamp_circle(layer, pos, self.size, self.color, false)
    }

    fn drag(&mut self, pos: Point, layer: &mut Layer) -> Option<Rect> {
        let dabs = self.stroke.advance(pos, self.spacing * self.size);
        self.dab_all(&dabs, layer)
    }

    fn release(&mut self, pos: Point, layer: &mut Layer) -> Option<Rect> {
        let dirty = self.drag(pos, layer);
        self.stroke.end();
        dirty
    }
}

// ============================================================================
// ERASER
// ============================================================================

pub struct Eraser {
    pub size: f32,
    pub spacing: f32,
    stroke: StrokeSpacer,
}

impl Eraser {
    pub fn new(size: f32) -> Self {
        Self {
            size,
            spacing: 0.25,
            stroke: StrokeSpacer::new(),
        }
    }
}

impl Default for Eraser {
    fn default() -> Self {
        Self::new(20.0)
    }
}

impl Tool for Eraser {
    fn name(&self) -> &str {
        "Eraser"
    }

    fn press(&mut self, pos: Point, layer: &mut Layer) -> Option<Rect> {
        self.stroke.start(pos);
        stamp_circle(layer, pos, self.size, Rgba([0, 0, 0, 0]), true)
    }

    fn drag(&mut self, pos: Point, layer: &mut Layer) -> Option<Rect> {
        let dabs = self.stroke.advance(pos, self.spacing * self.size);
        dabs.iter().fold(None, |dirty, &p| {
            union(dirty, stamp_circle(layer, p, self.size, Rgba([0, 0, 0, 0]), true))
        })
    }

    fn release(&mut self, pos: Point, layer: &mut Layer) -> Option<Rect> {
        let dirty = self.drag(pos, layer);
        self.stroke.end();
        dirty
    }
}

// ============================================================================
// SELECTION: rectangle / ellipse marquee
// ============================================================================

/// Tracks a drag and produces a selection. Never touches pixels.
pub struct SelectionTool {
    pub shape: SelectionShape,
    start: Option<(i32, i32)>,
    end: Option<(i32, i32)>,
}

impl SelectionTool {
    pub fn new(shape: SelectionShape) -> Self {
        Self { shape, start: None, end: None }
    }

    /// Current marquee, if it has any area.
    pub fn selection(&self) -> Option<Selection> {
        let rect = Rect::from_corners(self.start?, self.end?);
        (!rect.is_empty()).then(|| Selection::new(rect, self.shape))
    }

    pub fn clear(&mut self) {
        self.start = None;
        self.end = None;
    }
}

fn to_pixel(pos: Point) -> (i32, i32) {
    (pos.0.floor() as i32, pos.1.floor() as i32)
}

impl Tool for SelectionTool {
    fn name(&self) -> &str {
        match self.shape {
            SelectionShape::Rectangle => "Rectangle Selection",
            SelectionShape::Ellipse => "Ellipse Selection",
        }
    }

    fn press(&mut self, pos: Point, _layer: &mut Layer) -> Option<Rect> {
        self.start = Some(to_pixel(pos));
        self.end = self.start;
        None
    }

    fn drag(&mut self, pos: Point, _layer: &mut Layer) -> Option<Rect> {
        if self.start.is_some() {
            self.end = Some(to_pixel(pos));
        }
        None
    }

    fn release(&mut self, pos: Point, layer: &mut Layer) -> Option<Rect> {
        self.drag(pos, layer)
    }
}

// ============================================================================
// MOVE: drag offset for moving a selection's content
// ============================================================================

/// Reports how far the pointer travelled since the press. The document
/// applies the move (see `Canvas::move_selection`).
#[derive(Default)]
pub struct MoveTool {
    start: Option<Point>,
    offset: (i32, i32),
}

impl MoveTool {
    pub fn offset(&self) -> (i32, i32) {
        self.offset
    }

    pub fn reset_offset(&mut self) {
        self.offset = (0, 0);
    }
}

impl Tool for MoveTool {
    fn name(&self) -> &str {
        "Move"
    }

    fn press(&mut self, pos: Point, _layer: &mut Layer) -> Option<Rect> {
        self.start = Some(pos);
        self.offset = (0, 0);
        None
    }

    fn drag(&mut self, pos: Point, _layer: &mut Layer) -> Option<Rect> {
        if let Some((sx, sy)) = self.start {
            self.offset = ((pos.0 - sx).round() as i32, (pos.1 - sy).round() as i32);
        }
        None
    }

    fn release(&mut self, pos: Point, layer: &mut Layer) -> Option<Rect> {
        self.drag(pos, layer);
        self.start = None;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    #[test]
    fn brush_press_stamps_a_disc() {
        let mut layer = Layer::new("L".into(), 20, 20, CLEAR);
        let mut brush = Brush::new(6.0, RED);
        let dirty = brush.press((10.0, 10.0), &mut layer).unwrap();
        assert_eq!(layer.get_pixel(10, 10), Some(RED));
        assert_eq!(layer.get_pixel(0, 0), Some(CLEAR));
        assert!(dirty.x <= 7 && dirty.right() >= 13);
    }

    #[test]
    fn brush_drag_fills_the_gap() {
        let mut layer = Layer::new("L".into(), 40, 10, CLEAR);
        let mut brush = Brush::new(4.0, RED);
        brush.press((2.0, 5.0), &mut layer);
        brush.drag((30.0, 5.0), &mut layer);
        brush.release((30.0, 5.0), &mut layer);
        for x in 2..30 {
            assert_eq!(layer.get_pixel(x, 5), Some(RED), "gap at x={x}");
        }
    }

    #[test]
    fn huge_brush_covers_the_layer() {
        let mut layer = Layer::new("L".into(), 4, 4, CLEAR);
        let mut brush = Brush::new(1.0e12, RED);
        let dirty = brush.press((2.0, 2.0), &mut layer).unwrap();
        assert_eq!(dirty, Rect::new(0, 0, 4, 4));
        assert!(layer.pixels().chunks_exact(4).all(|p| p == RED.0));
    }

    #[test]
    fn translucent_paint_builds_up() {
        let mut layer = Layer::new("L".into(), 8, 8, CLEAR);
        let mut brush = Brush::new(4.0, Rgba([255, 0, 0, 128]));
        brush.press((4.0, 4.0), &mut layer);
        assert_eq!(layer.get_pixel(4, 4), Some(Rgba([255, 0, 0, 128])));
        brush.release((4.0, 4.0), &mut layer);
        brush.press((4.0, 4.0), &mut layer);
        let px = layer.get_pixel(4, 4).unwrap();
        assert_eq!(px[0], 255);
        assert!(px[3] > 128 && px[3] < 255, "got {px:?}");
    }

    #[test]
    fn brush_outside_layer_reports_nothing() {
        let mut layer = Layer::new("L".into(), 4, 4, CLEAR);
        let mut brush = Brush::new(2.0, RED);
        assert!(brush.press((-50.0, -50.0), &mut layer).is_none());
    }

    #[test]
    fn eraser_clears_to_transparent() {
        let mut layer = Layer::new("L".into(), 10, 10, RED);
        let mut eraser = Eraser::new(4.0);
        assert!(eraser.press((5.0, 5.0), &mut layer).is_some());
        assert_eq!(layer.get_pixel(5, 5), Some(CLEAR));
        assert_eq!(layer.get_pixel(0, 0), Some(RED));
    }

    #[test]
    fn selection_tool_normalizes_drag() {
        let mut layer = Layer::new("L".into(), 1, 1, CLEAR);
        let mut tool = SelectionTool::new(SelectionShape::Ellipse);
        tool.press((10.0, 8.0), &mut layer);
        assert!(tool.selection().is_none());
        tool.drag((4.0, 2.0), &mut layer);
        tool.release((3.0, 1.0), &mut layer);
        let sel = tool.selection().unwrap();
        assert_eq!(sel.rect, Rect::new(3, 1, 7, 7));
        assert_eq!(sel.shape, SelectionShape::Ellipse);
        assert_eq!(tool.name(), "Ellipse Selection");
    }

    #[test]
    fn move_tool_tracks_offset() {
        let mut layer = Layer::new("L".into(), 1, 1, CLEAR);
        let mut tool = MoveTool::default();
        tool.press((5.0, 5.0), &mut layer);
        tool.drag((8.0, 1.0), &mut layer);
        assert_eq!(tool.offset(), (3, -4));
        tool.release((9.0, 1.0), &mut layer);
        assert_eq!(tool.offset(), (4, -4));
    }
}
