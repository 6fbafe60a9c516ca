// ============================================================================
// CANVAS: the document: ordered layer stack, active layer, selection, metadata
// ============================================================================
//
// Index-based mutations (`delete_layer`, `swap_layer`, `set_active_layer`)
// never fail loudly: an out-of-range index leaves the document untouched and
// the call returns `false`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::compositor::{Compositor, FloatCompositor, Placement};
use crate::error::Result;
use crate::io::MAX_CANVAS_DIM;
use crate::layer::Layer;
use crate::metadata::Metadata;
use crate::ops::selection::{Rect, Selection, SelectionShape};
use crate::ops::transform;
use crate::settings::NewImageSettings;

/// Fill of the "Background" layer in a new document.
pub const DEFAULT_BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
/// Fill of layers added without an explicit colour.
pub const DEFAULT_LAYER_FILL: Rgba<u8> = Rgba([0, 0, 0, 0]);

pub const DEFAULT_SHAPE: (u32, u32) = (600, 800);

/// Called with a layer index whenever that layer's pixel storage was reallocated.
pub type ViewInvalidated = Box<dyn FnMut(usize) + Send + Sync>;

/// A document behind a lock, for handing to background workers.
pub type SharedCanvas = Arc<RwLock<Canvas>>;

pub struct Canvas {
    id: Uuid,
    /// Document width in pixels.
    width: u32,
    /// Document height in pixels.
    height: u32,
    /// Bottom-to-top stacking order.
    layers: Vec<Layer>,
    /// Always `Some(i)` with `i < layers.len()` while `layers` is non-empty.
    active_layer: Option<usize>,
    project_path: Option<PathBuf>,
    pub metadata: Metadata,
    selection: Option<Selection>,
    /// Source of auto-generated "Layer #n" names. Never decremented.
    layer_counter: u32,
    /// Monotonically increasing counter, bumped on each mark_dirty call.
    dirty_generation: u64,
    /// Accumulated dirty area since the last `take_dirty_rect`.
    dirty_rect: Option<Rect>,
    view_invalidated: Option<ViewInvalidated>,
}

impl fmt::Debug for Canvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canvas")
            .field("id", &self.id)
            .field("shape", &self.shape())
            .field("layers", &self.layers.len())
            .field("active_layer", &self.active_layer)
            .field("project_path", &self.project_path)
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new(DEFAULT_SHAPE, DEFAULT_BACKGROUND)
    }
}

impl Canvas {
    /// New document of `shape = (height, width)` holding a single "Background" layer.
    pub fn new(shape: (u32, u32), background: Rgba<u8>) -> Self {
        let (height, width) = shape;
        let mut canvas = Self::empty(width, height, Metadata::for_new_document(width, height));
        canvas
            .layers
            .push(Layer::new("Background".to_string(), width, height, background));
        canvas.active_layer = Some(0);
        canvas
    }

    /// Blank document sized and filled from the saved new-image preferences.
    /// Each side is kept within `1..=MAX_CANVAS_DIM`.
    pub fn from_settings(settings: &NewImageSettings) -> Self {
        let (height, width) = settings.shape();
        let shape = (height.clamp(1, MAX_CANVAS_DIM), width.clamp(1, MAX_CANVAS_DIM));
        Self::new(shape, settings.background.color())
    }

    /// Single-layer document whose shape is copied from `layer`.
    pub fn from_layer(layer: Layer) -> Self {
        let (width, height) = (layer.width(), layer.height());
        let mut canvas = Self::empty(width, height, Metadata::for_new_document(width, height));
        canvas.layers.push(layer);
        canvas.active_layer = Some(0);
        canvas.layer_counter = 1;
        canvas
    }

    /// Reassemble a document, e.g. after decoding a project. The topmost layer becomes active.
    pub fn from_parts(shape: (u32, u32), layers: Vec<Layer>, metadata: Metadata) -> Self {
        let (height, width) = shape;
        let mut canvas = Self::empty(width, height, metadata);
        canvas.active_layer = layers.len().checked_sub(1);
        canvas.layer_counter = layers.len() as u32;
        canvas.layers = layers;
        canvas
    }

    fn empty(width: u32, height: u32, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            width,
            height,
            layers: Vec::new(),
            active_layer: None,
            project_path: None,
            metadata,
            selection: None,
            layer_counter: 0,
            dirty_generation: 0,
            dirty_rect: None,
            view_invalidated: None,
        }
    }

    pub fn into_shared(self) -> SharedCanvas {
        Arc::new(RwLock::new(self))
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// `(height, width)`.
    pub fn shape(&self) -> (u32, u32) {
        (self.height, self.width)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Resize the document frame; the recorded metadata size follows.
    pub(crate) fn set_shape(&mut self, height: u32, width: u32) {
        self.height = height;
        self.width = width;
        self.metadata.width = Some(width);
        self.metadata.height = Some(height);
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Mutable access to the stack. The slice cannot grow or shrink, so the
    /// active-layer invariant holds.
    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    pub fn active_layer_index(&self) -> Option<usize> {
        self.active_layer
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.active_layer.and_then(|i| self.layers.get(i))
    }

    pub fn active_layer_mut(&mut self) -> Option<&mut Layer> {
        self.active_layer.and_then(|i| self.layers.get_mut(i))
    }

    pub fn project_path(&self) -> Option<&Path> {
        self.project_path.as_deref()
    }

    pub fn set_project_path(&mut self, path: impl Into<PathBuf>) {
        self.project_path = Some(path.into());
    }

    pub fn dirty_generation(&self) -> u64 {
        self.dirty_generation
    }

    // ========================================================================
    // LAYER STACK
    // ========================================================================

    /// Append a new layer on top and make it active.
    ///
    /// Without a name the layer is called "Layer #n"; n is never reused.
    pub fn add_layer(&mut self, name: Option<&str>, color: Option<Rgba<u8>>) -> &mut Layer {
        self.layer_counter += 1;
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("Layer #{}", self.layer_counter),
        };
        let layer = Layer::new(
            name,
            self.width,
            self.height,
            color.unwrap_or(DEFAULT_LAYER_FILL),
        );
        self.push_active(layer)
    }

    /// Append an externally built layer on top and make it active.
    pub fn add_layer_from_buffer(&mut self, layer: Layer) -> &mut Layer {
        self.layer_counter += 1;
        self.push_active(layer)
    }

    fn push_active(&mut self, layer: Layer) -> &mut Layer {
        self.layers.push(layer);
        let index = self.layers.len() - 1;
        self.active_layer = Some(index);
        self.mark_dirty(None);
        &mut self.layers[index]
    }

    /// Remove a layer. The layer now at `index` becomes active, or the new
    /// top layer if the removed one was on top.
    pub fn delete_layer(&mut self, index: usize) -> bool {
        if index >= self.layers.len() {
            log::debug!("delete_layer: index {index} out of range ({} layers)", self.layers.len());
            return false;
        }
        self.layers.remove(index);
        self.active_layer = match self.layers.len() {
            0 => None,
            n if index < n => Some(index),
            n => Some(n - 1),
        };
        self.mark_dirty(None);
        true
    }

    /// Exchange two stacking positions. The active layer keeps pointing at
    /// the same buffer, wherever it moved to.
    pub fn swap_layer(&mut self, i: usize, j: usize) -> bool {
        let n = self.layers.len();
        if i >= n || j >= n {
            log::debug!("swap_layer: ({i}, {j}) out of range ({n} layers)");
            return false;
        }
        self.layers.swap(i, j);
        self.active_layer = self.active_layer.map(|a| match a {
            a if a == i => j,
            a if a == j => i,
            a => a,
        });
        self.mark_dirty(None);
        true
    }

    /// Insert at `index` (`== len()` appends) and make it active.
    pub fn insert_layer(&mut self, index: usize, layer: Layer) -> bool {
        if index > self.layers.len() {
            log::debug!("insert_layer: index {index} out of range");
            return false;
        }
        self.layers.insert(index, layer);
        self.active_layer = Some(index);
        self.mark_dirty(None);
        true
    }

    /// Replace the whole stack; the topmost layer becomes active.
    pub(crate) fn replace_layers(&mut self, layers: Vec<Layer>) {
        self.layers = layers;
        self.active_layer = self.layers.len().checked_sub(1);
        self.mark_dirty(None);
    }

    pub fn set_active_layer(&mut self, index: usize) -> bool {
        if index >= self.layers.len() {
            log::debug!("set_active_layer: index {index} out of range");
            return false;
        }
        self.active_layer = Some(index);
        true
    }

    // ========================================================================
    // METADATA
    // ========================================================================

    /// Merge a partial metadata map; see [`Metadata::merge`].
    pub fn set_metadata(&mut self, partial: Map<String, Value>) -> Result<()> {
        self.metadata.merge(partial)?;
        Ok(())
    }

    pub fn update_metadata_datetime(&mut self) {
        self.metadata.touch_datetime();
    }

    // ========================================================================
    // SELECTION: validated region editing on the active layer
    // ========================================================================

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Replace the selection. Zero-area rectangles clear it.
    pub fn select(&mut self, rect: Rect, shape: SelectionShape) {
        self.selection = (!rect.is_empty()).then(|| Selection::new(rect, shape));
    }

    pub fn select_all(&mut self) {
        self.select(
            Rect::new(0, 0, self.width, self.height),
            SelectionShape::Rectangle,
        );
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Active layer plus the selection translated into that layer's coordinates.
    fn selection_target(&mut self) -> Option<(&mut Layer, Rect, SelectionShape)> {
        let sel = self.selection?;
        let layer = self.active_layer.and_then(|i| self.layers.get_mut(i))?;
        let local = sel.rect.translated(-layer.position.0, -layer.position.1);
        Some((layer, local, sel.shape))
    }

    /// Pixels of the active layer under the selection rectangle.
    pub fn copy_selection(&self) -> Option<RgbaImage> {
        let sel = self.selection?;
        let layer = self.active_layer()?;
        layer.copy_region(sel.rect.translated(-layer.position.0, -layer.position.1))
    }

    pub fn delete_selection(&mut self) -> bool {
        let changed = match self.selection_target() {
            Some((layer, rect, shape)) => layer.delete_region(rect, shape),
            None => false,
        };
        self.after_selection_edit(changed)
    }

    pub fn fill_selection(&mut self, color: Rgba<u8>) -> bool {
        let changed = match self.selection_target() {
            Some((layer, rect, shape)) => layer.fill_region(rect, color, shape),
            None => false,
        };
        self.after_selection_edit(changed)
    }

    /// Move the selected pixels so the selection's top-left lands on `dest`
    /// (document coordinates). The selection follows the pixels.
    pub fn move_selection(&mut self, dest: (i32, i32), clear_source: bool) -> bool {
        let changed = match self.selection_target() {
            Some((layer, rect, shape)) => {
                let local_dest = (dest.0 - layer.position.0, dest.1 - layer.position.1);
                layer.move_region(rect, local_dest, shape, clear_source)
            }
            None => false,
        };
        if changed {
            if let Some(sel) = self.selection.as_mut() {
                sel.rect.x = dest.0;
                sel.rect.y = dest.1;
            }
        }
        self.after_selection_edit(changed)
    }

    fn after_selection_edit(&mut self, changed: bool) -> bool {
        if changed {
            let rect = self.selection.map(|s| s.rect);
            self.mark_dirty(rect);
        } else {
            log::debug!("selection edit skipped: no selection, no active layer or empty region");
        }
        changed
    }

    // ========================================================================
    // WHOLE-DOCUMENT TRANSFORMS
    // ========================================================================

    pub fn rotate_90_clockwise(&mut self) {
        transform::rotate_canvas_90cw(self);
        self.selection = None;
    }

    pub fn rotate_90_counterclockwise(&mut self) {
        transform::rotate_canvas_90ccw(self);
        self.selection = None;
    }

    pub fn rotate_180(&mut self) {
        transform::rotate_canvas_180(self);
        self.selection = None;
    }

    pub fn flip_horizontal(&mut self) {
        transform::flip_canvas_horizontal(self);
        self.selection = None;
    }

    pub fn flip_vertical(&mut self) {
        transform::flip_canvas_vertical(self);
        self.selection = None;
    }

    // ========================================================================
    // CHANGE TRACKING
    // ========================================================================

    /// Register the presentation layer's hook for rebuilt pixel storage.
    pub fn set_view_invalidated(&mut self, callback: impl FnMut(usize) + Send + Sync + 'static) {
        self.view_invalidated = Some(Box::new(callback));
    }

    /// Record a change. `None` marks the whole document.
    pub fn mark_dirty(&mut self, rect: Option<Rect>) {
        let full = Rect::new(0, 0, self.width, self.height);
        let new_rect = rect.unwrap_or(full);
        self.dirty_rect = Some(match self.dirty_rect {
            Some(existing) => existing.union(&new_rect),
            None => new_rect,
        });
        self.dirty_generation = self.dirty_generation.wrapping_add(1);
    }

    /// Area changed since the previous call.
    pub fn take_dirty_rect(&mut self) -> Option<Rect> {
        self.dirty_rect.take()
    }

    /// A layer's storage was replaced: views over the old allocation are stale.
    pub fn mark_layer_reallocated(&mut self, index: usize) {
        self.mark_dirty(None);
        if let Some(callback) = self.view_invalidated.as_mut() {
            callback(index);
        }
    }

    // ========================================================================
    // COMPOSITING
    // ========================================================================

    /// Flatten the visible layers, bottom to top, honouring layer offsets.
    pub fn composite(&self) -> RgbaImage {
        self.composite_with(&FloatCompositor, Placement::Offset)
    }

    pub fn composite_with(&self, compositor: &dyn Compositor, placement: Placement) -> RgbaImage {
        compositor.composite(self.shape(), &self.layers, placement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn canvas_with(n: usize) -> Canvas {
        let mut canvas = Canvas::new((8, 8), DEFAULT_BACKGROUND);
        for _ in 1..n {
            canvas.add_layer(None, None);
        }
        canvas
    }

    #[test]
    fn new_document_has_background() {
        let canvas = Canvas::new((100, 100), Rgba([1, 2, 3, 255]));
        assert_eq!(canvas.len(), 1);
        assert_eq!(canvas.layers()[0].name, "Background");
        assert_eq!(canvas.layers()[0].get_pixel(0, 0), Some(Rgba([1, 2, 3, 255])));
        assert_eq!(canvas.active_layer_index(), Some(0));
    }

    #[test]
    fn auto_names_are_never_reused() {
        let mut canvas = canvas_with(1);
        canvas.add_layer(None, None);
        canvas.add_layer(None, None);
        assert_eq!(canvas.layers()[2].name, "Layer #2");
        canvas.delete_layer(2);
        canvas.add_layer(None, None);
        assert_eq!(canvas.layers()[2].name, "Layer #3");
        assert_eq!(canvas.active_layer_index(), Some(2));
    }

    #[test]
    fn explicit_name_and_color_are_used() {
        let mut canvas = canvas_with(1);
        let layer = canvas.add_layer(Some("Ink"), Some(Rgba([9, 9, 9, 9])));
        assert_eq!(layer.name, "Ink");
        assert_eq!(layer.get_pixel(7, 7), Some(Rgba([9, 9, 9, 9])));
    }

    #[test]
    fn delete_repairs_active_layer() {
        for n in 1..5 {
            for active in 0..n {
                for removed in 0..n {
                    let mut canvas = canvas_with(n);
                    canvas.set_active_layer(active);
                    assert!(canvas.delete_layer(removed));
                    match canvas.active_layer_index() {
                        None => assert!(canvas.is_empty()),
                        Some(i) => assert!(i < canvas.len()),
                    }
                }
            }
        }
    }

    #[test]
    fn deleting_top_selects_new_top() {
        let mut canvas = canvas_with(3);
        canvas.delete_layer(2);
        assert_eq!(canvas.active_layer_index(), Some(1));
        canvas.delete_layer(0);
        assert_eq!(canvas.active_layer_index(), Some(0));
        canvas.delete_layer(0);
        assert_eq!(canvas.active_layer_index(), None);
    }

    #[test]
    fn out_of_range_indices_are_ignored() {
        let mut canvas = canvas_with(2);
        let generation = canvas.dirty_generation();
        assert!(!canvas.delete_layer(5));
        assert!(!canvas.swap_layer(0, 9));
        assert!(!canvas.set_active_layer(2));
        assert_eq!(canvas.len(), 2);
        assert_eq!(canvas.active_layer_index(), Some(1));
        assert_eq!(canvas.dirty_generation(), generation);
    }

    #[test]
    fn swap_keeps_active_buffer() {
        let mut canvas = canvas_with(3);
        canvas.set_active_layer(0);
        assert!(canvas.swap_layer(0, 2));
        assert_eq!(canvas.active_layer().map(|l| l.name.as_str()), Some("Background"));
        assert_eq!(canvas.active_layer_index(), Some(2));
    }

    #[test]
    fn from_parts_activates_top() {
        let layers = vec![
            Layer::new("a".into(), 2, 2, DEFAULT_LAYER_FILL),
            Layer::new("b".into(), 2, 2, DEFAULT_LAYER_FILL),
        ];
        let mut canvas = Canvas::from_parts((2, 2), layers, Metadata::default());
        assert_eq!(canvas.active_layer_index(), Some(1));
        canvas.add_layer(None, None);
        assert_eq!(canvas.layers()[2].name, "Layer #3");

        let empty = Canvas::from_parts((2, 2), Vec::new(), Metadata::default());
        assert_eq!(empty.active_layer_index(), None);
    }

    #[test]
    fn metadata_merges_through_document() {
        let mut canvas = canvas_with(1);
        let partial = match json!({ "title": "Sunset", "exif": { "Make": "Acme" } }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        canvas.set_metadata(partial).unwrap();
        assert_eq!(canvas.metadata.title.as_deref(), Some("Sunset"));
        assert_eq!(canvas.metadata.exif["Make"], json!("Acme"));
        assert_eq!(canvas.metadata.width, Some(8));
    }

    #[test]
    fn selection_edits_respect_layer_offset() {
        let mut canvas = canvas_with(1);
        let layer = canvas.add_layer(Some("small"), None);
        layer.replace_storage(4, 4, vec![0; 4 * 4 * 4]);
        layer.position = (2, 2);

        canvas.select(Rect::new(2, 2, 1, 1), SelectionShape::Rectangle);
        assert!(canvas.fill_selection(Rgba([255, 0, 0, 255])));
        let top = canvas.active_layer().unwrap();
        assert_eq!(top.get_pixel(0, 0), Some(Rgba([255, 0, 0, 255])));
        assert_eq!(top.get_pixel(1, 1), Some(Rgba([0, 0, 0, 0])));
    }

    #[test]
    fn move_selection_follows_pixels() {
        let mut canvas = Canvas::new((4, 4), Rgba([0, 0, 0, 0]));
        canvas.select(Rect::new(0, 0, 1, 1), SelectionShape::Rectangle);
        canvas.fill_selection(Rgba([0, 255, 0, 255]));
        assert!(canvas.move_selection((2, 3), true));
        let bg = canvas.active_layer().unwrap();
        assert_eq!(bg.get_pixel(0, 0), Some(Rgba([0, 0, 0, 0])));
        assert_eq!(bg.get_pixel(2, 3), Some(Rgba([0, 255, 0, 255])));
        assert_eq!(canvas.selection().map(|s| (s.rect.x, s.rect.y)), Some((2, 3)));
    }

    #[test]
    fn empty_selection_is_noop() {
        let mut canvas = canvas_with(1);
        canvas.select(Rect::new(3, 3, 0, 5), SelectionShape::Ellipse);
        assert!(canvas.selection().is_none());
        assert!(!canvas.delete_selection());
        assert!(canvas.copy_selection().is_none());
    }

    #[test]
    fn rotation_swaps_shape_and_notifies_views() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut canvas = Canvas::new((4, 10), DEFAULT_BACKGROUND);
        let layer = canvas.add_layer(Some("tile"), None);
        layer.replace_storage(2, 1, vec![7; 2 * 4]);
        layer.position = (1, 0);
        canvas.set_view_invalidated(move |i| sink.lock().unwrap().push(i));

        canvas.rotate_90_clockwise();
        assert_eq!(canvas.shape(), (10, 4));
        assert_eq!((canvas.metadata.height, canvas.metadata.width), (Some(10), Some(4)));
        assert_eq!(canvas.layers()[0].dimensions(), (10, 4));
        assert_eq!(canvas.layers()[1].dimensions(), (2, 1));
        assert_eq!(canvas.layers()[1].position, (3, 1));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn flips_remap_offsets() {
        let mut canvas = Canvas::new((4, 10), DEFAULT_BACKGROUND);
        let layer = canvas.add_layer(Some("tile"), None);
        layer.replace_storage(2, 1, vec![7; 2 * 4]);
        layer.position = (1, 0);

        canvas.flip_horizontal();
        assert_eq!(canvas.layers()[1].position, (7, 0));
        canvas.flip_vertical();
        assert_eq!(canvas.layers()[1].position, (7, 3));
        canvas.rotate_180();
        assert_eq!(canvas.layers()[1].position, (1, 0));
        assert_eq!(canvas.shape(), (4, 10));
    }

    #[test]
    fn datetime_refresh_keeps_original() {
        let mut canvas = canvas_with(1);
        canvas.metadata.datetime = Some("2001:02:03 04:05:06".to_string());
        canvas.metadata.datetime_original = Some("2000:01:01 00:00:00".to_string());
        canvas.update_metadata_datetime();
        assert_ne!(canvas.metadata.datetime.as_deref(), Some("2001:02:03 04:05:06"));
        assert_eq!(canvas.metadata.datetime_original.as_deref(), Some("2000:01:01 00:00:00"));
    }

    #[test]
    fn new_document_from_preferences() {
        use crate::settings::BackgroundFill;

        let prefs = NewImageSettings {
            width: 30,
            height: 12,
            background: BackgroundFill::Transparent,
        };
        let canvas = Canvas::from_settings(&prefs);
        assert_eq!(canvas.shape(), (12, 30));
        assert_eq!(canvas.layer(0).unwrap().get_pixel(0, 0), Some(Rgba([0, 0, 0, 0])));
        assert_eq!(canvas.metadata.width, Some(30));

        let degenerate = NewImageSettings { width: 0, height: u32::MAX, ..prefs };
        assert_eq!(Canvas::from_settings(&degenerate).shape(), (MAX_CANVAS_DIM, 1));
    }

    #[test]
    fn shared_canvas_is_lockable() {
        let shared = canvas_with(2).into_shared();
        shared.write().add_layer(None, None);
        assert_eq!(shared.read().len(), 3);
    }
}
