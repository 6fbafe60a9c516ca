// ============================================================================
// CANVAS-LEVEL OPERATIONS: duplicate / flatten / reorder layers
// ============================================================================

use crate::canvas::Canvas;
use crate::layer::Layer;

/// Duplicate a layer directly above itself and make the copy active.
pub fn duplicate_layer(canvas: &mut Canvas, layer_idx: usize) -> bool {
    let Some(src) = canvas.layer(layer_idx) else {
        return false;
    };
    let mut dup = src.clone();
    dup.name = format!("{} Copy", src.name);
    canvas.insert_layer(layer_idx + 1, dup)
}

/// Flatten all visible layers into a single "Background" layer.
pub fn flatten_image(canvas: &mut Canvas) {
    let composite = canvas.composite();
    let bg = Layer::from_rgba_image("Background".to_string(), composite);
    canvas.replace_layers(vec![bg]);
}

/// Move the active layer up one position.
pub fn move_layer_up(canvas: &mut Canvas) -> bool {
    match canvas.active_layer_index() {
        Some(idx) if idx + 1 < canvas.len() => canvas.swap_layer(idx, idx + 1),
        _ => false,
    }
}

/// Move the active layer down one position.
pub fn move_layer_down(canvas: &mut Canvas) -> bool {
    match canvas.active_layer_index() {
        Some(idx) if idx > 0 => canvas.swap_layer(idx, idx - 1),
        _ => false,
    }
}

/// Move the active layer to the top of the stack.
pub fn move_layer_to_top(canvas: &mut Canvas) -> bool {
    let Some(idx) = canvas.active_layer_index() else {
        return false;
    };
    let last = canvas.len() - 1;
    if idx >= last {
        return false;
    }
    let mut moved = false;
    for i in idx..last {
        moved |= canvas.swap_layer(i, i + 1);
    }
    moved
}

/// Move the active layer to the bottom of the stack.
pub fn move_layer_to_bottom(canvas: &mut Canvas) -> bool {
    let Some(idx) = canvas.active_layer_index() else {
        return false;
    };
    let mut moved = false;
    for i in (1..=idx).rev() {
        moved |= canvas.swap_layer(i, i - 1);
    }
    moved
}
