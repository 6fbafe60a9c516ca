pub mod adjustments;
pub mod canvas_ops;
pub mod selection;
pub mod transform;
