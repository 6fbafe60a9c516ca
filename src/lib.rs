//! EpiGimp editor core: layered RGBA documents, compositing, geometric and
//! colour operations, and the `.epigimp` project format.
#![allow(clippy::too_many_arguments)]

pub mod canvas;
pub mod cli;
pub mod compositor;
pub mod error;
pub mod io;
pub mod layer;
pub mod logger;
pub mod metadata;
pub mod ops;
pub mod settings;
pub mod tools;

pub use canvas::{Canvas, SharedCanvas};
pub use compositor::{Compositor, FloatCompositor, NativeCompositor, Placement};
pub use error::{FileError, Result};
pub use layer::{BlendMode, Layer};
pub use metadata::Metadata;
pub use ops::selection::{Rect, Selection, SelectionShape};
