use std::path::PathBuf;

/// Error type for project and image file operations.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad magic bytes, malformed JSON header, or a payload that does not
    /// match its declared shape.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported project version {0} (expected 1)")]
    UnsupportedVersion(u32),

    /// The stream ended before the named section was complete.
    #[error("Truncated file: unexpected end of data while reading {0}")]
    Truncated(&'static str),

    #[error("Unsupported file format '{0}'")]
    UnsupportedFormat(String),

    #[error("Unsupported pixel dtype '{0}'")]
    UnsupportedDtype(String),

    #[error("Could not decode '{}': {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Encode error: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Metadata error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = FileError> = std::result::Result<T, E>;
