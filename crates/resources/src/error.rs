//! Error types for resource preparation.

use std::path::PathBuf;

use tessera_rhi::RhiError;
use thiserror::Error;

/// Error type for mesh, material and texture operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Texture file not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Pixel buffer does not match `width * height * 4`.
    #[error("Invalid pixel data for '{name}': expected {expected} bytes, got {actual}")]
    InvalidPixelData {
        /// Texture name.
        name: String,
        /// Expected byte count.
        expected: usize,
        /// Actual byte count.
        actual: usize,
    },

    /// Mesh geometry cannot be drawn as an indexed triangle list.
    #[error("Invalid mesh '{name}': {reason}")]
    InvalidMesh {
        /// Mesh name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// GPU upload failed.
    #[error("Upload error: {0}")]
    Upload(#[from] RhiError),
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
