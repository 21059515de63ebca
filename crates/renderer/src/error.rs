//! Renderer error types.

use tessera_resources::ResourceError;
use tessera_rhi::RhiError;
use thiserror::Error;

use crate::material::{MaterialEvent, MaterialState};

/// Error type for recording, material and frame loop operations.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Vulkan or allocation failure.
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Worker pool or configuration failure.
    #[error(transparent)]
    Core(#[from] tessera_core::Error),

    /// Mesh, texture or upload failure.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// A material lifecycle event that is not legal in the current state.
    #[error("Material '{material}' cannot handle {event:?} in state {state:?}")]
    MaterialState {
        material: String,
        state: MaterialState,
        event: MaterialEvent,
    },

    /// A material was bound for drawing before it became active.
    #[error("Material '{material}' is not active (state {state:?})")]
    NotActive {
        material: String,
        state: MaterialState,
    },

    /// A textured material references a texture that is missing or not uploaded.
    #[error("Material '{material}' references a texture that is not uploaded")]
    TextureNotUploaded { material: String },

    /// The recorder was used out of order or with inconsistent inputs.
    #[error("Recorder error: {0}")]
    Recorder(String),
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_error_is_send() {
        fn assert_send<T: Send + 'static>() {}
        assert_send::<RenderError>();
    }

    #[test]
    fn test_wrapped_errors_are_transparent() {
        let err = RenderError::from(RhiError::PackError("empty".to_string()));
        assert_eq!(err.to_string(), "Pack error: empty");

        let err = RenderError::from(tessera_core::Error::Config("bad".to_string()));
        assert_eq!(err.to_string(), "Config error: bad");
    }
}
