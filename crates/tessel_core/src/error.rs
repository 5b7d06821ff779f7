//! Errors raised while assembling a scene.

use thiserror::Error;

/// Errors that can occur while building a world or its parts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("geometry '{kind}' has no primitives")]
    EmptyGeometry { kind: &'static str },

    #[error("geometry '{kind}': {reason}")]
    InvalidGeometry { kind: &'static str, reason: String },

    #[error("triangle {triangle} references vertex {index} of {vertex_count}")]
    IndexOutOfRange {
        triangle: usize,
        index: u32,
        vertex_count: usize,
    },

    #[error("unknown group id {0}")]
    UnknownGroup(usize),

    #[error("instance transform is not invertible")]
    SingularTransform,

    #[error("invalid camera: {0}")]
    InvalidCamera(String),
}

/// Result type for scene operations.
pub type SceneResult<T> = Result<T, SceneError>;
