//! Error taxonomy of the render pipeline.

use tessel_core::SceneError;
use thiserror::Error;

/// Broad category of a [`RenderError`], for callers that only need to
/// branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    InvalidState,
    OutOfMemory,
    Unknown,
}

/// Errors that can occur while configuring or rendering a frame.
#[derive(Error, Debug, Clone)]
pub enum RenderError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("out of memory allocating {what} ({bytes} bytes)")]
    OutOfMemory { what: &'static str, bytes: usize },

    #[error("{failed} of {total} tiles failed, first failure: {first}")]
    TilesFailed {
        failed: usize,
        total: usize,
        first: Box<RenderError>,
    },

    #[error("scene error: {0}")]
    Scene(#[from] SceneError),

    #[error("threading error: {0}")]
    Threading(String),
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RenderError::InvalidArgument(_) | RenderError::Scene(_) => ErrorKind::InvalidArgument,
            RenderError::InvalidState(_) => ErrorKind::InvalidState,
            RenderError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            RenderError::TilesFailed { first, .. } => first.kind(),
            RenderError::Threading(_) => ErrorKind::Unknown,
        }
    }
}

/// Result type for render operations.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Resize `buf` to `len` copies of `fill`, reporting allocation failure
/// instead of aborting.
pub(crate) fn try_fill<T: Clone>(
    buf: &mut Vec<T>,
    len: usize,
    fill: T,
    what: &'static str,
) -> Result<()> {
    buf.clear();
    buf.try_reserve_exact(len).map_err(|_| RenderError::OutOfMemory {
        what,
        bytes: len.saturating_mul(std::mem::size_of::<T>()),
    })?;
    buf.resize(len, fill);
    Ok(())
}
