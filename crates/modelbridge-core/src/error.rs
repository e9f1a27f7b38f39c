//! Error taxonomy shared by the bridge, its engines and its callers.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Coarse classification of a [`BridgeError`], for callers that map errors
/// onto host exception types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Usage,
    Load,
    Shape,
    Internal,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed call, detected before anything is dispatched.
    #[error("Bad usage, {0}")]
    Usage(String),

    /// The engine could not open or parse a model file.
    #[error("Model loading failed for {}: {message}", .path.display())]
    Load { path: PathBuf, message: String },

    /// Inputs do not fit the shapes the model expects.
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// Any other engine or dispatcher failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    pub fn load(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Usage(_) => ErrorKind::Usage,
            Self::Load { .. } => ErrorKind::Load,
            Self::Shape(_) => ErrorKind::Shape,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Re-tag a failure raised while loading `path` as a load error.
    ///
    /// Load errors keep their own path; every other kind keeps its message.
    pub fn into_load_error(self, path: impl Into<PathBuf>) -> Self {
        match self {
            err @ Self::Load { .. } => err,
            Self::Usage(message) | Self::Shape(message) | Self::Internal(message) => {
                Self::load(path, message)
            }
        }
    }
}
