use std::path::{Path, PathBuf};

use thiserror::Error;

/// Why a path was rejected by the source boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// The canonical target lies outside the allowed root.
    Escape,
    /// The symbolic link points at nothing.
    Broken,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Escape => write!(f, "Symbolic link escapes source root"),
            Self::Broken => write!(f, "Broken symbolic link"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Walkdir(#[from] walkdir::Error),

    #[error(transparent)]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("{kind}: {}", path.display())]
    BoundaryViolation { path: PathBuf, kind: ViolationKind },

    #[error("failed to acquire {origin}: {reason}")]
    SourceAcquisition { origin: String, reason: String },

    #[error("invalid marketplace.json at {}: {reason}", path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("invalid plugin source \"{source_path}\" for {name}: {reason}")]
    InvalidSubpackage {
        name: String,
        source_path: String,
        reason: String,
    },

    #[error("plugin \"{name}\" not found in marketplace")]
    SubpackageNotFound { name: String },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn boundary(path: &Path, kind: ViolationKind) -> Self {
        Self::BoundaryViolation {
            path: path.to_path_buf(),
            kind,
        }
    }

    #[must_use]
    pub fn acquisition(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceAcquisition {
            origin: origin.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn invalid_manifest(path: &Path, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn invalid_subpackage(
        name: impl Into<String>,
        source_path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidSubpackage {
            name: name.into(),
            source_path: source_path.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error was raised by the source boundary.
    #[must_use]
    pub fn is_boundary_violation(&self) -> bool {
        matches!(self, Self::BoundaryViolation { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
