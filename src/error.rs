//! Error taxonomy shared by the build pipeline components

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad or duplicate repository URL. No state is changed.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("repository not found: {0}")]
    NotFound(String),

    /// Clone, fetch or merge failure
    #[error("git sync failed for {url}: {message}")]
    Sync { url: String, message: String },

    #[error("build of {image} failed")]
    Build { image: String, output: String },

    #[error("publish of {image} failed")]
    Publish { image: String, output: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("notification failed: {0}")]
    Notification(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Captured command output attached to the error, if any
    pub fn output(&self) -> Option<&str> {
        match self {
            Error::Build { output, .. } | Error::Publish { output, .. } => Some(output),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
