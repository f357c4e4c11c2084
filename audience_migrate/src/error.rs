//! Migration errors.

use std::path::PathBuf;

use audience_engine::AudienceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MigrateError>;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Audience(#[from] AudienceError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid remap pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid import configuration: {0}")]
    Config(String),

    #[error("audience element {index} ('{name}') failed: {source}")]
    ElementFailed {
        index: usize,
        name: String,
        #[source]
        source: AudienceError,
    },
}

impl MigrateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrateError::Io {
            path: path.into(),
            source,
        }
    }
}
