use std::path::PathBuf;

use thiserror::Error;

pub type HotcopyResult<T> = Result<T, HotcopyError>;

#[derive(Debug, Error)]
pub enum HotcopyError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Ciphertext is not block aligned or its header is inconsistent.
    /// Either the file is corrupt or it was written under another key.
    #[error("format error: {0}")]
    Format(String),

    #[error("random source failure: {0}")]
    Random(String),

    #[error("watch error: {0}")]
    Watch(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HotcopyError {
    /// Wrap an `io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HotcopyError::Io {
            path: path.into(),
            source,
        }
    }
}
