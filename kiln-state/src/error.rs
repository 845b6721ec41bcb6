use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("state store at {path} is locked by another process")]
    Locked { path: PathBuf },

    #[error("failed to read or write state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Extension trait wrapping a bare [`io::Error`] with the path it concerns,
/// matching the `IoErrorContext`/`IoContext` convention used throughout the
/// rest of the workspace.
pub(crate) trait IoContext<T> {
    fn io_context(self, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|source| StateError::Io {
            path: path.to_owned(),
            source,
        })
    }
}
