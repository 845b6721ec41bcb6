use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to pack {path} for upload: {source}")]
    Pack {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to extract archive into {path}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write archive into local backend at {path}: {source}")]
    LocalWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive server rejected upload with status {status}: {url}")]
    UploadRejected { url: String, status: u16 },
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
