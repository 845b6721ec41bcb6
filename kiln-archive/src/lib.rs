//! Deterministic-artifact archive backends.
//!
//! An archive is a write-once content-addressed blob store keyed by a
//! step's `BuildId`: if the build is fully deterministic, its output only
//! ever needs to be produced once across every workspace that ever asks
//! for it. Three backends are supported, modeled as a tagged enum rather
//! than a trait object — there are exactly three, and callers generally
//! want to match on which one is configured anyway (e.g. to skip the
//! download fast path entirely when archiving is off).

mod error;
mod http;
mod key;
mod local;
mod pack;

pub use error::{ArchiveError, Result};
pub use http::HttpArchive;
pub use key::ArchiveKey;
pub use local::LocalArchive;

use std::path::Path;

use kiln_hash::Digest;

/// The configured archive backend for a build.
#[derive(Debug, Clone)]
pub enum Archive {
    /// No archive configured: uploads are no-ops, downloads always miss.
    None,
    Local(LocalArchive),
    Http(HttpArchive),
}

impl Archive {
    /// Publish `path`'s contents under `build_id`. A no-op if an artifact
    /// for this key is already present.
    pub fn upload(&self, build_id: Digest, path: &Path) -> Result<()> {
        match self {
            Archive::None => Ok(()),
            Archive::Local(backend) => backend.upload(build_id, path),
            Archive::Http(backend) => backend.upload(build_id, path),
        }
    }

    /// Attempt to fetch `build_id`'s artifact into `path`. Returns `false`
    /// (not an error) if no such artifact exists or the backend was
    /// unreachable; returns an error only if the artifact was found but
    /// could not be extracted.
    pub fn download(&self, build_id: Digest, path: &Path) -> Result<bool> {
        match self {
            Archive::None => Ok(false),
            Archive::Local(backend) => backend.download(build_id, path),
            Archive::Http(backend) => backend.download(build_id, path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_backend_never_hits() {
        let archive = Archive::None;
        let build_id = kiln_hash::sha1_bytes(b"x");
        let dir = tempfile::TempDir::new().unwrap();
        assert!(!archive.download(build_id, dir.path()).unwrap());
        archive.upload(build_id, dir.path()).unwrap();
    }
}
