use std::fs;
use std::path::Path;

use kiln_hash::Digest;
use tempfile::NamedTempFile;

use crate::error::{ArchiveError, Result};
use crate::key::ArchiveKey;
use crate::pack;

/// Archive backend publishing tarballs to an HTTP(S) endpoint.
///
/// Upload does a HEAD first so re-uploading an already-present deterministic
/// artifact is a cheap no-op rather than a wasted PUT; download treats any
/// transport failure or non-2xx status as "not found" rather than fatal, so
/// the cooker falls back to a local build instead of aborting the whole run.
#[derive(Debug, Clone)]
pub struct HttpArchive {
    base_url: String,
}

impl HttpArchive {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    fn url_for(&self, build_id: Digest) -> String {
        format!("{}/{}", self.base_url, ArchiveKey::derive(build_id).relative_path())
    }

    pub fn upload(&self, build_id: Digest, path: &Path) -> Result<()> {
        let url = self.url_for(build_id);

        match ureq::head(&url).call() {
            Ok(response) if response.status() == 200 => {
                log::info!("UPLOAD skipped (already present): {url}");
                return Ok(());
            }
            Ok(response) if response.status() == 404 => {
                // proceed to PUT
            }
            Ok(response) => {
                return Err(ArchiveError::UploadRejected {
                    url,
                    status: response.status(),
                });
            }
            Err(ureq::Error::Status(404, _)) => {
                // proceed to PUT
            }
            Err(ureq::Error::Status(status, _)) => {
                return Err(ArchiveError::UploadRejected { url, status });
            }
            Err(ureq::Error::Transport(transport)) => {
                log::warn!("HEAD {url} failed: {transport}");
                return Err(ArchiveError::UploadRejected { url, status: 0 });
            }
        }

        let mut tmp = NamedTempFile::new().map_err(|source| ArchiveError::Pack {
            path: path.to_owned(),
            source,
        })?;
        pack::pack(path, tmp.as_file_mut())?;
        let body = fs::read(tmp.path()).map_err(|source| ArchiveError::Pack {
            path: path.to_owned(),
            source,
        })?;

        match ureq::put(&url)
            .set("Content-Type", "application/gzip")
            .send_bytes(&body)
        {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, _)) => {
                Err(ArchiveError::UploadRejected { url, status })
            }
            Err(ureq::Error::Transport(transport)) => {
                log::warn!("PUT {url} failed: {transport}");
                Err(ArchiveError::UploadRejected { url, status: 0 })
            }
        }
    }

    pub fn download(&self, build_id: Digest, path: &Path) -> Result<bool> {
        let url = self.url_for(build_id);
        let response = match ureq::get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, _)) => return Ok(false),
            Err(ureq::Error::Transport(transport)) => {
                log::warn!("GET {url} failed, falling back to local build: {transport}");
                return Ok(false);
            }
        };

        let mut reader = response.into_reader();
        pack::unpack(&mut reader, path)?;
        Ok(true)
    }
}
