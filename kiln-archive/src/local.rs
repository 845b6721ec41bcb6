use std::fs;
use std::path::{Path, PathBuf};

use kiln_hash::Digest;
use tempfile::NamedTempFile;

use crate::error::{ArchiveError, Result};
use crate::key::ArchiveKey;
use crate::pack;

/// Archive backend storing tarballs on a local (or network-mounted)
/// filesystem, keyed the same way as every other backend.
#[derive(Debug, Clone)]
pub struct LocalArchive {
    base_path: PathBuf,
}

impl LocalArchive {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn archive_path(&self, build_id: Digest) -> PathBuf {
        self.base_path.join(ArchiveKey::derive(build_id).relative_path())
    }

    pub fn upload(&self, build_id: Digest, path: &Path) -> Result<()> {
        let target = self.archive_path(build_id);
        if target.exists() {
            log::info!("UPLOAD skipped (already present): {}", target.display());
            return Ok(());
        }

        let parent = target.parent().expect("archive path always has a parent");
        fs::create_dir_all(parent).map_err(|source| ArchiveError::LocalWrite {
            path: target.clone(),
            source,
        })?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(|source| ArchiveError::LocalWrite {
            path: target.clone(),
            source,
        })?;
        pack::pack(path, tmp.as_file_mut())?;
        tmp.persist(&target).map_err(|e| ArchiveError::LocalWrite {
            path: target.clone(),
            source: e.error,
        })?;
        Ok(())
    }

    pub fn download(&self, build_id: Digest, path: &Path) -> Result<bool> {
        let source = self.archive_path(build_id);
        if !source.exists() {
            return Ok(false);
        }
        let file = fs::File::open(&source).map_err(|source_err| ArchiveError::Extract {
            path: path.to_owned(),
            source: source_err,
        })?;
        pack::unpack(file, path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn upload_then_download_round_trips() {
        let archive_dir = TempDir::new().unwrap();
        let backend = LocalArchive::new(archive_dir.path());

        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("out.txt"), "payload").unwrap();
        let build_id = kiln_hash::sha1_bytes(b"buildid");

        backend.upload(build_id, src.path()).unwrap();

        let dest = TempDir::new().unwrap();
        let downloaded = backend.download(build_id, dest.path()).unwrap();
        assert!(downloaded);
        assert_eq!(
            std::fs::read_to_string(dest.path().join("out.txt")).unwrap(),
            "payload"
        );
    }

    #[test]
    fn download_missing_key_returns_false() {
        let archive_dir = TempDir::new().unwrap();
        let backend = LocalArchive::new(archive_dir.path());
        let dest = TempDir::new().unwrap();
        let build_id = kiln_hash::sha1_bytes(b"nope");
        assert!(!backend.download(build_id, dest.path()).unwrap());
    }

    #[test]
    fn second_upload_is_a_noop() {
        let archive_dir = TempDir::new().unwrap();
        let backend = LocalArchive::new(archive_dir.path());
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("a"), "1").unwrap();
        let build_id = kiln_hash::sha1_bytes(b"x");

        backend.upload(build_id, src.path()).unwrap();
        let archived = backend.archive_path(build_id);
        let modified_before = std::fs::metadata(&archived).unwrap().modified().unwrap();

        std::fs::write(src.path().join("a"), "2").unwrap();
        backend.upload(build_id, src.path()).unwrap();
        let modified_after = std::fs::metadata(&archived).unwrap().modified().unwrap();
        assert_eq!(modified_before, modified_after);
    }
}
