use std::fs;
use std::io;
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive as TarArchive, Builder as TarBuilder};

use crate::error::{ArchiveError, Result};

/// Pack `path` into a gzip-compressed tar, with every member relative to
/// `path` itself (so `path` becomes `.` inside the archive, matching the
/// original's `tarfile.open(..., arcname=".")` behavior).
pub fn pack(path: &Path, into: &mut fs::File) -> Result<()> {
    let encoder = GzEncoder::new(into, Compression::default());
    let mut builder = TarBuilder::new(encoder);
    builder
        .append_dir_all(".", path)
        .map_err(|source| ArchiveError::Pack {
            path: path.to_owned(),
            source,
        })?;
    let encoder = builder
        .into_inner()
        .map_err(|source| ArchiveError::Pack {
            path: path.to_owned(),
            source,
        })?;
    encoder.finish().map_err(|source| ArchiveError::Pack {
        path: path.to_owned(),
        source,
    })?;
    Ok(())
}

/// Extract a gzip-compressed tar read from `from` into `path`, which is
/// removed and recreated first so a stale prior extraction never leaves
/// orphaned files behind.
pub fn unpack(from: impl io::Read, path: &Path) -> Result<()> {
    let extract = || -> io::Result<()> {
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        fs::create_dir_all(path)?;
        let decoder = GzDecoder::new(from);
        let mut archive = TarArchive::new(decoder);
        archive.unpack(path)?;
        Ok(())
    };
    extract().map_err(|source| ArchiveError::Extract {
        path: path.to_owned(),
        source,
    })
}
