//! Content hashing and digest utilities.
//!
//! This crate provides the byte-to-hex and file/directory content hashing
//! primitives the rest of the workspace builds change detection on. It is
//! deliberately narrow: one digest algorithm (SHA-1), one digest type.

mod digest;
mod directory;
mod hashing_reader;

pub use digest::{Digest, MalformedDigest, as_hex};
pub use directory::hash_directory;
pub use hashing_reader::{HashState, HashingReader};

use std::io;
use std::path::Path;

/// Hash raw bytes in one shot.
pub fn sha1_bytes(data: &[u8]) -> Digest {
    use sha1::Digest as _;
    let mut ctx = sha1::Sha1::new();
    ctx.update(data);
    Digest::from_bytes(ctx.finalize().into())
}

/// Hash the content of a file, streaming it rather than loading it whole.
pub async fn hash_file(path: &Path) -> io::Result<Digest> {
    let file = tokio::fs::File::open(path).await?;
    let (mut reader, state) = HashingReader::new(file);
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    drop(reader);
    let state = std::sync::Arc::try_unwrap(state)
        .expect("reader dropped, no other HashState references remain")
        .into_inner()
        .unwrap();
    Ok(state.finish())
}

/// Synchronous counterpart to [`hash_file`], for callers outside a tokio
/// reactor (the sandbox provisioner runs before the async build traversal
/// starts).
pub fn hash_file_sync(path: &Path) -> io::Result<Digest> {
    use sha1::Digest as _;
    use std::io::Read as _;

    let mut file = std::fs::File::open(path)?;
    let mut ctx = sha1::Sha1::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.update(&buf[..n]);
    }
    Ok(Digest::from_bytes(ctx.finalize().into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use std::io::Write as _;

    #[tokio::test]
    async fn hash_file_matches_sha1_bytes() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"some content").unwrap();
        let digest = hash_file(f.path()).await.unwrap();
        assert_eq!(digest, sha1_bytes(b"some content"));
    }

    #[test]
    fn hex_round_trip() {
        let d = sha1_bytes(b"abc");
        assert_eq!(as_hex(d.as_bytes()).len(), 40);
    }

    #[test]
    fn hash_file_sync_matches_hash_file() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"some content").unwrap();
        let digest = hash_file_sync(f.path()).unwrap();
        assert_eq!(digest, sha1_bytes(b"some content"));
    }
}
