//! Sandbox rootfs image provisioning.
//!
//! Downloads, verifies, and extracts the root filesystem image the
//! `namespace-sandbox` binary chroots into. Provisioning is idempotent and
//! gated by a digest persisted in the state store, mirroring how checkout
//! and package steps gate re-execution on a recorded digest rather than
//! re-downloading on every invocation.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use kiln_hash::Digest;
use kiln_state::StateStore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to download sandbox image from {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("downloaded sandbox image does not match checksum!")]
    ChecksumMismatch,

    #[error("failed to extract sandbox image into {path}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state store error: {0}")]
    State(#[from] kiln_state::StateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

/// The sandbox image configuration a recipe graph declares. An empty `url`
/// (or absent `digest_sha1`) means the sandbox is not used for this build.
#[derive(Debug, Clone, Default)]
pub struct SandboxSpec {
    pub url: String,
    pub digest_sha1: Option<Digest>,
    /// Host path -> in-sandbox path bind mounts the recipe set declares
    /// globally (`recipes.build_sandbox().mount`), independent of any one
    /// step's own dependency mounts.
    pub mount: std::collections::BTreeMap<PathBuf, PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    Disabled,
    Ready,
}

/// Ensure the sandbox rootfs under `<work_dir>/_sandbox` matches `spec`,
/// downloading and re-extracting it only if the persisted state disagrees
/// or the directory is missing.
pub fn provision(spec: &SandboxSpec, work_dir: &Path, state: &mut StateStore) -> Result<SandboxStatus> {
    let Some(digest) = spec.digest_sha1 else {
        return Ok(SandboxStatus::Disabled);
    };
    if spec.url.is_empty() {
        return Ok(SandboxStatus::Disabled);
    }

    let sandbox_dir = work_dir.join("_sandbox");
    if state.sandbox_state() == Some(digest) && sandbox_dir.exists() {
        return Ok(SandboxStatus::Ready);
    }

    log::info!("provisioning sandbox image from {}", spec.url);
    let mut tmp = tempfile::NamedTempFile::new_in(work_dir)?;
    download(&spec.url, tmp.as_file_mut())?;

    let actual = kiln_hash::hash_file_sync(tmp.path())?;
    if actual != digest {
        return Err(SandboxError::ChecksumMismatch);
    }

    if sandbox_dir.exists() {
        fs::remove_dir_all(&sandbox_dir)?;
    }
    fs::create_dir_all(&sandbox_dir)?;
    extract(tmp.path(), &sandbox_dir)?;

    state.set_sandbox_state(Some(digest))?;
    Ok(SandboxStatus::Ready)
}

fn download(url: &str, into: &mut fs::File) -> Result<()> {
    use std::io::Write as _;

    let response = ureq::get(url)
        .call()
        .map_err(|source| SandboxError::Download {
            url: url.to_owned(),
            source: Box::new(source),
        })?;
    let mut reader = response.into_reader();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        into.write_all(&buf[..n])?;
    }
    Ok(())
}

fn extract(archive_path: &Path, into: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(into)
        .map_err(|source| SandboxError::Extract {
            path: into.to_owned(),
            source,
        })
}
