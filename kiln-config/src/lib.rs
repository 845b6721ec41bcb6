//! Layered TOML configuration, following the same shape used throughout
//! the workspace: a `#[serde(deny_unknown_fields)]` struct with
//! `default_*` functions per optional field, loaded from an explicit path
//! or a well-known environment variable / file fallback.

mod error;

pub use error::{ConfigError, Result};

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

fn default_state_file() -> PathBuf {
    PathBuf::from(".kiln/state.json")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_download() -> DownloadPolicy {
    DownloadPolicy::Yes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadPolicy {
    Yes,
    No,
    Deps,
}

impl DownloadPolicy {
    /// Traversal-depth threshold a package step must meet before a
    /// download is even attempted (see the step cooker's archive fast
    /// path): `Yes` tries at every depth, `Deps` only below the requested
    /// roots, `No` never.
    pub fn download_depth(self) -> u32 {
        match self {
            DownloadPolicy::Yes => 0,
            DownloadPolicy::Deps => 1,
            DownloadPolicy::No => u32::MAX,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
#[serde(deny_unknown_fields)]
pub enum ArchiveConfig {
    None,
    File { path: PathBuf },
    Http { url: String },
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig::None
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub digest_sha1: Option<String>,
    /// Host path -> in-sandbox path bind mounts declared globally by the
    /// recipe set, independent of any per-step dependency mount.
    #[serde(default)]
    pub mount: BTreeMap<PathBuf, PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub env_white_list: BTreeSet<String>,

    #[serde(default = "default_download")]
    pub download: DownloadPolicy,

    #[serde(default)]
    pub upload: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            state_file: default_state_file(),
            work_dir: default_work_dir(),
            archive: ArchiveConfig::default(),
            sandbox: SandboxConfig::default(),
            env_white_list: BTreeSet::new(),
            download: default_download(),
            upload: false,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Resolve configuration the way every binary in the workspace does: an
/// explicit `KILN_CONFIG` environment variable wins, otherwise a
/// `kiln.toml` in the current directory is used if present, otherwise the
/// built-in defaults apply.
pub fn load() -> Result<Config> {
    let config = match std::env::var_os("KILN_CONFIG") {
        Some(path) => Config::load(Path::new(&path))?,
        None => {
            let default_path = Path::new("kiln.toml");
            if default_path.exists() {
                Config::load(default_path)?
            } else {
                Config::default()
            }
        }
    };

    if matches!(&config.archive, ArchiveConfig::Http { url } if url.is_empty()) {
        return Err(ConfigError::Invalid {
            reason: "archive backend 'http' requires a non-empty url".to_string(),
        });
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use std::io::Write as _;

    #[test]
    fn defaults_when_no_file_present() {
        let config = Config::default();
        assert_eq!(config.work_dir, PathBuf::from("work"));
        assert!(matches!(config.archive, ArchiveConfig::None));
    }

    #[test]
    fn parses_http_archive_backend() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "work_dir = \"build\"\n[archive]\nbackend = \"http\"\nurl = \"https://example.invalid/archive\"").unwrap();
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.work_dir, PathBuf::from("build"));
        match config.archive {
            ArchiveConfig::Http { url } => assert_eq!(url, "https://example.invalid/archive"),
            other => panic!("expected http backend, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_fields() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "not_a_real_field = true").unwrap();
        assert!(Config::load(f.path()).is_err());
    }

    #[test]
    fn parses_sandbox_mount_map() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            "[sandbox]\nurl = \"https://example.invalid/sandbox.tgz\"\ndigest_sha1 = \"{}\"\n[sandbox.mount]\n\"/host/ccache\" = \"/ccache\"",
            "a".repeat(40)
        )
        .unwrap();
        let config = Config::load(f.path()).unwrap();
        assert_eq!(
            config.sandbox.mount.get(&PathBuf::from("/host/ccache")),
            Some(&PathBuf::from("/ccache"))
        );
    }
}
