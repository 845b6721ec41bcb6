//! A durable, single-writer key-value store for per-workspace build state.
//!
//! Backed by a single atomically-rewritten file (write-to-temp, rename) and
//! guarded for the process lifetime by an exclusive `flock()` on a sibling
//! lock file — the same mechanism `PathLock` uses elsewhere in the
//! workspace, just scoped to the whole store rather than one path.

mod error;
mod model;

pub use error::{Result, StateError};
pub use model::{DirectoryState, NameDirectoryKey, ResultHash};

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use error::IoContext as _;
use kiln_hash::Digest;
use model::StoreData;
use nix::fcntl::{Flock, FlockArg};

pub struct StateStore {
    path: PathBuf,
    data: StoreData,
    _lock: Flock<File>,
}

impl StateStore {
    /// Open (creating if absent) the state file at `path`, acquiring an
    /// exclusive lock for the lifetime of the returned value.
    pub fn open(path: &Path) -> Result<Self> {
        let lock_path = lock_path_for(path);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .io_context(&lock_path)?;

        let lock = Flock::lock(lock_file, FlockArg::LockExclusiveNonblock).map_err(|(_, _)| {
            StateError::Locked {
                path: path.to_owned(),
            }
        })?;

        let data = if path.exists() {
            let bytes = fs::read(path).io_context(path)?;
            serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt {
                path: path.to_owned(),
                source,
            })?
        } else {
            StoreData::default()
        };

        Ok(Self {
            path: path.to_owned(),
            data,
            _lock: lock,
        })
    }

    fn commit(&self) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(&self.data).expect("state data is serializable");
        fs::write(&tmp_path, &bytes).io_context(&tmp_path)?;
        fs::rename(&tmp_path, &self.path).io_context(&self.path)
    }

    // -- DirectoryState --------------------------------------------------

    pub fn directory_state(&self, workspace: &Path) -> Option<&DirectoryState> {
        self.data.directory_state.get(workspace)
    }

    pub fn set_directory_state(&mut self, workspace: &Path, state: DirectoryState) -> Result<()> {
        self.data
            .directory_state
            .insert(workspace.to_owned(), state);
        self.commit()
    }

    pub fn delete_directory_state(&mut self, workspace: &Path) -> Result<()> {
        self.data.directory_state.remove(workspace);
        self.commit()
    }

    // -- InputHashes ------------------------------------------------------

    pub fn input_hashes(&self, workspace: &Path) -> Option<&[ResultHash]> {
        self.data.input_hashes.get(workspace).map(Vec::as_slice)
    }

    pub fn set_input_hashes(&mut self, workspace: &Path, hashes: Vec<ResultHash>) -> Result<()> {
        self.data.input_hashes.insert(workspace.to_owned(), hashes);
        self.commit()
    }

    pub fn delete_input_hashes(&mut self, workspace: &Path) -> Result<()> {
        self.data.input_hashes.remove(workspace);
        self.commit()
    }

    // -- ResultHash -------------------------------------------------------

    pub fn result_hash(&self, workspace: &Path) -> Option<ResultHash> {
        self.data.result_hash.get(workspace).copied()
    }

    pub fn set_result_hash(&mut self, workspace: &Path, hash: ResultHash) -> Result<()> {
        self.data.result_hash.insert(workspace.to_owned(), hash);
        self.commit()
    }

    pub fn delete_result_hash(&mut self, workspace: &Path) -> Result<()> {
        self.data.result_hash.remove(workspace);
        self.commit()
    }

    // -- NameDirectory ------------------------------------------------------

    pub fn name_directory_lookup(&self, key: &NameDirectoryKey) -> Option<&Path> {
        self.data
            .name_directory
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_path())
    }

    pub fn name_directory_assign(&mut self, key: NameDirectoryKey, path: PathBuf) -> Result<()> {
        match self.data.name_directory.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = path,
            None => self.data.name_directory.push((key, path)),
        }
        self.commit()
    }

    /// All physical directories the store currently knows about, for the
    /// cleanup sweeper to diff against the live recipe graph's closure.
    pub fn all_name_directory_paths(&self) -> Vec<PathBuf> {
        self.data.name_directory.iter().map(|(_, v)| v.clone()).collect()
    }

    /// Every `NameDirectoryKey` already assigned under a given logical
    /// path, so the release formatter can hand a fresh digest the next
    /// free numbered slot instead of colliding with one already taken.
    pub fn name_directory_keys_under(&self, logical_path: &Path) -> Vec<&NameDirectoryKey> {
        self.data
            .name_directory
            .iter()
            .map(|(k, _)| k)
            .filter(|k| k.logical_path == logical_path)
            .collect()
    }

    // -- SandboxState ------------------------------------------------------

    pub fn sandbox_state(&self) -> Option<Digest> {
        self.data.sandbox_state
    }

    pub fn set_sandbox_state(&mut self, digest: Option<Digest>) -> Result<()> {
        self.data.sandbox_state = digest;
        self.commit()
    }

    /// Remove every key in `directory_state`/`input_hashes`/`result_hash`
    /// whose workspace path is not in `keep`, used by the cleanup sweeper
    /// after it has physically removed the corresponding directories.
    pub fn retain_workspaces(&mut self, keep: &BTreeSet<PathBuf>) -> Result<()> {
        self.data.directory_state.retain(|k, _| keep.contains(k));
        self.data.input_hashes.retain(|k, _| keep.contains(k));
        self.data.result_hash.retain(|k, _| keep.contains(k));
        self.data.name_directory.retain(|(_, v)| keep.contains(v));
        self.commit()
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_owned();
    name.push(".lock");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn roundtrips_directory_state() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        let workspace = dir.path().join("work/foo/build/workspace");
        let digest = kiln_hash::sha1_bytes(b"recipe");

        {
            let mut store = StateStore::open(&state_path).unwrap();
            store
                .set_directory_state(&workspace, DirectoryState::Simple(digest))
                .unwrap();
        }

        let store = StateStore::open(&state_path).unwrap();
        assert_eq!(
            store.directory_state(&workspace),
            Some(&DirectoryState::Simple(digest))
        );
    }

    #[test]
    fn second_open_while_locked_fails() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        let _store = StateStore::open(&state_path).unwrap();

        let err = StateStore::open(&state_path).unwrap_err();
        assert!(matches!(err, StateError::Locked { .. }));
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        {
            let _store = StateStore::open(&state_path).unwrap();
        }
        let _store = StateStore::open(&state_path).unwrap();
    }

    #[test]
    fn name_directory_is_stable_for_same_key() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        let mut store = StateStore::open(&state_path).unwrap();

        let key = NameDirectoryKey {
            logical_path: PathBuf::from("work/libfoo/build"),
            digest: kiln_hash::sha1_bytes(b"x"),
        };
        let assigned = dir.path().join("out/0001");
        store
            .name_directory_assign(key.clone(), assigned.clone())
            .unwrap();

        assert_eq!(store.name_directory_lookup(&key), Some(assigned.as_path()));
    }
}
