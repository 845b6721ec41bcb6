//! Deterministic content hashing of a directory tree, with a persistent
//! mtime/size-indexed cache so unchanged files are never rehashed.
//!
//! Entry ordering inside the summary is always by name, so the resulting
//! digest is stable across runs and across platforms with different
//! `readdir` ordering (mirrors the sorted-key discipline the script emitter
//! also relies on for byte-stable output).

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write as _};
use std::os::unix::fs::MetadataExt as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Digest;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
struct CacheKey {
    inode: u64,
    mtime: i64,
    size: u64,
}

#[derive(Serialize, Deserialize, Clone, Copy)]
struct CacheEntry {
    key: CacheKey,
    digest: Digest,
}

#[derive(Serialize, Deserialize, Default)]
struct HashCache {
    #[serde(default)]
    files: BTreeMap<PathBuf, CacheEntry>,
}

impl HashCache {
    fn load(cache_path: &Path) -> Self {
        fs::read(cache_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    fn save(&self, cache_path: &Path) -> io::Result<()> {
        let tmp_path = cache_path.with_extension("tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            let bytes = serde_json::to_vec(self).map_err(io::Error::other)?;
            tmp.write_all(&bytes)?;
        }
        fs::rename(&tmp_path, cache_path)
    }
}

/// Hash a single regular file's content synchronously.
fn hash_file_sync(path: &Path) -> io::Result<Digest> {
    let mut file = fs::File::open(path)?;
    let mut buf = [0u8; 64 * 1024];
    let mut ctx = sha1::Sha1::default();
    loop {
        use sha1::Digest as _;
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.update(&buf[..n]);
    }
    use sha1::Digest as _;
    Ok(Digest::from_bytes(ctx.finalize().into()))
}

enum Entry {
    File(Digest),
    Symlink(PathBuf),
    Directory(Digest),
}

fn hash_entry(path: &Path, cache: &mut HashCache, rel: &Path) -> io::Result<Entry> {
    let metadata = fs::symlink_metadata(path)?;

    if metadata.is_symlink() {
        return Ok(Entry::Symlink(fs::read_link(path)?));
    }

    if metadata.is_dir() {
        return Ok(Entry::Directory(hash_directory_sync_rel(path, cache, rel)?));
    }

    let key = CacheKey {
        inode: metadata.ino(),
        mtime: metadata.mtime(),
        size: metadata.size(),
    };

    if let Some(cached) = cache.files.get(rel) {
        if cached.key == key {
            return Ok(Entry::File(cached.digest));
        }
    }

    let digest = hash_file_sync(path)?;
    cache.files.insert(
        rel.to_owned(),
        CacheEntry {
            key,
            digest,
        },
    );
    Ok(Entry::File(digest))
}

fn hash_directory_sync(path: &Path, cache: &mut HashCache) -> io::Result<Digest> {
    hash_directory_sync_rel(path, cache, Path::new(""))
}

/// As [`hash_directory_sync`], but `rel` is this directory's own path
/// relative to the hash root, so the cache keys recursed-into files by
/// their full relative path rather than bare basename — files sharing a
/// basename in different subdirectories must not collide in the cache.
fn hash_directory_sync_rel(path: &Path, cache: &mut HashCache, rel: &Path) -> io::Result<Digest> {
    let mut names: Vec<_> = fs::read_dir(path)?
        .map(|e| e.map(|e| e.file_name()))
        .collect::<Result<_, _>>()?;
    names.sort();

    let mut summary = Vec::new();
    for name in names {
        let child_path = path.join(&name);
        let child_rel = rel.join(&name);
        let entry = hash_entry(&child_path, cache, &child_rel)?;
        summary.extend_from_slice(name.to_string_lossy().as_bytes());
        summary.push(0);
        match entry {
            Entry::File(d) => {
                summary.extend_from_slice(b"f");
                summary.extend_from_slice(d.as_bytes());
            }
            Entry::Directory(d) => {
                summary.extend_from_slice(b"d");
                summary.extend_from_slice(d.as_bytes());
            }
            Entry::Symlink(target) => {
                summary.extend_from_slice(b"l");
                summary.extend_from_slice(target.to_string_lossy().as_bytes());
            }
        }
        summary.push(0);
    }
    Ok(crate::sha1_bytes(&summary))
}

/// Compute a deterministic content digest of the directory tree rooted at
/// `path`, using `cache_path` as a persistent per-file cache keyed by
/// (inode, mtime, size) to avoid rehashing files that have not changed
/// since the last call.
///
/// Runs on the blocking thread pool; the walk itself is synchronous.
pub async fn hash_directory(path: &Path, cache_path: &Path) -> io::Result<Digest> {
    let path = path.to_owned();
    let cache_path = cache_path.to_owned();
    tokio::task::spawn_blocking(move || {
        let mut cache = HashCache::load(&cache_path);
        let digest = hash_directory_sync(&path, &mut cache)?;
        cache.save(&cache_path)?;
        Ok(digest)
    })
    .await
    .map_err(io::Error::other)?
}
