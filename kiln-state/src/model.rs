use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::SystemTime;

use kiln_hash::Digest;
use serde::{Deserialize, Serialize};

/// The recorded digest(s) a workspace was last built against.
///
/// Checkout steps track a per-SCM-subdirectory digest (plus the step's own
/// digest under the dedicated `step` slot); build and package steps track a
/// single digest for the whole step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectoryState {
    Checkout {
        /// Digest per SCM subdirectory, relative to the workspace root.
        scm_directories: BTreeMap<PathBuf, Digest>,
        /// The step's own digest, independent of any one subdirectory.
        step_digest: Digest,
    },
    Simple(Digest),
}

/// A step's own summary hash after its last successful execution.
///
/// Checkout and package steps hash their output directory; build steps are
/// not content-addressed (their output is reused only via downstream input
/// hashes), so their ResultHash is a timestamp sentinel recording only
/// *that* a successful run happened, not compared by content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultHash {
    Digest(Digest),
    Timestamp(u64),
}

impl ResultHash {
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        ResultHash::Timestamp(secs)
    }
}

/// Key identifying a release-mode workspace slot: the logical package path
/// (e.g. `work/libfoo/build`) plus the digest that slot was assigned for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameDirectoryKey {
    pub logical_path: PathBuf,
    pub digest: Digest,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreData {
    #[serde(default)]
    pub directory_state: BTreeMap<PathBuf, DirectoryState>,
    #[serde(default)]
    pub input_hashes: BTreeMap<PathBuf, Vec<ResultHash>>,
    #[serde(default)]
    pub result_hash: BTreeMap<PathBuf, ResultHash>,
    /// `(NameDirectoryKey, PathBuf)` pairs rather than a map: `serde_json`
    /// requires map keys to serialize as strings, and `NameDirectoryKey` is
    /// a struct, not a string newtype.
    #[serde(default)]
    pub name_directory: Vec<(NameDirectoryKey, PathBuf)>,
    #[serde(default)]
    pub sandbox_state: Option<Digest>,
}
