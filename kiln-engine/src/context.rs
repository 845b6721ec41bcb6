//! The state threaded explicitly through every `cook()` call.
//!
//! Bundles verbosity, force/skip-deps/build-only/preserve-env flags, the
//! env white list, global paths, sandbox flag, bob root, and clean-build
//! flag, plus the archive handler, download policy and upload flag set
//! after construction, into one value passed by `&mut` reference down the
//! recursion rather than kept in module-level globals.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use kiln_archive::Archive;
use kiln_graph::{PackageId, StepId};
use kiln_hash::Digest;
use kiln_state::StateStore;

use crate::executor::{Executor, ProcessExecutor};

pub struct BuildContext {
    pub state: StateStore,
    pub archive: Archive,
    pub(crate) executor: Arc<dyn Executor>,

    pub verbose: i32,
    pub force: bool,
    pub no_deps: bool,
    pub build_only: bool,
    pub preserve_env: bool,
    pub clean_build: bool,
    pub do_upload: bool,
    pub download_depth: u32,

    pub env_white_list: BTreeSet<String>,
    pub global_paths: Vec<String>,

    pub exec_base_dir: PathBuf,
    pub workspace_base_dir: PathBuf,
    pub sandbox_enabled: bool,
    pub bob_root: PathBuf,
    /// Host path -> in-sandbox path bind mounts declared globally by the
    /// recipe set (`recipes.build_sandbox().mount`), forwarded verbatim
    /// into every sandboxed step's command line.
    pub sandbox_mounts: BTreeMap<PathBuf, PathBuf>,

    /// Package whose banner was last printed; restored by `cook()` on
    /// return so a caller's own banner reappears after a nested traversal.
    announced_package: Option<PackageId>,
    /// Digest -> workspace path, short-circuiting repeated visits to the
    /// same step across the *whole* traversal (not just one `cook()` call).
    run_memo: HashMap<Digest, PathBuf>,
    /// Steps already dispatched in this run, scoped to the whole build
    /// invocation (shared across every top-level `cook()` call the CLI
    /// front end makes for multiple requested packages), matching the
    /// original's function-lifetime `done` set.
    visited: BTreeSet<StepId>,
}

#[allow(clippy::too_many_arguments)]
impl BuildContext {
    pub fn new(
        state: StateStore,
        verbose: i32,
        force: bool,
        no_deps: bool,
        build_only: bool,
        preserve_env: bool,
        env_white_list: BTreeSet<String>,
        global_paths: Vec<String>,
        sandbox_enabled: bool,
        bob_root: PathBuf,
        clean_build: bool,
    ) -> Self {
        let workspace_base_dir = std::env::current_dir().unwrap_or_default();
        let exec_base_dir = if sandbox_enabled {
            PathBuf::from("/bob")
        } else {
            workspace_base_dir.clone()
        };

        Self {
            state,
            archive: Archive::None,
            executor: Arc::new(ProcessExecutor),
            verbose: verbose.clamp(-2, 2),
            force,
            no_deps,
            build_only,
            preserve_env,
            clean_build,
            do_upload: false,
            download_depth: 0,
            env_white_list,
            global_paths,
            exec_base_dir,
            workspace_base_dir,
            sandbox_enabled,
            bob_root,
            sandbox_mounts: BTreeMap::new(),
            announced_package: None,
            run_memo: HashMap::new(),
            visited: BTreeSet::new(),
        }
    }

    pub fn set_archive(&mut self, archive: Archive) {
        self.archive = archive;
    }

    pub fn set_executor(&mut self, executor: Arc<dyn Executor>) {
        self.executor = executor;
    }

    pub fn set_download_depth(&mut self, depth: u32) {
        self.download_depth = depth;
    }

    pub fn set_upload(&mut self, upload: bool) {
        self.do_upload = upload;
    }

    pub fn set_sandbox_mounts(&mut self, mounts: BTreeMap<PathBuf, PathBuf>) {
        self.sandbox_mounts = mounts;
    }

    pub(crate) fn announced_package(&self) -> Option<PackageId> {
        self.announced_package
    }

    pub(crate) fn set_announced_package(&mut self, id: Option<PackageId>) {
        self.announced_package = id;
    }

    pub(crate) fn already_run(&self, digest: Digest) -> Option<&PathBuf> {
        self.run_memo.get(&digest)
    }

    pub(crate) fn mark_run(&mut self, digest: Digest, path: PathBuf) {
        self.run_memo.insert(digest, path);
    }

    pub(crate) fn is_visited(&self, step: StepId) -> bool {
        self.visited.contains(&step)
    }

    pub(crate) fn mark_visited(&mut self, step: StepId) {
        self.visited.insert(step);
    }

    /// Printed only when not fully quiet, but always reachable through
    /// `RUST_LOG=debug` regardless of `-q`.
    pub(crate) fn detail(&self, msg: std::fmt::Arguments<'_>) {
        if self.verbose >= -1 {
            log::info!("{msg}");
        } else {
            log::debug!("{msg}");
        }
    }
}
