//! Cleanup sweeper: reclaim workspaces the current recipe graph no longer
//! references.
//!
//! Walks the graph's closure from the requested roots to build the set of
//! paths still in use, diffs that against every physical directory the
//! state store knows about, and removes (or, in dry-run mode, just
//! reports) the rest.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use kiln_graph::{Graph, PackageId};
use kiln_state::StateStore;

use crate::context::BuildContext;
use crate::error::{EngineError, IoContext as _, Result};

/// Transitive closure of workspace paths referenced by `roots`: the
/// checkout and build workspace paths when the respective step is valid,
/// and the package workspace path unconditionally, recursing into every
/// direct dependency package.
fn collect_paths(graph: &Graph, roots: &[PackageId]) -> BTreeSet<PathBuf> {
    let mut seen_packages = BTreeSet::new();
    let mut paths = BTreeSet::new();
    let mut stack: Vec<PackageId> = roots.to_vec();

    while let Some(pkg_id) = stack.pop() {
        if !seen_packages.insert(pkg_id) {
            continue;
        }
        let pkg = graph.package(pkg_id);

        let checkout = graph.step(pkg.checkout);
        if checkout.is_valid() {
            paths.insert(checkout.workspace_path().to_owned());
        }
        let build = graph.step(pkg.build);
        if build.is_valid() {
            paths.insert(build.workspace_path().to_owned());
        }
        paths.insert(graph.step(pkg.package).workspace_path().to_owned());

        for &dep_step in &pkg.dep_steps {
            stack.push(graph.step(dep_step).package);
        }
    }

    paths
}

/// The physical directory one level above a `.../workspace` path. Every
/// `NameDirectory` entry is created by a `NameFormatter` and is therefore
/// guaranteed to end in this suffix; a path that doesn't is an internal
/// invariant violation, not a case to silently paper over.
fn owning_directory(workspace_path: &Path) -> Result<PathBuf> {
    workspace_path
        .to_str()
        .and_then(|s| s.strip_suffix("/workspace"))
        .map(PathBuf::from)
        .ok_or_else(|| {
            EngineError::MalformedWorkspacePath {
                path: workspace_path.to_owned(),
            }
            .into()
        })
}

/// The directories a cleanup pass would remove, computed without touching
/// the filesystem or the state store.
pub struct CleanupPlan {
    pub to_remove: Vec<PathBuf>,
}

pub fn plan(graph: &Graph, roots: &[PackageId], state: &StateStore) -> Result<CleanupPlan> {
    let mut referenced_dirs = BTreeSet::new();
    for workspace_path in collect_paths(graph, roots) {
        referenced_dirs.insert(owning_directory(&workspace_path)?);
    }

    let to_remove = state
        .all_name_directory_paths()
        .into_iter()
        .filter(|dir| !referenced_dirs.contains(dir))
        .collect();

    Ok(CleanupPlan { to_remove })
}

/// Execute `plan`: physically remove every directory it names (or, if
/// `dry_run`, only log what would be removed) and, on a real run, prune
/// the corresponding state-store entries.
pub fn apply(ctx: &mut BuildContext, plan: CleanupPlan, dry_run: bool) -> Result<()> {
    for dir in &plan.to_remove {
        if dry_run {
            log::info!("would remove {}", dir.display());
            continue;
        }
        log::info!("removing {}", dir.display());
        if dir.exists() {
            std::fs::remove_dir_all(dir).io_context(dir)?;
        }
    }

    if dry_run {
        return Ok(());
    }

    // `directory_state`/`input_hashes`/`result_hash` are keyed by the
    // `.../workspace` path, while `name_directory` is keyed by the owning
    // directory itself (see `NameFormatter::resolve`) — keep both forms
    // for every surviving directory so one `retain` pass satisfies all
    // four maps.
    let mut keep = BTreeSet::new();
    for dir in ctx.state.all_name_directory_paths() {
        if !plan.to_remove.contains(&dir) {
            keep.insert(dir.join("workspace"));
            keep.insert(dir);
        }
    }
    ctx.state.retain_workspaces(&keep)?;

    Ok(())
}

/// Convenience wrapper combining [`plan`] and [`apply`] into one call.
pub fn do_clean(ctx: &mut BuildContext, graph: &Graph, roots: &[PackageId], dry_run: bool) -> Result<usize> {
    let cleanup = plan(graph, roots, &ctx.state)?;
    let count = cleanup.to_remove.len();
    apply(ctx, cleanup, dry_run)?;
    Ok(count)
}
