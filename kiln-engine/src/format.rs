//! Workspace formatters: map `(step, mode)` to an on-disk path.
//!
//! Two strategies, chosen once per build and applied in a single eager
//! pass over every step in the graph before the first `cook()` call — the
//! `workspace_path`/`exec_path` fields on `StepData` are filled in here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_graph::{Graph, Label, PackageId, StepId};
use kiln_hash::{Digest, as_hex};
use kiln_state::{NameDirectoryKey, StateStore};

use crate::error::Result;

/// Which physical-path strategy is in effect for this build.
pub enum NameFormatter {
    /// Digest-keyed, stable across runs: physical directories are numbered
    /// slots persisted in the state store's `NameDirectory` map, so the
    /// same (logical path, digest) pair always resolves to the same
    /// directory for the life of the state store (Invariant 3).
    Release { workspace_base: PathBuf, sandbox: bool },
    /// Human-friendly, stable only for the lifetime of one run: directories
    /// are numbered sequentially under `dev/<label>/<path>` the first time
    /// each digest is seen, memoized with two maps rather than one dict
    /// keyed by mixed value types (Open Question, resolved in DESIGN.md).
    Develop {
        workspace_base: PathBuf,
        next_counter: std::cell::RefCell<BTreeMap<PathBuf, u32>>,
        assigned: std::cell::RefCell<BTreeMap<(PathBuf, Digest), PathBuf>>,
    },
}

impl NameFormatter {
    pub fn release(workspace_base: PathBuf, sandbox: bool) -> Self {
        NameFormatter::Release { workspace_base, sandbox }
    }

    pub fn develop(workspace_base: PathBuf) -> Self {
        NameFormatter::Develop {
            workspace_base,
            next_counter: std::cell::RefCell::new(BTreeMap::new()),
            assigned: std::cell::RefCell::new(BTreeMap::new()),
        }
    }

    /// Resolve both `workspace_path` and `exec_path` for one step, reading
    /// only the fields this formatter needs (label, digest, owning package)
    /// and consulting/mutating the state store for the release formatter.
    fn resolve(
        &self,
        label: Label,
        package_path: &Path,
        digest: Digest,
        state: &mut StateStore,
    ) -> Result<(PathBuf, PathBuf)> {
        match self {
            NameFormatter::Release { workspace_base, sandbox } => {
                let logical_path = PathBuf::from("work").join(package_path).join(label.as_str());
                let key = NameDirectoryKey { logical_path: logical_path.clone(), digest };

                let physical = if let Some(existing) = state.name_directory_lookup(&key) {
                    existing.to_owned()
                } else {
                    let next = count_assigned_under(state, &logical_path) + 1;
                    let assigned = workspace_base.join(&logical_path).join(next.to_string());
                    state.name_directory_assign(key, assigned.clone())?;
                    assigned
                };

                let workspace_path = physical.join("workspace");
                let exec_path = if *sandbox {
                    PathBuf::from(as_hex(digest.as_bytes())).join("workspace")
                } else {
                    workspace_path.clone()
                };
                Ok((workspace_path, exec_path))
            }
            NameFormatter::Develop { workspace_base, next_counter, assigned } => {
                let base = PathBuf::from("dev").join(label.as_str()).join(package_path);
                let memo_key = (base.clone(), digest);

                let res = if let Some(existing) = assigned.borrow().get(&memo_key) {
                    existing.clone()
                } else {
                    let mut counters = next_counter.borrow_mut();
                    let n = counters.entry(base.clone()).or_insert(0);
                    *n += 1;
                    let res = workspace_base.join(&base).join(n.to_string());
                    drop(counters);
                    assigned.borrow_mut().insert(memo_key, res.clone());
                    res
                };

                let workspace_path = res.join("workspace");
                Ok((workspace_path.clone(), workspace_path))
            }
        }
    }
}

/// Count NameDirectory entries already scoped under `logical_path`, so a
/// fresh digest under the same path gets the next free slot rather than
/// colliding with an already-assigned one.
fn count_assigned_under(state: &StateStore, logical_path: &Path) -> u32 {
    state.name_directory_keys_under(logical_path).len() as u32
}

/// Apply `formatter` to every step in `graph`, filling in `workspace_path`
/// and `exec_path`. Must run exactly once, before the first `cook()` call.
pub fn apply(graph: &mut Graph, formatter: &NameFormatter, state: &mut StateStore) -> Result<()> {
    let ids: Vec<StepId> = graph.package_ids().flat_map(|p| graph.package_steps(p)).collect();
    for step_id in ids {
        assign_one(graph, step_id, formatter, state)?;
    }
    Ok(())
}

fn assign_one(
    graph: &mut Graph,
    step_id: StepId,
    formatter: &NameFormatter,
    state: &mut StateStore,
) -> Result<()> {
    let step = graph.step(step_id);
    if step.workspace_path.is_some() {
        return Ok(());
    }
    let label = step.label;
    let digest = step.digest;
    let package_path = graph.package(step.package).path.clone();

    let (workspace_path, exec_path) = formatter.resolve(label, &package_path, digest, state)?;

    let step = graph.step_mut(step_id);
    step.workspace_path = Some(workspace_path);
    step.exec_path = Some(exec_path);
    Ok(())
}

/// `kiln dev`'s pre-pass: walk every requested root's full transitive
/// closure and force every step's workspace path to be assigned up front,
/// so the develop formatter's numbering is stable across runs that later
/// cook only a subset (e.g. `--no-deps`).
pub fn touch_packages(
    graph: &mut Graph,
    roots: &[PackageId],
    formatter: &NameFormatter,
    state: &mut StateStore,
) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    let mut stack: Vec<PackageId> = roots.to_vec();
    while let Some(pkg_id) = stack.pop() {
        if !seen.insert(pkg_id) {
            continue;
        }
        for step_id in graph.package_steps(pkg_id) {
            assign_one(graph, step_id, formatter, state)?;
            let deps: Vec<PackageId> = graph
                .step(step_id)
                .all_dep_steps
                .iter()
                .map(|s| graph.step(*s).package)
                .collect();
            stack.extend(deps);
        }
    }
    Ok(())
}
