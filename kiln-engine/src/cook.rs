//! The step cooker: the depth-first traversal that decides, for every step
//! in a recipe graph, whether to skip, download, or execute it.
//!
//! `cook()` recurses into itself (directly, and indirectly through the
//! per-kind handlers below) with an unbounded depth determined by the
//! recipe graph's shape, so it is boxed to break the otherwise
//! infinitely-sized generated future.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use kiln_graph::{Graph, PackageId, StepId, StepKind};
use kiln_hash::Digest;
use kiln_state::{DirectoryState, ResultHash};

use crate::context::BuildContext;
use crate::error::{EngineError, IoContext as _, Result};
use crate::executor::{ExecOutcome, Invocation};
use crate::script;

/// Public entry point: cook every step in `steps` (already topologically
/// compatible — a package's checkout/build/package triplet in that order),
/// returning the workspace path of the last step visited.
pub fn cook<'a>(
    graph: &'a Graph,
    ctx: &'a mut BuildContext,
    steps: &'a [StepId],
    parent_package: PackageId,
    depth: u32,
) -> BoxFuture<'a, Result<PathBuf>> {
    Box::pin(async move {
        let filtered: Vec<StepId> = if ctx.no_deps {
            steps
                .iter()
                .copied()
                .filter(|s| graph.step(*s).package == parent_package)
                .collect()
        } else {
            steps.to_vec()
        };

        let saved_announced = ctx.announced_package();
        let result = cook_filtered(graph, ctx, &filtered, depth).await;
        ctx.set_announced_package(saved_announced);
        result
    })
}

async fn cook_filtered(
    graph: &Graph,
    ctx: &mut BuildContext,
    steps: &[StepId],
    depth: u32,
) -> Result<PathBuf> {
    let mut last_path: Option<PathBuf> = None;

    for &step_id in steps.iter().rev() {
        if ctx.is_visited(step_id) {
            continue;
        }
        ctx.mark_visited(step_id);

        let step = graph.step(step_id);
        if !step.is_valid() {
            continue;
        }
        let package = step.package;

        if Some(package) != ctx.announced_package() {
            ctx.detail(format_args!("### {} ###", graph.package(package).name));
            ctx.set_announced_package(Some(package));
        }

        let dispatched = match step.kind {
            StepKind::Checkout => cook_checkout_step(graph, ctx, step_id, depth).await,
            StepKind::Build => cook_build_step(graph, ctx, step_id, depth).await,
            StepKind::Package => cook_package_step(graph, ctx, step_id, depth).await,
        };

        let path = dispatched.map_err(|e| e.push_frame(graph.package(package).name.clone()))?;
        last_path = Some(path);
    }

    Ok(last_path.unwrap_or_else(|| ctx.workspace_base_dir.clone()))
}

fn ensure_workspace(path: &Path) -> Result<bool> {
    if path.exists() {
        Ok(false)
    } else {
        std::fs::create_dir_all(path).io_context(path)?;
        Ok(true)
    }
}

fn empty_workspace(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path).io_context(path)?;
    }
    std::fs::create_dir_all(path).io_context(path)?;
    Ok(())
}

fn sibling_of(workspace_path: &Path) -> &Path {
    workspace_path
        .parent()
        .expect("workspace_path always has a parent")
}

/// Crude but dependency-free ISO-8601-ish timestamp used only to keep
/// attic directory names unique and sortable; not used for any comparison.
fn timestamp_now() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let days = secs / 86_400;
    let time_of_day = secs % 86_400;
    let (h, m, s) = (time_of_day / 3600, (time_of_day % 3600) / 60, time_of_day % 60);

    // Howard Hinnant's civil_from_days, days since 1970-01-01.
    let z = days as i64 + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m_num = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if m_num <= 2 { y + 1 } else { y };

    format!("{year:04}{m_num:02}{d:02}T{h:02}{m:02}{s:02}Z")
}

async fn rehash(workspace_path: &Path) -> Result<Digest> {
    let cache_path = sibling_of(workspace_path).join("cache.bin");
    kiln_hash::hash_directory(workspace_path, &cache_path)
        .await
        .io_context(workspace_path)
        .map_err(Into::into)
}

fn input_hashes_for(graph: &Graph, ctx: &BuildContext, arguments: &[StepId]) -> Vec<ResultHash> {
    arguments
        .iter()
        .map(|&arg| graph.step(arg))
        .filter(|arg| arg.is_valid())
        .map(|arg| {
            ctx.state
                .result_hash(arg.workspace_path())
                .unwrap_or(ResultHash::Timestamp(0))
        })
        .collect()
}

async fn execute(
    graph: &Graph,
    ctx: &mut BuildContext,
    step_id: StepId,
    phase: &str,
    sandbox_mounts: &BTreeMap<PathBuf, PathBuf>,
) -> Result<()> {
    let step = graph.step(step_id);
    let package_name = graph.package(step.package).name.clone();
    ctx.detail(format_args!("{package_name}: {phase}"));

    let wrapper_path = script::write_scripts(ctx, graph, step_id, phase, sandbox_mounts)?;

    let mut args = Vec::new();
    if ctx.verbose > 0 {
        args.extend(std::iter::repeat_n("-v", ctx.verbose as usize));
    } else if ctx.verbose < 0 {
        args.extend(std::iter::repeat_n("-q", (-ctx.verbose) as usize));
    }
    if ctx.preserve_env {
        args.push("-E");
    }
    args.push("run");

    let sibling = sibling_of(graph.step(step_id).workspace_path()).to_owned();
    let invocation = Invocation {
        wrapper_path: wrapper_path.clone(),
        args: args.into_iter().map(str::to_owned).collect(),
        cwd: sibling,
    };

    let outcome = ctx.executor.run(invocation).await.io_context(&wrapper_path)?;

    match outcome {
        ExecOutcome::Success => Ok(()),
        ExecOutcome::Aborted => Err(EngineError::Aborted { package: package_name }.into()),
        ExecOutcome::Failed(status) => Err(EngineError::StepFailed {
            package: package_name,
            status,
        }
        .into()),
    }
}

async fn cook_checkout_step(
    graph: &Graph,
    ctx: &mut BuildContext,
    step_id: StepId,
    depth: u32,
) -> Result<PathBuf> {
    let digest = graph.step(step_id).digest;
    if let Some(path) = ctx.already_run(digest) {
        let path = path.clone();
        ctx.detail(format_args!("{} reused", path.display()));
        return Ok(path);
    }

    let dep_steps = graph.step(step_id).all_dep_steps.clone();
    let package = graph.step(step_id).package;
    if !dep_steps.is_empty() {
        cook(graph, ctx, &dep_steps, package, depth + 1).await?;
    }

    let step = graph.step(step_id);
    let workspace_path = step.workspace_path().to_owned();
    let just_created = ensure_workspace(&workspace_path)?;

    let (old_scm, old_step_digest) = if just_created {
        ctx.state.delete_result_hash(&workspace_path)?;
        ctx.state.delete_directory_state(&workspace_path)?;
        (BTreeMap::new(), None)
    } else {
        match ctx.state.directory_state(&workspace_path) {
            Some(DirectoryState::Checkout { scm_directories, step_digest }) => {
                (scm_directories.clone(), Some(*step_digest))
            }
            _ => (BTreeMap::new(), None),
        }
    };

    let step = graph.step(step_id);
    let new_scm = step.scm_directories.clone();
    let has_result = ctx.state.result_hash(&workspace_path).is_some();

    let scm_changed = new_scm != old_scm || old_step_digest != Some(step.digest);

    let should_execute = if ctx.build_only && has_result {
        false
    } else {
        ctx.force || !step.deterministic || !has_result || scm_changed
    };

    if !should_execute {
        ctx.detail(format_args!("{} fixed package", workspace_path.display()));
        ctx.mark_run(digest, workspace_path.clone());
        return Ok(workspace_path);
    }

    let mut remaining = old_scm.clone();
    for (dir, old_digest) in &old_scm {
        if new_scm.get(dir) != Some(old_digest) {
            let abs_dir = ctx.workspace_base_dir.join(&workspace_path).join(dir);
            if abs_dir.exists() {
                let attic = sibling_of(&workspace_path).join("attic");
                std::fs::create_dir_all(ctx.workspace_base_dir.join(&attic)).io_context(&attic)?;
                let base_name = dir.file_name().map(PathBuf::from).unwrap_or_else(|| dir.clone());
                let dest = ctx
                    .workspace_base_dir
                    .join(&attic)
                    .join(format!("{}_{}", base_name.display(), timestamp_now()));
                std::fs::rename(&abs_dir, &dest).io_context(&abs_dir)?;
            }

            remaining.remove(dir);
            ctx.state.set_directory_state(
                &workspace_path,
                DirectoryState::Checkout {
                    scm_directories: remaining.clone(),
                    step_digest: old_step_digest.unwrap_or(step.digest),
                },
            )?;
        }
    }

    let sandbox_mounts = ctx.sandbox_mounts.clone();
    execute(graph, ctx, step_id, "checkout", &sandbox_mounts).await?;

    let result_digest = rehash(&workspace_path).await?;
    ctx.state.set_result_hash(&workspace_path, ResultHash::Digest(result_digest))?;
    ctx.state.set_directory_state(
        &workspace_path,
        DirectoryState::Checkout {
            scm_directories: new_scm,
            step_digest: step.digest,
        },
    )?;

    ctx.mark_run(digest, workspace_path.clone());
    Ok(workspace_path)
}

async fn cook_build_step(
    graph: &Graph,
    ctx: &mut BuildContext,
    step_id: StepId,
    depth: u32,
) -> Result<PathBuf> {
    let digest = graph.step(step_id).digest;
    if let Some(path) = ctx.already_run(digest) {
        let path = path.clone();
        ctx.detail(format_args!("{} reused", path.display()));
        return Ok(path);
    }

    let dep_steps = graph.step(step_id).all_dep_steps.clone();
    let package = graph.step(step_id).package;
    cook(graph, ctx, &dep_steps, package, depth + 1).await?;

    let step = graph.step(step_id);
    let workspace_path = step.workspace_path().to_owned();
    ensure_workspace(&workspace_path)?;

    let stored_state = ctx.state.directory_state(&workspace_path).cloned();
    let matches_digest = matches!(&stored_state, Some(DirectoryState::Simple(d)) if *d == step.digest);
    if !matches_digest {
        ctx.detail(format_args!("{} PRUNE", workspace_path.display()));
        empty_workspace(&workspace_path)?;
        ctx.state.delete_input_hashes(&workspace_path)?;
        ctx.state.delete_result_hash(&workspace_path)?;
        ctx.state
            .set_directory_state(&workspace_path, DirectoryState::Simple(step.digest))?;
    }

    let step = graph.step(step_id);
    let new_inputs = input_hashes_for(graph, ctx, &step.arguments);
    let stored_inputs = ctx.state.input_hashes(&workspace_path).map(|s| s.to_vec());

    if !ctx.force && stored_inputs.as_deref() == Some(new_inputs.as_slice()) {
        ctx.detail(format_args!("{} skipped", workspace_path.display()));
        ctx.mark_run(digest, workspace_path.clone());
        return Ok(workspace_path);
    }

    if ctx.clean_build {
        empty_workspace(&workspace_path)?;
    }

    let sandbox_mounts = ctx.sandbox_mounts.clone();
    execute(graph, ctx, step_id, "build", &sandbox_mounts).await?;

    ctx.state.set_result_hash(&workspace_path, ResultHash::now())?;
    ctx.state.set_input_hashes(&workspace_path, new_inputs)?;

    ctx.mark_run(digest, workspace_path.clone());
    Ok(workspace_path)
}

async fn cook_package_step(
    graph: &Graph,
    ctx: &mut BuildContext,
    step_id: StepId,
    depth: u32,
) -> Result<PathBuf> {
    let digest = graph.step(step_id).digest;
    if let Some(path) = ctx.already_run(digest) {
        let path = path.clone();
        ctx.detail(format_args!("{} reused", path.display()));
        return Ok(path);
    }

    let step = graph.step(step_id);
    let workspace_path = step.workspace_path().to_owned();
    ensure_workspace(&workspace_path)?;

    let stored_state = ctx.state.directory_state(&workspace_path).cloned();
    let matches_digest = matches!(&stored_state, Some(DirectoryState::Simple(d)) if *d == step.digest);
    if !matches_digest {
        ctx.detail(format_args!("{} PRUNE", workspace_path.display()));
        empty_workspace(&workspace_path)?;
        ctx.state.delete_input_hashes(&workspace_path)?;
        ctx.state.delete_result_hash(&workspace_path)?;
        ctx.state
            .set_directory_state(&workspace_path, DirectoryState::Simple(step.digest))?;
    }

    let build_id = graph.step(step_id).build_id;
    let has_result = ctx.state.result_hash(&workspace_path).is_some();
    let mut done_via_download = false;

    if let Some(build_id) = build_id {
        if depth >= ctx.download_depth {
            if !has_result {
                ctx.detail(format_args!("{} checking archive", workspace_path.display()));
                if ctx.archive.download(build_id, &workspace_path)? {
                    ctx.detail(format_args!("{} DOWNLOAD", workspace_path.display()));
                    ctx.state.delete_input_hashes(&workspace_path)?;
                    done_via_download = true;
                }
            } else {
                ctx.detail(format_args!("{} deterministic output", workspace_path.display()));
                ctx.mark_run(digest, workspace_path.clone());
                return Ok(workspace_path);
            }
        }
    }

    let mut executed = done_via_download;

    if !done_via_download {
        let dep_steps = graph.step(step_id).all_dep_steps.clone();
        let package = graph.step(step_id).package;
        cook(graph, ctx, &dep_steps, package, depth + 1).await?;

        let step = graph.step(step_id);
        let new_inputs = input_hashes_for(graph, ctx, &step.arguments);
        let stored_inputs = ctx.state.input_hashes(&workspace_path).map(|s| s.to_vec());

        if !ctx.force && has_result && stored_inputs.as_deref() == Some(new_inputs.as_slice()) {
            ctx.detail(format_args!("{} skipped", workspace_path.display()));
            ctx.mark_run(digest, workspace_path.clone());
            return Ok(workspace_path);
        }

        empty_workspace(&workspace_path)?;
        let sandbox_mounts = ctx.sandbox_mounts.clone();
        execute(graph, ctx, step_id, "package", &sandbox_mounts).await?;
        executed = true;

        if let Some(build_id) = build_id {
            if ctx.do_upload {
                ctx.archive.upload(build_id, &workspace_path)?;
                ctx.detail(format_args!("{} UPLOAD", workspace_path.display()));
            }
        }

        ctx.state.set_input_hashes(&workspace_path, new_inputs)?;
    }

    if executed {
        let result_digest = rehash(&workspace_path).await?;
        ctx.state.set_result_hash(&workspace_path, ResultHash::Digest(result_digest))?;
    }

    ctx.mark_run(digest, workspace_path.clone());
    Ok(workspace_path)
}
