//! End-to-end scenario tests (A-F from the design notes): a two-package
//! graph {root depends on leaf}, driven through `cook()` with a real
//! (tempdir-backed) state store and filesystem, but a [`RecordingExecutor`]
//! standing in for the real wrapper-script subprocess — assertions are made
//! against the recorded invocation list and the state store, never against
//! anything a real `/bin/bash` would have produced, so the suite stays
//! hermetic and has no dependency on a shell being present on the host.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use kiln_archive::{Archive, LocalArchive};
use kiln_engine::{BuildContext, RecordingExecutor, apply_formatter, cook};
use kiln_graph::{Graph, PackageId, StepSpec, add_package};
use kiln_state::StateStore;
use tempfile::TempDir;

fn two_package_graph(leaf_build_digest_seed: &[u8], leaf_package_deterministic: bool) -> (Graph, PackageId, PackageId) {
    let mut graph = Graph::new();

    let leaf_package_digest = kiln_hash::sha1_bytes(b"leaf-package-v1");
    let mut leaf_package_spec = StepSpec::new(leaf_package_digest).with_script("package leaf\n");
    if leaf_package_deterministic {
        leaf_package_spec = leaf_package_spec.with_build_id(leaf_package_digest.combine([]));
    }

    let leaf = add_package(
        &mut graph,
        "leaf",
        StepSpec::new(kiln_hash::sha1_bytes(b"leaf-checkout-v1")).with_script("checkout leaf\n"),
        StepSpec::new(kiln_hash::sha1_bytes(leaf_build_digest_seed)).with_script("build leaf\n"),
        leaf_package_spec,
        Vec::new(),
    );
    let leaf_package_step = graph.package(leaf).package;

    let root = add_package(
        &mut graph,
        "root",
        StepSpec::new(kiln_hash::sha1_bytes(b"root-checkout-v1")).with_script("checkout root\n"),
        StepSpec::new(kiln_hash::sha1_bytes(b"root-build-v1")).with_script("build root\n"),
        StepSpec::new(kiln_hash::sha1_bytes(b"root-package-v1")).with_script("package root\n"),
        vec![leaf_package_step],
    );

    (graph, leaf, root)
}

/// A fresh `BuildContext` over its own state store, with a
/// [`RecordingExecutor`] installed; returns a handle to the recorder so
/// callers can inspect what it saw after `cook()` returns.
fn fresh_context(dir: &TempDir) -> (BuildContext, Arc<RecordingExecutor>) {
    let state = StateStore::open(&dir.path().join("state.json")).unwrap();
    let mut ctx = BuildContext::new(
        state,
        0,
        false,
        false,
        false,
        false,
        BTreeSet::from(["PATH".to_string()]),
        Vec::new(),
        false,
        PathBuf::from("/bob"),
        false,
    );
    let recorder = Arc::new(RecordingExecutor::new());
    ctx.set_executor(recorder.clone());
    (ctx, recorder)
}

fn all_step_workspaces(graph: &Graph, pkg: PackageId) -> [PathBuf; 3] {
    graph
        .package_steps(pkg)
        .map(|step_id| graph.step(step_id).workspace_path().to_owned())
}

/// Scenario A: an empty state store builds leaf then root, returning root's
/// package workspace; every one of the six steps spawns its wrapper script
/// exactly once and commits a ResultHash.
#[tokio::test]
async fn scenario_a_cold_build_runs_every_step_once() {
    let dir = TempDir::new().unwrap();
    let (mut graph, leaf, root) = two_package_graph(b"leaf-build-v1", true);
    let (mut ctx, recorder) = fresh_context(&dir);

    let formatter = kiln_engine::NameFormatter::release(dir.path().to_owned(), false);
    apply_formatter(&mut graph, &formatter, &mut ctx.state).unwrap();

    let steps = graph.package_steps(root).to_vec();
    let result = cook(&graph, &mut ctx, &steps, root, 0).await.unwrap();

    assert!(result.ends_with("workspace"));
    assert_eq!(recorder.invocations().len(), 6);

    for pkg in [leaf, root] {
        for workspace in all_step_workspaces(&graph, pkg) {
            assert!(ctx.state.result_hash(&workspace).is_some(), "missing ResultHash for {}", workspace.display());
            assert_eq!(recorder.count_for(workspace.parent().unwrap()), 1);
        }
    }
}

/// Scenario B: repeating A unchanged against the same state store skips
/// every step — zero wrapper-script invocations — while leaving the
/// persisted ResultHashes exactly as they were.
#[tokio::test]
async fn scenario_b_warm_rerun_spawns_nothing() {
    let dir = TempDir::new().unwrap();

    let first_hash = {
        let (mut graph, _leaf, root) = two_package_graph(b"leaf-build-v1", true);
        let (mut ctx, _recorder) = fresh_context(&dir);
        let formatter = kiln_engine::NameFormatter::release(dir.path().to_owned(), false);
        apply_formatter(&mut graph, &formatter, &mut ctx.state).unwrap();
        let steps = graph.package_steps(root).to_vec();
        cook(&graph, &mut ctx, &steps, root, 0).await.unwrap();
        ctx.state.result_hash(graph.step(graph.package(root).package).workspace_path())
    };

    let (mut graph, _leaf, root) = two_package_graph(b"leaf-build-v1", true);
    let (mut ctx, recorder) = fresh_context(&dir);
    let formatter = kiln_engine::NameFormatter::release(dir.path().to_owned(), false);
    apply_formatter(&mut graph, &formatter, &mut ctx.state).unwrap();
    let steps = graph.package_steps(root).to_vec();
    cook(&graph, &mut ctx, &steps, root, 0).await.unwrap();
    let second_hash = ctx.state.result_hash(graph.step(graph.package(root).package).workspace_path());

    assert!(recorder.invocations().is_empty());
    assert_eq!(first_hash, second_hash);
}

/// Scenario C: leaf's build script changes (a new Digest). leaf's build
/// step PRUNEs and re-executes, which cascades through leaf's package step
/// (its InputHashes now disagree) and root's build/package steps in turn
/// (the new graph-builder wiring feeds a build step's own dependency
/// package into its `arguments`, same as a package step) — but leaf's
/// checkout step is untouched, so it stays skipped.
#[tokio::test]
async fn scenario_c_recipe_edit_cascades_to_dependents_but_not_checkout() {
    let dir = TempDir::new().unwrap();

    {
        let (mut graph, _leaf, root) = two_package_graph(b"leaf-build-v1", true);
        let (mut ctx, _recorder) = fresh_context(&dir);
        let formatter = kiln_engine::NameFormatter::release(dir.path().to_owned(), false);
        apply_formatter(&mut graph, &formatter, &mut ctx.state).unwrap();
        let steps = graph.package_steps(root).to_vec();
        cook(&graph, &mut ctx, &steps, root, 0).await.unwrap();
    }

    let (mut graph, leaf, root) = two_package_graph(b"leaf-build-v2-edited", true);
    let (mut ctx, recorder) = fresh_context(&dir);
    let formatter = kiln_engine::NameFormatter::release(dir.path().to_owned(), false);
    apply_formatter(&mut graph, &formatter, &mut ctx.state).unwrap();
    let steps = graph.package_steps(root).to_vec();
    cook(&graph, &mut ctx, &steps, root, 0).await.unwrap();

    let leaf_checkout = graph.step(graph.package(leaf).checkout).workspace_path();
    let leaf_build = graph.step(graph.package(leaf).build).workspace_path();
    let leaf_package = graph.step(graph.package(leaf).package).workspace_path();
    let root_build = graph.step(graph.package(root).build).workspace_path();
    let root_package = graph.step(graph.package(root).package).workspace_path();

    assert_eq!(recorder.count_for(leaf_checkout.parent().unwrap()), 0, "leaf checkout must stay skipped");
    assert_eq!(recorder.count_for(leaf_build.parent().unwrap()), 1);
    assert_eq!(recorder.count_for(leaf_package.parent().unwrap()), 1);
    assert_eq!(recorder.count_for(root_build.parent().unwrap()), 1);
    assert_eq!(recorder.count_for(root_package.parent().unwrap()), 1);
    assert_eq!(recorder.invocations().len(), 4);
}

/// Scenario D: an HTTP-less local archive holds root's BuildId; deleting
/// root's workspace and rebuilding with `download_depth = 0` resolves it
/// from the archive instead of executing any step, and a later run (with
/// no archive configured at all) still skips because the result was
/// persisted.
#[tokio::test]
async fn scenario_d_download_path_skips_local_execution() {
    let work_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();

    let (mut graph, leaf, _root) = two_package_graph(b"leaf-build-v1", true);
    let leaf_package_step = graph.package(leaf).package;
    let build_id = graph.step(leaf_package_step).build_id.unwrap();

    let seeded = TempDir::new().unwrap();
    std::fs::write(seeded.path().join("out.txt"), "from-archive").unwrap();
    let archive = LocalArchive::new(archive_dir.path());
    archive.upload(build_id, seeded.path()).unwrap();

    let (mut ctx, recorder) = fresh_context(&work_dir);
    ctx.set_archive(Archive::Local(archive));
    ctx.set_download_depth(0);

    let formatter = kiln_engine::NameFormatter::release(work_dir.path().to_owned(), false);
    apply_formatter(&mut graph, &formatter, &mut ctx.state).unwrap();

    let leaf_steps = graph.package_steps(leaf).to_vec();
    cook(&graph, &mut ctx, &leaf_steps, leaf, 0).await.unwrap();

    let leaf_workspace = graph.step(leaf_package_step).workspace_path();
    assert_eq!(std::fs::read_to_string(leaf_workspace.join("out.txt")).unwrap(), "from-archive");
    assert!(ctx.state.result_hash(leaf_workspace).is_some());
    // Only leaf's checkout+build ran; the package step resolved from the
    // archive rather than spawning its own wrapper script.
    assert_eq!(recorder.count_for(leaf_workspace.parent().unwrap()), 0);

    // Re-run with no archive at all: the persisted ResultHash is enough to
    // skip the package step entirely, without re-attempting a download.
    let (mut graph2, leaf2, _root2) = two_package_graph(b"leaf-build-v1", true);
    let (mut ctx2, recorder2) = fresh_context(&work_dir);
    let formatter2 = kiln_engine::NameFormatter::release(work_dir.path().to_owned(), false);
    apply_formatter(&mut graph2, &formatter2, &mut ctx2.state).unwrap();
    let leaf_steps2 = graph2.package_steps(leaf2).to_vec();
    cook(&graph2, &mut ctx2, &leaf_steps2, leaf2, 0).await.unwrap();
    assert!(recorder2.invocations().is_empty());
}

/// Scenario E: the archive already holds the artifact for this BuildId, so
/// even when `--upload` is requested after a genuine local build, the
/// archive backend's HEAD-equivalent check finds it already present and
/// skips the write — the archived bytes are untouched.
#[tokio::test]
async fn scenario_e_upload_skips_when_archive_already_has_the_artifact() {
    let work_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();

    let (mut graph, leaf, _root) = two_package_graph(b"leaf-build-v1", true);
    let leaf_package_step = graph.package(leaf).package;
    let build_id = graph.step(leaf_package_step).build_id.unwrap();

    let seeded = TempDir::new().unwrap();
    std::fs::write(seeded.path().join("marker.txt"), "pre-existing artifact").unwrap();
    let archive = LocalArchive::new(archive_dir.path());
    archive.upload(build_id, seeded.path()).unwrap();
    let archived_path = archive_dir.path().join(kiln_archive::ArchiveKey::derive(build_id).relative_path());
    let mtime_before = std::fs::metadata(&archived_path).unwrap().modified().unwrap();

    let (mut ctx, recorder) = fresh_context(&work_dir);
    ctx.set_archive(Archive::Local(archive));
    // Never resolve from the archive locally, forcing a real (recorded)
    // build so the upload path at the end of `cook_package_step` runs.
    ctx.set_download_depth(u32::MAX);
    ctx.set_upload(true);

    let formatter = kiln_engine::NameFormatter::release(work_dir.path().to_owned(), false);
    apply_formatter(&mut graph, &formatter, &mut ctx.state).unwrap();

    let leaf_steps = graph.package_steps(leaf).to_vec();
    cook(&graph, &mut ctx, &leaf_steps, leaf, 0).await.unwrap();

    let leaf_workspace = graph.step(leaf_package_step).workspace_path();
    assert_eq!(recorder.count_for(leaf_workspace.parent().unwrap()), 1, "package step must have built locally");

    let mtime_after = std::fs::metadata(&archived_path).unwrap().modified().unwrap();
    assert_eq!(mtime_before, mtime_after, "archive must not be rewritten when the artifact is already present");
    let still_seeded = std::fs::read_to_string(seeded.path().join("marker.txt")).unwrap();
    assert_eq!(still_seeded, "pre-existing artifact");
}
