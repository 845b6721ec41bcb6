//! The step cooker: workspace formatting, script emission, and the build
//! traversal that drives a recipe graph to completion.
//!
//! This crate owns the core engineering content of the orchestrator — the
//! rest of the workspace (`kiln-hash`, `kiln-state`, `kiln-archive`,
//! `kiln-sandbox`, `kiln-graph`, `kiln-config`) supplies the primitives it
//! composes. The recipe parser and package-graph generator are out of
//! scope; `kiln-graph`'s `GraphBuilder` stands in for them in tests and
//! the bundled demo CLI.

mod clean;
mod context;
mod cook;
mod error;
mod executor;
mod format;
mod script;

pub use clean::{CleanupPlan, apply as apply_cleanup, do_clean, plan as plan_cleanup};
pub use context::BuildContext;
pub use cook::cook;
pub use error::{BuildError, EngineError, Result};
pub use executor::{ExecOutcome, Executor, Invocation, ProcessExecutor, RecordingExecutor};
pub use format::{NameFormatter, apply as apply_formatter, touch_packages};

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_graph::{Graph, StepSpec, add_package};
    use kiln_state::StateStore;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn two_package_graph() -> (Graph, kiln_graph::PackageId, kiln_graph::PackageId) {
        let mut graph = Graph::new();
        let leaf = add_package(
            &mut graph,
            "leaf",
            StepSpec::new(kiln_hash::sha1_bytes(b"leaf-checkout")).with_script("echo checkout leaf\n"),
            StepSpec::new(kiln_hash::sha1_bytes(b"leaf-build")).with_script("echo build leaf\n"),
            StepSpec::new(kiln_hash::sha1_bytes(b"leaf-package")).with_script("echo package leaf\n"),
            Vec::new(),
        );
        let leaf_package_step = graph.package(leaf).package;

        let root = add_package(
            &mut graph,
            "root",
            StepSpec::new(kiln_hash::sha1_bytes(b"root-checkout")).with_script("echo checkout root\n"),
            StepSpec::new(kiln_hash::sha1_bytes(b"root-build")).with_script("echo build root\n"),
            StepSpec::new(kiln_hash::sha1_bytes(b"root-package")).with_script("echo package root\n"),
            vec![leaf_package_step],
        );

        (graph, leaf, root)
    }

    fn test_context(dir: &TempDir) -> BuildContext {
        let state = StateStore::open(&dir.path().join("state.json")).unwrap();
        BuildContext::new(
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
        )
    }

    #[test]
    fn formatter_assigns_distinct_paths_per_package() {
        let (mut graph, leaf, root) = two_package_graph();
        let dir = TempDir::new().unwrap();
        let mut ctx = test_context(&dir);

        let formatter = NameFormatter::release(dir.path().to_owned(), false);
        apply_formatter(&mut graph, &formatter, &mut ctx.state).unwrap();

        let leaf_build = graph.step(graph.package(leaf).build).workspace_path().to_owned();
        let root_build = graph.step(graph.package(root).build).workspace_path().to_owned();
        assert_ne!(leaf_build, root_build);
        assert!(leaf_build.ends_with("workspace"));
    }

    #[test]
    fn release_formatter_is_stable_across_reruns() {
        let (mut graph, leaf, _root) = two_package_graph();
        let dir = TempDir::new().unwrap();

        let first_path = {
            let mut ctx = test_context(&dir);
            let formatter = NameFormatter::release(dir.path().to_owned(), false);
            apply_formatter(&mut graph, &formatter, &mut ctx.state).unwrap();
            graph.step(graph.package(leaf).package).workspace_path().to_owned()
        };

        let mut graph2 = two_package_graph().0;
        let second_path = {
            let state = StateStore::open(&dir.path().join("state.json")).unwrap();
            let mut ctx = BuildContext::new(
                state,
                0,
                false,
                false,
                false,
                false,
                BTreeSet::new(),
                Vec::new(),
                false,
                PathBuf::from("/bob"),
                false,
            );
            let formatter = NameFormatter::release(dir.path().to_owned(), false);
            apply_formatter(&mut graph2, &formatter, &mut ctx.state).unwrap();
            graph2.step(graph2.package(leaf).package).workspace_path().to_owned()
        };

        assert_eq!(first_path, second_path);
    }
}
