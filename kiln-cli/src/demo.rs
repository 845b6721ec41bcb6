//! A small, self-contained package graph standing in for the (out-of-scope)
//! recipe parser and package-graph generator. A real recipe set would
//! expose `generate_packages`/`env_white_list`/`build_sandbox`/
//! `archive_spec`/`*_global_paths` from its own DSL; this module plays
//! that role for the bundled CLI so there is something real for the
//! engine to cook.

use std::collections::{BTreeMap, BTreeSet};

use kiln_graph::{Graph, PackageId, StepSpec, add_package};
use kiln_hash::Digest;

fn checkout_script(name: &str) -> String {
    format!("mkdir -p src\necho '{name} checkout' > src/VERSION\n")
}

fn build_script(name: &str) -> String {
    format!("mkdir -p out\necho '{name} build' > out/result\n")
}

fn package_script(name: &str) -> String {
    format!(
        "mkdir -p dist\ncp -r ../build/workspace/out/result dist/result 2>/dev/null || true\necho '{name} package' > dist/MANIFEST\n"
    )
}

fn step_digest(name: &str, phase: &str) -> Digest {
    kiln_hash::sha1_bytes(format!("kiln-demo::{name}::{phase}").as_bytes())
}

fn with_defines(mut spec: StepSpec, defines: &BTreeMap<String, Option<String>>) -> StepSpec {
    for (k, v) in defines {
        spec.env.insert(k.clone(), v.clone().unwrap_or_default());
    }
    spec
}

/// Build the bundled demo recipe graph:
///
/// - `zlib`: a leaf package with no dependencies, deterministic end to
///   end, so its package step carries a `BuildId` and is eligible for the
///   archive fast path.
/// - `toolbox`: a leaf package whose checkout is *not* deterministic, to
///   exercise the "always re-execute a non-deterministic checkout" rule.
/// - `app`: depends on both, never deterministic as a whole (inherits
///   `toolbox`'s non-determinism), so it has no `BuildId`.
pub fn build_graph(defines: &BTreeMap<String, Option<String>>) -> Graph {
    let mut graph = Graph::new();

    let zlib_package_digest = step_digest("zlib", "package");
    let zlib = add_package(
        &mut graph,
        "zlib",
        with_defines(
            StepSpec::new(step_digest("zlib", "checkout")).with_script(checkout_script("zlib")),
            defines,
        ),
        with_defines(StepSpec::new(step_digest("zlib", "build")).with_script(build_script("zlib")), defines),
        with_defines(
            StepSpec::new(zlib_package_digest)
                .with_script(package_script("zlib"))
                .with_build_id(zlib_package_digest.combine([])),
            defines,
        ),
        Vec::new(),
    );

    let toolbox = add_package(
        &mut graph,
        "toolbox",
        with_defines(
            StepSpec::new(step_digest("toolbox", "checkout"))
                .with_script(checkout_script("toolbox"))
                .non_deterministic(),
            defines,
        ),
        with_defines(StepSpec::new(step_digest("toolbox", "build")).with_script(build_script("toolbox")), defines),
        with_defines(
            StepSpec::new(step_digest("toolbox", "package")).with_script(package_script("toolbox")),
            defines,
        ),
        Vec::new(),
    );

    let zlib_pkg_step = graph.package(zlib).package;
    let toolbox_pkg_step = graph.package(toolbox).package;

    let app_package_digest = step_digest("app", "package");
    add_package(
        &mut graph,
        "app",
        with_defines(StepSpec::new(step_digest("app", "checkout")).with_script(checkout_script("app")), defines),
        with_defines(StepSpec::new(step_digest("app", "build")).with_script(build_script("app")), defines),
        with_defines(StepSpec::new(app_package_digest).with_script(package_script("app")), defines),
        vec![zlib_pkg_step, toolbox_pkg_step],
    );

    graph
}

/// Every package known to the demo graph, in declaration order.
pub fn all_package_names() -> Vec<&'static str> {
    vec!["zlib", "toolbox", "app"]
}

pub fn find_package(graph: &Graph, name: &str) -> Option<PackageId> {
    graph.package_ids().find(|&id| graph.package(id).name == name)
}

/// Baseline environment whitelist a real recipe set would declare via
/// `recipes.env_white_list()`.
pub fn env_white_list() -> BTreeSet<String> {
    BTreeSet::from([
        "PATH".to_string(),
        "HOME".to_string(),
        "TERM".to_string(),
        "USER".to_string(),
    ])
}

/// `recipes.build_global_paths()`: paths appended after every step's own
/// `PATH` entries when cooking in release mode.
pub fn build_global_paths() -> Vec<String> {
    vec!["/usr/bin".to_string(), "/bin".to_string()]
}

/// `recipes.dev_global_paths()`: as above, but for develop mode, which
/// conventionally also exposes the host's local bin directory.
pub fn dev_global_paths() -> Vec<String> {
    vec!["/usr/local/bin".to_string(), "/usr/bin".to_string(), "/bin".to_string()]
}
