//! A minimal in-memory graph assembler.
//!
//! Stands in for the (out-of-scope) recipe parser and package-graph
//! generator so the cooker can be exercised and tested end-to-end without
//! a real recipe DSL. Not intended to express arbitrary recipes — just
//! enough shape (checkout/build/package steps, dependency edges, digests)
//! for integration tests and the bundled demo CLI recipe.

use std::collections::BTreeMap;
use std::path::PathBuf;

use kiln_hash::Digest;

use crate::arena::Graph;
use crate::types::{Label, PackageData, StepData, StepId, StepKind};

pub struct StepSpec {
    pub digest: Digest,
    pub build_id: Option<Digest>,
    pub deterministic: bool,
    pub script: String,
    pub env: BTreeMap<String, String>,
}

impl StepSpec {
    pub fn new(digest: Digest) -> Self {
        Self {
            digest,
            build_id: None,
            deterministic: true,
            script: String::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = script.into();
        self
    }

    pub fn with_build_id(mut self, build_id: Digest) -> Self {
        self.build_id = Some(build_id);
        self
    }

    pub fn non_deterministic(mut self) -> Self {
        self.deterministic = false;
        self
    }
}

/// Adds one package (with its checkout/build/package steps) to a [`Graph`].
///
/// `dep_steps` are the *package* steps of already-added dependencies; they
/// become this package's `all_dep_steps`/`arguments` for its build and
/// package steps (checkout steps never depend on other packages' outputs).
pub fn add_package(
    graph: &mut Graph,
    name: impl Into<String>,
    checkout: StepSpec,
    build: StepSpec,
    package: StepSpec,
    dep_steps: Vec<StepId>,
) -> crate::types::PackageId {
    let name = name.into();
    add_package_at(graph, name.clone(), PathBuf::from(name), checkout, build, package, dep_steps)
}

/// As [`add_package`], but with an explicit logical workspace path distinct
/// from the package's display name (for recipes that nest packages under a
/// directory hierarchy).
pub fn add_package_at(
    graph: &mut Graph,
    name: impl Into<String>,
    path: PathBuf,
    checkout: StepSpec,
    build: StepSpec,
    package: StepSpec,
    dep_steps: Vec<StepId>,
) -> crate::types::PackageId {
    // Reserve step ids by pushing placeholders then patching `package`,
    // since StepData needs to know its own owning PackageId up front but
    // PackageData needs the StepIds that don't exist until after.
    let placeholder_package = graph.push_package(PackageData {
        name: name.into(),
        path,
        checkout: StepId(0),
        build: StepId(0),
        package: StepId(0),
        dep_steps: dep_steps.clone(),
    });

    let checkout_id = graph.push_step(StepData {
        kind: StepKind::Checkout,
        label: Label::Src,
        package: placeholder_package,
        digest: checkout.digest,
        build_id: None,
        deterministic: checkout.deterministic,
        arguments: Vec::new(),
        all_dep_steps: Vec::new(),
        scm_directories: BTreeMap::new(),
        env: checkout.env,
        paths: Vec::new(),
        library_paths: Vec::new(),
        tools: BTreeMap::new(),
        script: checkout.script,
        valid: true,
        workspace_path: None,
        exec_path: None,
    });

    let build_all_dep_steps = {
        let mut v = dep_steps.clone();
        v.push(checkout_id);
        v
    };

    let build_id_step = graph.push_step(StepData {
        kind: StepKind::Build,
        label: Label::Build,
        package: placeholder_package,
        digest: build.digest,
        build_id: None,
        deterministic: build.deterministic,
        // Same list as `all_dep_steps`: a build step's InputHashes (and the
        // positional args its script receives) cover both its checkout and
        // every package it depends on, mirroring the package step below.
        arguments: build_all_dep_steps.clone(),
        all_dep_steps: build_all_dep_steps,
        scm_directories: BTreeMap::new(),
        env: build.env,
        paths: Vec::new(),
        library_paths: Vec::new(),
        tools: BTreeMap::new(),
        script: build.script,
        valid: true,
        workspace_path: None,
        exec_path: None,
    });

    let package_step = graph.push_step(StepData {
        kind: StepKind::Package,
        label: Label::Dist,
        package: placeholder_package,
        digest: package.digest,
        build_id: package.build_id,
        deterministic: package.deterministic,
        arguments: vec![build_id_step],
        all_dep_steps: vec![build_id_step],
        scm_directories: BTreeMap::new(),
        env: package.env,
        paths: Vec::new(),
        library_paths: Vec::new(),
        tools: BTreeMap::new(),
        script: package.script,
        valid: true,
        workspace_path: None,
        exec_path: None,
    });

    {
        // Patch the earlier placeholder now that the real step ids exist.
        let pkg = &mut graph.packages_mut()[placeholder_package.0 as usize];
        pkg.checkout = checkout_id;
        pkg.build = build_id_step;
        pkg.package = package_step;
    }

    placeholder_package
}
