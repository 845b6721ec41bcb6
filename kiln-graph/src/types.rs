use std::collections::BTreeMap;
use std::path::PathBuf;

use kiln_hash::Digest;

/// Newtype index into a [`crate::Graph`]'s package arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageId(pub(crate) u32);

/// Newtype index into a [`crate::Graph`]'s step arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepId(pub(crate) u32);

/// Which workspace root a step's output lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Src,
    Build,
    Dist,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Src => "src",
            Label::Build => "build",
            Label::Dist => "dist",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Checkout,
    Build,
    Package,
}

/// A single unit of execution in the recipe graph.
#[derive(Debug, Clone)]
pub struct StepData {
    pub kind: StepKind,
    pub label: Label,
    pub package: PackageId,
    /// Opaque content-address of this step's recipe and configuration.
    pub digest: Digest,
    /// Present iff the step is fully deterministic across its whole
    /// upstream closure; used as the archive key for package steps.
    pub build_id: Option<Digest>,
    pub deterministic: bool,
    /// Upstream steps whose result hashes feed this step's input-hash
    /// vector, in order.
    pub arguments: Vec<StepId>,
    /// Superset of `arguments` used for sandbox mounts and script variable
    /// expansion (tool steps that aren't build inputs, for instance).
    pub all_dep_steps: Vec<StepId>,
    /// Checkout steps only: per-subdirectory SCM digest.
    pub scm_directories: BTreeMap<std::path::PathBuf, Digest>,
    pub env: BTreeMap<String, String>,
    pub paths: Vec<String>,
    pub library_paths: Vec<String>,
    pub tools: BTreeMap<String, String>,
    pub script: String,
    pub valid: bool,
    /// Filled in by a `NameFormatter` pass before the step is ever cooked.
    /// `None` until then; reading it earlier is a caller bug.
    pub workspace_path: Option<PathBuf>,
    pub exec_path: Option<PathBuf>,
}

impl StepData {
    pub fn is_checkout_step(&self) -> bool {
        matches!(self.kind, StepKind::Checkout)
    }

    pub fn is_build_step(&self) -> bool {
        matches!(self.kind, StepKind::Build)
    }

    pub fn is_package_step(&self) -> bool {
        matches!(self.kind, StepKind::Package)
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The on-disk directory holding this step's outputs. Panics if no
    /// `NameFormatter` has assigned one yet.
    pub fn workspace_path(&self) -> &std::path::Path {
        self.workspace_path
            .as_deref()
            .expect("workspace_path read before a NameFormatter ran")
    }

    /// The path this step's outputs are referenced by from *inside* a
    /// running step (identical to `workspace_path` unless sandboxed).
    pub fn exec_path(&self) -> &std::path::Path {
        self.exec_path
            .as_deref()
            .expect("exec_path read before a NameFormatter ran")
    }
}

/// A named node in the recipe graph: a buildable package exposing three
/// steps (checkout, build, package) and a list of direct dependency steps.
#[derive(Debug, Clone)]
pub struct PackageData {
    pub name: String,
    /// The logical path used for workspace naming (`work/<path>/<label>`).
    /// Distinct from `name` in recipe graphs with nested package
    /// directories; the bundled in-memory builder defaults it to `name`.
    pub path: PathBuf,
    pub checkout: StepId,
    pub build: StepId,
    pub package: StepId,
    pub dep_steps: Vec<StepId>,
}
