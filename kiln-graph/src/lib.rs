//! Arena-backed recipe graph.
//!
//! The real recipe parser and package-graph generator are external
//! collaborators (out of scope here, see the crate's own documentation);
//! this crate only defines the data shape they hand the cooker and a small
//! in-memory builder used by tests and the demo CLI.

mod arena;
mod builder;
mod types;

pub use arena::Graph;
pub use builder::{StepSpec, add_package, add_package_at};
pub use types::{Label, PackageData, PackageId, StepData, StepId, StepKind};
