use crate::types::{PackageData, PackageId, StepData, StepId};

/// Owns every `Package` and `Step` in a recipe graph.
///
/// Steps reference their owning package, and packages reference their
/// steps and dependency steps, entirely by id rather than by owning or
/// `Rc`-shared reference. This avoids reference cycles between packages
/// that depend on each other's steps and lets the whole graph be torn down
/// by simply dropping the arena.
#[derive(Debug, Default)]
pub struct Graph {
    packages: Vec<PackageData>,
    steps: Vec<StepData>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_package(&mut self, data: PackageData) -> PackageId {
        let id = PackageId(self.packages.len() as u32);
        self.packages.push(data);
        id
    }

    pub fn push_step(&mut self, data: StepData) -> StepId {
        let id = StepId(self.steps.len() as u32);
        self.steps.push(data);
        id
    }

    pub fn package(&self, id: PackageId) -> &PackageData {
        &self.packages[id.0 as usize]
    }

    pub fn step(&self, id: StepId) -> &StepData {
        &self.steps[id.0 as usize]
    }

    pub fn step_mut(&mut self, id: StepId) -> &mut StepData {
        &mut self.steps[id.0 as usize]
    }

    pub(crate) fn packages_mut(&mut self) -> &mut [PackageData] {
        &mut self.packages
    }

    pub fn package_ids(&self) -> impl Iterator<Item = PackageId> {
        (0..self.packages.len() as u32).map(PackageId)
    }

    /// The three steps (checkout, build, package) for a package, in the
    /// fixed order the cooker expects to see them expanded in.
    pub fn package_steps(&self, id: PackageId) -> [StepId; 3] {
        let pkg = self.package(id);
        [pkg.checkout, pkg.build, pkg.package]
    }
}
