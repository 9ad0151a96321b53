//! Pipeline stages.
//!
//! Each stage is a unit struct implementing [`Stage`] plus a free function
//! doing the actual work, so the work can be exercised without a graph.
//! Stages declare their dependencies through [`StageId::dependencies`]; the
//! orchestrator in [`crate::pipeline`] turns those into graph edges.

pub mod s00_collect;
pub mod s01_runtime_image;
pub mod s02_launchers;
pub mod s03_scripts;
pub mod s04_install;

use std::fmt;

use crate::config::AssemblyConfig;
use crate::error::{AssemblyError, Result};
use crate::image::RuntimeImage;

use s00_collect::CollectedArtifacts;

/// Identity of a pipeline stage.
///
/// Declaration order doubles as the tie-break order when sorting the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageId {
    CollectArtifacts,
    BuildRuntimeImage,
    RegisterLaunchers,
    InstallScripts,
    Install,
}

impl StageId {
    pub const ALL: [StageId; 5] = [
        StageId::CollectArtifacts,
        StageId::BuildRuntimeImage,
        StageId::RegisterLaunchers,
        StageId::InstallScripts,
        StageId::Install,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StageId::CollectArtifacts => "collect-artifacts",
            StageId::BuildRuntimeImage => "build-runtime-image",
            StageId::RegisterLaunchers => "register-launchers",
            StageId::InstallScripts => "install-scripts",
            StageId::Install => "install",
        }
    }

    /// Stages that must complete successfully before this one may run.
    pub fn dependencies(self) -> &'static [StageId] {
        match self {
            StageId::CollectArtifacts => &[],
            StageId::BuildRuntimeImage => &[StageId::CollectArtifacts],
            StageId::RegisterLaunchers => &[StageId::BuildRuntimeImage],
            StageId::InstallScripts => &[StageId::RegisterLaunchers],
            StageId::Install => &[
                StageId::BuildRuntimeImage,
                StageId::RegisterLaunchers,
                StageId::InstallScripts,
            ],
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outputs handed from one stage to its dependents.
#[derive(Debug, Default)]
pub struct StageContext {
    pub artifacts: Option<CollectedArtifacts>,
    pub image: Option<RuntimeImage>,
}

impl StageContext {
    pub fn artifacts(&self) -> Result<&CollectedArtifacts> {
        self.artifacts
            .as_ref()
            .ok_or_else(|| missing_output(StageId::CollectArtifacts))
    }

    pub fn image_mut(&mut self) -> Result<&mut RuntimeImage> {
        self.image
            .as_mut()
            .ok_or_else(|| missing_output(StageId::BuildRuntimeImage))
    }

    pub fn image(&self) -> Result<&RuntimeImage> {
        self.image
            .as_ref()
            .ok_or_else(|| missing_output(StageId::BuildRuntimeImage))
    }
}

fn missing_output(producer: StageId) -> AssemblyError {
    AssemblyError::Graph(format!("output of '{producer}' is not available"))
}

/// A unit of work in the assembly graph.
pub trait Stage {
    fn id(&self) -> StageId;

    fn run(&self, config: &AssemblyConfig, ctx: &mut StageContext) -> Result<()>;
}

/// The stock implementation for `id`.
pub fn stage_for(id: StageId) -> Box<dyn Stage> {
    match id {
        StageId::CollectArtifacts => Box::new(s00_collect::CollectArtifacts),
        StageId::BuildRuntimeImage => Box::new(s01_runtime_image::BuildRuntimeImage),
        StageId::RegisterLaunchers => Box::new(s02_launchers::RegisterLaunchers),
        StageId::InstallScripts => Box::new(s03_scripts::InstallScripts),
        StageId::Install => Box::new(s04_install::InstallImage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_point_backwards() {
        for id in StageId::ALL {
            for dep in id.dependencies() {
                assert!(*dep < id, "{dep} must be declared before {id}");
            }
        }
    }

    #[test]
    fn install_waits_for_all_assembly_steps() {
        assert_eq!(
            StageId::Install.dependencies(),
            &[
                StageId::BuildRuntimeImage,
                StageId::RegisterLaunchers,
                StageId::InstallScripts
            ]
        );
    }

    #[test]
    fn stock_stages_report_their_id() {
        for id in StageId::ALL {
            assert_eq!(stage_for(id).id(), id);
        }
    }

    #[test]
    fn empty_context_reports_missing_producer() {
        let ctx = StageContext::default();
        let err = ctx.image().unwrap_err();
        assert!(err.to_string().contains("build-runtime-image"));
    }
}
