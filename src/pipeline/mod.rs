//! Stage graph, orchestration and run reporting.

pub mod graph;
pub mod orchestrator;
pub mod report;

pub use graph::StageGraph;
pub use orchestrator::{BuildLock, Orchestrator};
pub use report::{RunReport, RunStatus, StageOutcome};
