//! Runs the stage graph for one configuration.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use fs2::FileExt;
use tracing::{error, info, info_span, warn};

use crate::config::AssemblyConfig;
use crate::error::{AssemblyError, IoResultExt, Result};
use crate::pipeline::graph::StageGraph;
use crate::pipeline::report::{now_utc, RunReport, StageOutcome, REPORT_FILE};
use crate::runtime::BaseRuntime;
use crate::stages::s02_launchers::validate_launchers;
use crate::stages::{stage_for, Stage, StageContext, StageId};

pub const LOCK_FILE: &str = ".assemble.lock";

/// Exclusive hold on a build directory for the lifetime of a run.
#[derive(Debug)]
pub struct BuildLock {
    _file: File,
    path: PathBuf,
}

impl BuildLock {
    /// Take the lock or fail immediately if another run holds it.
    pub fn acquire(build_dir: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(build_dir).at_path(build_dir)?;
        let path = build_dir.join(LOCK_FILE);
        // The lock file is never removed; unlinking a held lock would let a
        // second run lock a fresh inode at the same path.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .at_path(&path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(AssemblyError::unavailable(
                "build directory",
                build_dir,
                "another assembly run holds the lock",
            ));
        }
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

pub struct Orchestrator {
    config: AssemblyConfig,
    graph: StageGraph,
}

impl Orchestrator {
    pub fn new(config: AssemblyConfig) -> Result<Self> {
        let graph = StageGraph::for_config(&config)?;
        Ok(Self { config, graph })
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Run the stock stages, write the report, and return it.
    ///
    /// Stage failures are recorded in the report rather than returned;
    /// `Err` means the run could not start or the report could not be written.
    pub fn run(&self) -> Result<RunReport> {
        let stages = self
            .graph
            .execution_order()
            .into_iter()
            .map(stage_for)
            .collect();
        self.run_stages(stages)
    }

    /// Run `stages` under the build lock in graph order.
    ///
    /// Stages not in the graph are ignored. A stage whose dependency did not
    /// succeed is recorded as blocked and never started.
    ///
    /// The launcher set is checked before the first stage runs. A rejected
    /// set fails `register-launchers` and blocks every other stage, so the
    /// image from the previous run is left as it was.
    pub fn run_stages(&self, stages: Vec<Box<dyn Stage>>) -> Result<RunReport> {
        let _lock = BuildLock::acquire(&self.config.build_dir)?;
        let mut report = RunReport::new(now_utc());

        if let Err(err) = self.check_launchers() {
            error!(kind = err.kind(), error = %err, "launcher set rejected, nothing built");
            let by = StageId::RegisterLaunchers.name().to_string();
            for id in self.graph.execution_order() {
                if id == StageId::RegisterLaunchers {
                    report.record(id, failed(&err));
                } else {
                    report.record(id, StageOutcome::Blocked { by: by.clone() });
                }
            }
            return self.finish(report);
        }

        let mut by_id: BTreeMap<StageId, Box<dyn Stage>> =
            stages.into_iter().map(|s| (s.id(), s)).collect();
        let mut ctx = StageContext::default();
        let mut succeeded: BTreeMap<StageId, bool> = BTreeMap::new();

        for id in self.graph.execution_order() {
            let blocker = self
                .graph
                .dependencies(id)
                .into_iter()
                .find(|dep| !succeeded.get(dep).copied().unwrap_or(false));
            if let Some(dep) = blocker {
                warn!(stage = %id, blocked_by = %dep, "stage blocked");
                succeeded.insert(id, false);
                report.record(id, StageOutcome::Blocked { by: dep.name().to_string() });
                continue;
            }

            let Some(stage) = by_id.remove(&id) else {
                let err = AssemblyError::Graph(format!("no implementation for stage '{id}'"));
                succeeded.insert(id, false);
                report.record(id, failed(&err));
                continue;
            };

            let span = info_span!("stage", stage = %id);
            let _enter = span.enter();
            info!("stage started");
            match stage.run(&self.config, &mut ctx) {
                Ok(()) => {
                    info!("stage succeeded");
                    succeeded.insert(id, true);
                    report.record(id, StageOutcome::Succeeded);
                }
                Err(err) => {
                    error!(kind = err.kind(), error = %err, "stage failed");
                    succeeded.insert(id, false);
                    report.record(id, failed(&err));
                }
            }
        }

        self.finish(report)
    }

    /// Launcher validation against the configured modules and runtime.
    ///
    /// An unreadable base runtime is left for `build-runtime-image` to report.
    fn check_launchers(&self) -> Result<()> {
        let runtime_name = BaseRuntime::load(&self.config.base_runtime)
            .ok()
            .and_then(|base| {
                base.launcher()
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            });
        validate_launchers(
            &self.config.launchers,
            &self.config.module_ids(),
            runtime_name.as_deref(),
        )
    }

    fn finish(&self, mut report: RunReport) -> Result<RunReport> {
        report.finished_at = now_utc();
        let report_path = self.config.build_dir.join(REPORT_FILE);
        report.store(&report_path)?;
        info!(
            status = ?report.status,
            report = %report_path.display(),
            "assembly finished"
        );
        Ok(report)
    }
}

fn failed(err: &AssemblyError) -> StageOutcome {
    StageOutcome::Failed {
        kind: err.kind().to_string(),
        message: err.to_string(),
    }
}
