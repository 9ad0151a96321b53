//! Run report written to `<build_dir>/assembly-report.json`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{AssemblyError, Result};
use crate::filesystem::write_if_changed;
use crate::stages::StageId;

pub const REPORT_FILE: &str = "assembly-report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum StageOutcome {
    Succeeded,
    Failed { kind: String, message: String },
    Blocked { by: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: String,
    pub stages: Vec<StageRecord>,
}

impl RunReport {
    pub fn new(started_at: String) -> Self {
        Self {
            status: RunStatus::Success,
            started_at,
            finished_at: String::new(),
            stages: Vec::new(),
        }
    }

    pub fn record(&mut self, stage: StageId, outcome: StageOutcome) {
        if !matches!(outcome, StageOutcome::Succeeded) {
            self.status = RunStatus::Failed;
        }
        self.stages.push(StageRecord {
            stage: stage.name().to_string(),
            outcome,
        });
    }

    pub fn outcome(&self, stage: StageId) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|r| r.stage == stage.name())
            .map(|r| &r.outcome)
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// The first stage failure, if any.
    pub fn first_failure(&self) -> Option<(&str, &str)> {
        self.stages.iter().find_map(|r| match &r.outcome {
            StageOutcome::Failed { message, .. } => Some((r.stage.as_str(), message.as_str())),
            _ => None,
        })
    }

    pub fn store(&self, path: &Path) -> Result<bool> {
        let mut json = serde_json::to_vec_pretty(self).map_err(|err| {
            AssemblyError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        })?;
        json.push(b'\n');
        write_if_changed(path, &json, Some(0o644))
    }
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn now_utc() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}
