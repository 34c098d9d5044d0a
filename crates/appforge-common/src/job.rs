use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BuildStep, JobId, JobStatus, StepName, StepStatus};

/// One build attempt: prompt in, specification, code and preview out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: JobId,
    pub prompt: String,
    pub app_name: String,
    pub owner_id: String,
    pub status: JobStatus,
    /// Whether code generation follows the spec without a manual review.
    pub auto_build: bool,
    #[serde(default)]
    pub spec: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub export_url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub build_log: Vec<BuildStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BuildJob {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn step(&self, name: StepName) -> Option<&BuildStep> {
        self.build_log.iter().find(|s| s.name == name)
    }

    pub fn has_successful_step(&self, name: StepName) -> bool {
        self.step(name)
            .is_some_and(|s| s.status == StepStatus::Success)
    }

    /// Number of log entries that resolved successfully.
    pub fn success_count(&self) -> usize {
        self.build_log
            .iter()
            .filter(|s| s.status == StepStatus::Success)
            .count()
    }
}
