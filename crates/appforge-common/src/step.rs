use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Named phase recorded in a job's build log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    AnalyzePrompt,
    GenerateSpec,
    Waiting,
    BuildApp,
    PackageApp,
    DeployPreview,
    Complete,
    Error,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnalyzePrompt => "analyze_prompt",
            Self::GenerateSpec => "generate_spec",
            Self::Waiting => "waiting",
            Self::BuildApp => "build_app",
            Self::PackageApp => "package_app",
            Self::DeployPreview => "deploy_preview",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// One of the five build stages, as opposed to the markers
    /// `waiting`, `complete` and `error`.
    pub fn is_stage(&self) -> bool {
        !matches!(self, Self::Waiting | Self::Complete | Self::Error)
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyze_prompt" => Ok(Self::AnalyzePrompt),
            "generate_spec" => Ok(Self::GenerateSpec),
            "waiting" => Ok(Self::Waiting),
            "build_app" => Ok(Self::BuildApp),
            "package_app" => Ok(Self::PackageApp),
            "deploy_preview" => Ok(Self::DeployPreview),
            "complete" => Ok(Self::Complete),
            "error" => Ok(Self::Error),
            _ => Err(ParseError::new("step name", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Success,
    Failed,
    Partial,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Partial => "partial",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "partial" => Ok(Self::Partial),
            _ => Err(ParseError::new("step status", s)),
        }
    }
}

/// One entry of a job's build log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStep {
    pub name: StepName,
    pub status: StepStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl BuildStep {
    pub fn new(name: StepName, status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            name,
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn pending(name: StepName, message: impl Into<String>) -> Self {
        Self::new(name, StepStatus::Pending, message)
    }

    pub fn success(name: StepName, message: impl Into<String>) -> Self {
        Self::new(name, StepStatus::Success, message)
    }

    pub fn failed(name: StepName, message: impl Into<String>) -> Self {
        Self::new(name, StepStatus::Failed, message)
    }

    pub fn partial(name: StepName, message: impl Into<String>) -> Self {
        Self::new(name, StepStatus::Partial, message)
    }
}

/// Merge `steps` into `log`.
///
/// An incoming step replaces the existing entry with the same name in place;
/// otherwise it is appended. Entries are never removed or reordered.
pub fn upsert_steps(log: &mut Vec<BuildStep>, steps: impl IntoIterator<Item = BuildStep>) {
    for step in steps {
        match log.iter_mut().find(|existing| existing.name == step.name) {
            Some(existing) => *existing = step,
            None => log.push(step),
        }
    }
}
