//! One pipeline stage at a time.
//!
//! [`StageExecutor::run`] is the boundary around every external call: it
//! always hands back a `Result`, bounded by the stage's timeout, and never
//! writes job state itself.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use appforge_common::{BuildJob, StepName};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::deploy::{DeployRequest, DeploymentService};
use super::generation::GenerationService;
use crate::errors::StageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    AnalyzePrompt,
    GenerateSpec,
    BuildApp,
    PackageApp,
    DeployPreview,
}

impl Stage {
    pub fn step_name(self) -> StepName {
        match self {
            Self::AnalyzePrompt => StepName::AnalyzePrompt,
            Self::GenerateSpec => StepName::GenerateSpec,
            Self::BuildApp => StepName::BuildApp,
            Self::PackageApp => StepName::PackageApp,
            Self::DeployPreview => StepName::DeployPreview,
        }
    }

    /// Message written with the `pending` entry when the stage starts.
    pub fn pending_message(self) -> &'static str {
        match self {
            Self::AnalyzePrompt => "Analyzing prompt",
            Self::GenerateSpec => "Generating specification",
            Self::BuildApp => "Generating application code",
            Self::PackageApp => "Packaging application",
            Self::DeployPreview => "Deploying preview",
        }
    }

    /// Human label used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::AnalyzePrompt => "Prompt analysis",
            Self::GenerateSpec => "Specification generation",
            Self::BuildApp => "Code generation",
            Self::PackageApp => "Packaging",
            Self::DeployPreview => "Preview deployment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.step_name().as_str())
    }
}

/// What a successful stage produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Analysis { words: usize },
    Spec(String),
    Code(String),
    Package { digest: String, size_bytes: usize },
    Preview {
        preview_url: String,
        export_url: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub artifact: Artifact,
    /// Log message for the stage's `success` entry.
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub generation: Duration,
    pub deployment: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            generation: Duration::from_secs(120),
            deployment: Duration::from_secs(120),
        }
    }
}

pub struct StageExecutor {
    generation: Arc<dyn GenerationService>,
    deployment: Arc<dyn DeploymentService>,
    timeouts: StageTimeouts,
}

impl StageExecutor {
    pub fn new(
        generation: Arc<dyn GenerationService>,
        deployment: Arc<dyn DeploymentService>,
        timeouts: StageTimeouts,
    ) -> Self {
        Self {
            generation,
            deployment,
            timeouts,
        }
    }

    pub async fn run(&self, stage: Stage, job: &BuildJob) -> Result<StageOutput, StageError> {
        debug!(stage = %stage, "Running stage");
        let result = match stage {
            Stage::AnalyzePrompt => analyze_prompt(&job.prompt),
            Stage::GenerateSpec => self.generate_spec(job).await,
            Stage::BuildApp => self.build_app(job).await,
            Stage::PackageApp => package_app(&job.code),
            Stage::DeployPreview => self.deploy_preview(job).await,
        };
        if let Err(e) = &result {
            warn!(stage = %stage, error = %e, "Stage failed");
        }
        result
    }

    async fn generate_spec(&self, job: &BuildJob) -> Result<StageOutput, StageError> {
        let spec = with_timeout(
            self.timeouts.generation,
            self.generation.generate_spec(&job.prompt),
        )
        .await?;
        Ok(StageOutput {
            message: format!("Specification generated ({} characters)", spec.chars().count()),
            artifact: Artifact::Spec(spec),
        })
    }

    async fn build_app(&self, job: &BuildJob) -> Result<StageOutput, StageError> {
        if job.spec.trim().is_empty() {
            return Err(StageError::MissingSpec);
        }
        let code = with_timeout(
            self.timeouts.generation,
            self.generation.generate_code(&job.prompt, &job.spec),
        )
        .await?;
        Ok(StageOutput {
            message: format!("Application code generated ({} lines)", code.lines().count()),
            artifact: Artifact::Code(code),
        })
    }

    async fn deploy_preview(&self, job: &BuildJob) -> Result<StageOutput, StageError> {
        if job.code.trim().is_empty() {
            return Err(StageError::MissingCode);
        }
        let request = DeployRequest {
            job_id: job.id,
            app_name: &job.app_name,
            prompt: &job.prompt,
            code: &job.code,
        };
        let deployment =
            with_timeout(self.timeouts.deployment, self.deployment.deploy(&request)).await?;
        Ok(StageOutput {
            message: format!("Preview deployed to {}", deployment.preview_url),
            artifact: Artifact::Preview {
                preview_url: deployment.preview_url,
                export_url: deployment.export_url,
            },
        })
    }
}

async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StageError>>,
) -> Result<T, StageError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StageError::Timeout {
            secs: limit.as_secs(),
        })?
}

fn analyze_prompt(prompt: &str) -> Result<StageOutput, StageError> {
    let words = prompt.split_whitespace().count();
    if words == 0 {
        return Err(StageError::EmptyPrompt);
    }
    Ok(StageOutput {
        artifact: Artifact::Analysis { words },
        message: format!("Prompt analyzed ({} words)", words),
    })
}

fn package_app(code: &str) -> Result<StageOutput, StageError> {
    if code.trim().is_empty() {
        return Err(StageError::MissingCode);
    }
    let digest = hex::encode(Sha256::digest(code.as_bytes()));
    let size_bytes = code.len();
    Ok(StageOutput {
        message: format!("Packaged {} bytes (sha256 {})", size_bytes, &digest[..12]),
        artifact: Artifact::Package { digest, size_bytes },
    })
}
