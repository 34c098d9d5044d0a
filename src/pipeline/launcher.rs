use std::sync::Arc;

use appforge_common::{BuildStep, JobId, StepName};
use tracing::{error, info};

use super::runner::{PipelineRunner, RunRequest};
use super::store::{JobStore, TerminalOutcome};
use crate::config::PipelineSettings;
use crate::errors::LaunchError;

const FALLBACK_APP_NAME: &str = "Untitled App";
const MAX_NAME_WORDS: usize = 4;

const LEADING_VERBS: &[&str] = &[
    "build", "create", "make", "generate", "design", "develop", "write", "code",
];
const FILLER_WORDS: &[&str] = &["me", "us", "a", "an", "the", "my", "our", "simple"];

/// Validates build requests and hands new jobs to the runner.
pub struct JobLauncher {
    store: JobStore,
    runner: Arc<PipelineRunner>,
    max_prompt_chars: usize,
}

impl JobLauncher {
    pub fn new(store: JobStore, runner: Arc<PipelineRunner>, settings: &PipelineSettings) -> Self {
        Self {
            store,
            runner,
            max_prompt_chars: settings.max_prompt_chars,
        }
    }

    /// Create a `queued` job and schedule it. Returns as soon as the job is
    /// on the runner's queue; no stage has run yet.
    pub async fn launch(
        &self,
        prompt: &str,
        owner_id: &str,
        auto_build: bool,
    ) -> Result<JobId, LaunchError> {
        let prompt = prompt.trim();
        let owner_id = owner_id.trim();
        validate(prompt, owner_id, self.max_prompt_chars)?;

        let app_name = derive_app_name(prompt);
        let job = self
            .store
            .create(prompt, &app_name, owner_id, auto_build)
            .await?;
        info!(job_id = %job.id, app_name = %app_name, auto_build, "Build job created");

        if let Err(e) = self.runner.submit(RunRequest::Start(job.id)).await {
            error!(job_id = %job.id, "Runner rejected new job");
            let message = e.to_string();
            if let Err(store_err) = self
                .store
                .set_terminal(
                    job.id,
                    TerminalOutcome::Failed {
                        error_message: message.clone(),
                    },
                    vec![BuildStep::failed(StepName::Error, message)],
                )
                .await
            {
                error!(job_id = %job.id, error = %store_err, "Failed to mark job failed");
            }
            return Err(e);
        }
        Ok(job.id)
    }
}

fn validate(prompt: &str, owner_id: &str, max_chars: usize) -> Result<(), LaunchError> {
    if prompt.is_empty() {
        return Err(LaunchError::EmptyPrompt);
    }
    let len = prompt.chars().count();
    if len > max_chars {
        return Err(LaunchError::PromptTooLong {
            len,
            max: max_chars,
        });
    }
    if owner_id.is_empty() {
        return Err(LaunchError::MissingOwner);
    }
    Ok(())
}

/// Short display name from a prompt: "Build a todo app" becomes "Todo App".
pub fn derive_app_name(prompt: &str) -> String {
    let words: Vec<String> = prompt
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect();

    let mut rest = words.as_slice();
    if let Some((first, tail)) = rest.split_first()
        && LEADING_VERBS.contains(&first.to_lowercase().as_str())
    {
        rest = tail;
    }
    while let Some((first, tail)) = rest.split_first()
        && FILLER_WORDS.contains(&first.to_lowercase().as_str())
    {
        rest = tail;
    }

    let name = rest
        .iter()
        .take(MAX_NAME_WORDS)
        .map(|w| title_case(w))
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() {
        FALLBACK_APP_NAME.to_string()
    } else {
        name
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
