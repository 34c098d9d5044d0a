//! Durable record of build jobs and their step logs.
//!
//! All writes for one job go through [`JobStore::update`], which applies the
//! whole change in one transaction. The pipeline runner is the only writer;
//! the API and pollers only read.

use appforge_common::{BuildJob, BuildStep, JobId, JobStatus, StepName};

use super::db::{BuildDb, DbHandle, JobUpdate};
use crate::errors::StoreError;

pub const INTERRUPTED_MESSAGE: &str = "Build interrupted by server restart";

/// How a job ends.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Complete {
        preview_url: Option<String>,
        export_url: Option<String>,
    },
    Failed {
        error_message: String,
    },
}

#[derive(Clone)]
pub struct JobStore {
    db: DbHandle,
}

impl JobStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Store backed by a private in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(DbHandle::new(BuildDb::new_in_memory()?)))
    }

    pub async fn create(
        &self,
        prompt: &str,
        app_name: &str,
        owner_id: &str,
        auto_build: bool,
    ) -> Result<BuildJob, StoreError> {
        let (prompt, app_name, owner_id) =
            (prompt.to_string(), app_name.to_string(), owner_id.to_string());
        self.db
            .call(move |db| db.create_job(&prompt, &app_name, &owner_id, auto_build))
            .await
    }

    pub async fn get(&self, id: JobId) -> Result<BuildJob, StoreError> {
        self.db
            .call(move |db| db.get_job(id)?.ok_or(StoreError::NotFound { id }))
            .await
    }

    pub async fn append_or_update_steps(
        &self,
        id: JobId,
        steps: Vec<BuildStep>,
    ) -> Result<BuildJob, StoreError> {
        self.update(id, JobUpdate::steps(steps)).await
    }

    pub async fn update(&self, id: JobId, update: JobUpdate) -> Result<BuildJob, StoreError> {
        self.db.call(move |db| db.apply_update(id, update)).await
    }

    /// Write the final fields and the terminal status as one record update.
    pub async fn set_terminal(
        &self,
        id: JobId,
        outcome: TerminalOutcome,
        steps: Vec<BuildStep>,
    ) -> Result<BuildJob, StoreError> {
        let update = match outcome {
            TerminalOutcome::Complete {
                preview_url,
                export_url,
            } => JobUpdate {
                status: Some(JobStatus::Complete),
                preview_url,
                export_url,
                steps,
                ..JobUpdate::default()
            },
            TerminalOutcome::Failed { error_message } => {
                JobUpdate::steps(steps)
                    .with_status(JobStatus::Failed)
                    .with_error(error_message)
            }
        };
        self.update(id, update).await
    }

    /// Move a `waiting` job to `running`, recording `steps` with it.
    /// Returns `None` without writing when the job is not waiting.
    pub async fn claim_resume(
        &self,
        id: JobId,
        steps: Vec<BuildStep>,
    ) -> Result<Option<BuildJob>, StoreError> {
        self.db
            .call(move |db| {
                db.apply_update_if(
                    id,
                    JobStatus::Waiting,
                    JobUpdate::steps(steps).with_status(JobStatus::Running),
                )
            })
            .await
    }

    pub async fn list_for_owner(
        &self,
        owner_id: &str,
        limit: u32,
    ) -> Result<Vec<BuildJob>, StoreError> {
        let owner_id = owner_id.to_string();
        self.db
            .call(move |db| db.list_jobs_for_owner(&owner_id, limit))
            .await
    }

    /// Fail every job whose owning process died mid-build.
    ///
    /// `waiting` jobs are parked, not running, so they are left alone.
    pub async fn recover_interrupted(&self) -> Result<Vec<JobId>, StoreError> {
        self.db
            .call(|db| {
                let stuck = db.list_jobs_with_status(&[
                    JobStatus::Queued,
                    JobStatus::Analyzing,
                    JobStatus::Running,
                ])?;
                let mut recovered = Vec::with_capacity(stuck.len());
                for job in stuck {
                    db.apply_update(
                        job.id,
                        JobUpdate::steps([BuildStep::failed(StepName::Error, INTERRUPTED_MESSAGE)])
                            .with_status(JobStatus::Failed)
                            .with_error(INTERRUPTED_MESSAGE),
                    )?;
                    recovered.push(job.id);
                }
                Ok(recovered)
            })
            .await
    }
}
