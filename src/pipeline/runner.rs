//! Background execution of build jobs.
//!
//! A [`PipelineRunner`] owns a supervisor task that consumes [`RunRequest`]s
//! from a bounded queue. Each job runs in its own task inside the
//! supervisor's `JoinSet`, so it outlives the HTTP request that queued it.
//! When a job task returns an error or panics, the supervisor forces the job
//! to `failed` so nothing is left stuck in a non-terminal status.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use appforge_common::{BuildStep, JobId, JobStatus, StepName};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::db::JobUpdate;
use super::stages::{Artifact, Stage, StageExecutor, StageOutput};
use super::store::{JobStore, TerminalOutcome};
use crate::errors::{LaunchError, StageError, StoreError};

pub const UNEXPECTED_FAILURE: &str = "Build failed due to an unexpected internal error";
const PARTIAL_MESSAGE: &str = "Build finished without a preview deployment";
const REVIEW_MESSAGE: &str = "Specification ready for review";
const RESUMED_MESSAGE: &str = "Resumed after specification review";

/// Where a job is inside the pipeline. Finer grained than [`JobStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Analyzing,
    GeneratingSpec,
    Waiting,
    GeneratingCode,
    Packaging,
    Deploying,
    Complete,
    Failed,
}

impl Phase {
    pub fn status(self) -> JobStatus {
        match self {
            Self::Analyzing | Self::GeneratingSpec => JobStatus::Analyzing,
            Self::Waiting => JobStatus::Waiting,
            Self::GeneratingCode | Self::Packaging | Self::Deploying => JobStatus::Running,
            Self::Complete => JobStatus::Complete,
            Self::Failed => JobStatus::Failed,
        }
    }

    /// The stage executed in this phase; `None` for parked or finished phases.
    pub fn stage(self) -> Option<Stage> {
        match self {
            Self::Analyzing => Some(Stage::AnalyzePrompt),
            Self::GeneratingSpec => Some(Stage::GenerateSpec),
            Self::GeneratingCode => Some(Stage::BuildApp),
            Self::Packaging => Some(Stage::PackageApp),
            Self::Deploying => Some(Stage::DeployPreview),
            Self::Waiting | Self::Complete | Self::Failed => None,
        }
    }

    /// Phase after this phase's stage resolved.
    ///
    /// A failed deploy still completes the job: the spec and code already
    /// stored stay usable without a preview.
    pub fn next(self, succeeded: bool, auto_build: bool) -> Phase {
        match (self, succeeded) {
            (Self::Analyzing, true) => Self::GeneratingSpec,
            (Self::GeneratingSpec, true) if auto_build => Self::GeneratingCode,
            (Self::GeneratingSpec, true) => Self::Waiting,
            (Self::GeneratingCode, true) => Self::Packaging,
            (Self::Packaging, true) => Self::Deploying,
            (Self::Deploying, _) => Self::Complete,
            (Self::Waiting | Self::Complete | Self::Failed, _) => self,
            (_, false) => Self::Failed,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Analyzing => "analyzing",
            Self::GeneratingSpec => "generating_spec",
            Self::Waiting => "waiting",
            Self::GeneratingCode => "generating_code",
            Self::Packaging => "packaging",
            Self::Deploying => "deploying",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRequest {
    /// Run a freshly queued job from the start.
    Start(JobId),
    /// Continue a job that was claimed out of `waiting`.
    Resume(JobId),
}

impl RunRequest {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Start(id) | Self::Resume(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resumed,
    /// The job was not parked in `waiting`; nothing was written.
    NotWaiting,
}

pub struct PipelineRunner {
    store: JobStore,
    tx: mpsc::Sender<RunRequest>,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineRunner {
    /// Spawn the supervisor on the current runtime.
    pub fn start(store: JobStore, executor: Arc<StageExecutor>, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let shutdown = CancellationToken::new();
        let supervisor = Supervisor {
            store: store.clone(),
            executor,
            tasks: JoinSet::new(),
            running: HashMap::new(),
            deferred: HashMap::new(),
        };
        let handle = tokio::spawn(supervisor.run(rx, shutdown.clone()));
        Self {
            store,
            tx,
            shutdown,
            supervisor: Mutex::new(Some(handle)),
        }
    }

    pub async fn submit(&self, request: RunRequest) -> Result<(), LaunchError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| LaunchError::RunnerUnavailable)
    }

    /// Continue a job parked for review. Safe to call repeatedly: only the
    /// call that moves the job out of `waiting` schedules any work.
    pub async fn resume(&self, id: JobId) -> Result<ResumeOutcome, LaunchError> {
        // A stopped runner must not claim the job: it would leave `waiting`
        // with nothing to run it.
        if self.shutdown.is_cancelled() || self.tx.is_closed() {
            return Err(LaunchError::RunnerUnavailable);
        }
        let claimed = self
            .store
            .claim_resume(id, vec![BuildStep::success(StepName::Waiting, RESUMED_MESSAGE)])
            .await?;
        if claimed.is_none() {
            debug!(job_id = %id, "Resume ignored, job is not waiting");
            return Ok(ResumeOutcome::NotWaiting);
        }

        info!(job_id = %id, "Resuming build after review");
        if let Err(e) = self.submit(RunRequest::Resume(id)).await {
            force_fail(&self.store, id).await;
            return Err(e);
        }
        Ok(ResumeOutcome::Resumed)
    }

    /// Stop accepting work, give in-flight jobs `grace` to finish, then
    /// abort whatever is left. Aborted jobs are failed on the next start.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        let handle = match self.supervisor.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(mut handle) = handle else {
            return;
        };
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(_) => info!("Build runner stopped"),
            Err(_) => {
                warn!(grace_secs = grace.as_secs(), "Grace period elapsed, aborting builds");
                handle.abort();
            }
        }
    }
}

struct Supervisor {
    store: JobStore,
    executor: Arc<StageExecutor>,
    tasks: JoinSet<Result<(), StoreError>>,
    running: HashMap<tokio::task::Id, JobId>,
    /// Requests that arrived while their job still had a live task.
    deferred: HashMap<JobId, RunRequest>,
}

type TaskResult = Result<(tokio::task::Id, Result<(), StoreError>), JoinError>;

impl Supervisor {
    async fn run(mut self, mut rx: mpsc::Receiver<RunRequest>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(result) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.finished(result).await;
                }
                request = rx.recv() => match request {
                    Some(request) => self.dispatch(request),
                    None => break,
                },
            }
        }

        rx.close();
        self.deferred.clear();
        if !self.tasks.is_empty() {
            info!(in_flight = self.tasks.len(), "Waiting for in-flight builds");
        }
        while let Some(result) = self.tasks.join_next_with_id().await {
            self.finished(result).await;
        }
    }

    fn dispatch(&mut self, request: RunRequest) {
        let job_id = request.job_id();
        if self.running.values().any(|id| *id == job_id) {
            debug!(job_id = %job_id, ?request, "Job already has a live task, deferring");
            self.deferred.insert(job_id, request);
            return;
        }

        let span = info_span!("build", job_id = %job_id);
        let task = drive(self.store.clone(), self.executor.clone(), request).instrument(span);
        let handle = self.tasks.spawn(task);
        self.running.insert(handle.id(), job_id);
    }

    async fn finished(&mut self, result: TaskResult) {
        let (task_id, failure) = match result {
            Ok((task_id, Ok(()))) => (task_id, None),
            Ok((task_id, Err(e))) => (task_id, Some(e.to_string())),
            Err(e) if e.is_cancelled() => {
                self.running.remove(&e.id());
                return;
            }
            Err(e) => (e.id(), Some(panic_message(e))),
        };

        let Some(job_id) = self.running.remove(&task_id) else {
            return;
        };
        if let Some(detail) = failure {
            error!(job_id = %job_id, error = %detail, "Build task failed unexpectedly");
            force_fail(&self.store, job_id).await;
        }
        if let Some(next) = self.deferred.remove(&job_id) {
            self.dispatch(next);
        }
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .map(|msg| format!("panicked: {}", msg))
            .unwrap_or_else(|| "panicked".to_string()),
        Err(e) => e.to_string(),
    }
}

/// Move a job to `failed` with a generic message unless it already ended.
pub(crate) async fn force_fail(store: &JobStore, id: JobId) {
    match store.get(id).await {
        Ok(job) if job.is_terminal() => return,
        Ok(_) => {}
        Err(e) => {
            error!(job_id = %id, error = %e, "Cannot load job to mark it failed");
            return;
        }
    }
    let result = store
        .set_terminal(
            id,
            TerminalOutcome::Failed {
                error_message: UNEXPECTED_FAILURE.to_string(),
            },
            vec![BuildStep::failed(StepName::Error, UNEXPECTED_FAILURE)],
        )
        .await;
    if let Err(e) = result {
        error!(job_id = %id, error = %e, "Failed to mark job failed");
    }
}

/// Run one job from its entry phase until it parks or finishes.
async fn drive(
    store: JobStore,
    executor: Arc<StageExecutor>,
    request: RunRequest,
) -> Result<(), StoreError> {
    let id = request.job_id();
    let mut job = store.get(id).await?;

    let mut phase = match request {
        RunRequest::Start(_) if job.status == JobStatus::Queued => Phase::Analyzing,
        RunRequest::Resume(_) if job.status == JobStatus::Running && job.code.is_empty() => {
            Phase::GeneratingCode
        }
        _ => {
            debug!(status = %job.status, ?request, "Nothing to run for job");
            return Ok(());
        }
    };

    while let Some(stage) = phase.stage() {
        let span = info_span!("stage", stage = %stage, phase = %phase);
        async {
            let pending = vec![BuildStep::pending(stage.step_name(), stage.pending_message())];
            job = if job.status == phase.status() {
                store.append_or_update_steps(id, pending).await?
            } else {
                store
                    .update(id, JobUpdate::steps(pending).with_status(phase.status()))
                    .await?
            };

            let result = executor.run(stage, &job).await;
            let next = phase.next(result.is_ok(), job.auto_build);
            job = match resolve(stage, result, next) {
                Resolution::Continue(update) => store.update(id, update).await?,
                Resolution::Finish(outcome, steps) => store.set_terminal(id, outcome, steps).await?,
            };
            phase = next;
            Ok::<_, StoreError>(())
        }
        .instrument(span)
        .await?;
    }

    match phase {
        Phase::Waiting => info!("Specification ready, waiting for review"),
        Phase::Complete if job.preview_url.is_some() => info!("Build complete"),
        Phase::Complete => warn!("Build complete without preview"),
        _ => warn!(error = job.error_message.as_deref().unwrap_or(""), "Build failed"),
    }
    Ok(())
}

/// How a resolved stage is written back.
enum Resolution {
    /// The job moves on to another phase or parks.
    Continue(JobUpdate),
    /// The job ends; written through [`JobStore::set_terminal`].
    Finish(TerminalOutcome, Vec<BuildStep>),
}

/// The single record write that resolves `stage`, including the status
/// change into `next` and any artifact it produced.
fn resolve(stage: Stage, result: Result<StageOutput, StageError>, next: Phase) -> Resolution {
    let step = stage.step_name();
    match result {
        Ok(output) if next == Phase::Complete => {
            let (preview_url, export_url) = match output.artifact {
                Artifact::Preview {
                    preview_url,
                    export_url,
                } => (Some(preview_url), export_url),
                _ => (None, None),
            };
            Resolution::Finish(
                TerminalOutcome::Complete {
                    preview_url,
                    export_url,
                },
                vec![BuildStep::success(step, output.message)],
            )
        }
        Ok(output) => {
            let mut update =
                JobUpdate::steps([BuildStep::success(step, output.message)]).with_status(next.status());
            match output.artifact {
                Artifact::Spec(spec) => update = update.with_spec(spec),
                Artifact::Code(code) => update = update.with_code(code),
                Artifact::Analysis { .. } | Artifact::Package { .. } | Artifact::Preview { .. } => {}
            }
            if next == Phase::Waiting {
                update
                    .steps
                    .push(BuildStep::pending(StepName::Waiting, REVIEW_MESSAGE));
            }
            Resolution::Continue(update)
        }
        Err(e) if next == Phase::Complete => Resolution::Finish(
            TerminalOutcome::Complete {
                preview_url: None,
                export_url: None,
            },
            vec![
                BuildStep::failed(step, e.to_string()),
                BuildStep::partial(StepName::Complete, PARTIAL_MESSAGE),
            ],
        ),
        Err(e) => {
            let message = format!("{} failed: {}", stage.label(), e);
            Resolution::Finish(
                TerminalOutcome::Failed {
                    error_message: message.clone(),
                },
                vec![
                    BuildStep::failed(step, e.to_string()),
                    BuildStep::failed(StepName::Error, message),
                ],
            )
        }
    }
}
