//! Client-side polling of one build job at a time.
//!
//! A [`PollController`] owns at most one watch session: a task with its own
//! `CancellationToken`, a fixed-period ticker and a wall-clock deadline.
//! Starting a new session stops the previous one first. Stopping only
//! affects this observer; the job keeps running on the server.

use std::sync::Arc;
use std::time::Duration;

use appforge_common::{BuildJob, JobId};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::api_client::JobSource;
use crate::config::ClientSettings;
use crate::errors::ClientError;

pub const TIMEOUT_MESSAGE: &str = "Build is taking longer than expected";
pub const NOT_FOUND_MESSAGE: &str = "job not found";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

impl From<&ClientSettings> for PollConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            interval: settings.poll_interval(),
            timeout: settings.poll_timeout(),
        }
    }
}

struct Session {
    job_id: JobId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PollController {
    source: Arc<dyn JobSource>,
    config: PollConfig,
    session: Option<Session>,
}

/// Why a session ended.
enum Exit {
    Stopped,
    Terminal,
    TimedOut,
    NotFound,
}

impl PollController {
    pub fn new(source: Arc<dyn JobSource>, config: PollConfig) -> Self {
        Self {
            source,
            config,
            session: None,
        }
    }

    /// Watch `job_id`: fetch now, then every interval until the job is
    /// terminal, the deadline passes, or the controller is stopped.
    ///
    /// `on_update` sees every snapshot, terminal or not. `on_terminal_error`
    /// fires at most once, for a timeout or a job that does not exist.
    pub fn start<U, E>(&mut self, job_id: JobId, on_update: U, on_terminal_error: E)
    where
        U: FnMut(BuildJob) + Send + 'static,
        E: FnOnce(String) + Send + 'static,
    {
        self.stop();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            self.source.clone(),
            job_id,
            self.config,
            cancel.clone(),
            on_update,
            on_terminal_error,
        ));
        self.session = Some(Session {
            job_id,
            cancel,
            handle,
        });
    }

    /// Stop the current session, if any. Never fails.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(job_id = %session.job_id, "Stopping poll session");
            session.cancel.cancel();
            session.handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.session.as_ref().map(|s| s.job_id)
    }

    /// Wait for the current session to end on its own. Returns at once when
    /// there is no session or it already ended.
    pub async fn finished(&mut self) {
        if let Some(session) = self.session.as_mut()
            && !session.handle.is_finished()
        {
            let _ = (&mut session.handle).await;
        }
    }
}

impl Drop for PollController {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop<U, E>(
    source: Arc<dyn JobSource>,
    job_id: JobId,
    config: PollConfig,
    cancel: CancellationToken,
    mut on_update: U,
    on_terminal_error: E,
) where
    U: FnMut(BuildJob) + Send + 'static,
    E: FnOnce(String) + Send + 'static,
{
    let deadline = tokio::time::sleep_until(Instant::now() + config.timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        // The first tick completes immediately.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Exit::Stopped,
            _ = &mut deadline => break Exit::TimedOut,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Exit::Stopped,
            _ = &mut deadline => break Exit::TimedOut,
            result = source.fetch_job(job_id) => result,
        };

        match fetched {
            Ok(job) => {
                let terminal = job.is_terminal();
                on_update(job);
                if terminal {
                    break Exit::Terminal;
                }
            }
            Err(ClientError::NotFound(_)) => break Exit::NotFound,
            Err(e) => warn!(job_id = %job_id, error = %e, "Poll failed, retrying"),
        }
    };

    match exit {
        Exit::TimedOut => {
            debug!(job_id = %job_id, "Poll deadline reached");
            on_terminal_error(TIMEOUT_MESSAGE.to_string());
        }
        Exit::NotFound => on_terminal_error(NOT_FOUND_MESSAGE.to_string()),
        Exit::Stopped | Exit::Terminal => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appforge_common::JobStatus;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    enum Reply {
        Status(JobStatus),
        Missing,
        Unavailable,
    }

    /// Scripted source; once the script runs out it keeps answering `running`.
    struct ScriptedSource {
        replies: Mutex<VecDeque<Reply>>,
        fetches: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                fetches: AtomicUsize::new(0),
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    fn job(id: JobId, status: JobStatus) -> BuildJob {
        let now = Utc::now();
        BuildJob {
            id,
            prompt: "Build a todo app".into(),
            app_name: "Todo App".into(),
            owner_id: "user-1".into(),
            status,
            auto_build: true,
            spec: String::new(),
            code: String::new(),
            preview_url: None,
            export_url: None,
            error_message: None,
            build_log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[async_trait]
    impl JobSource for ScriptedSource {
        async fn fetch_job(&self, id: JobId) -> Result<BuildJob, ClientError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.lock().unwrap().pop_front();
            match reply.unwrap_or(Reply::Status(JobStatus::Running)) {
                Reply::Status(status) => Ok(job(id, status)),
                Reply::Missing => Err(ClientError::NotFound(id.to_string())),
                Reply::Unavailable => Err(ClientError::Rejected {
                    status: 503,
                    message: "unavailable".into(),
                }),
            }
        }
    }

    struct Observed {
        updates: mpsc::UnboundedReceiver<BuildJob>,
        errors: mpsc::UnboundedReceiver<String>,
    }

    impl Observed {
        fn drain_updates(&mut self) -> Vec<BuildJob> {
            let mut out = Vec::new();
            while let Ok(job) = self.updates.try_recv() {
                out.push(job);
            }
            out
        }

        fn drain_errors(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(msg) = self.errors.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    fn start(controller: &mut PollController, id: JobId) -> Observed {
        let (update_tx, updates) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();
        controller.start(
            id,
            move |job| {
                let _ = update_tx.send(job);
            },
            move |msg| {
                let _ = error_tx.send(msg);
            },
        );
        Observed { updates, errors }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_immediately_then_on_fixed_interval() {
        let source = ScriptedSource::new(vec![]);
        let mut controller = PollController::new(source.clone(), PollConfig::default());
        let mut observed = start(&mut controller, JobId::new());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.fetches(), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(source.fetches(), 3);
        assert_eq!(observed.drain_updates().len(), 3);
        assert!(controller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_terminal_status() {
        let source = ScriptedSource::new(vec![
            Reply::Status(JobStatus::Analyzing),
            Reply::Status(JobStatus::Complete),
        ]);
        let mut controller = PollController::new(source.clone(), PollConfig::default());
        let mut observed = start(&mut controller, JobId::new());

        tokio::time::sleep(Duration::from_secs(60)).await;
        let updates = observed.drain_updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].status, JobStatus::Complete);
        assert_eq!(source.fetches(), 2);
        assert!(observed.drain_errors().is_empty());
        assert!(!controller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_terminal_error_once() {
        let source = ScriptedSource::new(vec![]);
        let mut controller = PollController::new(source.clone(), PollConfig::default());
        let mut observed = start(&mut controller, JobId::new());

        tokio::time::sleep(Duration::from_secs(301)).await;
        let fetched = source.fetches();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(observed.drain_errors(), vec![TIMEOUT_MESSAGE.to_string()]);
        assert!(TIMEOUT_MESSAGE.contains("taking longer than expected"));
        assert_eq!(source.fetches(), fetched);
        assert!(!controller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_can_be_awaited_repeatedly() {
        let source = ScriptedSource::new(vec![Reply::Status(JobStatus::Complete)]);
        let mut controller = PollController::new(source.clone(), PollConfig::default());
        let mut observed = start(&mut controller, JobId::new());

        controller.finished().await;
        controller.finished().await;

        assert_eq!(observed.drain_updates().len(), 1);
        assert!(!controller.is_active());
        controller.stop();
        controller.finished().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_keep_polling() {
        let source = ScriptedSource::new(vec![
            Reply::Unavailable,
            Reply::Status(JobStatus::Failed),
        ]);
        let mut controller = PollController::new(source.clone(), PollConfig::default());
        let mut observed = start(&mut controller, JobId::new());

        tokio::time::sleep(Duration::from_secs(30)).await;
        let updates = observed.drain_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, JobStatus::Failed);
        assert!(observed.drain_errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_job_ends_with_not_found() {
        let source = ScriptedSource::new(vec![Reply::Missing]);
        let mut controller = PollController::new(source.clone(), PollConfig::default());
        let mut observed = start(&mut controller, JobId::new());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(observed.drain_errors(), vec![NOT_FOUND_MESSAGE.to_string()]);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_cancels_previous_session() {
        let source = ScriptedSource::new(vec![]);
        let mut controller = PollController::new(source.clone(), PollConfig::default());
        let first = JobId::new();
        let second = JobId::new();

        let mut old = start(&mut controller, first);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(old.drain_updates().len(), 2);

        let mut new = start(&mut controller, second);
        tokio::time::sleep(Duration::from_secs(12)).await;

        assert!(old.drain_updates().is_empty());
        let updates = new.drain_updates();
        assert_eq!(updates.len(), 3);
        assert!(updates.iter().all(|job| job.id == second));
        assert_eq!(controller.job_id(), Some(second));
        assert!(old.drain_errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_drop_are_quiet() {
        let source = ScriptedSource::new(vec![]);
        let mut controller = PollController::new(source.clone(), PollConfig::default());
        controller.stop();

        let mut observed = start(&mut controller, JobId::new());
        tokio::time::sleep(Duration::from_millis(1)).await;
        controller.stop();
        controller.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.fetches(), 1);
        assert!(observed.drain_errors().is_empty());

        let _observed = start(&mut controller, JobId::new());
        tokio::time::sleep(Duration::from_millis(1)).await;
        drop(controller);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.fetches(), 2);
    }
}
