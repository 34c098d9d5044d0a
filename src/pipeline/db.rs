use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use appforge_common::{BuildJob, BuildStep, JobId, JobStatus, upsert_steps};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::errors::StoreError;

/// Async-safe handle to the build database.
///
/// Wraps `BuildDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`. Readers and writers share the
/// one lock, so a reader never sees half of an update.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BuildDb>>,
}

impl DbHandle {
    pub fn new(db: BuildDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&BuildDb) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::TaskFailed(e.to_string()))?
    }
}

/// Fields changed by one atomic job mutation. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub spec: Option<String>,
    pub code: Option<String>,
    pub preview_url: Option<String>,
    pub export_url: Option<String>,
    pub error_message: Option<String>,
    pub steps: Vec<BuildStep>,
}

impl JobUpdate {
    pub fn steps(steps: impl IntoIterator<Item = BuildStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_spec(mut self, spec: impl Into<String>) -> Self {
        self.spec = Some(spec.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

pub struct BuildDb {
    conn: Connection,
}

const JOB_COLUMNS: &str = "id, prompt, app_name, owner_id, status, auto_build, spec, code, \
     preview_url, export_url, error_message, build_log, created_at, updated_at";

impl BuildDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<(), StoreError> {
        self.run_migrations()
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS build_jobs (
                id TEXT PRIMARY KEY,
                prompt TEXT NOT NULL,
                app_name TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                auto_build INTEGER NOT NULL DEFAULT 1,
                spec TEXT NOT NULL DEFAULT '',
                code TEXT NOT NULL DEFAULT '',
                preview_url TEXT,
                export_url TEXT,
                error_message TEXT,
                build_log TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_build_jobs_owner ON build_jobs(owner_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_build_jobs_status ON build_jobs(status);
            ",
        )?;
        Ok(())
    }

    pub fn create_job(
        &self,
        prompt: &str,
        app_name: &str,
        owner_id: &str,
        auto_build: bool,
    ) -> Result<BuildJob, StoreError> {
        let id = JobId::new();
        let now = format_timestamp(Utc::now());
        self.conn.execute(
            "INSERT INTO build_jobs (id, prompt, app_name, owner_id, status, auto_build, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id.to_string(),
                prompt,
                app_name,
                owner_id,
                JobStatus::Queued.as_str(),
                auto_build,
                now
            ],
        )?;
        self.get_job(id)?.ok_or(StoreError::NotFound { id })
    }

    pub fn get_job(&self, id: JobId) -> Result<Option<BuildJob>, StoreError> {
        let sql = format!("SELECT {} FROM build_jobs WHERE id = ?1", JOB_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id.to_string()], RawJob::from_row)
            .optional()?;
        row.map(RawJob::into_job).transpose()
    }

    /// Most recent jobs for one owner, newest first.
    pub fn list_jobs_for_owner(
        &self,
        owner_id: &str,
        limit: u32,
    ) -> Result<Vec<BuildJob>, StoreError> {
        let sql = format!(
            "SELECT {} FROM build_jobs WHERE owner_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            JOB_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner_id, limit], RawJob::from_row)?;
        let jobs = rows
            .map(|r| r.map_err(StoreError::from).and_then(RawJob::into_job))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    pub fn list_jobs_with_status(&self, statuses: &[JobStatus]) -> Result<Vec<BuildJob>, StoreError> {
        let sql = format!(
            "SELECT {} FROM build_jobs WHERE status = ?1 ORDER BY created_at",
            JOB_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut jobs = Vec::new();
        for status in statuses {
            let rows = stmt.query_map(params![status.as_str()], RawJob::from_row)?;
            for row in rows {
                jobs.push(RawJob::into_job(row?)?);
            }
        }
        Ok(jobs)
    }

    /// Apply one mutation atomically and return the new snapshot.
    ///
    /// Fails without writing anything when the job is missing, the status
    /// change is not allowed, or a frozen artifact would be replaced.
    pub fn apply_update(&self, id: JobId, update: JobUpdate) -> Result<BuildJob, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut job = self.get_job(id)?.ok_or(StoreError::NotFound { id })?;

        let next_status = update.status.unwrap_or(job.status);
        if !job.status.can_transition_to(next_status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: job.status,
                to: next_status,
            });
        }
        job.status = next_status;

        if let Some(spec) = update.spec {
            freeze_check(id, "spec", &job.spec, &spec)?;
            job.spec = spec;
        }
        if let Some(code) = update.code {
            freeze_check(id, "code", &job.code, &code)?;
            job.code = code;
        }
        if update.preview_url.is_some() {
            job.preview_url = update.preview_url;
        }
        if update.export_url.is_some() {
            job.export_url = update.export_url;
        }
        if update.error_message.is_some() {
            job.error_message = update.error_message;
        }
        upsert_steps(&mut job.build_log, update.steps);
        job.updated_at = Utc::now();

        let build_log = serde_json::to_string(&job.build_log)?;
        tx.execute(
            "UPDATE build_jobs
             SET status = ?1, spec = ?2, code = ?3, preview_url = ?4, export_url = ?5,
                 error_message = ?6, build_log = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                job.status.as_str(),
                job.spec,
                job.code,
                job.preview_url,
                job.export_url,
                job.error_message,
                build_log,
                format_timestamp(job.updated_at),
                id.to_string()
            ],
        )?;
        let stored = self.get_job(id)?.ok_or(StoreError::NotFound { id })?;
        tx.commit()?;
        Ok(stored)
    }

    /// Apply `update` only if the job is currently in `expected`.
    /// Returns `None` (and writes nothing) when it is not.
    pub fn apply_update_if(
        &self,
        id: JobId,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<Option<BuildJob>, StoreError> {
        let current = self.get_job(id)?.ok_or(StoreError::NotFound { id })?;
        if current.status != expected {
            return Ok(None);
        }
        self.apply_update(id, update).map(Some)
    }
}

fn freeze_check(id: JobId, field: &'static str, current: &str, next: &str) -> Result<(), StoreError> {
    if !current.is_empty() && current != next {
        return Err(StoreError::ArtifactFrozen { id, field });
    }
    Ok(())
}

/// Column values as stored, before parsing into domain types.
struct RawJob {
    id: String,
    prompt: String,
    app_name: String,
    owner_id: String,
    status: String,
    auto_build: bool,
    spec: String,
    code: String,
    preview_url: Option<String>,
    export_url: Option<String>,
    error_message: Option<String>,
    build_log: String,
    created_at: String,
    updated_at: String,
}

impl RawJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            prompt: row.get(1)?,
            app_name: row.get(2)?,
            owner_id: row.get(3)?,
            status: row.get(4)?,
            auto_build: row.get(5)?,
            spec: row.get(6)?,
            code: row.get(7)?,
            preview_url: row.get(8)?,
            export_url: row.get(9)?,
            error_message: row.get(10)?,
            build_log: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_job(self) -> Result<BuildJob, StoreError> {
        let corrupt = |what: &str, value: &str| StoreError::Corrupt(format!("{} '{}'", what, value));
        Ok(BuildJob {
            id: JobId::from_str(&self.id).map_err(|_| corrupt("id", &self.id))?,
            status: JobStatus::from_str(&self.status).map_err(|_| corrupt("status", &self.status))?,
            build_log: serde_json::from_str(&self.build_log)
                .map_err(|e| StoreError::Corrupt(format!("build_log of {}: {}", self.id, e)))?,
            created_at: parse_timestamp(&self.created_at).ok_or_else(|| corrupt("created_at", &self.created_at))?,
            updated_at: parse_timestamp(&self.updated_at).ok_or_else(|| corrupt("updated_at", &self.updated_at))?,
            prompt: self.prompt,
            app_name: self.app_name,
            owner_id: self.owner_id,
            auto_build: self.auto_build,
            spec: self.spec,
            code: self.code,
            preview_url: self.preview_url,
            export_url: self.export_url,
            error_message: self.error_message,
        })
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use appforge_common::{StepName, StepStatus};

    fn db() -> BuildDb {
        BuildDb::new_in_memory().unwrap()
    }

    #[test]
    fn test_create_and_get_job() {
        let db = db();
        let job = db
            .create_job("Build a todo app", "Todo App", "user-1", true)
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.spec.is_empty());
        assert!(job.build_log.is_empty());

        let fetched = db.get_job(job.id).unwrap().unwrap();
        assert_eq!(fetched, job);
    }

    #[test]
    fn test_get_missing_job_returns_none() {
        assert!(db().get_job(JobId::new()).unwrap().is_none());
    }

    #[test]
    fn test_update_missing_job_is_not_found() {
        let err = db()
            .apply_update(JobId::new(), JobUpdate::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_apply_update_merges_steps_and_fields() {
        let db = db();
        let job = db.create_job("p", "P", "u", true).unwrap();

        db.apply_update(
            job.id,
            JobUpdate::steps([BuildStep::pending(StepName::GenerateSpec, "working")])
                .with_status(JobStatus::Analyzing),
        )
        .unwrap();
        let job = db
            .apply_update(
                job.id,
                JobUpdate::steps([BuildStep::success(StepName::GenerateSpec, "done")])
                    .with_spec("# Spec"),
            )
            .unwrap();

        assert_eq!(job.status, JobStatus::Analyzing);
        assert_eq!(job.spec, "# Spec");
        assert_eq!(job.build_log.len(), 1);
        assert_eq!(job.build_log[0].status, StepStatus::Success);

        let reread = db.get_job(job.id).unwrap().unwrap();
        assert_eq!(reread, job);
    }

    #[test]
    fn test_updated_at_advances() {
        let db = db();
        let job = db.create_job("p", "P", "u", true).unwrap();
        let later = db
            .apply_update(job.id, JobUpdate::default().with_status(JobStatus::Analyzing))
            .unwrap();
        assert!(later.updated_at >= job.updated_at);
    }

    #[test]
    fn test_terminal_status_is_final() {
        let db = db();
        let job = db.create_job("p", "P", "u", true).unwrap();
        db.apply_update(job.id, JobUpdate::default().with_status(JobStatus::Failed))
            .unwrap();

        let err = db
            .apply_update(job.id, JobUpdate::default().with_status(JobStatus::Running))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        // Step-only writes are rejected too: nothing changes after a terminal status.
        let err = db
            .apply_update(
                job.id,
                JobUpdate::steps([BuildStep::failed(StepName::Error, "late")]),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert!(db.get_job(job.id).unwrap().unwrap().build_log.is_empty());
    }

    #[test]
    fn test_artifacts_are_write_once() {
        let db = db();
        let job = db.create_job("p", "P", "u", true).unwrap();
        db.apply_update(job.id, JobUpdate::default().with_spec("first"))
            .unwrap();

        let err = db
            .apply_update(job.id, JobUpdate::default().with_spec("second"))
            .unwrap_err();
        assert!(matches!(err, StoreError::ArtifactFrozen { field: "spec", .. }));

        // Rewriting identical text is harmless.
        db.apply_update(job.id, JobUpdate::default().with_spec("first"))
            .unwrap();
    }

    #[test]
    fn test_apply_update_if_checks_expected_status() {
        let db = db();
        let job = db.create_job("p", "P", "u", false).unwrap();

        let skipped = db
            .apply_update_if(
                job.id,
                JobStatus::Waiting,
                JobUpdate::default().with_status(JobStatus::Running),
            )
            .unwrap();
        assert!(skipped.is_none());
        assert_eq!(db.get_job(job.id).unwrap().unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn test_list_jobs_for_owner_newest_first() {
        let db = db();
        let first = db.create_job("one", "One", "alice", true).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = db.create_job("two", "Two", "alice", true).unwrap();
        db.create_job("three", "Three", "bob", true).unwrap();

        let jobs = db.list_jobs_for_owner("alice", 10).unwrap();
        let ids: Vec<JobId> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        assert_eq!(db.list_jobs_for_owner("alice", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_list_jobs_with_status() {
        let db = db();
        let queued = db.create_job("a", "A", "u", true).unwrap();
        let running = db.create_job("b", "B", "u", true).unwrap();
        db.apply_update(running.id, JobUpdate::default().with_status(JobStatus::Analyzing))
            .unwrap();

        let jobs = db
            .list_jobs_with_status(&[JobStatus::Queued, JobStatus::Analyzing])
            .unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, queued.id);
        assert_eq!(jobs[1].id, running.id);
        assert!(db.list_jobs_with_status(&[JobStatus::Waiting]).unwrap().is_empty());
    }

    #[test]
    fn test_file_backed_db_persists_across_opens() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("builds.db");
        let id = {
            let db = BuildDb::new(&path).unwrap();
            db.create_job("persist me", "Persist Me", "u", true).unwrap().id
        };
        let db = BuildDb::new(&path).unwrap();
        assert_eq!(db.get_job(id).unwrap().unwrap().prompt, "persist me");
    }

    #[tokio::test]
    async fn test_db_handle_runs_on_blocking_pool() {
        let handle = DbHandle::new(db());
        let job = handle
            .call(|db| db.create_job("p", "P", "u", true))
            .await
            .unwrap();
        let fetched = handle.call(move |db| db.get_job(job.id)).await.unwrap();
        assert_eq!(fetched.unwrap().id, job.id);
    }
}
