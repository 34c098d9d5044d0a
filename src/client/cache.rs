//! Local JSON cache of completed builds, keyed by job id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use appforge_common::{BuildJob, JobId, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedBuild {
    pub job_id: JobId,
    pub app_name: String,
    pub prompt: String,
    pub spec: String,
    pub code: String,
    pub preview_url: Option<String>,
    pub export_url: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl CachedBuild {
    /// Only completed jobs are cached.
    pub fn from_job(job: &BuildJob) -> Option<Self> {
        (job.status == JobStatus::Complete).then(|| Self {
            job_id: job.id,
            app_name: job.app_name.clone(),
            prompt: job.prompt.clone(),
            spec: job.spec.clone(),
            code: job.code.clone(),
            preview_url: job.preview_url.clone(),
            export_url: job.export_url.clone(),
            completed_at: job.updated_at,
        })
    }
}

type Entries = BTreeMap<String, CachedBuild>;

pub struct BuildCache {
    path: PathBuf,
}

impl BuildCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries. A missing or unreadable cache reads as empty.
    pub fn load(&self) -> Entries {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Entries::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read build cache");
                return Entries::new();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Ignoring corrupt build cache");
            Entries::new()
        })
    }

    pub fn get(&self, id: JobId) -> Option<CachedBuild> {
        self.load().remove(&id.to_string())
    }

    /// Cache `job` if it completed. Returns whether an entry was written.
    ///
    /// The entry must survive a serialize/deserialize round trip unchanged
    /// before it is stored; a failure is logged and the cache left as is.
    pub fn store(&self, job: &BuildJob) -> bool {
        let Some(entry) = CachedBuild::from_job(job) else {
            debug!(job_id = %job.id, status = %job.status, "Not caching unfinished build");
            return false;
        };
        if let Err(e) = validate_round_trip(&entry) {
            warn!(job_id = %job.id, error = %e, "Build failed cache validation, not caching");
            return false;
        }

        let mut entries = self.load();
        entries.insert(entry.job_id.to_string(), entry);
        match self.write(&entries) {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %job.id, error = %format!("{:#}", e), "Failed to write build cache");
                false
            }
        }
    }

    fn write(&self, entries: &Entries) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(entries).context("Failed to encode cache")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

fn validate_round_trip(entry: &CachedBuild) -> Result<()> {
    let json = serde_json::to_string(entry).context("Failed to serialize entry")?;
    let decoded: CachedBuild = serde_json::from_str(&json).context("Failed to deserialize entry")?;
    anyhow::ensure!(&decoded == entry, "Entry changed during serialization round trip");
    Ok(())
}
