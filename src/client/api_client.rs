//! HTTP client for the build server.

use appforge_common::{BuildJob, JobId};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::errors::ClientError;
use crate::pipeline::api::CreateJobResponse;

/// Read access to job snapshots. The poller only ever reads.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn fetch_job(&self, id: JobId) -> Result<BuildJob, ClientError>;
}

#[derive(Debug, Clone)]
pub struct BuildClient {
    client: Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl BuildClient {
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        // A trailing slash keeps `Url::join` from dropping a path prefix.
        let normalized = format!("{}/", server_url.trim().trim_end_matches('/'));
        let base_url =
            Url::parse(&normalized).map_err(|_| ClientError::InvalidUrl(server_url.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(server_url.to_string()));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|_| ClientError::InvalidUrl(format!("{}{}", self.base_url, path)))
    }

    /// Create a job; `auto_build: None` uses the server's default.
    pub async fn launch(
        &self,
        prompt: &str,
        owner_id: &str,
        auto_build: Option<bool>,
    ) -> Result<JobId, ClientError> {
        let body = serde_json::json!({
            "prompt": prompt,
            "owner_id": owner_id,
            "auto_build": auto_build,
        });
        let response = self
            .client
            .post(self.url("api/jobs")?)
            .json(&body)
            .send()
            .await?;
        let response = check(response, "new job").await?;
        let created: CreateJobResponse = response.json().await?;
        Ok(created.job_id)
    }

    pub async fn get_job(&self, id: JobId) -> Result<BuildJob, ClientError> {
        let response = self
            .client
            .get(self.url(&format!("api/jobs/{}", id))?)
            .send()
            .await?;
        let response = check(response, &id.to_string()).await?;
        Ok(response.json().await?)
    }

    pub async fn resume(&self, id: JobId) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url(&format!("api/jobs/{}/resume", id))?)
            .send()
            .await?;
        check(response, &id.to_string()).await?;
        Ok(())
    }

    pub async fn list_jobs(&self, owner_id: &str, limit: u32) -> Result<Vec<BuildJob>, ClientError> {
        let response = self
            .client
            .get(self.url("api/jobs")?)
            .query(&[("owner_id", owner_id.to_string()), ("limit", limit.to_string())])
            .send()
            .await?;
        let response = check(response, owner_id).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl JobSource for BuildClient {
    async fn fetch_job(&self, id: JobId) -> Result<BuildJob, ClientError> {
        self.get_job(id).await
    }
}

async fn check(response: reqwest::Response, subject: &str) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(subject.to_string()));
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(ClientError::Rejected {
        status: status.as_u16(),
        message,
    })
}
