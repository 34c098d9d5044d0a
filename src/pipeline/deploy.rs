//! Preview deployment over a plain JSON HTTP endpoint.

use appforge_common::JobId;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::generation::{network_error, upstream_error};
use crate::config::DeploymentSettings;
use crate::errors::StageError;

#[derive(Debug, Clone, Serialize)]
pub struct DeployRequest<'a> {
    pub job_id: JobId,
    pub app_name: &'a str,
    pub prompt: &'a str,
    pub code: &'a str,
}

/// Where a successful deploy can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Deployment {
    pub preview_url: String,
    #[serde(default)]
    pub export_url: Option<String>,
}

#[async_trait]
pub trait DeploymentService: Send + Sync {
    async fn deploy(&self, request: &DeployRequest<'_>) -> Result<Deployment, StageError>;
}

pub struct HttpDeployer {
    client: Client,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl HttpDeployer {
    pub fn new(settings: &DeploymentSettings) -> Self {
        Self {
            client: Client::new(),
            endpoint: settings
                .endpoint
                .clone()
                .filter(|endpoint| !endpoint.trim().is_empty()),
            api_key: settings.api_key(),
        }
    }
}

#[async_trait]
impl DeploymentService for HttpDeployer {
    async fn deploy(&self, request: &DeployRequest<'_>) -> Result<Deployment, StageError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or(StageError::NotConfigured("Deployment endpoint"))?;

        let mut builder = self.client.post(endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(network_error)?;
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let deployment: Deployment = response
            .json()
            .await
            .map_err(|e| StageError::InvalidResponse(e.to_string()))?;
        if deployment.preview_url.trim().is_empty() {
            return Err(StageError::InvalidResponse(
                "deployment returned no preview_url".to_string(),
            ));
        }
        Ok(deployment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};

    fn request() -> DeployRequest<'static> {
        DeployRequest {
            job_id: JobId::new(),
            app_name: "Todo App",
            prompt: "Build a todo app",
            code: "<html></html>",
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/deploy", addr)
    }

    fn deployer(endpoint: Option<String>) -> HttpDeployer {
        HttpDeployer::new(&DeploymentSettings {
            endpoint,
            api_key_env: "APPFORGE_TEST_UNSET_DEPLOY_KEY".into(),
            ..DeploymentSettings::default()
        })
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_not_configured() {
        let err = deployer(None).deploy(&request()).await.unwrap_err();
        assert!(matches!(err, StageError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_deploy_sends_code_and_reads_urls() {
        let router = Router::new().route(
            "/deploy",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["code"], "<html></html>");
                assert_eq!(body["app_name"], "Todo App");
                Json(serde_json::json!({
                    "preview_url": "https://preview.test/todo",
                    "export_url": "https://preview.test/todo.zip"
                }))
            }),
        );
        let endpoint = serve(router).await;
        let deployment = deployer(Some(endpoint)).deploy(&request()).await.unwrap();
        assert_eq!(deployment.preview_url, "https://preview.test/todo");
        assert_eq!(
            deployment.export_url.as_deref(),
            Some("https://preview.test/todo.zip")
        );
    }

    #[tokio::test]
    async fn test_server_error_is_upstream() {
        let router = Router::new().route(
            "/deploy",
            post(|| async { (StatusCode::BAD_GATEWAY, "host unavailable") }),
        );
        let endpoint = serve(router).await;
        let err = deployer(Some(endpoint)).deploy(&request()).await.unwrap_err();
        assert_eq!(
            err,
            StageError::Upstream {
                status: 502,
                message: "host unavailable".into()
            }
        );
    }

    #[tokio::test]
    async fn test_blank_preview_url_is_rejected() {
        let router = Router::new().route(
            "/deploy",
            post(|| async { Json(serde_json::json!({"preview_url": ""})) }),
        );
        let endpoint = serve(router).await;
        let err = deployer(Some(endpoint)).deploy(&request()).await.unwrap_err();
        assert!(matches!(err, StageError::InvalidResponse(_)));
    }
}
