//! Text and code generation over an OpenAI-compatible chat completions API.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::GenerationSettings;
use crate::errors::StageError;

// Takes the first fenced block; models often wrap the whole file in one.
static CODE_FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[\w+#.-]*[ \t]*\r?\n(.*?)```").unwrap());

const SPEC_SYSTEM_PROMPT: &str = "You are a product engineer. Turn the user's request into a concise \
     application specification in markdown: purpose, screens, data model, and behaviour. \
     Do not write code.";

const CODE_SYSTEM_PROMPT: &str = "You are a senior frontend engineer. Implement the application \
     described by the specification as a single self-contained HTML file with inline CSS and \
     JavaScript. Reply with the file contents only.";

/// The external text/code generation capability.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Produce specification text from the user's prompt.
    async fn generate_spec(&self, prompt: &str) -> Result<String, StageError>;

    /// Produce application source from the prompt and its specification.
    async fn generate_code(&self, prompt: &str, spec: &str) -> Result<String, StageError>;
}

pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl OpenAiGenerator {
    pub fn new(settings: &GenerationSettings) -> Self {
        Self {
            client: Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    async fn complete(&self, system: &str, user: String) -> Result<String, StageError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(system.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(user),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(network_error)?;
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| StageError::InvalidResponse(e.to_string()))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(StageError::EmptyResponse);
        }
        Ok(text)
    }
}

#[async_trait]
impl GenerationService for OpenAiGenerator {
    async fn generate_spec(&self, prompt: &str) -> Result<String, StageError> {
        let spec = self.complete(SPEC_SYSTEM_PROMPT, prompt.to_string()).await?;
        Ok(spec.trim().to_string())
    }

    async fn generate_code(&self, prompt: &str, spec: &str) -> Result<String, StageError> {
        let user = format!("Request:\n{}\n\nSpecification:\n{}", prompt, spec);
        let raw = self.complete(CODE_SYSTEM_PROMPT, user).await?;
        let code = extract_code(&raw);
        if code.is_empty() {
            return Err(StageError::EmptyResponse);
        }
        Ok(code)
    }
}

/// Strip a surrounding markdown fence if the reply has one.
pub fn extract_code(raw: &str) -> String {
    match CODE_FENCE_REGEX.captures(raw).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim_end().to_string(),
        None => raw.trim().to_string(),
    }
}

pub(crate) fn network_error(err: reqwest::Error) -> StageError {
    StageError::Network(err.to_string())
}

/// Turn a non-2xx response into `StageError::Upstream`, preferring the
/// provider's `error.message` over the raw body.
pub(crate) async fn upstream_error(response: reqwest::Response) -> StageError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    let message = if message.is_empty() {
        status.canonical_reason().unwrap_or("unknown error").to_string()
    } else {
        message
    };
    StageError::Upstream {
        status: status.as_u16(),
        message,
    }
}
