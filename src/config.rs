//! Layered configuration for appforge.
//!
//! Settings are read from `.appforge/appforge.toml` (or an explicit path),
//! then overridden by `APPFORGE_*` environment variables, then by CLI flags
//! in `main.rs`. Every field has a default, so a missing file is fine.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! db_path = ".appforge/builds.db"
//!
//! [generation]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [deployment]
//! endpoint = "https://deploy.example.com/api/previews"
//!
//! [pipeline]
//! auto_build_default = true
//!
//! [client]
//! server_url = "http://127.0.0.1:3141"
//! poll_interval_secs = 5
//! poll_timeout_secs = 300
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const CONFIG_DIR: &str = ".appforge";
pub const CONFIG_FILE: &str = "appforge.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppForgeConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub deployment: DeploymentSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub client: ClientSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Permissive CORS for a local frontend dev server.
    #[serde(default)]
    pub dev_mode: bool,
    /// How long shutdown waits for in-flight builds before aborting them.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// When set, logs are also written to a daily rolling file here.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default = "default_generation_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_generation_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_stage_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSettings {
    /// Preview deployment endpoint. Without one every deploy fails and
    /// builds finish as partial completions.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_deploy_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_stage_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_true")]
    pub auto_build_default: bool,
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3141
}
fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("builds.db")
}
fn default_shutdown_grace_secs() -> u64 {
    30
}
fn default_generation_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_generation_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.2
}
fn default_stage_timeout_secs() -> u64 {
    120
}
fn default_deploy_key_env() -> String {
    "APPFORGE_DEPLOY_TOKEN".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_prompt_chars() -> usize {
    10_000
}
fn default_queue_capacity() -> usize {
    64
}
fn default_server_url() -> String {
    "http://127.0.0.1:3141".to_string()
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_poll_timeout_secs() -> u64 {
    300
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
            dev_mode: false,
            shutdown_grace_secs: default_shutdown_grace_secs(),
            log_dir: None,
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            base_url: default_generation_url(),
            model: default_model(),
            api_key_env: default_generation_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_stage_timeout_secs(),
        }
    }
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: default_deploy_key_env(),
            timeout_secs: default_stage_timeout_secs(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            auto_build_default: true,
            max_prompt_chars: default_max_prompt_chars(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            cache_path: None,
        }
    }
}

impl GenerationSettings {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DeploymentSettings {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ServerSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl ClientSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// Where completed builds are cached; `None` when no cache dir exists.
    pub fn resolved_cache_path(&self) -> Option<PathBuf> {
        self.cache_path
            .clone()
            .or_else(|| dirs::cache_dir().map(|d| d.join("appforge").join("builds.json")))
    }
}

impl AppForgeConfig {
    /// Load configuration from `path`, or from `.appforge/appforge.toml` in
    /// the working directory when it exists, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(CONFIG_DIR).join(CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `APPFORGE_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("APPFORGE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("APPFORGE_PORT") {
            self.server.port = parse_value("APPFORGE_PORT", &port)?;
        }
        if let Some(db_path) = lookup("APPFORGE_DB_PATH") {
            self.server.db_path = PathBuf::from(db_path);
        }
        if let Some(log_dir) = lookup("APPFORGE_LOG_DIR") {
            self.server.log_dir = Some(PathBuf::from(log_dir));
        }
        if let Some(url) = lookup("APPFORGE_GENERATION_URL") {
            self.generation.base_url = url;
        }
        if let Some(model) = lookup("APPFORGE_GENERATION_MODEL") {
            self.generation.model = model;
        }
        if let Some(endpoint) = lookup("APPFORGE_DEPLOY_URL") {
            self.deployment.endpoint = Some(endpoint).filter(|e| !e.is_empty());
        }
        if let Some(auto_build) = lookup("APPFORGE_AUTO_BUILD") {
            self.pipeline.auto_build_default = parse_value("APPFORGE_AUTO_BUILD", &auto_build)?;
        }
        if let Some(url) = lookup("APPFORGE_SERVER_URL") {
            self.client.server_url = url;
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppForgeConfig::default();
        assert_eq!(config.server.port, 3141);
        assert_eq!(config.client.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.client.poll_timeout(), Duration::from_secs(300));
        assert!(config.pipeline.auto_build_default);
        assert!(config.deployment.endpoint.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "[server]\nport = 8080\n\n[deployment]\nendpoint = \"http://deploy.local\"\n",
        )
        .unwrap();

        let config = AppForgeConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(
            config.deployment.endpoint.as_deref(),
            Some("http://deploy.local")
        );
        assert_eq!(config.generation.model, "gpt-4o-mini");
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[server\nport = ").unwrap();

        let err = AppForgeConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("APPFORGE_PORT", "9000"),
            ("APPFORGE_DEPLOY_URL", "http://deploy.test"),
            ("APPFORGE_AUTO_BUILD", "false"),
        ]);
        let mut config = AppForgeConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.deployment.endpoint.as_deref(),
            Some("http://deploy.test")
        );
        assert!(!config.pipeline.auto_build_default);
    }

    #[test]
    fn invalid_env_value_is_rejected() {
        let mut config = AppForgeConfig::default();
        let err = config
            .apply_env(|key| (key == "APPFORGE_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
