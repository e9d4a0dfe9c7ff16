//! Configuration loader and validator for the follow-event drain service.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::drain::DrainSettings;

pub const ENV_BACKEND_URL: &str = "SUPABASE_URL";
pub const ENV_SERVICE_KEY: &str = "SUPABASE_SERVICE_ROLE_KEY";

const DEFAULT_PATH: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub app: App,
    pub backend: Backend,
    pub queue: Queue,
    pub follow: Follow,
}

/// Service-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct App {
    pub bind_address: String,
    /// Built-in scheduler period; 0 leaves scheduling to an external trigger.
    pub schedule_interval_ms: u64,
}

/// Hosted backend endpoint and credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Backend {
    pub url: String,
    pub service_key: String,
    pub request_timeout_ms: u64,
}

/// Queue the profile events are popped from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Queue {
    pub name: String,
    pub schema: String,
    pub batch_size: u32,
}

/// Remote state-transition procedure for follow events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Follow {
    pub procedure: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".into(),
            schedule_interval_ms: 0,
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            url: String::new(),
            service_key: String::new(),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            name: "profile_events".into(),
            schema: "pgmq_public".into(),
            batch_size: 10,
        }
    }
}

impl Default for Follow {
    fn default() -> Self {
        Self {
            procedure: "handle_follow_event".into(),
        }
    }
}

impl Config {
    pub fn drain_settings(&self) -> DrainSettings {
        DrainSettings {
            queue_name: self.queue.name.clone(),
            batch_size: self.queue.batch_size,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.request_timeout_ms)
    }

    /// `None` when the built-in scheduler is disabled.
    pub fn schedule_interval(&self) -> Option<Duration> {
        (self.app.schedule_interval_ms > 0)
            .then(|| Duration::from_millis(self.app.schedule_interval_ms))
    }

    /// Overlay values found through `lookup` (normally the process environment).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BACKEND_URL).filter(|v| !v.trim().is_empty()) {
            self.backend.url = url;
        }
        if let Some(key) = lookup(ENV_SERVICE_KEY).filter(|v| !v.trim().is_empty()) {
            self.backend.service_key = key;
        }
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate.
/// - If `path` is None, uses `config.yaml` in the current working directory when it
///   exists and built-in defaults otherwise.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    load_with(path, |key| std::env::var(key).ok())
}

pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = match path {
        Some(path) => parse(&fs::read_to_string(path)?)?,
        None if Path::new(DEFAULT_PATH).exists() => {
            parse(&fs::read_to_string(DEFAULT_PATH)?)?
        }
        None => Config::default(),
    };
    cfg.apply_env_overrides(lookup);
    validate(&cfg)?;
    Ok(cfg)
}

fn parse(content: &str) -> Result<Config, ConfigError> {
    Ok(serde_yaml::from_str(content)?)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.bind_address.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind_address must be non-empty"));
    }

    if cfg.backend.url.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.url must be non-empty"));
    }
    if Url::parse(cfg.backend.url.trim()).is_err() {
        return Err(ConfigError::Invalid("backend.url must be an absolute URL"));
    }
    if cfg.backend.service_key.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.service_key must be non-empty"));
    }
    if cfg.backend.request_timeout_ms == 0 {
        return Err(ConfigError::Invalid("backend.request_timeout_ms must be > 0"));
    }

    if cfg.queue.name.trim().is_empty() {
        return Err(ConfigError::Invalid("queue.name must be non-empty"));
    }
    if cfg.queue.schema.trim().is_empty() {
        return Err(ConfigError::Invalid("queue.schema must be non-empty"));
    }
    if cfg.queue.batch_size == 0 {
        return Err(ConfigError::Invalid("queue.batch_size must be > 0"));
    }

    if cfg.follow.procedure.trim().is_empty() {
        return Err(ConfigError::Invalid("follow.procedure must be non-empty"));
    }

    Ok(())
}

/// Example configuration shipped with the service.
pub fn example() -> &'static str {
    r#"app:
  bind_address: "0.0.0.0:8080"
  schedule_interval_ms: 0

backend:
  url: "https://YOUR_PROJECT.supabase.co"
  service_key: "YOUR_SERVICE_ROLE_KEY"
  request_timeout_ms: 10000

queue:
  name: "profile_events"
  schema: "pgmq_public"
  batch_size: 10

follow:
  procedure: "handle_follow_event"
"#
}
