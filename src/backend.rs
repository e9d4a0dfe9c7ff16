//! Client for the hosted backend: queue RPCs and the follow state transition.
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::model::{FollowEvent, QueueMessage};

const RPC_PATH: &str = "rest/v1/rpc/";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to reach backend: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{function} returned {status}: {detail}")]
    Status {
        function: String,
        status: StatusCode,
        detail: String,
    },
    #[error("invalid response from {function}: {source}")]
    Decode {
        function: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid endpoint for {0}")]
    Endpoint(String),
}

/// Reads and acknowledges messages on a durable queue.
#[async_trait]
pub trait QueueService: Send + Sync {
    async fn pop(&self, queue_name: &str, count: u32) -> Result<Vec<QueueMessage>>;

    /// Returns false when the queue no longer knows the message.
    async fn archive(&self, queue_name: &str, message_id: i64) -> Result<bool>;
}

/// Applies a follow/unfollow to relationship state.
#[async_trait]
pub trait FollowService: Send + Sync {
    async fn apply_follow_event(&self, event: &FollowEvent) -> Result<()>;
}

#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
    service_key: String,
    queue_schema: String,
    follow_procedure: String,
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url)
            .field("queue_schema", &self.queue_schema)
            .field("follow_procedure", &self.follow_procedure)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct PostgrestError {
    message: Option<String>,
    code: Option<String>,
}

impl BackendClient {
    pub fn new(
        base_url: Url,
        service_key: String,
        queue_schema: String,
        follow_procedure: String,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("knitted-drain/0.1")
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: with_trailing_slash(base_url),
            service_key,
            queue_schema,
            follow_procedure,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(cfg.backend.url.trim()).context("invalid backend.url")?;
        Self::new(
            base_url,
            cfg.backend.service_key.clone(),
            cfg.queue.schema.clone(),
            cfg.follow.procedure.clone(),
            cfg.request_timeout(),
        )
    }

    /// Build a POST to `rest/v1/rpc/{function}`. `schema` selects a non-default
    /// Postgres schema through the profile headers.
    pub fn build_rpc_request(
        &self,
        function: &str,
        schema: Option<&str>,
        body: &Value,
    ) -> Result<reqwest::Request, BackendError> {
        let endpoint = self
            .base_url
            .join(&format!("{RPC_PATH}{function}"))
            .map_err(|_| BackendError::Endpoint(function.to_string()))?;
        let mut builder = self
            .http
            .request(Method::POST, endpoint)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(schema) = schema {
            builder = builder
                .header("Content-Profile", schema)
                .header("Accept-Profile", schema);
        }
        Ok(builder.build()?)
    }

    async fn call_rpc(
        &self,
        function: &str,
        schema: Option<&str>,
        body: Value,
    ) -> Result<Value, BackendError> {
        let request = self.build_rpc_request(function, schema, &body)?;
        debug!(url = %request.url(), function, "backend rpc");

        let res = self.http.execute(request).await?;
        let status = res.status();
        let text = res.text().await?;

        if !status.is_success() {
            let detail = describe_failure(&text);
            warn!(function, %status, %detail, "backend rpc failed");
            return Err(BackendError::Status {
                function: function.to_string(),
                status,
                detail,
            });
        }

        // 204 and `void` functions answer with an empty body.
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|source| BackendError::Decode {
            function: function.to_string(),
            source,
        })
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Prefer PostgREST's `message`/`code` over the raw body.
fn describe_failure(body: &str) -> String {
    match serde_json::from_str::<PostgrestError>(body) {
        Ok(PostgrestError {
            message: Some(message),
            code: Some(code),
        }) => format!("{message} (code {code})"),
        Ok(PostgrestError {
            message: Some(message),
            code: None,
        }) => message,
        _ if body.trim().is_empty() => "empty response body".to_string(),
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl QueueService for BackendClient {
    async fn pop(&self, queue_name: &str, count: u32) -> Result<Vec<QueueMessage>> {
        let body = json!({ "queue_name": queue_name, "n": count });
        let value = self.call_rpc("pop", Some(self.queue_schema.as_str()), body).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        let messages = serde_json::from_value(value).map_err(|source| BackendError::Decode {
            function: "pop".to_string(),
            source,
        })?;
        Ok(messages)
    }

    async fn archive(&self, queue_name: &str, message_id: i64) -> Result<bool> {
        let body = json!({ "queue_name": queue_name, "message_id": message_id });
        let value = self
            .call_rpc("archive", Some(self.queue_schema.as_str()), body)
            .await?;
        // Older gateways answer with an empty body on success.
        Ok(value.as_bool().unwrap_or(value.is_null()))
    }
}

#[async_trait]
impl FollowService for BackendClient {
    async fn apply_follow_event(&self, event: &FollowEvent) -> Result<()> {
        let body = json!({
            "action": event.action,
            "follower_id": event.follower_id,
            "following_id": event.following_id,
        });
        self.call_rpc(&self.follow_procedure, None, body)
            .await
            .with_context(|| {
                format!(
                    "{} failed for action '{}'",
                    self.follow_procedure, event.action
                )
            })?;
        Ok(())
    }
}
