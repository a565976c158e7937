//! Outbound side of the gateway: one implementation per backend dialect.

mod ollama;
mod openai;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::http::header;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use crate::{
    config::{AppConfig, BackendFlavor},
    error::GatewayError,
    model::{GenerationRequest, RawModel},
    relay::{ByteStream, is_streaming_content_type},
};

/// Result of a generation call before it is shaped for the caller.
pub enum Completion {
    Text {
        content: String,
        model: Option<String>,
    },
    Stream(ByteStream),
}

/// Result of a model download request.
pub enum PullReply {
    Finished {
        status: Option<String>,
        error: Option<String>,
    },
    Stream(ByteStream),
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn flavor(&self) -> BackendFlavor;

    fn base_url(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Completion, GatewayError>;

    async fn list_models(&self) -> Result<Vec<RawModel>, GatewayError>;

    async fn pull_model(&self, name: &str, stream: bool) -> Result<PullReply, GatewayError>;

    /// Probe the backend; `Ok(None)` means reachable but version unknown.
    async fn version(&self) -> Result<Option<String>, GatewayError>;
}

pub fn connect(config: &AppConfig) -> anyhow::Result<Arc<dyn InferenceBackend>> {
    let client = Client::builder()
        .connect_timeout(config.connect_timeout)
        .build()?;
    let transport = Transport {
        client,
        base_url: config.base_url.clone(),
        api_key: config.api_key.clone(),
    };

    let backend: Arc<dyn InferenceBackend> = match config.flavor {
        BackendFlavor::Ollama => Arc::new(OllamaBackend::new(transport, config)),
        BackendFlavor::OpenAi => Arc::new(OpenAiBackend::new(transport, config)),
    };
    Ok(backend)
}

/// Decoded backend body: one JSON document or an open stream.
pub(crate) enum Reply {
    Json(Value),
    Stream(ByteStream),
}

/// Thin wrapper over the HTTP client shared by every dialect.
pub(crate) struct Transport {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl Transport {
    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) async fn post_json(
        &self,
        path: &str,
        body: &Value,
        limit: Duration,
    ) -> Result<Reply, GatewayError> {
        let url = self.url(path);
        let builder = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string());
        self.call(builder, &url, limit).await
    }

    pub(crate) async fn get_json(&self, path: &str, limit: Duration) -> Result<Value, GatewayError> {
        let url = self.url(path);
        match self.call(self.client.get(&url), &url, limit).await? {
            Reply::Json(value) => Ok(value),
            Reply::Stream(_) => Err(GatewayError::InvalidBackendReply(format!(
                "{path} answered with a stream"
            ))),
        }
    }

    /// `limit` bounds the wait for headers and, for buffered replies, the
    /// body as well. A streaming body is never cut by it.
    async fn call(
        &self,
        builder: RequestBuilder,
        url: &str,
        limit: Duration,
    ) -> Result<Reply, GatewayError> {
        let builder = match self.api_key.as_deref() {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        };
        let deadline = Instant::now() + limit;

        let response = timeout_at(deadline, builder.send())
            .await
            .map_err(|_| GatewayError::Timeout(limit))?
            .map_err(|err| GatewayError::from_transport(url, limit, err))?;

        let status = response.status();
        if !status.is_success() {
            let body = match timeout_at(deadline, response.text())
                .await
                .map_err(|_| GatewayError::Timeout(limit))?
            {
                Ok(body) => body,
                Err(err) => format!("<error body unreadable: {err}>"),
            };
            warn!(%url, status = status.as_u16(), "backend returned an error");
            return Err(GatewayError::BackendError {
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if is_streaming_content_type(content_type) {
            debug!(%url, content_type, "backend opened a stream");
            return Ok(Reply::Stream(ByteStream::from_response(response)));
        }

        let bytes = timeout_at(deadline, response.bytes())
            .await
            .map_err(|_| GatewayError::Timeout(limit))?
            .map_err(|err| GatewayError::from_transport(url, limit, err))?;
        let value = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::InvalidBackendReply(format!("{url}: {e}")))?;
        Ok(Reply::Json(value))
    }
}

/// Follow a path of object keys and array indices down to a string.
pub(crate) fn string_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = match key.parse::<usize>() {
            Ok(idx) => current.get(idx)?,
            Err(_) => current.get(*key)?,
        };
    }
    current.as_str()
}
