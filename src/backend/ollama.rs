use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{Completion, InferenceBackend, PullReply, Reply, Transport, string_at};
use crate::{
    config::{AppConfig, BackendFlavor},
    error::GatewayError,
    model::{Decoding, GenerationRequest, Prompt, RawModel},
};

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Option<Vec<TagModel>>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
    size: Option<u64>,
    details: Option<TagDetails>,
}

#[derive(Debug, Deserialize)]
struct TagDetails {
    parameter_size: Option<String>,
}

pub struct OllamaBackend {
    transport: Transport,
    request_timeout: Duration,
    pull_timeout: Duration,
}

impl OllamaBackend {
    pub(crate) fn new(transport: Transport, config: &AppConfig) -> Self {
        Self {
            transport,
            request_timeout: config.request_timeout,
            pull_timeout: config.pull_timeout,
        }
    }
}

fn options(decoding: &Decoding) -> Value {
    json!({
        "temperature": decoding.temperature,
        "top_p": decoding.top_p,
        "top_k": decoding.top_k,
        "num_predict": decoding.max_tokens,
    })
}

/// Payload and endpoint for a request: single prompt or chat turns.
fn payload(request: &GenerationRequest) -> (&'static str, Value) {
    match &request.input {
        Prompt::Text(prompt) => (
            "/api/generate",
            json!({
                "model": request.model,
                "prompt": prompt,
                "stream": request.stream,
                "options": options(&request.decoding),
            }),
        ),
        Prompt::Turns(messages) => (
            "/api/chat",
            json!({
                "model": request.model,
                "messages": messages,
                "stream": request.stream,
                "options": options(&request.decoding),
            }),
        ),
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn flavor(&self) -> BackendFlavor {
        BackendFlavor::Ollama
    }

    fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Completion, GatewayError> {
        let (path, body) = payload(request);
        match self.transport.post_json(path, &body, self.request_timeout).await? {
            Reply::Stream(stream) => Ok(Completion::Stream(stream)),
            Reply::Json(value) => {
                let content = string_at(&value, &["response"])
                    .or_else(|| string_at(&value, &["message", "content"]))
                    .ok_or_else(|| {
                        GatewayError::InvalidBackendReply(format!(
                            "{path} reply carries no generated text"
                        ))
                    })?;
                Ok(Completion::Text {
                    content: content.to_string(),
                    model: string_at(&value, &["model"]).map(str::to_string),
                })
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<RawModel>, GatewayError> {
        let value = self
            .transport
            .get_json("/api/tags", self.request_timeout)
            .await?;
        let tags: TagsResponse = serde_json::from_value(value)
            .map_err(|e| GatewayError::InvalidBackendReply(format!("/api/tags: {e}")))?;

        Ok(tags
            .models
            .unwrap_or_default()
            .into_iter()
            .map(|m| RawModel {
                name: m.name,
                size_bytes: m.size,
                parameter_size: m.details.and_then(|d| d.parameter_size),
            })
            .collect())
    }

    async fn pull_model(&self, name: &str, stream: bool) -> Result<PullReply, GatewayError> {
        info!(model = name, stream, "forwarding model pull");
        let body = json!({ "name": name, "stream": stream });
        // A streamed pull only waits for headers; progress then flows freely.
        let limit = if stream {
            self.request_timeout
        } else {
            self.pull_timeout
        };
        match self.transport.post_json("/api/pull", &body, limit).await? {
            Reply::Stream(stream) => Ok(PullReply::Stream(stream)),
            Reply::Json(value) => Ok(PullReply::Finished {
                status: string_at(&value, &["status"]).map(str::to_string),
                error: string_at(&value, &["error"]).map(str::to_string),
            }),
        }
    }

    async fn version(&self) -> Result<Option<String>, GatewayError> {
        let value = self
            .transport
            .get_json("/api/version", self.request_timeout)
            .await?;
        Ok(string_at(&value, &["version"]).map(str::to_string))
    }
}
