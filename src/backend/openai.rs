use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Completion, InferenceBackend, PullReply, Reply, Transport, string_at};
use crate::{
    config::{AppConfig, BackendFlavor},
    error::GatewayError,
    model::{ChatTurn, GenerationRequest, Prompt, RawModel},
};

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Any server speaking the OpenAI chat-completions dialect.
pub struct OpenAiBackend {
    transport: Transport,
    request_timeout: Duration,
}

impl OpenAiBackend {
    pub(crate) fn new(mut transport: Transport, config: &AppConfig) -> Self {
        // Paths below carry their own /v1 prefix.
        if let Some(stripped) = transport.base_url.strip_suffix("/v1") {
            transport.base_url = stripped.to_string();
        }
        Self {
            transport,
            request_timeout: config.request_timeout,
        }
    }
}

fn payload(request: &GenerationRequest) -> Value {
    let messages = match &request.input {
        Prompt::Text(prompt) => vec![ChatTurn::user(prompt.as_str())],
        Prompt::Turns(turns) => turns.clone(),
    };
    json!({
        "model": request.model,
        "messages": messages,
        "stream": request.stream,
        "temperature": request.decoding.temperature,
        "top_p": request.decoding.top_p,
        "max_tokens": request.decoding.max_tokens,
    })
}

#[async_trait]
impl InferenceBackend for OpenAiBackend {
    fn flavor(&self) -> BackendFlavor {
        BackendFlavor::OpenAi
    }

    fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Completion, GatewayError> {
        let body = payload(request);
        match self
            .transport
            .post_json("/v1/chat/completions", &body, self.request_timeout)
            .await?
        {
            Reply::Stream(stream) => Ok(Completion::Stream(stream)),
            Reply::Json(value) => {
                let content = string_at(&value, &["choices", "0", "message", "content"])
                    .ok_or_else(|| {
                        GatewayError::InvalidBackendReply(
                            "chat completion carries no choices[0].message.content".into(),
                        )
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
            .get_json("/v1/models", self.request_timeout)
            .await?;
        let list: ModelList = serde_json::from_value(value)
            .map_err(|e| GatewayError::InvalidBackendReply(format!("/v1/models: {e}")))?;

        Ok(list
            .data
            .into_iter()
            .map(|m| RawModel {
                name: m.id,
                size_bytes: None,
                parameter_size: None,
            })
            .collect())
    }

    async fn pull_model(&self, name: &str, _stream: bool) -> Result<PullReply, GatewayError> {
        Err(GatewayError::Unsupported(format!(
            "OpenAI-compatible backends cannot download models (requested '{name}')"
        )))
    }

    async fn version(&self) -> Result<Option<String>, GatewayError> {
        self.transport
            .get_json("/v1/models", self.request_timeout)
            .await
            .map(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Decoding;

    #[test]
    fn single_prompt_becomes_one_user_turn() {
        let request = GenerationRequest {
            model: "gpt-4o-mini".into(),
            input: Prompt::Text("hello".into()),
            stream: true,
            decoding: Decoding {
                temperature: 0.2,
                top_p: 1.0,
                top_k: 40,
                max_tokens: 64,
            },
        };
        let body = payload(&request);
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 64);
        assert!(body.get("top_k").is_none());
    }
}
