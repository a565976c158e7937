use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    backend::{Completion, InferenceBackend, PullReply},
    config::{AppConfig, BackendFlavor, DecodingDefaults},
    error::GatewayError,
    model::{
        GenerateBody, GenerationRequest, GenerationResponse, ModelDescriptor, Prompt,
        PullAcknowledgement, catalog,
    },
    relay::Relay,
};

const AGENT_DECODING: DecodingDefaults = DecodingDefaults {
    temperature: 0.7,
    top_p: 0.9,
    top_k: 40,
    max_tokens: crate::config::DEFAULT_MAX_TOKENS,
};

const AGENT_PREAMBLE: &str = "You are an advanced AI agent integrated into a professional research and development platform. Your role is to:

1. **Code Analysis & Development**: Analyze, write, debug, and optimize code across multiple programming languages
2. **Research Assistance**: Conduct thorough research, analyze data, and provide evidence-based insights
3. **Problem Solving**: Break down complex problems into manageable steps and provide practical solutions
4. **Technical Documentation**: Create clear, comprehensive documentation and explanations
5. **Project Management**: Help organize and plan development projects and research initiatives

You have access to advanced reasoning capabilities and should provide detailed, actionable responses. When appropriate:
- Show code examples with proper syntax highlighting
- Provide step-by-step implementation guides
- Include best practices and potential pitfalls
- Suggest testing strategies and validation methods
- Reference relevant research papers or technical resources";

pub enum Generation {
    Complete(GenerationResponse),
    Stream(Relay),
}

pub enum Pull {
    Ack(PullAcknowledgement),
    Stream(Relay),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub status: ConnectionStatus,
    pub backend: BackendFlavor,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Stateless bridge between inbound requests and the configured backend.
pub struct ModelGateway {
    config: Arc<AppConfig>,
    backend: Arc<dyn InferenceBackend>,
}

impl ModelGateway {
    pub fn new(config: Arc<AppConfig>, backend: Arc<dyn InferenceBackend>) -> Self {
        Self { config, backend }
    }

    pub fn initialize(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        let backend = crate::backend::connect(config.as_ref())?;
        Ok(Self::new(config, backend))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<Generation, GatewayError> {
        let operation = match request.input {
            Prompt::Text(_) => "generate",
            Prompt::Turns(_) => "chat",
        };
        info!(
            operation,
            model = %request.model,
            stream = request.stream,
            backend = %self.backend.flavor(),
            "forwarding generation"
        );

        match self.backend.generate(&request).await? {
            Completion::Stream(stream) => Ok(Generation::Stream(Relay::new(
                operation,
                request.model,
                stream,
            ))),
            Completion::Text { content, model } => Ok(Generation::Complete(
                GenerationResponse::assistant(content, model.unwrap_or(request.model)),
            )),
        }
    }

    /// Same as `generate`, with the agent preamble wrapped around the prompt.
    pub async fn agent(&self, body: GenerateBody) -> Result<Generation, GatewayError> {
        let mut request = body.into_request(&AGENT_DECODING)?;
        if let Prompt::Text(prompt) = &request.input {
            request.input = Prompt::Text(agent_prompt(prompt));
        }
        self.generate(request).await
    }

    pub fn decoding_defaults(&self) -> &DecodingDefaults {
        &self.config.decoding
    }

    pub async fn list_models(&self) -> Result<Vec<ModelDescriptor>, GatewayError> {
        let flavor = self.backend.flavor();
        let raw = self
            .backend
            .list_models()
            .await
            .map_err(|err| self.registry_unreachable(err))?;
        Ok(raw
            .into_iter()
            .map(|m| ModelDescriptor::from_raw(m, flavor))
            .collect())
    }

    pub async fn catalog(&self) -> Result<Vec<ModelDescriptor>, GatewayError> {
        Ok(catalog(self.list_models().await?))
    }

    pub async fn pull_model(&self, name: &str, stream: bool) -> Result<Pull, GatewayError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GatewayError::MalformedRequest(
                "name must be a non-empty model identifier".into(),
            ));
        }

        match self.backend.pull_model(name, stream).await? {
            PullReply::Stream(progress) => Ok(Pull::Stream(Relay::new("pull", name, progress))),
            PullReply::Finished { error: Some(error), .. } => {
                warn!(model = name, %error, "backend rejected model pull");
                Ok(Pull::Ack(PullAcknowledgement {
                    success: false,
                    message: error,
                }))
            }
            PullReply::Finished { status, error: None } => {
                let success = status.as_deref().is_none_or(|s| s == "success");
                let message = match status {
                    Some(status) if !success => format!("Pulling model {name}: {status}"),
                    _ => format!("Model {name} pulled successfully"),
                };
                Ok(Pull::Ack(PullAcknowledgement { success, message }))
            }
        }
    }

    pub async fn status(&self) -> BackendStatus {
        let (status, version, error) = match self.backend.version().await {
            Ok(version) => (ConnectionStatus::Connected, version, None),
            Err(err) => (ConnectionStatus::Disconnected, None, Some(err.to_string())),
        };
        BackendStatus {
            status,
            backend: self.backend.flavor(),
            base_url: self.backend.base_url().to_string(),
            version,
            error,
        }
    }

    /// Any registry failure means "cannot tell what is installed".
    fn registry_unreachable(&self, err: GatewayError) -> GatewayError {
        match err {
            GatewayError::BackendError { status, body } => GatewayError::BackendUnreachable {
                url: self.backend.base_url().to_string(),
                reason: format!("model registry answered {status}: {body}"),
            },
            GatewayError::InvalidBackendReply(reason) => GatewayError::BackendUnreachable {
                url: self.backend.base_url().to_string(),
                reason,
            },
            other => other,
        }
    }
}

fn agent_prompt(prompt: &str) -> String {
    format!(
        "{AGENT_PREAMBLE}\n\nCurrent user query: {prompt}\n\nRespond as a professional AI agent with deep technical expertise:"
    )
}
