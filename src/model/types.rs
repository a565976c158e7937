use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{config::DecodingDefaults, error::GatewayError};

pub const ASSISTANT_ROLE: &str = "assistant";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// What the model is asked to continue.
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    Text(String),
    Turns(Vec<ChatTurn>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decoding {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub input: Prompt,
    pub stream: bool,
    pub decoding: Decoding,
}

/// Optional per-request decoding knobs shared by every generation body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecodingOverrides {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    #[serde(alias = "num_predict")]
    pub max_tokens: Option<u32>,
}

impl DecodingOverrides {
    pub fn resolve(&self, defaults: &DecodingDefaults) -> Decoding {
        Decoding {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            top_k: self.top_k.unwrap_or(defaults.top_k),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
        }
    }
}

/// Body of `POST /generate` and `POST /agent`.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateBody {
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub options: DecodingOverrides,
}

impl GenerateBody {
    pub fn into_request(self, defaults: &DecodingDefaults) -> Result<GenerationRequest, GatewayError> {
        let model = require_model(self.model)?;
        let prompt = self
            .prompt
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| GatewayError::MalformedRequest("prompt must not be empty".into()))?;

        Ok(GenerationRequest {
            model,
            input: Prompt::Text(prompt),
            stream: self.stream.unwrap_or(false),
            decoding: self.options.resolve(defaults),
        })
    }
}

/// Body of `POST /chat`.
#[derive(Debug, Default, Deserialize)]
pub struct ChatBody {
    pub model: Option<String>,
    pub messages: Option<Vec<ChatTurn>>,
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub options: DecodingOverrides,
}

impl ChatBody {
    pub fn into_request(self, defaults: &DecodingDefaults) -> Result<GenerationRequest, GatewayError> {
        let model = require_model(self.model)?;
        let messages = self.messages.unwrap_or_default();
        if messages.is_empty() {
            return Err(GatewayError::MalformedRequest(
                "messages must contain at least one turn".into(),
            ));
        }
        if let Some(idx) = messages.iter().position(|m| m.role.trim().is_empty()) {
            return Err(GatewayError::MalformedRequest(format!(
                "message {idx} is missing a role"
            )));
        }

        Ok(GenerationRequest {
            model,
            input: Prompt::Turns(messages),
            stream: self.stream.unwrap_or(false),
            decoding: self.options.resolve(defaults),
        })
    }
}

fn require_model(model: Option<String>) -> Result<String, GatewayError> {
    model
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| GatewayError::MalformedRequest("model must be a non-empty identifier".into()))
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResponse {
    pub content: String,
    pub role: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

impl GenerationResponse {
    pub fn assistant(content: String, model: String) -> Self {
        Self {
            content,
            role: ASSISTANT_ROLE.to_string(),
            model,
            timestamp: Utc::now(),
        }
    }
}

/// Body of `POST /models/pull`.
#[derive(Debug, Default, Deserialize)]
pub struct PullBody {
    #[serde(alias = "model")]
    pub name: Option<String>,
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PullAcknowledgement {
    pub success: bool,
    pub message: String,
}
