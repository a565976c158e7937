use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    error::GatewayError,
    gateway::{BackendStatus, Generation, ModelGateway, Pull},
    model::{ChatBody, ChatTurn, GenerateBody, GenerationResponse, ModelDescriptor, PullBody},
};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ModelGateway>,
}

#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<ModelDescriptor>,
}

#[derive(Serialize)]
struct GenerateReply {
    response: String,
    #[serde(flatten)]
    inner: GenerationResponse,
}

#[derive(Serialize)]
struct ChatReply {
    message: ChatTurn,
    #[serde(flatten)]
    inner: GenerationResponse,
}

pub fn build_router(gateway: Arc<ModelGateway>) -> Router {
    let state = AppState { gateway };

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/models", get(list_models))
        .route("/models/catalog", get(model_catalog))
        .route("/models/pull", post(pull_model))
        .route("/generate", post(generate))
        .route("/chat", post(chat))
        .route("/agent", post(agent))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> Json<BackendStatus> {
    Json(state.gateway.status().await)
}

async fn list_models(State(state): State<AppState>) -> Result<Json<ModelsResponse>, GatewayError> {
    let models = state.gateway.list_models().await?;
    info!(count = models.len(), "listed models");
    Ok(Json(ModelsResponse { models }))
}

async fn model_catalog(
    State(state): State<AppState>,
) -> Result<Json<ModelsResponse>, GatewayError> {
    let models = state.gateway.catalog().await?;
    Ok(Json(ModelsResponse { models }))
}

async fn pull_model(
    State(state): State<AppState>,
    payload: Result<Json<PullBody>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(body) = payload.map_err(malformed)?;
    let name = body.name.unwrap_or_default();
    match state
        .gateway
        .pull_model(&name, body.stream.unwrap_or(true))
        .await?
    {
        Pull::Ack(ack) => Ok(Json(ack).into_response()),
        Pull::Stream(relay) => Ok(relay.into_response()),
    }
}

async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(body) = payload.map_err(malformed)?;
    let request = body.into_request(state.gateway.decoding_defaults())?;
    let generation = state.gateway.generate(request).await?;
    Ok(prompt_reply(generation))
}

async fn agent(
    State(state): State<AppState>,
    payload: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(body) = payload.map_err(malformed)?;
    let generation = state.gateway.agent(body).await?;
    Ok(prompt_reply(generation))
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(body) = payload.map_err(malformed)?;
    let request = body.into_request(state.gateway.decoding_defaults())?;
    match state.gateway.generate(request).await? {
        Generation::Stream(relay) => Ok(relay.into_response()),
        Generation::Complete(inner) => Ok(Json(ChatReply {
            message: ChatTurn {
                role: inner.role.clone(),
                content: inner.content.clone(),
            },
            inner,
        })
        .into_response()),
    }
}

fn prompt_reply(generation: Generation) -> Response {
    match generation {
        Generation::Stream(relay) => relay.into_response(),
        Generation::Complete(inner) => Json(GenerateReply {
            response: inner.content.clone(),
            inner,
        })
        .into_response(),
    }
}

fn malformed(rejection: JsonRejection) -> GatewayError {
    GatewayError::MalformedRequest(rejection.body_text())
}
