//! Stub inference backend speaking enough of the Ollama and OpenAI dialects
//! to exercise the gateway end to end.

#![allow(dead_code)]

use std::{
    convert::Infallible,
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{StreamExt, stream};
use model_gateway::{AppConfig, BackendFlavor, ModelGateway, build_router};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::mpsc};

pub const GENERATED: &str = "X";
pub const STREAM_CHUNKS: [&str; 3] = [
    "{\"model\":\"llama3.2\",\"response\":\"Hel\",\"done\":false}\n",
    "{\"model\":\"llama3.2\",\"response\":\"lo\",\"done\":false}\n",
    "{\"model\":\"llama3.2\",\"response\":\"\",\"done\":true}\n",
];
pub const PULL_PROGRESS: [&str; 4] = [
    "{\"status\":\"pulling manifest\"}\n",
    "{\"status\":\"pulling 8eeb52dfb3bb\",\"digest\":\"sha256:8eeb52dfb3bb\",\"total\":4000,\"completed\":2000}\n",
    "{\"status\":\"verifying sha256 digest\"}\n",
    "{\"status\":\"success\"}\n",
];
pub const SLOW_CHUNKS: usize = 20;

#[derive(Clone, Debug)]
pub struct StubModel {
    pub name: String,
    pub size: u64,
    pub parameter_size: String,
}

/// Observable state of the stub, shared with the test body.
#[derive(Default)]
pub struct StubState {
    pub models: RwLock<Vec<StubModel>>,
    pub last_body: RwLock<Option<Value>>,
    pub slow_chunks_sent: AtomicUsize,
    pub slow_stream_closed: AtomicBool,
}

impl StubState {
    pub fn with_models(models: Vec<StubModel>) -> Arc<Self> {
        let state = Self::default();
        *state.models.write() = models;
        Arc::new(state)
    }

    pub fn last_body(&self) -> Value {
        self.last_body.read().clone().unwrap_or(Value::Null)
    }
}

pub fn default_models() -> Vec<StubModel> {
    vec![
        StubModel {
            name: "llama3.2:latest".into(),
            size: 2_147_483_648,
            parameter_size: "3.2B".into(),
        },
        StubModel {
            name: "codellama:7b".into(),
            size: 3_825_819_519,
            parameter_size: "7B".into(),
        },
    ]
}

pub fn stub_backend(state: Arc<StubState>) -> Router {
    Router::new()
        .route("/api/tags", get(tags))
        .route("/api/version", get(version))
        .route("/api/generate", post(ollama_generate))
        .route("/api/chat", post(ollama_chat))
        .route("/api/pull", post(ollama_pull))
        .route("/v1/models", get(openai_models))
        .route("/v1/chat/completions", post(openai_chat))
        .with_state(state)
}

pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub async fn spawn_gateway_with(config: AppConfig) -> String {
    let config = Arc::new(config);
    let gateway = Arc::new(ModelGateway::initialize(config).unwrap());
    let addr = serve(build_router(gateway)).await;
    format!("http://{addr}")
}

pub async fn spawn_gateway(flavor: BackendFlavor, backend: SocketAddr) -> String {
    spawn_gateway_with(AppConfig::for_backend(flavor, &format!("http://{backend}"))).await
}

/// Stub backend plus a gateway in front of it.
pub async fn setup(flavor: BackendFlavor) -> (String, Arc<StubState>) {
    let state = StubState::with_models(default_models());
    let backend = serve(stub_backend(state.clone())).await;
    (spawn_gateway(flavor, backend).await, state)
}

fn ndjson(chunks: Vec<Result<Bytes, io::Error>>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream::iter(chunks)),
    )
        .into_response()
}

fn statics(parts: &[&'static str]) -> Vec<Result<Bytes, io::Error>> {
    parts
        .iter()
        .map(|p| Ok(Bytes::from_static(p.as_bytes())))
        .collect()
}

async fn tags(State(state): State<Arc<StubState>>) -> Json<Value> {
    let models: Vec<Value> = state
        .models
        .read()
        .iter()
        .map(|m| {
            json!({
                "name": m.name,
                "model": m.name,
                "size": m.size,
                "details": { "parameter_size": m.parameter_size, "family": "llama" },
            })
        })
        .collect();
    Json(json!({ "models": models }))
}

async fn version() -> Json<Value> {
    Json(json!({ "version": "0.5.7" }))
}

async fn ollama_generate(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> Response {
    *state.last_body.write() = Some(body.clone());
    let model = body["model"].as_str().unwrap_or_default().to_string();
    let streaming = body["stream"].as_bool().unwrap_or(true);

    match model.as_str() {
        "missing" => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "model 'missing' not found, try pulling it first" })),
        )
            .into_response(),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(json!({ "model": model, "response": GENERATED, "done": true })).into_response()
        }
        "broken" => {
            // The failure must land after headers and the first chunk are out.
            let body = stream::iter(statics(&STREAM_CHUNKS[..1])).chain(stream::once(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Err::<Bytes, io::Error>(io::Error::other("backend crashed mid-stream"))
            }));
            (
                [(header::CONTENT_TYPE, "application/x-ndjson")],
                Body::from_stream(Box::pin(body)),
            )
                .into_response()
        }
        "stalled-error" => {
            let body = stream::iter(statics(&["{\"error\":\"out of mem"]))
                .chain(stream::pending());
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "application/json")],
                Body::from_stream(body),
            )
                .into_response()
        }
        "trickle" => trickle(state),
        _ if streaming => ndjson(statics(&STREAM_CHUNKS)),
        _ => Json(json!({ "model": model, "response": GENERATED, "done": true })).into_response(),
    }
}

/// Emits one chunk every 50ms and records how far it got before the
/// reader went away.
fn trickle(state: Arc<StubState>) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(1);
    tokio::spawn(async move {
        for i in 0..SLOW_CHUNKS {
            if tx.send(Ok(Bytes::from(format!("{{\"response\":\"{i}\"}}\n")))).await.is_err() {
                state.slow_stream_closed.store(true, Ordering::SeqCst);
                return;
            }
            state.slow_chunks_sent.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });
    let body = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(body),
    )
        .into_response()
}

async fn ollama_chat(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> Response {
    *state.last_body.write() = Some(body.clone());
    let last = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();
    if body["stream"].as_bool().unwrap_or(true) {
        return ndjson(vec![
            Ok(Bytes::from(format!(
                "{{\"message\":{{\"role\":\"assistant\",\"content\":\"echo: {last}\"}},\"done\":false}}\n"
            ))),
            Ok(Bytes::from_static(b"{\"done\":true}\n")),
        ]);
    }
    Json(json!({
        "model": body["model"],
        "message": { "role": "assistant", "content": format!("echo: {last}") },
        "done": true,
    }))
    .into_response()
}

async fn ollama_pull(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> Response {
    *state.last_body.write() = Some(body.clone());
    let name = body["name"].as_str().unwrap_or_default().to_string();
    if name == "slow" {
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
    if name == "does-not-exist" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "pull model manifest: file does not exist" })),
        )
            .into_response();
    }

    state.models.write().push(StubModel {
        name: name.clone(),
        size: 1024,
        parameter_size: "1B".into(),
    });

    if body["stream"].as_bool().unwrap_or(true) {
        ndjson(statics(&PULL_PROGRESS))
    } else {
        Json(json!({ "status": "success" })).into_response()
    }
}

async fn openai_models(State(state): State<Arc<StubState>>) -> Json<Value> {
    let data: Vec<Value> = state
        .models
        .read()
        .iter()
        .map(|m| json!({ "id": m.name, "object": "model", "owned_by": "stub" }))
        .collect();
    Json(json!({ "object": "list", "data": data }))
}

async fn openai_chat(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> Response {
    *state.last_body.write() = Some(body.clone());
    if body["stream"].as_bool().unwrap_or(false) {
        let events: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"X\"}}]}\n\n",
            )),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ];
        return (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(stream::iter(events)),
        )
            .into_response();
    }
    Json(json!({
        "id": "chatcmpl-stub",
        "object": "chat.completion",
        "model": body["model"],
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": GENERATED },
            "finish_reason": "stop",
        }],
    }))
    .into_response()
}
