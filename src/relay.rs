//! Byte-stream relay from the inference backend to the caller.
//!
//! Chunks are forwarded exactly as received. The relay only tracks enough
//! state to tell a clean end-of-stream from a fault or an abandoned stream.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use axum::{
    body::{Body, Bytes},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::error::GatewayError;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

const STREAMING_CONTENT_TYPES: [&str; 3] =
    ["application/x-ndjson", "application/json-seq", "text/event-stream"];

/// Whether a backend `Content-Type` announces an incremental body.
pub fn is_streaming_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    STREAMING_CONTENT_TYPES.contains(&essence.as_str())
}

/// An open streaming body from the backend, not yet relayed.
pub struct ByteStream {
    content_type: String,
    chunks: ChunkStream,
}

impl ByteStream {
    pub fn new(content_type: impl Into<String>, chunks: ChunkStream) -> Self {
        Self {
            content_type: content_type.into(),
            chunks,
        }
    }

    pub fn from_response(response: reqwest::Response) -> Self {
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/x-ndjson")
            .to_string();
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| GatewayError::StreamFault(err.to_string())));
        Self::new(content_type, Box::pin(chunks))
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    NotStarted,
    Streaming,
    ClosedOk,
    ClosedError,
}

pub struct Relay {
    operation: &'static str,
    model: String,
    content_type: String,
    upstream: ChunkStream,
    state: RelayState,
    chunks: u64,
    bytes: u64,
}

impl Relay {
    pub fn new(operation: &'static str, model: impl Into<String>, stream: ByteStream) -> Self {
        Self {
            operation,
            model: model.into(),
            content_type: stream.content_type,
            upstream: stream.chunks,
            state: RelayState::NotStarted,
            chunks: 0,
            bytes: 0,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn chunks_relayed(&self) -> u64 {
        self.chunks
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    fn is_closed(&self) -> bool {
        matches!(self.state, RelayState::ClosedOk | RelayState::ClosedError)
    }
}

impl Stream for Relay {
    type Item = Result<Bytes, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.is_closed() {
            return Poll::Ready(None);
        }

        match this.upstream.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                this.state = RelayState::Streaming;
                this.chunks += 1;
                this.bytes += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.state = RelayState::ClosedError;
                warn!(
                    operation = this.operation,
                    model = %this.model,
                    chunks = this.chunks,
                    error = %err,
                    "relay closed with error"
                );
                let err = match err {
                    fault @ GatewayError::StreamFault(_) => fault,
                    other => GatewayError::StreamFault(other.to_string()),
                };
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.state = RelayState::ClosedOk;
                debug!(
                    operation = this.operation,
                    model = %this.model,
                    chunks = this.chunks,
                    bytes = this.bytes,
                    "relay finished"
                );
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if !self.is_closed() {
            info!(
                operation = self.operation,
                model = %self.model,
                chunks = self.chunks,
                "caller went away mid-stream, closing backend connection"
            );
        }
    }
}

impl IntoResponse for Relay {
    fn into_response(self) -> Response {
        let content_type = HeaderValue::from_str(&self.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
        (
            [(header::CONTENT_TYPE, content_type)],
            Body::from_stream(self),
        )
            .into_response()
    }
}
