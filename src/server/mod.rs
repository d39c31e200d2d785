// HTTP and WebSocket surface. Two JSON endpoints plus the per-session
// verification stream; each accepted stream gets its own `SessionRunner`.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, info};
use serde_json::json;

use crate::api::{self, TokenValidateRequest, VerifyRequest};
use crate::challenge::ChallengeEngine;
use crate::config::SystemConfig;
use crate::errors::{ApiError, TransportError};
use crate::nonce::NonceStore;
use crate::protocol::{CloseCode, ServerFeedback};
use crate::scoring::capability::ScoringCapability;
use crate::scoring::ScoringOrchestrator;
use crate::session::transport::{FeedbackSink, InboundSource};
use crate::session::{ActiveSessions, SessionRunner};
use crate::store::SessionStore;
use crate::token::TokenIssuer;

/// Shared handles behind the router. Cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub config: SystemConfig,
    pub store: Arc<dyn SessionStore>,
    pub nonces: Arc<NonceStore>,
    pub registry: Arc<ActiveSessions>,
    pub issuer: Arc<TokenIssuer>,
    pub liveness: Arc<dyn ScoringCapability>,
    pub emotion: Arc<dyn ScoringCapability>,
    pub deepfake: Arc<dyn ScoringCapability>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/verify", post(verify))
        .route("/api/token/validate", post(validate_token))
        .route("/ws/:session_id", get(stream_upgrade))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn verify(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<api::VerifyResponse>, ApiError> {
    let response = api::create_session(&state.store, &request).await?;
    Ok(Json(response))
}

async fn validate_token(
    State(state): State<AppState>,
    Json(request): Json<TokenValidateRequest>,
) -> Json<crate::token::TokenValidation> {
    Json(state.issuer.validate(&request.token))
}

async fn stream_upgrade(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| run_session(state, session_id, socket))
}

async fn run_session(state: AppState, session_id: String, socket: WebSocket) {
    info!("websocket connection for session {session_id}");
    let (sink, source) = socket.split();
    let runner = SessionRunner::new(
        state.config.clone(),
        state.store,
        state.nonces,
        state.registry,
        ScoringOrchestrator::new(state.liveness, state.emotion, state.deepfake, &state.config),
        state.issuer,
        ChallengeEngine::new(),
    );
    runner
        .run(
            &session_id,
            Box::new(WsInboundSource { stream: source }),
            Box::new(WsFeedbackSink { sink }),
        )
        .await;
}

struct WsInboundSource {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl InboundSource for WsInboundSource {
    async fn recv(&mut self) -> Option<String> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) | Err(_) => return None,
                // pings are answered by axum; binary and pong are ignored
                Ok(_) => continue,
            }
        }
        None
    }
}

struct WsFeedbackSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FeedbackSink for WsFeedbackSink {
    async fn send(&mut self, feedback: &ServerFeedback) -> Result<(), TransportError> {
        let text = serde_json::to_string(feedback)
            .map_err(|e| TransportError::Closed(format!("serialization failed: {e}")))?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Closed(e.to_string()))
    }

    async fn close(&mut self, code: CloseCode, reason: &str) {
        let frame = CloseFrame {
            code: code.as_u16(),
            reason: Cow::Owned(reason.to_string()),
        };
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            debug!("close frame not delivered: {e}");
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
