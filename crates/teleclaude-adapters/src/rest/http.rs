//! HTTP routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use teleclaude_core::types::{AdapterMetadata, PeerInfo};
use teleclaude_core::validation::{limits, validate_message_content};

use super::RestAdapter;
use crate::traits::{Actor, InboundEvent, InboundPayload};

/// Longest an output stream may be held open.
const MAX_STREAM_SECS: u64 = 600;

/// Body of `POST /sessions/{id}/messages`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRequest {
    /// Text for the agent.
    pub text: String,
    /// Who is sending it (another computer or tool).
    #[serde(default)]
    pub sender: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamQuery {
    #[serde(default = "default_stream_secs")]
    timeout_secs: u64,
}

const fn default_stream_secs() -> u64 {
    60
}

/// Build the REST router.
pub fn router(adapter: Arc<RestAdapter>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/peers", get(peers_handler))
        .route("/sessions/{id}/messages", post(input_handler))
        .route("/sessions/{id}/output", get(output_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(adapter)
}

async fn health_handler(
    State(adapter): State<Arc<RestAdapter>>,
) -> Result<Json<PeerInfo>, StatusCode> {
    let ctx = adapter
        .context()
        .await
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(PeerInfo::online(ctx.computer_name, "rest")))
}

async fn peers_handler(State(adapter): State<Arc<RestAdapter>>) -> Json<Vec<PeerInfo>> {
    use crate::traits::Adapter;
    Json(adapter.discover_peers().await)
}

async fn input_handler(
    State(adapter): State<Arc<RestAdapter>>,
    Path(session_id): Path<String>,
    Json(request): Json<InputRequest>,
) -> impl IntoResponse {
    let Some(ctx) = adapter.context().await else {
        return (StatusCode::SERVICE_UNAVAILABLE, "not started".to_string());
    };

    let text = match validate_message_content(&request.text, limits::MAX_MESSAGE_LENGTH) {
        Ok(text) => text,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()),
    };

    let event = InboundEvent {
        adapter: "rest".to_string(),
        lookup_field: "session_id",
        lookup_value: session_id,
        seed: AdapterMetadata::default(),
        message_id: None,
        actor: request.sender.map(|name| Actor {
            id: None,
            name,
            avatar_url: None,
        }),
        payload: InboundPayload::Text(text),
    };

    match ctx.inbound.send(event).await {
        Ok(()) => (StatusCode::ACCEPTED, "accepted".to_string()),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "router stopped".to_string()),
    }
}

async fn output_handler(
    State(adapter): State<Arc<RestAdapter>>,
    Path(session_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let timeout = Duration::from_secs(query.timeout_secs.min(MAX_STREAM_SECS));
    let stream = adapter
        .output_stream(&session_id, timeout)
        .await
        .map(|text| Ok(Event::default().data(text)));

    Sse::new(stream).keep_alive(KeepAlive::default())
}
