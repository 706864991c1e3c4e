//! Legacy HTTP + SSE transport.
//!
//! `GET /sse` authenticates once and opens an event stream whose first event
//! (`endpoint`) names the URL for posting messages. Every message posted to
//! `POST /messages?sessionId=..` runs under the context captured when the
//! stream opened; responses come back on the stream as `message` events.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Query, State},
    http::{Extensions, HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::mcp::{CallScope, JsonRpcResponse, McpRouter, TransportKind};
use crate::server::GatewayState;
use crate::server::http::{client_address, peer_address, read_body, unauthorized};
use crate::types::SessionId;

const INBOUND_BUFFER: usize = 64;
const OUTBOUND_BUFFER: usize = 64;

type EventSender = mpsc::Sender<Result<Event, Infallible>>;

/// Open SSE sessions, keyed by the id handed out in the `endpoint` event.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, mpsc::Sender<Bytes>>>,
}

impl SessionStore {
    async fn register(&self, id: SessionId, inbound: mpsc::Sender<Bytes>) {
        self.sessions.write().await.insert(id, inbound);
    }

    async fn remove(&self, id: &SessionId) {
        self.sessions.write().await.remove(id);
    }

    async fn sender(&self, id: &str) -> Option<mpsc::Sender<Bytes>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

pub(crate) async fn sse_open(
    State(state): State<Arc<GatewayState>>,
    extensions: Extensions,
    headers: HeaderMap,
) -> Response {
    let auth = match state.resolver.resolve_http(&headers) {
        Ok(auth) => auth,
        Err(err) => return unauthorized(err),
    };
    let addr = client_address(&headers, peer_address(&extensions));
    let scope = CallScope::network(TransportKind::Sse, auth, &addr);

    let session_id = SessionId::new(uuid::Uuid::new_v4().to_string());
    let (in_tx, in_rx) = mpsc::channel::<Bytes>(INBOUND_BUFFER);
    let (out_tx, out_rx) = mpsc::channel::<Result<Event, Infallible>>(OUTBOUND_BUFFER);

    let endpoint = format!("/messages?sessionId={}", session_id);
    if out_tx
        .send(Ok(Event::default().event("endpoint").data(endpoint)))
        .await
        .is_err()
    {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    state.sessions.register(session_id.clone(), in_tx).await;
    info!(
        session_id = %session_id,
        mode = %scope.auth.mode(),
        client = %addr,
        "SSE session opened"
    );

    tokio::spawn(run_session(
        state.clone(),
        session_id,
        scope,
        in_rx,
        out_tx,
    ));

    Sse::new(ReceiverStream::new(out_rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn run_session(
    state: Arc<GatewayState>,
    session_id: SessionId,
    scope: CallScope,
    mut inbound: mpsc::Receiver<Bytes>,
    outbound: EventSender,
) {
    // One message at a time, so responses leave in arrival order.
    loop {
        tokio::select! {
            message = inbound.recv() => {
                let Some(message) = message else { break };
                tokio::select! {
                    _ = answer(&state.router, &scope, &message, &outbound) => {}
                    _ = outbound.closed() => break,
                }
            }
            _ = outbound.closed() => break,
        }
    }
    state.sessions.remove(&session_id).await;
    info!(session_id = %session_id, "SSE session closed");
}

async fn answer(router: &McpRouter, scope: &CallScope, message: &[u8], outbound: &EventSender) {
    let Some(response) = router.handle_bytes(message, scope).await else {
        return;
    };
    let event = Event::default()
        .event("message")
        .data(response.to_json_string());
    if outbound.send(Ok(event)).await.is_err() {
        debug!(id = %response.id, "SSE stream gone; discarding response");
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

pub(crate) async fn messages_post(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<MessagesQuery>,
    body: Body,
) -> Response {
    let Some(session_id) = query.session_id.filter(|s| !s.is_empty()) else {
        let body = JsonRpcResponse::invalid_request(Value::Null, "missing sessionId");
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    };
    let body = match read_body(body).await {
        Ok(bytes) => bytes,
        Err(rejection) => return (StatusCode::BAD_REQUEST, Json(rejection)).into_response(),
    };

    let delivered = match state.sessions.sender(&session_id).await {
        Some(inbound) => inbound.send(body).await.is_ok(),
        None => false,
    };
    if !delivered {
        warn!(session_id = %session_id, "Message for unknown SSE session");
        let body = JsonRpcResponse::from_gateway_error(
            Value::Null,
            GatewayError::NotFound(format!("session {}", session_id)),
        );
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    }
    StatusCode::ACCEPTED.into_response()
}
