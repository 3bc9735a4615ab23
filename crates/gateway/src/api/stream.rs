//! Live event streaming (spec.md §4.8's `/stream/sse` and `/stream/ws`):
//! replays missed persistent events since `last_event_id`, then hands the
//! caller the live broadcast channel for a workflow.
//!
//! - `GET /api/v1/stream/sse?workflow_id=…[&types=…][&last_event_id=…]`
//! - `GET /api/v1/stream/ws?workflow_id=…`
//!
//! SSE responses set `X-Accel-Buffering: no` (disable nginx buffering)
//! and never apply a write timeout; a `: keepalive` comment line is sent
//! on an idle tick so intermediaries don't close the connection.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::Stream;
use serde::Deserialize;
use shannon_domain::error::{Error, Result};
use shannon_domain::event::EventType;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub workflow_id: Uuid,
    #[serde(default)]
    pub types: Option<String>,
    #[serde(default)]
    pub last_event_id: Option<u64>,
}

fn parse_types(types: &Option<String>) -> Result<Option<Vec<EventType>>> {
    let Some(raw) = types else { return Ok(None) };
    let mut parsed = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let ty = EventType::from_wire_name(name)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown event type \"{name}\"")))?;
        parsed.push(ty);
    }
    Ok(Some(parsed))
}

pub async fn sse(
    State(state): State<AppState>,
    Query(q): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>>> {
    let types = parse_types(&q.types)?;
    let subscription = state.events.subscribe(q.workflow_id, q.last_event_id, types.as_deref());

    let stream = async_stream::stream! {
        for event in subscription.replay {
            if let Ok(json) = serde_json::to_string(&event) {
                yield Ok(SseEvent::default()
                    .event(event.event_type.sse_event_name())
                    .id(event.seq.to_string())
                    .data(json));
            }
        }

        let mut live = subscription.live;
        loop {
            match live.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(SseEvent::default()
                            .event(event.event_type.sse_event_name())
                            .id(event.seq.to_string())
                            .data(json));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(15)).text("keepalive"),
    ))
}

pub async fn ws(State(state): State<AppState>, Query(q): Query<StreamQuery>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| handle_ws(socket, state, q))
}

async fn handle_ws(mut socket: WebSocket, state: AppState, q: StreamQuery) {
    let types = match parse_types(&q.types) {
        Ok(t) => t,
        Err(e) => {
            let _ = socket.send(Message::Text(format!("{{\"error\":\"{e}\"}}"))).await;
            return;
        }
    };
    let subscription = state.events.subscribe(q.workflow_id, q.last_event_id, types.as_deref());

    for event in subscription.replay {
        let Ok(json) = serde_json::to_string(&event) else { continue };
        if socket.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    let mut live = subscription.live;
    loop {
        tokio::select! {
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | None => return,
                Some(Err(_)) => return,
                _ => continue,
            },
            event = live.recv() => match event {
                Ok(event) => {
                    let Ok(json) = serde_json::to_string(&event) else { continue };
                    if socket.send(Message::Text(json)).await.is_err() {
                        return;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}
