//! OpenAI-compatible surface (spec.md §4.8): `/v1/chat/completions`,
//! `/v1/models`, `/v1/models/{id}`.
//!
//! A chat completion is translated into an internal [`SubmitRequest`],
//! run through the same [`WorkflowOrchestrator`] every native task uses,
//! and the result is re-shaped into OpenAI's wire format. There is no
//! token-by-token delta event in this engine's event taxonomy (agent
//! primitives only emit `AgentStarted`/`AgentCompleted` markers, not
//! partial output) — the streaming variant therefore emits one role
//! chunk up front, waits for the workflow to reach a terminal event, and
//! emits the whole answer as a single content chunk before `[DONE]`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use shannon_domain::event::EventType;
use shannon_domain::task::TaskStatus;
use std::convert::Infallible;

use crate::runtime::workflow::SubmitRequest;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OpenAIChatRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct OpenAIChatResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<OpenAIChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Serialize)]
struct OpenAIChoice {
    index: u32,
    message: OpenAIResponseMessage,
    finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
struct OpenAIResponseMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[derive(Debug, Serialize)]
struct OpenAIChunk {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<OpenAIChunkChoice>,
}

#[derive(Debug, Serialize)]
struct OpenAIChunkChoice {
    index: u32,
    delta: OpenAIChunkDelta,
    finish_reason: Option<&'static str>,
}

#[derive(Debug, Serialize, Default)]
struct OpenAIChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

fn extract_last_user_message(messages: &[OpenAIMessage]) -> Option<String> {
    messages.iter().rev().find(|m| m.role == "user").map(|m| m.content.clone())
}

fn openai_error(status: StatusCode, error_type: &str, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(serde_json::json!({ "error": { "message": message.into(), "type": error_type } })),
    )
}

/// Derives a request content hash used as the ephemeral session id when
/// the caller supplies none (spec.md §4.8 "derives session ids from
/// request content hashes when absent").
fn content_hash_session_id(messages: &[OpenAIMessage]) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for m in messages {
        m.role.hash(&mut hasher);
        m.content.hash(&mut hasher);
    }
    format!("oai-{:x}", hasher.finish())
}

pub async fn chat_completions(State(state): State<AppState>, Json(body): Json<OpenAIChatRequest>) -> impl IntoResponse {
    if state.llm.registry().is_empty() {
        return openai_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "server_error",
            "no LLM providers are configured",
        )
        .into_response();
    }

    let Some(user_message) = extract_last_user_message(&body.messages) else {
        return openai_error(StatusCode::BAD_REQUEST, "invalid_request_error", "no user message found in messages array")
            .into_response();
    };

    let session_id = content_hash_session_id(&body.messages);
    let req = SubmitRequest {
        query: user_message,
        user_id: "openai-compat".to_string(),
        session_id: Some(session_id),
        mode_override: None,
        routing_labels: Vec::new(),
        context: Default::default(),
        tenant_id: None,
    };

    let task = match state.orchestrator.submit(req).await {
        Ok(t) => t,
        Err(e) => return openai_error(e.status_code(), "server_error", e.to_string()).into_response(),
    };

    let model = body.model;
    let created = chrono::Utc::now().timestamp();
    let completion_id = format!("chatcmpl-{}", task.task_id);

    if body.stream {
        stream_completion(state, task.task_id, completion_id, created, model).await.into_response()
    } else {
        blocking_completion(state, task.task_id, completion_id, created, model).await.into_response()
    }
}

async fn await_terminal(state: &AppState, workflow_id: uuid::Uuid) {
    let subscription = state.events.subscribe(workflow_id, None, None);
    for event in &subscription.replay {
        if is_terminal(event.event_type) {
            return;
        }
    }
    let mut live = subscription.live;
    loop {
        match live.recv().await {
            Ok(event) if is_terminal(event.event_type) => return,
            Ok(_) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn is_terminal(event_type: EventType) -> bool {
    matches!(event_type, EventType::WorkflowCompleted | EventType::WorkflowFailed | EventType::WorkflowCancelled)
}

async fn blocking_completion(
    state: AppState,
    task_id: uuid::Uuid,
    completion_id: String,
    created: i64,
    model: String,
) -> impl IntoResponse {
    await_terminal(&state, task_id).await;

    let Some(task) = state.tasks.get(task_id) else {
        return openai_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "task vanished after completion").into_response();
    };

    if task.status != TaskStatus::Completed {
        let message = task.error.unwrap_or_else(|| format!("task ended with status {:?}", task.status));
        return openai_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", message).into_response();
    }

    Json(OpenAIChatResponse {
        id: completion_id,
        object: "chat.completion",
        created,
        model,
        choices: vec![OpenAIChoice {
            index: 0,
            message: OpenAIResponseMessage { role: "assistant", content: task.result.unwrap_or_default() },
            finish_reason: "stop",
        }],
        usage: Some(OpenAIUsage {
            prompt_tokens: task.usage.input_tokens,
            completion_tokens: task.usage.output_tokens,
            total_tokens: task.usage.total_tokens,
        }),
    })
    .into_response()
}

async fn stream_completion(
    state: AppState,
    task_id: uuid::Uuid,
    completion_id: String,
    created: i64,
    model: String,
) -> impl IntoResponse {
    let stream = async_stream::stream! {
        let role_chunk = OpenAIChunk {
            id: completion_id.clone(),
            object: "chat.completion.chunk",
            created,
            model: model.clone(),
            choices: vec![OpenAIChunkChoice {
                index: 0,
                delta: OpenAIChunkDelta { role: Some("assistant"), content: None },
                finish_reason: None,
            }],
        };
        if let Ok(json) = serde_json::to_string(&role_chunk) {
            yield Ok::<_, Infallible>(SseEvent::default().data(json));
        }

        await_terminal(&state, task_id).await;

        let (content, finish_reason) = match state.tasks.get(task_id) {
            Some(task) if task.status == TaskStatus::Completed => (task.result.unwrap_or_default(), "stop"),
            Some(task) => (task.error.unwrap_or_else(|| "task did not complete".to_string()), "stop"),
            None => ("task vanished after completion".to_string(), "stop"),
        };

        let content_chunk = OpenAIChunk {
            id: completion_id.clone(),
            object: "chat.completion.chunk",
            created,
            model: model.clone(),
            choices: vec![OpenAIChunkChoice {
                index: 0,
                delta: OpenAIChunkDelta { role: None, content: Some(content) },
                finish_reason: None,
            }],
        };
        if let Ok(json) = serde_json::to_string(&content_chunk) {
            yield Ok(SseEvent::default().data(json));
        }

        let final_chunk = OpenAIChunk {
            id: completion_id,
            object: "chat.completion.chunk",
            created,
            model,
            choices: vec![OpenAIChunkChoice {
                index: 0,
                delta: OpenAIChunkDelta::default(),
                finish_reason: Some(finish_reason),
            }],
        };
        if let Ok(json) = serde_json::to_string(&final_chunk) {
            yield Ok(SseEvent::default().data(json));
        }

        yield Ok(SseEvent::default().data("[DONE]"));
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Serialize)]
struct ModelEntry {
    id: String,
    object: &'static str,
    owned_by: &'static str,
}

pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let mut ids: Vec<String> = state.llm.registry().list_roles().into_values().collect();
    ids.sort();
    ids.dedup();
    let data: Vec<ModelEntry> = ids.into_iter().map(|id| ModelEntry { id, object: "model", owned_by: "shannon" }).collect();
    Json(serde_json::json!({ "object": "list", "data": data }))
}

pub async fn get_model(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let known = state.llm.registry().list_roles().into_values().any(|m| m == id);
    if known {
        Json(serde_json::json!({ "id": id, "object": "model", "owned_by": "shannon" })).into_response()
    } else {
        openai_error(StatusCode::NOT_FOUND, "invalid_request_error", format!("model {id} not found")).into_response()
    }
}
