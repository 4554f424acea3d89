//! HTTP route handlers for the chat relay API.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::conversation::core::errors::{ChatError, ChatResult};
use crate::conversation::core::records::{Conversation, Message};
use crate::conversation::core::role::Role;
use crate::conversation::engine::ChatReply;
use crate::conversation::export::{render_transcript, transcript_file_name};

use super::error::detail;
use super::state::AppState;

const DEFAULT_CONVERSATION_LIMIT: u32 = 10;
const DEFAULT_MESSAGE_LIMIT: u32 = 50;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let router = Router::new().route("/health", get(health_check));
    let router = with_trailing_slash(router, "/chat", post(chat));
    let router = with_trailing_slash(router, "/clear-conversation", post(clear_conversation));
    let router = with_trailing_slash(router, "/feedback", post(submit_feedback));
    let router = with_trailing_slash(router, "/update-system-message", post(update_system_message));
    let router = with_trailing_slash(router, "/export-conversation/{id}", get(export_conversation));
    let router = with_trailing_slash(router, "/conversations", get(list_conversations));
    let router = with_trailing_slash(router, "/conversations/{id}/messages", get(list_messages));
    let router = with_trailing_slash(router, "/conversations/{id}", delete(delete_conversation));
    router.with_state(state)
}

fn with_trailing_slash(
    router: Router<Arc<AppState>>,
    path: &str,
    handler: MethodRouter<Arc<AppState>>,
) -> Router<Arc<AppState>> {
    router
        .route(path, handler.clone())
        .route(&format!("{path}/"), handler)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chat-relay",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Plain acknowledgement body.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Always `"success"`.
    pub status: &'static str,
}

const SUCCESS: StatusResponse = StatusResponse { status: "success" };

/// Chat request.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// The user's message.
    pub message: String,
    /// Role recorded for the message.
    #[serde(default)]
    pub role: Role,
    /// Conversation to continue or create.
    pub conversation_id: String,
}

/// Handle one chat turn.
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ChatResult<Json<ChatReply>> {
    let reply = state
        .manager
        .chat(
            &request.conversation_id,
            request.role,
            &request.message,
            state.completion.as_ref(),
        )
        .await?;
    Ok(Json(reply))
}

/// Identifier given either in the query string or in a JSON body.
#[derive(Debug, Default, Deserialize)]
pub struct ClearRequest {
    /// Conversation to retire.
    pub conversation_id: Option<String>,
}

/// Identifier of the conversation that replaces the cleared one.
#[derive(Debug, Serialize)]
pub struct ClearResponse {
    /// Freshly minted identifier.
    pub conversation_id: String,
}

async fn clear_conversation(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClearRequest>,
    body: Bytes,
) -> Result<Json<ClearResponse>, Response> {
    let from_body = || -> Option<String> {
        serde_json::from_slice::<ClearRequest>(&body)
            .ok()
            .and_then(|request| request.conversation_id)
    };
    let Some(identifier) = query.conversation_id.or_else(from_body) else {
        return Err(detail(
            StatusCode::UNPROCESSABLE_ENTITY,
            "conversation_id is required",
        ));
    };

    let conversation_id = state
        .manager
        .clear(&identifier)
        .await
        .map_err(IntoResponse::into_response)?;
    info!("Cleared conversation {identifier}, continuing as {conversation_id}");
    Ok(Json(ClearResponse { conversation_id }))
}

/// Feedback on one assistant message.
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    /// Conversation the message belongs to. Not checked against the message.
    pub conversation_id: String,
    /// Rated message.
    pub message_id: i64,
    /// Thumbs up or down.
    pub is_positive: bool,
}

async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FeedbackRequest>,
) -> ChatResult<Json<StatusResponse>> {
    if state.store.find_message(request.message_id).await?.is_none() {
        return Err(ChatError::message_not_found());
    }
    state
        .store
        .upsert_feedback(request.message_id, request.is_positive)
        .await?;
    Ok(Json(SUCCESS))
}

/// New system prompt for a conversation.
#[derive(Debug, Deserialize)]
pub struct SystemMessageRequest {
    /// Replacement prompt.
    pub system_message: String,
    /// Target conversation, created if unknown.
    pub conversation_id: String,
}

async fn update_system_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SystemMessageRequest>,
) -> ChatResult<Json<StatusResponse>> {
    state
        .manager
        .replace_system_message(&request.conversation_id, &request.system_message)
        .await?;
    Ok(Json(SUCCESS))
}

async fn known_conversation(state: &AppState, identifier: &str) -> ChatResult<Conversation> {
    state
        .store
        .find_conversation(identifier)
        .await?
        .ok_or_else(ChatError::conversation_not_found)
}

async fn export_conversation(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> ChatResult<Response> {
    let conversation = known_conversation(&state, &identifier).await?;
    let messages = state.store.list_messages(conversation.id).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        transcript_file_name(&identifier)
    );
    Ok((
        [
            (CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        render_transcript(&messages),
    )
        .into_response())
}

/// Offset pagination parameters.
#[derive(Debug, Default, Deserialize)]
pub struct Page {
    /// Rows to skip.
    pub skip: Option<u32>,
    /// Maximum rows returned.
    pub limit: Option<u32>,
}

/// Conversation list item.
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    /// Surrogate key.
    pub id: i64,
    /// External identifier.
    pub conversation_id: String,
    /// Display title.
    pub title: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationSummary {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id,
            conversation_id: conversation.conversation_id,
            title: conversation.title,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(page): Query<Page>,
) -> ChatResult<Json<Vec<ConversationSummary>>> {
    let conversations = state
        .store
        .list_active(
            page.skip.unwrap_or(0),
            page.limit.unwrap_or(DEFAULT_CONVERSATION_LIMIT),
        )
        .await?;
    Ok(Json(conversations.into_iter().map(Into::into).collect()))
}

/// Message list item.
#[derive(Debug, Serialize)]
pub struct MessageView {
    /// Message id, usable for feedback.
    pub id: i64,
    /// Author role.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageView {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content,
            created_at: message.created_at,
        }
    }
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
    Query(page): Query<Page>,
) -> ChatResult<Json<Vec<MessageView>>> {
    let conversation = known_conversation(&state, &identifier).await?;
    let messages = state
        .store
        .list_visible_messages(
            conversation.id,
            page.skip.unwrap_or(0),
            page.limit.unwrap_or(DEFAULT_MESSAGE_LIMIT),
        )
        .await?;
    Ok(Json(messages.into_iter().map(Into::into).collect()))
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> ChatResult<Json<StatusResponse>> {
    state.manager.deactivate(&identifier).await?;
    Ok(Json(SUCCESS))
}
