use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{debug, warn};

use alumnet_chat::is_participant;
use alumnet_types::api::{MessagesResponse, SendMessageRequest, ThreadResponse, ThreadSummary};
use alumnet_types::models::{Thread, UserSummary};

use crate::auth::{AppState, AppStateInner};
use crate::error::{ApiError, ApiResult};
use crate::profiles::load_user;
use crate::session::CurrentUser;

/// GET /chats: the caller's threads, newest first, each with the other
/// participant's name and photo.
pub async fn list_threads(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<ThreadSummary>>> {
    let threads = state.threads.list_threads(&user.id).await?;

    let mut summaries = Vec::with_capacity(threads.len());
    for thread in threads {
        let other_user = match thread.participants.iter().find(|p| **p != user.id) {
            Some(other_id) => load_user(&state, other_id)
                .await?
                .as_ref()
                .map(UserSummary::from),
            None => None,
        };

        summaries.push(ThreadSummary {
            thread_id: thread.id,
            participants: thread.participants,
            other_user,
            created_at: thread.created_at,
        });
    }

    Ok(Json(summaries))
}

/// POST /chats/{other_user_id}: find or create the thread with another alum.
pub async fn open_thread(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(other_user_id): Path<String>,
) -> ApiResult<Json<ThreadResponse>> {
    let thread_id = resolve_with(&state, &user.id, &other_user_id).await?;
    Ok(Json(ThreadResponse { thread_id }))
}

/// Resolves the thread between `user_id` and an existing other user.
/// Shared by the REST route and the gateway's `OpenThread`.
pub async fn resolve_with(
    state: &AppStateInner,
    user_id: &str,
    other_user_id: &str,
) -> ApiResult<String> {
    if other_user_id == user_id {
        return Err(ApiError::InvalidInput("cannot start a chat with yourself".into()));
    }
    if load_user(state, other_user_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("user {}", other_user_id)));
    }

    Ok(state
        .threads
        .resolve_thread(Some(user_id), other_user_id)
        .await?)
}

/// GET /chats/{thread_id}/messages: one ordered read of the thread.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<MessagesResponse>> {
    authorize_thread(&state, &thread_id, &user.id).await?;
    let messages = state.messages.snapshot(&thread_id).await?;

    Ok(Json(MessagesResponse { thread_id, messages }))
}

/// POST /chats/{thread_id}/messages
///
/// Blank text is accepted and dropped (204). A stored message is not echoed
/// back (202); it shows up in the next snapshot.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(thread_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<StatusCode> {
    if req.text.trim().is_empty() {
        debug!("Dropping blank message from {}", user.id);
        return Ok(StatusCode::NO_CONTENT);
    }

    authorize_thread(&state, &thread_id, &user.id).await?;
    state.messages.send(&thread_id, &user.id, &req.text).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Loads the thread and checks the user takes part in it.
pub async fn authorize_thread(
    state: &AppStateInner,
    thread_id: &str,
    user_id: &str,
) -> ApiResult<Thread> {
    let thread = state.threads.thread(thread_id).await?;
    if !is_participant(&thread, user_id) {
        warn!("User {} denied access to thread {}", user_id, thread_id);
        return Err(ApiError::Forbidden);
    }
    Ok(thread)
}
