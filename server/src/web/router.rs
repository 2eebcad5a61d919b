use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use super::{AppState, ws};
use crate::chat::service::ChatServiceError;
use crate::store::UserId;

/// Build the axum router with all HTTP and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", axum::routing::get(ws::ws_upgrade))
        .route(
            "/api/chat/{channel}/join",
            axum::routing::post(join_channel),
        )
        .route(
            "/api/chat/{channel}/leave",
            axum::routing::post(leave_channel),
        )
        .route(
            "/api/chat/{channel}/messages",
            axum::routing::post(send_message).get(get_history),
        )
        .route("/api/chat/{channel}/users", axum::routing::get(get_users))
        .with_state(state)
}

/// Error body carrying the stable code alongside the human-readable message.
#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

struct ApiError(ChatServiceError);

impl From<ChatServiceError> for ApiError {
    fn from(error: ChatServiceError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChatServiceError::UserOffline => StatusCode::CONFLICT,
            ChatServiceError::LeaveHomeChannel => StatusCode::FORBIDDEN,
            ChatServiceError::InvalidJoinAction
            | ChatServiceError::InvalidLeaveAction
            | ChatServiceError::InvalidSendAction
            | ChatServiceError::InvalidGetHistoryAction
            | ChatServiceError::InvalidGetUsersAction => StatusCode::BAD_REQUEST,
            ChatServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            code: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// The requester's identity; authentication happens upstream of this
/// service, so the caller supplies it directly.
#[derive(Deserialize)]
struct UserParam {
    user_id: UserId,
}

async fn join_channel(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    Query(user): Query<UserParam>,
) -> Result<StatusCode, ApiError> {
    state.chat.join_channel(&channel, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn leave_channel(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    Query(user): Query<UserParam>,
) -> Result<StatusCode, ApiError> {
    state.chat.leave_channel(&channel, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SendMessageBody {
    text: String,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    Query(user): Query<UserParam>,
    Json(body): Json<SendMessageBody>,
) -> Result<StatusCode, ApiError> {
    state
        .chat
        .send_chat_message(&channel, user.user_id, &body.text)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct HistoryParams {
    user_id: UserId,
    limit: Option<u32>,
    /// Exclusive upper bound on sent time, epoch milliseconds.
    before: Option<i64>,
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Response, ApiError> {
    let before = params.before.and_then(DateTime::from_timestamp_millis);
    let messages = state
        .chat
        .get_channel_history(&channel, params.user_id, params.limit, before)
        .await?;
    Ok(Json(messages).into_response())
}

async fn get_users(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    Query(user): Query<UserParam>,
) -> Result<Response, ApiError> {
    let users = state.chat.get_channel_users(&channel, user.user_id).await?;
    Ok(Json(users).into_response())
}
