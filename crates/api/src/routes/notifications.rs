//! Notification dispatch route.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use herald_common::error::AppError;
use herald_notifier::{DispatchRequest, DispatchSummary};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/notifications/dispatch", post(dispatch_notification))
}

/// POST /api/notifications/dispatch: fan a notification out to recipients.
///
/// Once the notification row exists the response is always 200 with counts;
/// individual delivery failures show up in `failure_count`.
async fn dispatch_notification(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<DispatchSummary>, AppError> {
    let summary = state.dispatcher.dispatch(request).await?;
    Ok(Json(summary))
}
