//! Payment gateway webhook handler.

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::WebhookAck;
use crate::app_state::AppState;
use crate::domain::notification::MAX_BODY_BYTES;
use crate::error::{ApiError, ErrorResponse};

/// `POST /webhooks/payments` — Receive a payment gateway notification.
///
/// # Errors
///
/// Returns [`ApiError::InvalidRequest`] for an unreadable, oversized or
/// malformed body, and [`ApiError::PersistenceError`] when the notification
/// could not be recorded.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/payments",
    tag = "Webhooks",
    summary = "Receive a payment notification",
    description = "Records the notification and runs fulfillment for `order.paid` and `charge.paid`. Once recorded the response is 200 regardless of the fulfillment outcome; duplicates are acknowledged without processing.",
    request_body(content = serde_json::Value, description = "Notification envelope `{id, type, data}`"),
    responses(
        (status = 200, description = "Notification acknowledged", body = WebhookAck),
        (status = 400, description = "Malformed notification", body = ErrorResponse),
        (status = 500, description = "Notification not recorded", body = ErrorResponse),
    )
)]
pub async fn receive_payment_webhook(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<WebhookAck>, ApiError> {
    let body = body.map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))?;
    let outcome = state.webhook_service.ingest(&body).await.map_err(|err| {
        tracing::warn!(error = %err, "webhook rejected");
        ApiError::from(err)
    })?;
    Ok(Json(WebhookAck::from(outcome)))
}

/// Webhook routes.
pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/webhooks/payments",
        post(receive_payment_webhook).layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
    )
}
