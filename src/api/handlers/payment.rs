//! Payment request and status handlers.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{CreatePaymentRequest, PaymentResponse, PaymentStatusResponse};
use crate::app_state::AppState;
use crate::domain::OrderId;
use crate::error::{ApiError, ErrorResponse};

/// `POST /orders/{id}/payment` — Create or reuse an instant payment.
///
/// # Errors
///
/// Returns [`ApiError`] when the order is missing or already processed,
/// when the buyer data or amounts are invalid, or when the gateway fails.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment",
    tag = "Payments",
    summary = "Create a PIX payment",
    description = "Creates a PIX payment at the gateway for an order awaiting payment. An existing remote payment is reused unless it was canceled or failed.",
    params(
        ("id" = uuid::Uuid, Path, description = "Order UUID"),
    ),
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Payment instructions", body = PaymentResponse),
        (status = 400, description = "Invalid buyer data or amounts", body = ErrorResponse),
        (status = 404, description = "Order not found", body = ErrorResponse),
        (status = 409, description = "Order already processed", body = ErrorResponse),
        (status = 502, description = "Payment gateway failure", body = ErrorResponse),
    )
)]
pub async fn create_payment(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let instructions = state
        .payment_service
        .create_payment(OrderId::from_uuid(id), req.into())
        .await?;
    Ok(Json(instructions.into()))
}

/// `GET /orders/{id}/payment` — Payment status from the local store.
///
/// # Errors
///
/// Returns [`ApiError::OrderNotFound`] if the order does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/payment",
    tag = "Payments",
    summary = "Get payment status",
    description = "Reports payment status from the local database only, so a payment is never shown as paid before its webhook has been processed.",
    params(
        ("id" = uuid::Uuid, Path, description = "Order UUID"),
    ),
    responses(
        (status = 200, description = "Payment status", body = PaymentStatusResponse),
        (status = 404, description = "Order not found", body = ErrorResponse),
    )
)]
pub async fn get_payment_status(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<Json<PaymentStatusResponse>, ApiError> {
    let status = state
        .payment_service
        .payment_status(OrderId::from_uuid(id))
        .await?;
    Ok(Json(status.into()))
}

/// Payment routes.
pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/orders/{id}/payment",
        post(create_payment).get(get_payment_status),
    )
}
