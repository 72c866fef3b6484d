//! REST API layer: route handlers, DTOs, router composition, and the
//! OpenAPI document.
//!
//! Resource endpoints are mounted under `/api/v1`.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "ticket-fulfillment", description = "Payment confirmation and ticket fulfillment"),
    paths(
        handlers::webhook::receive_payment_webhook,
        handlers::payment::create_payment,
        handlers::payment::get_payment_status,
        handlers::system::health_handler,
    ),
    components(schemas(
        dto::WebhookAck,
        dto::CreatePaymentRequest,
        dto::PaymentResponse,
        dto::PaymentStatusResponse,
        crate::domain::OrderStatus,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
        handlers::system::HealthResponse,
    )),
    tags(
        (name = "Webhooks", description = "Payment gateway notifications"),
        (name = "Payments", description = "Payment requests and status"),
        (name = "System", description = "Service health"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}
