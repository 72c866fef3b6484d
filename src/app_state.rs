//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::EventBus;
use crate::service::{PaymentService, WebhookService};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Webhook ingestion and the fulfillment pipeline behind it.
    pub webhook_service: Arc<WebhookService>,
    /// Payment requests and status.
    pub payment_service: Arc<PaymentService>,
    /// Fulfillment outcome bus.
    pub event_bus: EventBus,
}
