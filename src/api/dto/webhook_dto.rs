//! Webhook acknowledgment DTO.

use serde::Serialize;
use utoipa::ToSchema;

use crate::service::IngestOutcome;

/// Response body for `POST /webhooks/payments`.
///
/// Acknowledgment means the notification will not be acted on again, not
/// that fulfillment succeeded.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    /// Always `true`.
    pub received: bool,
    /// Whether the notification id had already been recorded.
    pub duplicate: bool,
}

impl From<IngestOutcome> for WebhookAck {
    fn from(outcome: IngestOutcome) -> Self {
        Self {
            received: true,
            duplicate: matches!(outcome, IngestOutcome::Duplicate),
        }
    }
}
