//! Persisted records that have no domain counterpart.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::OrderId;

/// A row of the `webhook_events` table: one per distinct remote
/// notification id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookEventRecord {
    /// Gateway-assigned notification id (unique).
    pub remote_event_id: String,
    /// Declared notification type.
    pub event_type: String,
    /// Order the notification concerned, once known.
    pub order_id: Option<OrderId>,
    /// Whether processing has finished (successfully or not).
    pub processed: bool,
    /// When processing finished.
    pub processed_at: Option<DateTime<Utc>>,
    /// When the notification was first recorded.
    pub received_at: DateTime<Utc>,
}
