//! Outcome events emitted by the fulfillment pipeline.
//!
//! Every terminal or aborting outcome publishes a [`FulfillmentEvent`]
//! through the [`super::EventBus`]. The bus is the injectable observability
//! sink of the pipeline; tests and operators subscribe to it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{MinorUnits, OrderId, TransitionReason};

/// Outcome of one fulfillment run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum FulfillmentEvent {
    /// Tickets issued and the order moved to `PAID`.
    PaymentConfirmed {
        /// Order identifier.
        order_id: OrderId,
        /// Number of tickets issued.
        tickets_issued: u32,
        /// Gateway order id used for validation.
        remote_order_id: Option<String>,
        /// Gateway charge id bound into the tickets.
        remote_charge_id: Option<String>,
        /// Confirmation timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Settled amount differed from the order total.
    FraudFlagged {
        /// Order identifier.
        order_id: OrderId,
        /// Declared order total.
        expected: MinorUnits,
        /// Amount the gateway reports as settled.
        settled: MinorUnits,
        /// Detection timestamp.
        timestamp: DateTime<Utc>,
    },

    /// The run aborted after claiming the order; the order stays
    /// `IN_PROGRESS` until an operator resolves it.
    FulfillmentAborted {
        /// Order identifier.
        order_id: OrderId,
        /// Audit reason code.
        reason: TransitionReason,
        /// Error detail.
        detail: String,
        /// Abort timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl FulfillmentEvent {
    /// Returns the order this event concerns.
    #[must_use]
    pub fn order_id(&self) -> OrderId {
        match self {
            Self::PaymentConfirmed { order_id, .. }
            | Self::FraudFlagged { order_id, .. }
            | Self::FulfillmentAborted { order_id, .. } => *order_id,
        }
    }

    /// Returns the snake_case discriminator used in serialized form.
    #[must_use]
    pub fn event_type_str(&self) -> &'static str {
        match self {
            Self::PaymentConfirmed { .. } => "payment_confirmed",
            Self::FraudFlagged { .. } => "fraud_flagged",
            Self::FulfillmentAborted { .. } => "fulfillment_aborted",
        }
    }
}
