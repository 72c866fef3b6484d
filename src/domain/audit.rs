//! Order status audit trail.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{OrderId, OrderStatus};

/// Why a status transition was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Tickets issued and the order confirmed.
    WebhookPaymentConfirmed,
    /// Settled amount differs from the order total.
    AmountMismatch,
    /// The settled amount could not be obtained.
    PaymentValidationFailed,
    /// Ticket issuance or confirmation aborted.
    IssuanceFailed,
    /// The amount mismatch was detected but the fraud flag was not
    /// committed.
    FraudFlagFailed,
}

impl TransitionReason {
    /// Returns the persisted reason code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WebhookPaymentConfirmed => "webhook_payment_confirmed",
            Self::AmountMismatch => "amount_mismatch",
            Self::PaymentValidationFailed => "payment_validation_failed",
            Self::IssuanceFailed => "issuance_failed",
            Self::FraudFlagFailed => "fraud_flag_failed",
        }
    }
}

impl std::str::FromStr for TransitionReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook_payment_confirmed" => Ok(Self::WebhookPaymentConfirmed),
            "amount_mismatch" => Ok(Self::AmountMismatch),
            "payment_validation_failed" => Ok(Self::PaymentValidationFailed),
            "issuance_failed" => Ok(Self::IssuanceFailed),
            "fraud_flag_failed" => Ok(Self::FraudFlagFailed),
            other => Err(format!("unknown transition reason: {other}")),
        }
    }
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit row to append. Failed attempts carry `error` and record the
/// status that was aimed for in `new_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    /// Order the attempt concerns.
    pub order_id: OrderId,
    /// Status before the attempt.
    pub old_status: OrderStatus,
    /// Status after (or targeted by) the attempt.
    pub new_status: OrderStatus,
    /// Reason code.
    pub reason: TransitionReason,
    /// Error detail for failed attempts.
    pub error: Option<String>,
    /// Notification that triggered the attempt.
    pub remote_event_id: Option<String>,
    /// Gateway order id known at the time.
    pub remote_order_id: Option<String>,
    /// Gateway charge id known at the time.
    pub remote_charge_id: Option<String>,
}

/// A persisted audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChangeRecord {
    /// Row identifier.
    pub id: i64,
    /// The recorded change.
    pub change: StatusChange,
    /// When the row was written.
    pub recorded_at: DateTime<Utc>,
}
