//! Orders, their line items, and the order status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{EventDateId, MinorUnits, OrderId, OrderItemId, TicketTypeId, UserId};

/// Lifecycle state of an order.
///
/// ```text
/// AWAITING_PAYMENT ──claim──▶ IN_PROGRESS ──┬──▶ PAID
///        │                                  └──▶ FRAUD_FLAGGED
///        └──(external)──▶ CANCELLED
/// ```
///
/// `IN_PROGRESS` without a later transition is the quiescent state left
/// behind when validation or issuance aborts; it needs an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Checkout started, no payment confirmed yet.
    AwaitingPayment,
    /// Claimed by a fulfillment run.
    InProgress,
    /// Tickets issued. Terminal.
    Paid,
    /// Settled amount did not match the order total. Terminal.
    FraudFlagged,
    /// Cancelled by a collaborator outside this core.
    Cancelled,
}

impl OrderStatus {
    /// Returns the persisted representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingPayment => "AWAITING_PAYMENT",
            Self::InProgress => "IN_PROGRESS",
            Self::Paid => "PAID",
            Self::FraudFlagged => "FRAUD_FLAGGED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Returns the customer-facing label reported by the payment status
    /// endpoint.
    #[must_use]
    pub const fn display_label(self) -> &'static str {
        match self {
            Self::AwaitingPayment => "pending",
            Self::InProgress => "processing",
            Self::Paid => "paid",
            Self::FraudFlagged => "fraud_alert",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns `true` for states no transition in this core leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::FraudFlagged | Self::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a persisted status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status: {0}")]
pub struct UnknownOrderStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownOrderStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AWAITING_PAYMENT" => Ok(Self::AwaitingPayment),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "PAID" => Ok(Self::Paid),
            "FRAUD_FLAGGED" => Ok(Self::FraudFlagged),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(UnknownOrderStatus(other.to_string())),
        }
    }
}

/// A checkout order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    /// Order identifier.
    pub id: OrderId,
    /// Owning user.
    pub user_id: UserId,
    /// Current status.
    pub status: OrderStatus,
    /// Declared total, frozen at checkout.
    pub total: MinorUnits,
    /// When the unpaid order lapses.
    pub expires_at: DateTime<Utc>,
    /// Gateway order id, once a payment request exists.
    pub remote_order_id: Option<String>,
    /// Gateway charge id, once a payment request exists.
    pub remote_charge_id: Option<String>,
}

/// One line of an order. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItem {
    /// Line identifier.
    pub id: OrderItemId,
    /// Owning order.
    pub order_id: OrderId,
    /// Event date the tickets are for.
    pub event_date_id: EventDateId,
    /// Ticket category purchased.
    pub ticket_type_id: TicketTypeId,
    /// Number of units, always positive.
    pub quantity: u32,
    /// Unit price captured at order creation.
    pub unit_price: MinorUnits,
}

impl OrderItem {
    /// Returns `quantity × unit_price`, or `None` on overflow.
    #[must_use]
    pub fn line_total(&self) -> Option<MinorUnits> {
        self.unit_price.checked_mul(self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_persisted_form() {
        for status in [
            OrderStatus::AwaitingPayment,
            OrderStatus::InProgress,
            OrderStatus::Paid,
            OrderStatus::FraudFlagged,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert_eq!(
            "PENDING".parse::<OrderStatus>(),
            Err(UnknownOrderStatus("PENDING".to_string()))
        );
    }

    #[test]
    fn terminal_states() {
        assert!(OrderStatus::Paid.is_terminal());
        assert!(OrderStatus::FraudFlagged.is_terminal());
        assert!(!OrderStatus::InProgress.is_terminal());
        assert!(!OrderStatus::AwaitingPayment.is_terminal());
    }

    #[test]
    fn display_labels() {
        assert_eq!(OrderStatus::AwaitingPayment.display_label(), "pending");
        assert_eq!(OrderStatus::FraudFlagged.display_label(), "fraud_alert");
    }

    #[test]
    fn line_total_multiplies_unit_price() {
        let item = OrderItem {
            id: OrderItemId::new(),
            order_id: OrderId::new(),
            event_date_id: EventDateId::new(),
            ticket_type_id: TicketTypeId::new(),
            quantity: 3,
            unit_price: MinorUnits::new(10_000),
        };
        assert_eq!(item.line_total(), Some(MinorUnits::new(30_000)));
    }
}
