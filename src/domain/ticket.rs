//! Issued tickets.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{EventDateId, EventId, OrderId, OrderItemId, TicketId, TicketTypeId, UserId};

/// Prefix of human-readable ticket codes.
const CODE_PREFIX: &str = "TKT-";

/// Number of random characters after the prefix.
const CODE_LEN: usize = 10;

/// A ticket for one purchased unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ticket {
    /// Ticket identifier, bound into the signed token.
    pub id: TicketId,
    /// Human-readable code shown to the holder.
    pub code: String,
    /// Tamper-evident token produced by [`crate::signing::TicketSigner`].
    pub signed_token: String,
    /// Order the ticket was issued for.
    pub order_id: OrderId,
    /// Order line the ticket was issued for.
    pub order_item_id: OrderItemId,
    /// Zero-based unit position within the order line. Together with
    /// `order_item_id` this is unique, so a unit can only be issued once.
    pub unit_index: u32,
    /// Owning user.
    pub user_id: UserId,
    /// Event the ticket admits to.
    pub event_id: EventId,
    /// Event date the ticket admits to.
    pub event_date_id: EventDateId,
    /// Ticket category.
    pub ticket_type_id: TicketTypeId,
    /// Whether the ticket has been scanned at the door.
    pub used: bool,
    /// Issue timestamp.
    pub issued_at: DateTime<Utc>,
}

/// Generates a human-readable ticket code such as `TKT-3F9A0C7B1D`.
#[must_use]
pub fn generate_ticket_code() -> String {
    let random: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(CODE_LEN)
        .collect();
    format!("{CODE_PREFIX}{}", random.to_ascii_uppercase())
}
