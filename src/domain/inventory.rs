//! Inventory: lots and the ticket types drawn from them.

use serde::Serialize;

use super::{LotId, MinorUnits, TicketTypeId};

/// A priced ticket category drawn from a [`Lot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketType {
    /// Ticket type identifier.
    pub id: TicketTypeId,
    /// Lot the units are drawn from.
    pub lot_id: LotId,
    /// Display name (e.g. `"VIP"`).
    pub name: String,
    /// Current catalog price.
    pub price: MinorUnits,
    /// Fixed capacity of this category.
    pub max: u32,
    /// Units issued so far. Only ever incremented, by ticket issuance.
    pub sold: u32,
}

/// A time-bounded inventory pool for one event date.
///
/// `available` never drops below zero: the only decrement is conditional on
/// at least one unit remaining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lot {
    /// Lot identifier.
    pub id: LotId,
    /// Remaining sellable units.
    pub available: u32,
    /// Total capacity.
    pub total: u32,
}
