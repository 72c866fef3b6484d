//! Domain layer: orders, inventory, tickets, notifications, and the
//! outcome event system.
//!
//! These types are shared by the persistence, gateway and service layers.
//! They carry no I/O.

pub mod audit;
pub mod event_bus;
pub mod fulfillment_event;
pub mod ids;
pub mod inventory;
pub mod money;
pub mod notification;
pub mod order;
pub mod ticket;

pub use audit::{StatusChange, StatusChangeRecord, TransitionReason};
pub use event_bus::EventBus;
pub use fulfillment_event::FulfillmentEvent;
pub use ids::{EventDateId, EventId, LotId, OrderId, OrderItemId, TicketId, TicketTypeId, UserId};
pub use inventory::{Lot, TicketType};
pub use money::MinorUnits;
pub use notification::{Notification, NotificationKind, PaymentSignal};
pub use order::{Order, OrderItem, OrderStatus};
pub use ticket::Ticket;
