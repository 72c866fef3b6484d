//! Persistence layer: the inventory and order store.
//!
//! The store exclusively owns every persisted row. Other layers reach it
//! only through [`FulfillmentStore`] (single-statement operations, each
//! atomic on its own) and [`StoreTx`] (the primitives that must share one
//! ambient transaction). Conditional updates report whether they took
//! effect instead of exposing lock objects.
//!
//! Two implementations exist: [`postgres::PostgresStore`] for production
//! and [`memory::MemoryStore`] for tests and local development.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;

use crate::domain::{
    EventDateId, EventId, Lot, LotId, Order, OrderId, OrderItem, OrderStatus, StatusChange,
    StatusChangeRecord, Ticket, TicketType, TicketTypeId,
};

pub use models::WebhookEventRecord;

/// Persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database rejected or failed the operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A persisted value could not be mapped to a domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The store is unable to serve requests.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Operations that run outside any fulfillment transaction.
#[async_trait]
pub trait FulfillmentStore: Send + Sync + std::fmt::Debug {
    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the transaction cannot be started.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// Returns `true` if a notification with this remote id was already
    /// recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn webhook_event_exists(&self, remote_event_id: &str) -> Result<bool, StoreError>;

    /// Records a notification. Returns `false` when the remote id is
    /// already present, which closes the race between two near-simultaneous
    /// deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn insert_webhook_event(
        &self,
        remote_event_id: &str,
        event_type: &str,
    ) -> Result<bool, StoreError>;

    /// Marks a notification processed now, linking it to the order it
    /// concerned when known.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn mark_webhook_event_processed(
        &self,
        remote_event_id: &str,
        order_id: Option<OrderId>,
    ) -> Result<(), StoreError>;

    /// Returns the recorded notification, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn webhook_event(
        &self,
        remote_event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, StoreError>;

    /// Returns `true` if a payment notification of any payment type has
    /// already been processed for this order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn payment_event_processed_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<bool, StoreError>;

    /// Compare-and-swap on order status, committed on its own.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn transition_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError>;

    /// Fetches an order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Lists the lines of an order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError>;

    /// Fetches a ticket type.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn ticket_type(&self, id: TicketTypeId) -> Result<Option<TicketType>, StoreError>;

    /// Stores the gateway identifiers of a freshly created payment request.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn set_remote_ids(
        &self,
        order_id: OrderId,
        remote_order_id: &str,
        remote_charge_id: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Appends an audit row outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn record_status_change(&self, change: &StatusChange) -> Result<(), StoreError>;

    /// Returns the audit trail of an order, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn status_history(&self, order_id: OrderId)
    -> Result<Vec<StatusChangeRecord>, StoreError>;

    /// Lists the tickets issued for an order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn tickets_for_order(&self, order_id: OrderId) -> Result<Vec<Ticket>, StoreError>;

    /// Fetches a lot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn lot(&self, lot_id: LotId) -> Result<Option<Lot>, StoreError>;
}

/// Primitives that run inside one ambient transaction.
///
/// Dropping a transaction without calling [`StoreTx::commit`] rolls it back.
#[async_trait]
pub trait StoreTx: Send {
    /// Compare-and-swap on order status inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn transition_status(
        &mut self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError>;

    /// Overwrites the gateway identifiers present in a notification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn set_remote_ids(
        &mut self,
        order_id: OrderId,
        remote_order_id: Option<&str>,
        remote_charge_id: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Fetches an order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn order(&mut self, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Lists the lines of an order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn order_items(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError>;

    /// Fetches a ticket type.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn ticket_type(&mut self, id: TicketTypeId) -> Result<Option<TicketType>, StoreError>;

    /// Resolves the event an event date belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn event_for_date(&mut self, id: EventDateId) -> Result<Option<EventId>, StoreError>;

    /// Inserts a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the purchased unit already has
    /// a ticket, or another [`StoreError`] on database failure.
    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<(), StoreError>;

    /// Adds one to a ticket type's sold counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure or if the ticket type
    /// does not exist.
    async fn increment_sold(&mut self, id: TicketTypeId) -> Result<(), StoreError>;

    /// Takes one unit from a lot if at least one remains. Returns whether
    /// the decrement took effect.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn decrement_available(&mut self, lot_id: LotId) -> Result<bool, StoreError>;

    /// Appends an audit row. A failure here leaves the transaction usable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    async fn record_status_change(&mut self, change: &StatusChange) -> Result<(), StoreError>;

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the commit fails; nothing is persisted.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the rollback round-trip fails.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
