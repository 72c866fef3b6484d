//! In-memory store for tests and local development.
//!
//! All state sits behind one `parking_lot::Mutex`, so every primitive is
//! atomic. A [`MemoryTx`] applies its writes immediately and keeps an undo
//! log; rollback (explicit or on drop) replays the log in reverse. Writes of
//! an open transaction are therefore visible to other callers before
//! commit, which is weaker isolation than PostgreSQL but keeps every
//! conditional update race-free.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};

use super::models::WebhookEventRecord;
use super::{FulfillmentStore, StoreError, StoreTx};
use crate::domain::notification::PAYMENT_EVENT_TYPES;
use crate::domain::{
    EventDateId, EventId, Lot, LotId, Order, OrderId, OrderItem, OrderStatus, StatusChange,
    StatusChangeRecord, Ticket, TicketId, TicketType, TicketTypeId,
};

#[derive(Debug, Default)]
struct MemoryState {
    orders: HashMap<OrderId, Order>,
    order_items: HashMap<OrderId, Vec<OrderItem>>,
    ticket_types: HashMap<TicketTypeId, TicketType>,
    lots: HashMap<LotId, Lot>,
    event_dates: HashMap<EventDateId, EventId>,
    tickets: Vec<Ticket>,
    webhook_events: HashMap<String, WebhookEventRecord>,
    history: Vec<StatusChangeRecord>,
    next_history_id: i64,
    fail_audit_writes: bool,
    counter_trace: Option<Vec<CounterWrite>>,
}

/// A counter row written during ticket issuance, as seen by
/// [`MemoryStore::counter_writes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterWrite {
    /// `decrement_available` on a lot.
    Lot(LotId),
    /// `increment_sold` on a ticket type.
    TicketType(TicketTypeId),
}

impl MemoryState {
    fn transition(&mut self, order_id: OrderId, from: OrderStatus, to: OrderStatus) -> Option<Order> {
        let order = self.orders.get_mut(&order_id)?;
        if order.status != from {
            return None;
        }
        let before = order.clone();
        order.status = to;
        Some(before)
    }

    fn trace(&mut self, write: CounterWrite) {
        if let Some(trace) = self.counter_trace.as_mut() {
            trace.push(write);
        }
    }

    fn append_history(&mut self, change: &StatusChange) -> Result<i64, StoreError> {
        if self.fail_audit_writes {
            return Err(StoreError::Unavailable(
                "audit writes are disabled".to_string(),
            ));
        }
        self.next_history_id += 1;
        let id = self.next_history_id;
        self.history.push(StatusChangeRecord {
            id,
            change: change.clone(),
            recorded_at: Utc::now(),
        });
        Ok(id)
    }
}

/// Store backed by process memory. Cloning shares the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock()
    }

    /// Registers an event date and the event it belongs to.
    pub fn insert_event_date(&self, event_date_id: EventDateId, event_id: EventId) {
        self.state().event_dates.insert(event_date_id, event_id);
    }

    /// Inserts or replaces a lot.
    pub fn insert_lot(&self, lot: Lot) {
        self.state().lots.insert(lot.id, lot);
    }

    /// Inserts or replaces a ticket type.
    pub fn insert_ticket_type(&self, ticket_type: TicketType) {
        self.state().ticket_types.insert(ticket_type.id, ticket_type);
    }

    /// Inserts or replaces an order together with its lines.
    pub fn insert_order(&self, order: Order, items: Vec<OrderItem>) {
        let mut state = self.state();
        state.order_items.insert(order.id, items);
        state.orders.insert(order.id, order);
    }

    /// Makes every audit write fail while `fail` is set.
    pub fn fail_audit_writes(&self, fail: bool) {
        self.state().fail_audit_writes = fail;
    }

    /// Starts recording counter writes, discarding any earlier trace.
    pub fn trace_counter_writes(&self) {
        self.state().counter_trace = Some(Vec::new());
    }

    /// Counter writes recorded since [`Self::trace_counter_writes`], in the
    /// order they were applied.
    #[must_use]
    pub fn counter_writes(&self) -> Vec<CounterWrite> {
        self.state().counter_trace.clone().unwrap_or_default()
    }
}

#[async_trait]
impl FulfillmentStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        Ok(Box::new(MemoryTx {
            state: Arc::clone(&self.state),
            undo: Vec::new(),
            finished: false,
        }))
    }

    async fn webhook_event_exists(&self, remote_event_id: &str) -> Result<bool, StoreError> {
        Ok(self.state().webhook_events.contains_key(remote_event_id))
    }

    async fn insert_webhook_event(
        &self,
        remote_event_id: &str,
        event_type: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        if state.webhook_events.contains_key(remote_event_id) {
            return Ok(false);
        }
        state.webhook_events.insert(
            remote_event_id.to_string(),
            WebhookEventRecord {
                remote_event_id: remote_event_id.to_string(),
                event_type: event_type.to_string(),
                order_id: None,
                processed: false,
                processed_at: None,
                received_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn mark_webhook_event_processed(
        &self,
        remote_event_id: &str,
        order_id: Option<OrderId>,
    ) -> Result<(), StoreError> {
        if let Some(record) = self.state().webhook_events.get_mut(remote_event_id) {
            record.processed = true;
            record.processed_at = Some(Utc::now());
            if order_id.is_some() {
                record.order_id = order_id;
            }
        }
        Ok(())
    }

    async fn webhook_event(
        &self,
        remote_event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, StoreError> {
        Ok(self.state().webhook_events.get(remote_event_id).cloned())
    }

    async fn payment_event_processed_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<bool, StoreError> {
        Ok(self.state().webhook_events.values().any(|record| {
            record.processed
                && record.order_id == Some(order_id)
                && PAYMENT_EVENT_TYPES.contains(&record.event_type.as_str())
        }))
    }

    async fn transition_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        Ok(self.state().transition(order_id, from, to).is_some())
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.state().orders.get(&order_id).cloned())
    }

    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        Ok(self
            .state()
            .order_items
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn ticket_type(&self, id: TicketTypeId) -> Result<Option<TicketType>, StoreError> {
        Ok(self.state().ticket_types.get(&id).cloned())
    }

    async fn set_remote_ids(
        &self,
        order_id: OrderId,
        remote_order_id: &str,
        remote_charge_id: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(order) = self.state().orders.get_mut(&order_id) {
            order.remote_order_id = Some(remote_order_id.to_string());
            order.remote_charge_id = remote_charge_id.map(str::to_string);
        }
        Ok(())
    }

    async fn record_status_change(&self, change: &StatusChange) -> Result<(), StoreError> {
        self.state().append_history(change).map(|_| ())
    }

    async fn status_history(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<StatusChangeRecord>, StoreError> {
        Ok(self
            .state()
            .history
            .iter()
            .filter(|record| record.change.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn tickets_for_order(&self, order_id: OrderId) -> Result<Vec<Ticket>, StoreError> {
        Ok(self
            .state()
            .tickets
            .iter()
            .filter(|ticket| ticket.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn lot(&self, lot_id: LotId) -> Result<Option<Lot>, StoreError> {
        Ok(self.state().lots.get(&lot_id).cloned())
    }
}

/// Compensating action recorded for every write of a [`MemoryTx`].
#[derive(Debug)]
enum Undo {
    RestoreOrder(Order),
    RemoveTicket(TicketId),
    DecrementSold(TicketTypeId),
    IncrementAvailable(LotId),
    RemoveHistory(i64),
}

/// Transaction over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryTx {
    state: Arc<Mutex<MemoryState>>,
    undo: Vec<Undo>,
    finished: bool,
}

impl MemoryTx {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock()
    }

    fn undo_all(&mut self) {
        let mut state = self.state.lock();
        while let Some(action) = self.undo.pop() {
            match action {
                Undo::RestoreOrder(order) => {
                    state.orders.insert(order.id, order);
                }
                Undo::RemoveTicket(id) => state.tickets.retain(|ticket| ticket.id != id),
                Undo::DecrementSold(id) => {
                    if let Some(ticket_type) = state.ticket_types.get_mut(&id) {
                        ticket_type.sold = ticket_type.sold.saturating_sub(1);
                    }
                }
                Undo::IncrementAvailable(id) => {
                    if let Some(lot) = state.lots.get_mut(&id) {
                        lot.available = lot.available.saturating_add(1);
                    }
                }
                Undo::RemoveHistory(id) => state.history.retain(|record| record.id != id),
            }
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.finished {
            self.undo_all();
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn transition_status(
        &mut self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let before = self.state().transition(order_id, from, to);
        match before {
            Some(order) => {
                self.undo.push(Undo::RestoreOrder(order));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_remote_ids(
        &mut self,
        order_id: OrderId,
        remote_order_id: Option<&str>,
        remote_charge_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let before = {
            let mut state = self.state();
            let Some(order) = state.orders.get_mut(&order_id) else {
                return Ok(());
            };
            let before = order.clone();
            if let Some(remote) = remote_order_id {
                order.remote_order_id = Some(remote.to_string());
            }
            if let Some(remote) = remote_charge_id {
                order.remote_charge_id = Some(remote.to_string());
            }
            before
        };
        self.undo.push(Undo::RestoreOrder(before));
        Ok(())
    }

    async fn order(&mut self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.state().orders.get(&order_id).cloned())
    }

    async fn order_items(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        Ok(self
            .state()
            .order_items
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn ticket_type(&mut self, id: TicketTypeId) -> Result<Option<TicketType>, StoreError> {
        Ok(self.state().ticket_types.get(&id).cloned())
    }

    async fn event_for_date(&mut self, id: EventDateId) -> Result<Option<EventId>, StoreError> {
        Ok(self.state().event_dates.get(&id).copied())
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<(), StoreError> {
        {
            let mut state = self.state();
            let duplicate_unit = state.tickets.iter().any(|existing| {
                existing.order_item_id == ticket.order_item_id
                    && existing.unit_index == ticket.unit_index
            });
            if duplicate_unit {
                return Err(StoreError::Conflict(format!(
                    "unit {} of order item {} already has a ticket",
                    ticket.unit_index, ticket.order_item_id
                )));
            }
            if state.tickets.iter().any(|existing| existing.code == ticket.code) {
                return Err(StoreError::Conflict(format!(
                    "ticket code {} already issued",
                    ticket.code
                )));
            }
            state.tickets.push(ticket.clone());
        }
        self.undo.push(Undo::RemoveTicket(ticket.id));
        Ok(())
    }

    async fn increment_sold(&mut self, id: TicketTypeId) -> Result<(), StoreError> {
        {
            let mut state = self.state();
            let Some(ticket_type) = state.ticket_types.get_mut(&id) else {
                return Err(StoreError::NotFound(format!("ticket type {id}")));
            };
            ticket_type.sold = ticket_type.sold.saturating_add(1);
            state.trace(CounterWrite::TicketType(id));
        }
        self.undo.push(Undo::DecrementSold(id));
        Ok(())
    }

    async fn decrement_available(&mut self, lot_id: LotId) -> Result<bool, StoreError> {
        let taken = {
            let mut state = self.state();
            state.trace(CounterWrite::Lot(lot_id));
            match state.lots.get_mut(&lot_id) {
                Some(lot) if lot.available >= 1 => {
                    lot.available -= 1;
                    true
                }
                _ => false,
            }
        };
        if taken {
            self.undo.push(Undo::IncrementAvailable(lot_id));
        }
        Ok(taken)
    }

    async fn record_status_change(&mut self, change: &StatusChange) -> Result<(), StoreError> {
        let id = self.state().append_history(change)?;
        self.undo.push(Undo::RemoveHistory(id));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.undo.clear();
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.undo_all();
        self.finished = true;
        Ok(())
    }
}
