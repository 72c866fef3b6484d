//! Shared fixtures: a seeded in-memory store and a scripted gateway.

#![allow(dead_code, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use ticket_fulfillment::app_state::AppState;
use ticket_fulfillment::domain::{
    EventBus, EventDateId, EventId, Lot, LotId, MinorUnits, Order, OrderId, OrderItem, OrderItemId,
    OrderStatus, TicketType, TicketTypeId, UserId,
};
use ticket_fulfillment::gateway::{
    PaymentGateway, PaymentGatewayError, PaymentInstructions, PaymentRequest,
};
use ticket_fulfillment::persistence::FulfillmentStore;
use ticket_fulfillment::persistence::memory::MemoryStore;
use ticket_fulfillment::service::{FulfillmentService, PaymentService, WebhookService};
use ticket_fulfillment::signing::TicketSigner;

pub const SIGNING_SECRET: &str = "test-signing-secret";

/// Gateway whose answers are set by the test.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    settled: Mutex<Option<MinorUnits>>,
    remote_status: Mutex<Option<String>>,
    settled_calls: AtomicUsize,
    created: Mutex<Vec<PaymentRequest>>,
}

impl ScriptedGateway {
    /// Gateway reporting `settled` for every remote order.
    pub fn settling(settled: i64) -> Arc<Self> {
        let gateway = Self::default();
        *gateway.settled.lock() = Some(MinorUnits::new(settled));
        Arc::new(gateway)
    }

    /// Gateway that fails every settled-amount call.
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_remote_status(&self, status: &str) {
        *self.remote_status.lock() = Some(status.to_string());
    }

    pub fn settled_calls(&self) -> usize {
        self.settled_calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<PaymentRequest> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_payment_request(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentInstructions, PaymentGatewayError> {
        let mut created = self.created.lock();
        created.push(request.clone());
        Ok(PaymentInstructions {
            remote_order_id: format!("or_new_{}", created.len()),
            remote_charge_id: Some(format!("ch_new_{}", created.len())),
            status: "pending".to_string(),
            qr_code: Some("00020101021226".to_string()),
            qr_code_url: Some("https://gateway.test/qr.png".to_string()),
            expires_at: Some(Utc::now() + Duration::seconds(900)),
        })
    }

    async fn settled_amount(
        &self,
        _remote_order_id: &str,
    ) -> Result<MinorUnits, PaymentGatewayError> {
        self.settled_calls.fetch_add(1, Ordering::SeqCst);
        (*self.settled.lock()).ok_or(PaymentGatewayError::Timeout)
    }

    async fn order_status(&self, _remote_order_id: &str) -> Result<String, PaymentGatewayError> {
        self.remote_status.lock().clone().ok_or(PaymentGatewayError::Status {
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

/// Catalog rows shared by the orders of one test.
#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    pub event_id: EventId,
    pub event_date_id: EventDateId,
    pub lot_id: LotId,
    pub ticket_type_id: TicketTypeId,
}

/// Seeds an event date, a lot with `available` units and one ticket type.
pub fn seed_catalog(store: &MemoryStore, available: u32, price: i64) -> Catalog {
    let catalog = Catalog {
        event_id: EventId::new(),
        event_date_id: EventDateId::new(),
        lot_id: LotId::new(),
        ticket_type_id: TicketTypeId::new(),
    };
    store.insert_event_date(catalog.event_date_id, catalog.event_id);
    store.insert_lot(Lot {
        id: catalog.lot_id,
        available,
        total: available,
    });
    store.insert_ticket_type(TicketType {
        id: catalog.ticket_type_id,
        lot_id: catalog.lot_id,
        name: "General admission".to_string(),
        price: MinorUnits::new(price),
        max: available,
        sold: 0,
    });
    catalog
}

/// Adds another ticket type drawing from the lot of `catalog`.
pub fn seed_ticket_type(store: &MemoryStore, catalog: &Catalog, price: i64) -> Catalog {
    let sibling = Catalog {
        ticket_type_id: TicketTypeId::new(),
        ..*catalog
    };
    store.insert_ticket_type(TicketType {
        id: sibling.ticket_type_id,
        lot_id: sibling.lot_id,
        name: "VIP".to_string(),
        price: MinorUnits::new(price),
        max: 100,
        sold: 0,
    });
    sibling
}

/// Seeds an order awaiting payment with one line per `(catalog, quantity)`.
pub fn seed_order(store: &MemoryStore, lines: &[(Catalog, u32, i64)]) -> OrderId {
    let order_id = OrderId::new();
    let items: Vec<OrderItem> = lines
        .iter()
        .map(|(catalog, quantity, unit_price)| OrderItem {
            id: OrderItemId::new(),
            order_id,
            event_date_id: catalog.event_date_id,
            ticket_type_id: catalog.ticket_type_id,
            quantity: *quantity,
            unit_price: MinorUnits::new(*unit_price),
        })
        .collect();
    let total = items
        .iter()
        .map(|item| item.unit_price.get() * i64::from(item.quantity))
        .sum();
    store.insert_order(
        Order {
            id: order_id,
            user_id: UserId::new("user-42"),
            status: OrderStatus::AwaitingPayment,
            total: MinorUnits::new(total),
            expires_at: Utc::now() + Duration::minutes(15),
            remote_order_id: None,
            remote_charge_id: None,
        },
        items,
    );
    order_id
}

/// Services wired over a memory store.
#[derive(Debug, Clone)]
pub struct Harness {
    pub store: MemoryStore,
    pub gateway: Arc<ScriptedGateway>,
    pub event_bus: EventBus,
    pub fulfillment: FulfillmentService,
    pub webhooks: Arc<WebhookService>,
    pub payments: Arc<PaymentService>,
}

impl Harness {
    pub fn new(gateway: Arc<ScriptedGateway>) -> Self {
        let store = MemoryStore::new();
        let shared: Arc<dyn FulfillmentStore> = Arc::new(store.clone());
        let dyn_gateway: Arc<dyn PaymentGateway> = Arc::clone(&gateway) as Arc<dyn PaymentGateway>;
        let event_bus = EventBus::new(64);
        let fulfillment = FulfillmentService::new(
            Arc::clone(&shared),
            Arc::clone(&dyn_gateway),
            TicketSigner::new(SIGNING_SECRET),
            event_bus.clone(),
        );
        let webhooks = Arc::new(WebhookService::new(
            Arc::clone(&shared),
            fulfillment.clone(),
        ));
        let payments = Arc::new(PaymentService::new(shared, dyn_gateway, 900));
        Self {
            store,
            gateway,
            event_bus,
            fulfillment,
            webhooks,
            payments,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            webhook_service: Arc::clone(&self.webhooks),
            payment_service: Arc::clone(&self.payments),
            event_bus: self.event_bus.clone(),
        }
    }

    pub async fn order_status(&self, order_id: OrderId) -> OrderStatus {
        let Ok(Some(order)) = self.store.order(order_id).await else {
            panic!("order {order_id} missing");
        };
        order.status
    }

    pub async fn available(&self, lot_id: LotId) -> u32 {
        let Ok(Some(lot)) = self.store.lot(lot_id).await else {
            panic!("lot {lot_id} missing");
        };
        lot.available
    }

    pub async fn sold(&self, ticket_type_id: TicketTypeId) -> u32 {
        let Ok(Some(ticket_type)) = self.store.ticket_type(ticket_type_id).await else {
            panic!("ticket type {ticket_type_id} missing");
        };
        ticket_type.sold
    }

    pub async fn ticket_count(&self, order_id: OrderId) -> usize {
        let Ok(tickets) = self.store.tickets_for_order(order_id).await else {
            panic!("tickets for {order_id} unreadable");
        };
        tickets.len()
    }
}

pub fn order_paid(
    event_id: &str,
    order_id: OrderId,
    remote_order_id: &str,
    charge_id: &str,
) -> Vec<u8> {
    serde_json::json!({
        "id": event_id,
        "type": "order.paid",
        "data": {
            "id": remote_order_id,
            "code": order_id.to_string(),
            "status": "paid",
            "charges": [{ "id": charge_id, "status": "paid" }]
        }
    })
    .to_string()
    .into_bytes()
}

pub fn charge_paid(
    event_id: &str,
    order_id: OrderId,
    remote_order_id: Option<&str>,
    charge_id: &str,
) -> Vec<u8> {
    let order = match remote_order_id {
        Some(remote) => serde_json::json!({ "id": remote, "code": order_id.to_string() }),
        None => serde_json::json!({ "code": order_id.to_string() }),
    };
    serde_json::json!({
        "id": event_id,
        "type": "charge.paid",
        "data": { "id": charge_id, "status": "paid", "order": order }
    })
    .to_string()
    .into_bytes()
}
