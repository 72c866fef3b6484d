//! # ticket-fulfillment
//!
//! Payment-confirmation and ticket-fulfillment service. Payment gateway
//! webhooks are recorded, deduplicated and routed to a pipeline that
//! validates the settled amount and issues one signed ticket per purchased
//! unit, all-or-nothing, without overselling shared inventory.
//!
//! ## Architecture
//!
//! ```text
//! Payment gateway ──webhook──▶ REST Handlers (api/)
//!                                   │
//!                                   ├── WebhookService (service/)
//!                                   │      └── FulfillmentService ──▶ EventBus (domain/)
//!                                   │             ├── PaymentGateway (gateway/)
//!                                   │             └── TicketSigner (signing)
//!                                   ├── PaymentService (service/)
//!                                   │
//!                                   └── FulfillmentStore (persistence/)
//!                                          ├── PostgreSQL
//!                                          └── in-memory
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod persistence;
pub mod service;
pub mod signing;
