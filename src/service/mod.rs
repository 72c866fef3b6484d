//! Service layer: business logic orchestration.
//!
//! [`WebhookService`] records and routes gateway notifications to the
//! [`FulfillmentService`] pipeline, which publishes its outcomes through the
//! [`super::domain::EventBus`]. [`PaymentService`] creates payment requests
//! and reports local payment status.

pub mod fulfillment;
pub mod payment_service;
pub mod webhook_service;

pub use fulfillment::{FulfillmentError, FulfillmentOutcome, FulfillmentService, PaymentContext};
pub use payment_service::{PaymentError, PaymentService, PaymentStatus};
pub use webhook_service::{IngestError, IngestOutcome, WebhookService};
