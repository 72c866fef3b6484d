//! Payment gateway collaborator.
//!
//! [`PaymentGateway`] is the seam between the fulfillment core and the
//! remote payment provider. [`HttpPaymentGateway`] is the production
//! implementation; tests substitute scripted fakes.

pub mod http;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{MinorUnits, OrderId};

pub use http::HttpPaymentGateway;

/// Remote payment states after which a new payment request may be created.
pub const RETRYABLE_REMOTE_STATUSES: [&str; 2] = ["canceled", "failed"];

/// Failures talking to the payment gateway.
#[derive(Debug, thiserror::Error)]
pub enum PaymentGatewayError {
    /// The request did not complete within the configured timeout.
    #[error("payment gateway timed out")]
    Timeout,

    /// Connection or protocol failure.
    #[error("payment gateway transport error: {0}")]
    Transport(String),

    /// The gateway answered with a non-success status.
    #[error("payment gateway returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The response body did not match the expected shape.
    #[error("undecodable payment gateway response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for PaymentGatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Buyer details sent with a payment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    /// Full name.
    pub name: String,
    /// E-mail address.
    pub email: String,
    /// Tax document (CPF), digits only.
    pub document: String,
}

/// One line of a payment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentItem {
    /// Item code (the ticket type id).
    pub code: String,
    /// Line description.
    pub description: String,
    /// Units purchased.
    pub quantity: u32,
    /// Frozen unit price.
    pub unit_amount: MinorUnits,
}

/// Inputs for creating a payment at the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    /// Our order id; the gateway echoes it back as the order `code`.
    pub order_id: OrderId,
    /// Amount to charge.
    pub amount: MinorUnits,
    /// Buyer.
    pub customer: Customer,
    /// Lines being paid for.
    pub items: Vec<PaymentItem>,
    /// Seconds until the instant-payment code expires.
    pub expires_in_secs: u64,
}

/// What the buyer needs to pay, plus the remote identifiers to remember.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentInstructions {
    /// Gateway order id.
    pub remote_order_id: String,
    /// Gateway charge id.
    pub remote_charge_id: Option<String>,
    /// Remote payment status.
    pub status: String,
    /// Copy-and-paste payment code.
    pub qr_code: Option<String>,
    /// URL of the rendered payment QR code.
    pub qr_code_url: Option<String>,
    /// When the payment code expires.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Remote payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync + fmt::Debug {
    /// Creates a payment at the gateway.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentGatewayError`] on network or API failure.
    async fn create_payment_request(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentInstructions, PaymentGatewayError>;

    /// Returns the amount actually settled for a remote order.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentGatewayError`] on network or API failure.
    async fn settled_amount(&self, remote_order_id: &str)
    -> Result<MinorUnits, PaymentGatewayError>;

    /// Returns the remote status string of a remote order.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentGatewayError`] on network or API failure.
    async fn order_status(&self, remote_order_id: &str) -> Result<String, PaymentGatewayError>;
}
