//! Payment request and status DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::OrderStatus;
use crate::gateway::{Customer, PaymentInstructions};
use crate::service::PaymentStatus;

/// Request body for `POST /orders/{id}/payment`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    /// Buyer full name.
    pub name: String,
    /// Buyer e-mail address.
    pub email: String,
    /// Buyer CPF; punctuation is ignored.
    pub document: String,
}

impl From<CreatePaymentRequest> for Customer {
    fn from(req: CreatePaymentRequest) -> Self {
        Self {
            name: req.name,
            email: req.email,
            document: req.document,
        }
    }
}

/// Response body for `POST /orders/{id}/payment`.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentResponse {
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

impl From<PaymentInstructions> for PaymentResponse {
    fn from(p: PaymentInstructions) -> Self {
        Self {
            remote_order_id: p.remote_order_id,
            remote_charge_id: p.remote_charge_id,
            status: p.status,
            qr_code: p.qr_code,
            qr_code_url: p.qr_code_url,
            expires_at: p.expires_at,
        }
    }
}

/// Response body for `GET /orders/{id}/payment`.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusResponse {
    /// Display status.
    pub status: String,
    /// Raw order status.
    pub order_status: OrderStatus,
    /// Whether the order is paid.
    pub paid: bool,
}

impl From<PaymentStatus> for PaymentStatusResponse {
    fn from(s: PaymentStatus) -> Self {
        Self {
            status: s.status,
            order_status: s.order_status,
            paid: s.paid,
        }
    }
}
