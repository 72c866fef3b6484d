//! Payment requests and local payment status.

use std::sync::Arc;

use serde::Serialize;

use crate::domain::{MinorUnits, OrderId, OrderStatus};
use crate::gateway::{
    Customer, PaymentGateway, PaymentGatewayError, PaymentInstructions, PaymentItem,
    PaymentRequest, RETRYABLE_REMOTE_STATUSES,
};
use crate::persistence::{FulfillmentStore, StoreError};

/// Digits in a valid CPF.
const CPF_DIGITS: usize = 11;

/// Failures creating a payment request or reading payment status.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The gateway failed.
    #[error(transparent)]
    Gateway(#[from] PaymentGatewayError),

    /// The order does not exist.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// The order is past the payment stage.
    #[error("order already processed (status {0})")]
    NotAwaitingPayment(OrderStatus),

    /// The order has no lines to pay for.
    #[error("order has no items")]
    NoItems,

    /// The buyer document is not an 11-digit CPF.
    #[error("invalid CPF: expected {expected} digits, got {0}", expected = CPF_DIGITS)]
    InvalidDocument(usize),

    /// A line or the total is not a positive, representable amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The frozen line prices do not add up to the declared total.
    #[error("order total {declared} does not match items total {computed}")]
    TotalMismatch {
        /// Total stored on the order.
        declared: MinorUnits,
        /// Sum of the order lines.
        computed: MinorUnits,
    },

    /// A line references a ticket type that does not exist.
    #[error("ticket type {0} not found")]
    MissingTicketType(String),
}

/// Payment state as stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentStatus {
    /// Display status (`pending`, `processing`, `paid`, `cancelled`,
    /// `fraud_alert`).
    pub status: String,
    /// Raw order status.
    pub order_status: OrderStatus,
    /// Whether the order is paid.
    pub paid: bool,
}

/// Creates payment requests at the gateway and reports local status.
#[derive(Debug, Clone)]
pub struct PaymentService {
    store: Arc<dyn FulfillmentStore>,
    gateway: Arc<dyn PaymentGateway>,
    expires_in_secs: u64,
}

impl PaymentService {
    /// Creates a new `PaymentService`.
    #[must_use]
    pub fn new(
        store: Arc<dyn FulfillmentStore>,
        gateway: Arc<dyn PaymentGateway>,
        expires_in_secs: u64,
    ) -> Self {
        Self {
            store,
            gateway,
            expires_in_secs,
        }
    }

    /// Creates an instant payment for an order awaiting payment, or returns
    /// the existing one while it is still payable.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError`] when the order is missing or not awaiting
    /// payment, when the buyer or amounts are invalid, or when the store or
    /// gateway fails.
    pub async fn create_payment(
        &self,
        order_id: OrderId,
        customer: Customer,
    ) -> Result<PaymentInstructions, PaymentError> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(PaymentError::OrderNotFound(order_id))?;
        if order.status != OrderStatus::AwaitingPayment {
            return Err(PaymentError::NotAwaitingPayment(order.status));
        }

        if let Some(remote_order_id) = order.remote_order_id.as_deref() {
            match self.gateway.order_status(remote_order_id).await {
                Ok(status) if !RETRYABLE_REMOTE_STATUSES.contains(&status.as_str()) => {
                    tracing::info!(%order_id, remote_order_id, %status, "reusing existing payment");
                    return Ok(PaymentInstructions {
                        remote_order_id: remote_order_id.to_string(),
                        remote_charge_id: order.remote_charge_id.clone(),
                        status,
                        qr_code: None,
                        qr_code_url: None,
                        expires_at: None,
                    });
                }
                Ok(status) => {
                    tracing::info!(%order_id, remote_order_id, %status, "previous payment not payable, creating a new one");
                }
                Err(err) => {
                    tracing::warn!(%order_id, remote_order_id, error = %err, "could not check previous payment, creating a new one");
                }
            }
        }

        let document = sanitize_document(&customer.document);
        if document.len() != CPF_DIGITS {
            return Err(PaymentError::InvalidDocument(document.len()));
        }

        let items = self.store.order_items(order_id).await?;
        if items.is_empty() {
            return Err(PaymentError::NoItems);
        }

        let mut computed = MinorUnits::ZERO;
        let mut payment_items = Vec::with_capacity(items.len());
        for item in &items {
            if item.quantity == 0 || !item.unit_price.is_positive() {
                return Err(PaymentError::InvalidAmount(format!(
                    "line {} must have a positive quantity and price",
                    item.id
                )));
            }
            let line_total = item.line_total().ok_or_else(|| {
                PaymentError::InvalidAmount(format!("line {} overflows", item.id))
            })?;
            computed = computed
                .checked_add(line_total)
                .ok_or_else(|| PaymentError::InvalidAmount("order total overflows".to_string()))?;

            let ticket_type = self
                .store
                .ticket_type(item.ticket_type_id)
                .await?
                .ok_or_else(|| PaymentError::MissingTicketType(item.ticket_type_id.to_string()))?;
            payment_items.push(PaymentItem {
                code: item.ticket_type_id.to_string(),
                description: ticket_type.name,
                quantity: item.quantity,
                unit_amount: item.unit_price,
            });
        }
        if computed != order.total {
            return Err(PaymentError::TotalMismatch {
                declared: order.total,
                computed,
            });
        }

        let request = PaymentRequest {
            order_id,
            amount: computed,
            customer: Customer {
                document,
                ..customer
            },
            items: payment_items,
            expires_in_secs: self.expires_in_secs,
        };
        let instructions = self.gateway.create_payment_request(&request).await?;

        self.store
            .set_remote_ids(
                order_id,
                &instructions.remote_order_id,
                instructions.remote_charge_id.as_deref(),
            )
            .await?;

        tracing::info!(
            %order_id,
            remote_order_id = %instructions.remote_order_id,
            amount = %computed,
            "payment request created"
        );
        Ok(instructions)
    }

    /// Reports payment status from the local store only.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::OrderNotFound`] for an unknown order, or
    /// [`PaymentError::Store`] on store failure.
    pub async fn payment_status(&self, order_id: OrderId) -> Result<PaymentStatus, PaymentError> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(PaymentError::OrderNotFound(order_id))?;
        Ok(PaymentStatus {
            status: order.status.display_label().to_string(),
            order_status: order.status,
            paid: order.status == OrderStatus::Paid,
        })
    }
}

/// Keeps only ASCII digits.
fn sanitize_document(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}
