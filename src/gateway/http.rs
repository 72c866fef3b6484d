//! REST implementation of [`PaymentGateway`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PaymentGateway, PaymentGatewayError, PaymentInstructions, PaymentRequest};
use crate::domain::MinorUnits;

const PAYMENT_METHOD: &str = "pix";
const DOCUMENT_TYPE: &str = "CPF";
const CUSTOMER_TYPE: &str = "individual";
const PAID_STATUS: &str = "paid";

/// Payment gateway reached over HTTPS with basic-auth API key.
///
/// Every call is bounded by the client-wide timeout given at construction.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentGateway {
    /// Builds a gateway client.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentGatewayError::Transport`] if the HTTP client cannot
    /// be constructed.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PaymentGatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentGatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn fetch_order(&self, remote_order_id: &str) -> Result<RemoteOrder, PaymentGatewayError> {
        let response = self
            .client
            .get(format!("{}/orders/{remote_order_id}", self.base_url))
            .basic_auth(&self.api_key, Some(""))
            .send()
            .await?;
        decode(response).await
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_payment_request(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentInstructions, PaymentGatewayError> {
        let body = CreateOrderBody::from(request);
        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.api_key, Some(""))
            .json(&body)
            .send()
            .await?;
        let order: RemoteOrder = decode(response).await?;
        tracing::debug!(
            order_id = %request.order_id,
            remote_order_id = %order.id,
            "payment request created"
        );
        Ok(order.into_instructions())
    }

    async fn settled_amount(
        &self,
        remote_order_id: &str,
    ) -> Result<MinorUnits, PaymentGatewayError> {
        self.fetch_order(remote_order_id).await?.settled_amount()
    }

    async fn order_status(&self, remote_order_id: &str) -> Result<String, PaymentGatewayError> {
        Ok(self.fetch_order(remote_order_id).await?.status)
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, PaymentGatewayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PaymentGatewayError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| PaymentGatewayError::Decode(e.to_string()))
}

// ── Wire format ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CreateOrderBody {
    code: String,
    items: Vec<ItemBody>,
    customer: CustomerBody,
    payments: Vec<PaymentBody>,
}

#[derive(Debug, Serialize)]
struct ItemBody {
    code: String,
    description: String,
    quantity: u32,
    amount: i64,
}

#[derive(Debug, Serialize)]
struct CustomerBody {
    name: String,
    email: String,
    document: String,
    document_type: &'static str,
    #[serde(rename = "type")]
    customer_type: &'static str,
}

#[derive(Debug, Serialize)]
struct PaymentBody {
    payment_method: &'static str,
    pix: PixBody,
}

#[derive(Debug, Serialize)]
struct PixBody {
    expires_in: u64,
}

impl From<&PaymentRequest> for CreateOrderBody {
    fn from(request: &PaymentRequest) -> Self {
        Self {
            code: request.order_id.to_string(),
            items: request
                .items
                .iter()
                .map(|item| ItemBody {
                    code: item.code.clone(),
                    description: item.description.clone(),
                    quantity: item.quantity,
                    amount: item.unit_amount.get(),
                })
                .collect(),
            customer: CustomerBody {
                name: request.customer.name.clone(),
                email: request.customer.email.clone(),
                document: request.customer.document.clone(),
                document_type: DOCUMENT_TYPE,
                customer_type: CUSTOMER_TYPE,
            },
            payments: vec![PaymentBody {
                payment_method: PAYMENT_METHOD,
                pix: PixBody {
                    expires_in: request.expires_in_secs,
                },
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct RemoteOrder {
    id: String,
    status: String,
    #[serde(default)]
    charges: Vec<RemoteCharge>,
}

#[derive(Debug, Deserialize)]
struct RemoteCharge {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    paid_amount: Option<i64>,
    #[serde(default)]
    last_transaction: Option<RemoteTransaction>,
}

#[derive(Debug, Deserialize)]
struct RemoteTransaction {
    #[serde(default)]
    qr_code: Option<String>,
    #[serde(default)]
    qr_code_url: Option<String>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl RemoteOrder {
    /// Sums `paid_amount` over the charges in `paid` status.
    fn settled_amount(&self) -> Result<MinorUnits, PaymentGatewayError> {
        self.charges
            .iter()
            .filter(|charge| charge.status == PAID_STATUS)
            .try_fold(MinorUnits::ZERO, |acc, charge| {
                acc.checked_add(MinorUnits::new(charge.paid_amount.unwrap_or(0)))
                    .ok_or_else(|| PaymentGatewayError::Decode("paid amount overflow".to_string()))
            })
    }

    fn into_instructions(self) -> PaymentInstructions {
        let charge = self.charges.into_iter().next();
        let transaction = charge.as_ref().and_then(|c| c.last_transaction.as_ref());
        PaymentInstructions {
            remote_charge_id: charge.as_ref().map(|c| c.id.clone()),
            qr_code: transaction.and_then(|t| t.qr_code.clone()),
            qr_code_url: transaction.and_then(|t| t.qr_code_url.clone()),
            expires_at: transaction.and_then(|t| t.expires_at),
            remote_order_id: self.id,
            status: self.status,
        }
    }
}
