//! Inbound payment gateway notifications.
//!
//! Bodies are decoded against an explicit schema: the envelope must carry a
//! non-empty `id`, a non-empty `type` and an object `data`. For the two
//! payment signals the payload is decoded too, and a field that is present
//! but empty or mistyped is rejected as malformed, whereas a field that is
//! simply absent decodes to `None` and is dealt with by the router.

use serde::Deserialize;

use super::OrderId;

/// Maximum accepted webhook body size in bytes.
pub const MAX_BODY_BYTES: usize = 65_536;

/// Notification type of the primary order-paid signal.
pub const ORDER_PAID: &str = "order.paid";

/// Notification type of the fallback charge-paid signal.
pub const CHARGE_PAID: &str = "charge.paid";

/// Notification types that can trigger fulfillment.
pub const PAYMENT_EVENT_TYPES: [&str; 2] = [ORDER_PAID, CHARGE_PAID];

/// Reasons a webhook body is rejected before any state is touched.
#[derive(Debug, thiserror::Error)]
pub enum MalformedNotification {
    /// Body exceeds [`MAX_BODY_BYTES`].
    #[error("body of {0} bytes exceeds the {limit} byte limit", limit = MAX_BODY_BYTES)]
    TooLarge(usize),

    /// Body is not a JSON object with `id`, `type` and object `data`.
    #[error("invalid notification envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// A required field is present but empty.
    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),

    /// The payload of a payment signal does not match its schema.
    #[error("invalid {event_type} payload: {source}")]
    Payload {
        /// Declared notification type.
        event_type: &'static str,
        /// Decoding failure.
        #[source]
        source: serde_json::Error,
    },

    /// The order code echoed by the gateway is not one of our order ids.
    #[error("invalid order code: {0:?}")]
    OrderCode(String),
}

/// Linkage carried by a payment signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentSignal {
    /// Our order id, echoed back by the gateway as the order `code`.
    pub order_id: Option<OrderId>,
    /// Gateway order id.
    pub remote_order_id: Option<String>,
    /// Gateway charge id.
    pub remote_charge_id: Option<String>,
}

/// Decoded notification body, routed by [`NotificationKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// Primary `order.paid` signal.
    OrderPaid(PaymentSignal),
    /// Fallback `charge.paid` signal.
    ChargePaid(PaymentSignal),
    /// Any other type; logged and ignored.
    Unhandled,
}

/// A decoded webhook notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Gateway-assigned notification id, the dedup key.
    pub remote_event_id: String,
    /// Declared notification type.
    pub event_type: String,
    /// Decoded payload.
    pub kind: NotificationKind,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OrderPaidData {
    id: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    charges: Vec<ChargeRef>,
}

#[derive(Debug, Deserialize)]
struct ChargeRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChargePaidData {
    id: String,
    #[serde(default)]
    order: Option<ChargeOrderRef>,
}

#[derive(Debug, Deserialize)]
struct ChargeOrderRef {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl Notification {
    /// Decodes a raw webhook body.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedNotification`] when the body is too large, is not
    /// a valid envelope, or carries a payment signal whose payload does not
    /// match its schema.
    pub fn parse(body: &[u8]) -> Result<Self, MalformedNotification> {
        if body.len() > MAX_BODY_BYTES {
            return Err(MalformedNotification::TooLarge(body.len()));
        }

        let envelope: Envelope =
            serde_json::from_slice(body).map_err(MalformedNotification::Envelope)?;
        if envelope.id.trim().is_empty() {
            return Err(MalformedNotification::EmptyField("id"));
        }
        if envelope.event_type.trim().is_empty() {
            return Err(MalformedNotification::EmptyField("type"));
        }

        let data = serde_json::Value::Object(envelope.data);
        let kind = match envelope.event_type.as_str() {
            ORDER_PAID => NotificationKind::OrderPaid(decode_order_paid(data)?),
            CHARGE_PAID => NotificationKind::ChargePaid(decode_charge_paid(data)?),
            _ => NotificationKind::Unhandled,
        };

        Ok(Self {
            remote_event_id: envelope.id,
            event_type: envelope.event_type,
            kind,
        })
    }

    /// Returns the payment linkage for payment signals.
    #[must_use]
    pub fn payment_signal(&self) -> Option<&PaymentSignal> {
        match &self.kind {
            NotificationKind::OrderPaid(signal) | NotificationKind::ChargePaid(signal) => {
                Some(signal)
            }
            NotificationKind::Unhandled => None,
        }
    }
}

fn decode_order_paid(data: serde_json::Value) -> Result<PaymentSignal, MalformedNotification> {
    let payload: OrderPaidData =
        serde_json::from_value(data).map_err(|source| MalformedNotification::Payload {
            event_type: ORDER_PAID,
            source,
        })?;

    let remote_order_id = non_empty("data.id", payload.id)?;
    let order_id = payload.code.map(parse_order_code).transpose()?;
    let remote_charge_id = payload
        .charges
        .into_iter()
        .next()
        .map(|charge| non_empty("data.charges[0].id", charge.id))
        .transpose()?;

    Ok(PaymentSignal {
        order_id,
        remote_order_id: Some(remote_order_id),
        remote_charge_id,
    })
}

fn decode_charge_paid(data: serde_json::Value) -> Result<PaymentSignal, MalformedNotification> {
    let payload: ChargePaidData =
        serde_json::from_value(data).map_err(|source| MalformedNotification::Payload {
            event_type: CHARGE_PAID,
            source,
        })?;

    let remote_charge_id = non_empty("data.id", payload.id)?;
    let (order_id, remote_order_id) = match payload.order {
        Some(order) => (
            order.code.map(parse_order_code).transpose()?,
            order
                .id
                .map(|id| non_empty("data.order.id", id))
                .transpose()?,
        ),
        None => (None, None),
    };

    Ok(PaymentSignal {
        order_id,
        remote_order_id,
        remote_charge_id: Some(remote_charge_id),
    })
}

fn non_empty(field: &'static str, value: String) -> Result<String, MalformedNotification> {
    if value.trim().is_empty() {
        Err(MalformedNotification::EmptyField(field))
    } else {
        Ok(value)
    }
}

fn parse_order_code(code: String) -> Result<OrderId, MalformedNotification> {
    if code.trim().is_empty() {
        return Err(MalformedNotification::EmptyField("order code"));
    }
    code.parse().map_err(|_| MalformedNotification::OrderCode(code))
}
