//! Webhook ingestion: decode, dedup, route, mark processed.
//!
//! The notification row is inserted before any business processing, which
//! turns at-least-once delivery into at-most-once processing. Once the row
//! exists the caller is always acknowledged, whatever the pipeline did.

use std::sync::Arc;

use crate::domain::notification::MalformedNotification;
use crate::domain::{Notification, NotificationKind, OrderId, PaymentSignal};
use crate::persistence::{FulfillmentStore, StoreError};

use super::fulfillment::{FulfillmentService, PaymentContext};

/// Reasons a webhook is not acknowledged.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The body was rejected before any state was touched.
    #[error(transparent)]
    Malformed(#[from] MalformedNotification),

    /// The notification could not be durably recorded.
    #[error("notification not recorded: {0}")]
    NotRecorded(#[source] StoreError),
}

/// What happened to an acknowledged notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The remote id was already recorded; nothing was done.
    Duplicate,
    /// The notification was recorded, routed and marked processed.
    Processed {
        /// Order the notification was linked to, if it claimed one.
        order_id: Option<OrderId>,
    },
}

/// Entry point for inbound gateway notifications.
#[derive(Debug, Clone)]
pub struct WebhookService {
    store: Arc<dyn FulfillmentStore>,
    fulfillment: FulfillmentService,
}

impl WebhookService {
    /// Creates a new `WebhookService`.
    #[must_use]
    pub fn new(store: Arc<dyn FulfillmentStore>, fulfillment: FulfillmentService) -> Self {
        Self { store, fulfillment }
    }

    /// Returns the pipeline notifications are routed to.
    #[must_use]
    pub fn fulfillment(&self) -> &FulfillmentService {
        &self.fulfillment
    }

    /// Handles one raw webhook body.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Malformed`] for an invalid body and
    /// [`IngestError::NotRecorded`] when the notification could not be
    /// stored. Pipeline failures are never returned.
    pub async fn ingest(&self, body: &[u8]) -> Result<IngestOutcome, IngestError> {
        let notification = Notification::parse(body)?;
        let remote_event_id = notification.remote_event_id.as_str();
        tracing::info!(
            remote_event_id,
            event_type = %notification.event_type,
            "webhook received"
        );

        if self
            .store
            .webhook_event_exists(remote_event_id)
            .await
            .map_err(IngestError::NotRecorded)?
        {
            tracing::info!(remote_event_id, "duplicate delivery, ignoring");
            return Ok(IngestOutcome::Duplicate);
        }

        let inserted = self
            .store
            .insert_webhook_event(remote_event_id, &notification.event_type)
            .await
            .map_err(IngestError::NotRecorded)?;
        if !inserted {
            tracing::info!(remote_event_id, "concurrent duplicate delivery, ignoring");
            return Ok(IngestOutcome::Duplicate);
        }

        let order_id = self.route(&notification).await;

        if let Err(err) = self
            .store
            .mark_webhook_event_processed(remote_event_id, order_id)
            .await
        {
            tracing::error!(remote_event_id, error = %err, "failed to mark webhook processed");
        }

        tracing::info!(remote_event_id, "webhook processing finished");
        Ok(IngestOutcome::Processed { order_id })
    }

    /// Dispatches by notification type. Returns the order to link the
    /// notification to when the pipeline claimed it.
    async fn route(&self, notification: &Notification) -> Option<OrderId> {
        let signal = match &notification.kind {
            NotificationKind::OrderPaid(signal) | NotificationKind::ChargePaid(signal) => signal,
            NotificationKind::Unhandled => {
                tracing::info!(
                    remote_event_id = %notification.remote_event_id,
                    event_type = %notification.event_type,
                    "unhandled webhook type"
                );
                return None;
            }
        };

        let Some(ctx) = payment_context(&notification.remote_event_id, signal) else {
            tracing::warn!(
                remote_event_id = %notification.remote_event_id,
                event_type = %notification.event_type,
                remote_order_id = ?signal.remote_order_id,
                remote_charge_id = ?signal.remote_charge_id,
                "payment notification without order code, ignoring"
            );
            return None;
        };

        match self.fulfillment.fulfill(&ctx).await {
            Ok(outcome) => outcome.claimed().then_some(ctx.order_id),
            Err(err) => {
                tracing::error!(
                    order_id = %ctx.order_id,
                    remote_event_id = %ctx.remote_event_id,
                    error = %err,
                    "fulfillment failed before claim"
                );
                None
            }
        }
    }
}

fn payment_context(remote_event_id: &str, signal: &PaymentSignal) -> Option<PaymentContext> {
    Some(PaymentContext {
        remote_event_id: remote_event_id.to_string(),
        order_id: signal.order_id?,
        remote_order_id: signal.remote_order_id.clone(),
        remote_charge_id: signal.remote_charge_id.clone(),
    })
}
