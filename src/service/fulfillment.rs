//! Fulfillment pipeline: guard, claim, validate, issue, confirm.
//!
//! One run per payment signal. The claim is a compare-and-swap committed on
//! its own, so exactly one run per order gets past it and the order is
//! observably `IN_PROGRESS` from then on. Everything after the claim that
//! mutates inventory happens in a single store transaction; on any failure
//! the transaction is rolled back, the order stays `IN_PROGRESS`, and an
//! audit row naming the failure is appended outside the transaction.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::ticket::generate_ticket_code;
use crate::domain::{
    EventBus, FulfillmentEvent, LotId, MinorUnits, Order, OrderId, OrderStatus, StatusChange,
    Ticket, TicketId, TransitionReason,
};
use crate::gateway::{PaymentGateway, PaymentGatewayError};
use crate::persistence::{FulfillmentStore, StoreError, StoreTx};
use crate::signing::TicketSigner;

/// Why a fulfillment run failed.
#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The order does not exist.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// Neither the notification nor the order carries a gateway order id.
    #[error("order {0} has no remote order id to validate against")]
    MissingRemoteOrderId(OrderId),

    /// The settled amount could not be fetched.
    #[error("payment validation failed: {0}")]
    Gateway(#[from] PaymentGatewayError),

    /// An order line references catalog data that does not exist.
    #[error("missing reference data: {0}")]
    MissingReference(String),

    /// A lot ran out of units while issuing.
    #[error("lot {0} has no units left")]
    InventoryExhausted(LotId),

    /// The order left `IN_PROGRESS` while this run held the claim.
    #[error("order {0} is no longer in progress")]
    ConfirmationConflict(OrderId),

    /// The amount mismatch could not be committed as `FRAUD_FLAGGED`.
    #[error("fraud flag not committed: {0}")]
    FraudFlagFailed(#[source] Box<FulfillmentError>),
}

impl FulfillmentError {
    /// Audit reason recorded when this error aborts a claimed run.
    #[must_use]
    pub const fn audit_reason(&self) -> TransitionReason {
        match self {
            Self::MissingRemoteOrderId(_) | Self::Gateway(_) => {
                TransitionReason::PaymentValidationFailed
            }
            Self::FraudFlagFailed(_) => TransitionReason::FraudFlagFailed,
            _ => TransitionReason::IssuanceFailed,
        }
    }
}

/// Linkage of one payment signal to an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentContext {
    /// Remote id of the notification that triggered the run.
    pub remote_event_id: String,
    /// Order to fulfill.
    pub order_id: OrderId,
    /// Gateway order id carried by the notification.
    pub remote_order_id: Option<String>,
    /// Gateway charge id carried by the notification.
    pub remote_charge_id: Option<String>,
}

/// Result of one fulfillment run.
#[derive(Debug)]
pub enum FulfillmentOutcome {
    /// A payment notification for this order was already processed.
    AlreadyProcessed,
    /// The order was not awaiting payment; another run owns it or it is
    /// already settled.
    ClaimLost {
        /// Status observed after the failed claim.
        status: OrderStatus,
    },
    /// Tickets issued and the order is `PAID`.
    Confirmed {
        /// Number of tickets issued.
        tickets_issued: u32,
    },
    /// The settled amount differed from the order total.
    FraudFlagged {
        /// Order total.
        expected: MinorUnits,
        /// Amount the gateway reported as settled.
        settled: MinorUnits,
    },
    /// The run failed after claiming the order, which stays `IN_PROGRESS`.
    Aborted {
        /// Reason code written to the audit trail.
        reason: TransitionReason,
        /// Underlying failure.
        error: FulfillmentError,
    },
}

impl FulfillmentOutcome {
    /// Returns `true` when this run claimed the order.
    #[must_use]
    pub const fn claimed(&self) -> bool {
        matches!(
            self,
            Self::Confirmed { .. } | Self::FraudFlagged { .. } | Self::Aborted { .. }
        )
    }
}

enum Settlement {
    Confirmed { tickets_issued: u32 },
    FraudFlagged { expected: MinorUnits, settled: MinorUnits },
}

/// Runs the fulfillment pipeline against a store and a payment gateway.
#[derive(Debug, Clone)]
pub struct FulfillmentService {
    store: Arc<dyn FulfillmentStore>,
    gateway: Arc<dyn PaymentGateway>,
    signer: TicketSigner,
    event_bus: EventBus,
}

impl FulfillmentService {
    /// Creates a new `FulfillmentService`.
    #[must_use]
    pub fn new(
        store: Arc<dyn FulfillmentStore>,
        gateway: Arc<dyn PaymentGateway>,
        signer: TicketSigner,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            gateway,
            signer,
            event_bus,
        }
    }

    /// Returns a reference to the inner [`EventBus`].
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Fulfills the order a payment signal refers to.
    ///
    /// Failures after the claim are reported as
    /// [`FulfillmentOutcome::Aborted`], not as errors.
    ///
    /// # Errors
    ///
    /// Returns [`FulfillmentError`] when the run fails before claiming the
    /// order; nothing has been changed in that case.
    pub async fn fulfill(
        &self,
        ctx: &PaymentContext,
    ) -> Result<FulfillmentOutcome, FulfillmentError> {
        let order_id = ctx.order_id;

        if self.store.payment_event_processed_for_order(order_id).await? {
            tracing::info!(
                %order_id,
                remote_event_id = %ctx.remote_event_id,
                "payment already processed for order, skipping"
            );
            return Ok(FulfillmentOutcome::AlreadyProcessed);
        }

        let claimed = self
            .store
            .transition_status(order_id, OrderStatus::AwaitingPayment, OrderStatus::InProgress)
            .await?;
        if !claimed {
            let order = self
                .store
                .order(order_id)
                .await?
                .ok_or(FulfillmentError::OrderNotFound(order_id))?;
            tracing::info!(
                %order_id,
                status = %order.status,
                remote_event_id = %ctx.remote_event_id,
                "order not awaiting payment, claim lost"
            );
            return Ok(FulfillmentOutcome::ClaimLost {
                status: order.status,
            });
        }
        tracing::info!(%order_id, remote_event_id = %ctx.remote_event_id, "order claimed");

        match self.settle(ctx).await {
            Ok(Settlement::Confirmed { tickets_issued }) => {
                tracing::info!(%order_id, tickets_issued, "order confirmed");
                let _ = self.event_bus.publish(FulfillmentEvent::PaymentConfirmed {
                    order_id,
                    tickets_issued,
                    remote_order_id: ctx.remote_order_id.clone(),
                    remote_charge_id: ctx.remote_charge_id.clone(),
                    timestamp: Utc::now(),
                });
                Ok(FulfillmentOutcome::Confirmed { tickets_issued })
            }
            Ok(Settlement::FraudFlagged { expected, settled }) => {
                tracing::warn!(%order_id, %expected, %settled, "settled amount mismatch, order flagged");
                let _ = self.event_bus.publish(FulfillmentEvent::FraudFlagged {
                    order_id,
                    expected,
                    settled,
                    timestamp: Utc::now(),
                });
                Ok(FulfillmentOutcome::FraudFlagged { expected, settled })
            }
            Err(error) => {
                let reason = error.audit_reason();
                tracing::error!(%order_id, %reason, error = %error, "fulfillment aborted, order left in progress");
                self.record_abort(ctx, reason, &error).await;
                let _ = self.event_bus.publish(FulfillmentEvent::FulfillmentAborted {
                    order_id,
                    reason,
                    detail: error.to_string(),
                    timestamp: Utc::now(),
                });
                Ok(FulfillmentOutcome::Aborted { reason, error })
            }
        }
    }

    /// Validates the settled amount, then flags or issues inside one
    /// transaction. Any error leaves the transaction uncommitted.
    async fn settle(&self, ctx: &PaymentContext) -> Result<Settlement, FulfillmentError> {
        let order_id = ctx.order_id;
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;

        let remote_order_id = ctx
            .remote_order_id
            .clone()
            .or_else(|| order.remote_order_id.clone())
            .ok_or(FulfillmentError::MissingRemoteOrderId(order_id))?;
        let settled = self.gateway.settled_amount(&remote_order_id).await?;

        let mut tx = self.store.begin().await?;
        tx.set_remote_ids(
            order_id,
            ctx.remote_order_id.as_deref(),
            ctx.remote_charge_id.as_deref(),
        )
        .await?;

        if settled != order.total {
            self.flag_fraud(tx, ctx, &remote_order_id)
                .await
                .map_err(|err| FulfillmentError::FraudFlagFailed(Box::new(err)))?;
            return Ok(Settlement::FraudFlagged {
                expected: order.total,
                settled,
            });
        }
        tracing::info!(%order_id, %settled, "payment amount validated");

        let charge_id = ctx
            .remote_charge_id
            .clone()
            .or_else(|| order.remote_charge_id.clone())
            .unwrap_or_default();
        let tickets_issued = self.issue_tickets(&mut *tx, &order, &charge_id).await?;

        if !tx
            .transition_status(order_id, OrderStatus::InProgress, OrderStatus::Paid)
            .await?
        {
            return Err(FulfillmentError::ConfirmationConflict(order_id));
        }

        let change = StatusChange {
            order_id,
            old_status: OrderStatus::InProgress,
            new_status: OrderStatus::Paid,
            reason: TransitionReason::WebhookPaymentConfirmed,
            error: None,
            remote_event_id: Some(ctx.remote_event_id.clone()),
            remote_order_id: Some(remote_order_id),
            remote_charge_id: ctx.remote_charge_id.clone(),
        };
        if let Err(err) = tx.record_status_change(&change).await {
            tracing::warn!(%order_id, error = %err, "audit write failed (non-fatal)");
        }

        tx.commit().await?;
        Ok(Settlement::Confirmed { tickets_issued })
    }

    async fn flag_fraud(
        &self,
        mut tx: Box<dyn StoreTx>,
        ctx: &PaymentContext,
        remote_order_id: &str,
    ) -> Result<(), FulfillmentError> {
        let order_id = ctx.order_id;
        if !tx
            .transition_status(order_id, OrderStatus::InProgress, OrderStatus::FraudFlagged)
            .await?
        {
            return Err(FulfillmentError::ConfirmationConflict(order_id));
        }
        tx.record_status_change(&StatusChange {
            order_id,
            old_status: OrderStatus::InProgress,
            new_status: OrderStatus::FraudFlagged,
            reason: TransitionReason::AmountMismatch,
            error: None,
            remote_event_id: Some(ctx.remote_event_id.clone()),
            remote_order_id: Some(remote_order_id.to_string()),
            remote_charge_id: ctx.remote_charge_id.clone(),
        })
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Issues one ticket per purchased unit. Any failure aborts the whole
    /// order.
    ///
    /// Lines are walked in `(lot, ticket type)` order and each unit debits
    /// its lot before bumping the ticket type, so concurrent runs take row
    /// locks in the same order.
    async fn issue_tickets(
        &self,
        tx: &mut dyn StoreTx,
        order: &Order,
        charge_id: &str,
    ) -> Result<u32, FulfillmentError> {
        let mut lines = Vec::new();
        for item in tx.order_items(order.id).await? {
            let event_id = tx.event_for_date(item.event_date_id).await?.ok_or_else(|| {
                FulfillmentError::MissingReference(format!("event date {}", item.event_date_id))
            })?;
            let ticket_type = tx.ticket_type(item.ticket_type_id).await?.ok_or_else(|| {
                FulfillmentError::MissingReference(format!("ticket type {}", item.ticket_type_id))
            })?;
            lines.push((ticket_type.lot_id, event_id, item));
        }
        lines.sort_by_key(|(lot_id, _, item)| (*lot_id, item.ticket_type_id, item.id));

        let mut issued: u32 = 0;
        for (lot_id, event_id, item) in lines {
            for unit_index in 0..item.quantity {
                if !tx.decrement_available(lot_id).await? {
                    return Err(FulfillmentError::InventoryExhausted(lot_id));
                }
                tx.increment_sold(item.ticket_type_id).await?;

                let ticket_id = TicketId::new();
                let ticket = Ticket {
                    id: ticket_id,
                    code: generate_ticket_code(),
                    signed_token: self.signer.sign(ticket_id, charge_id, event_id),
                    order_id: order.id,
                    order_item_id: item.id,
                    unit_index,
                    user_id: order.user_id.clone(),
                    event_id,
                    event_date_id: item.event_date_id,
                    ticket_type_id: item.ticket_type_id,
                    used: false,
                    issued_at: Utc::now(),
                };
                tx.insert_ticket(&ticket).await?;
                issued = issued.saturating_add(1);
            }
        }

        tracing::debug!(order_id = %order.id, issued, "tickets issued");
        Ok(issued)
    }

    /// Appends the failure audit row outside the rolled-back transaction.
    async fn record_abort(
        &self,
        ctx: &PaymentContext,
        reason: TransitionReason,
        error: &FulfillmentError,
    ) {
        let change = StatusChange {
            order_id: ctx.order_id,
            old_status: OrderStatus::InProgress,
            new_status: OrderStatus::InProgress,
            reason,
            error: Some(error.to_string()),
            remote_event_id: Some(ctx.remote_event_id.clone()),
            remote_order_id: ctx.remote_order_id.clone(),
            remote_charge_id: ctx.remote_charge_id.clone(),
        };
        if let Err(err) = self.store.record_status_change(&change).await {
            tracing::warn!(order_id = %ctx.order_id, error = %err, "failure audit write failed");
        }
    }
}
