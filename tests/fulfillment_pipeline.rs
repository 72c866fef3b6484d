//! End-to-end pipeline tests over the in-memory store.

#![allow(clippy::panic)]

mod common;

use std::collections::HashSet;

use common::{
    Harness, SIGNING_SECRET, ScriptedGateway, charge_paid, order_paid, seed_catalog, seed_order,
    seed_ticket_type,
};
use ticket_fulfillment::domain::{FulfillmentEvent, OrderStatus, TransitionReason};
use ticket_fulfillment::persistence::FulfillmentStore;
use ticket_fulfillment::persistence::memory::CounterWrite;
use ticket_fulfillment::service::{
    FulfillmentError, FulfillmentOutcome, IngestOutcome, PaymentContext,
};
use ticket_fulfillment::signing::TicketSigner;

#[tokio::test]
async fn matching_payment_issues_one_ticket_per_unit() {
    let h = Harness::new(ScriptedGateway::settling(30_000));
    let catalog = seed_catalog(&h.store, 10, 10_000);
    let order_id = seed_order(&h.store, &[(catalog, 3, 10_000)]);

    let outcome = h
        .webhooks
        .ingest(&order_paid("evt-1", order_id, "or_1", "ch_1"))
        .await;

    assert!(matches!(
        outcome,
        Ok(IngestOutcome::Processed { order_id: Some(id) }) if id == order_id
    ));
    assert_eq!(h.order_status(order_id).await, OrderStatus::Paid);
    assert_eq!(h.ticket_count(order_id).await, 3);
    assert_eq!(h.available(catalog.lot_id).await, 7);
    assert_eq!(h.sold(catalog.ticket_type_id).await, 3);

    let Ok(history) = h.store.status_history(order_id).await else {
        panic!("history unreadable");
    };
    assert_eq!(history.len(), 1);
    let Some(record) = history.first() else {
        panic!("history empty");
    };
    assert_eq!(record.change.reason, TransitionReason::WebhookPaymentConfirmed);
    assert_eq!(record.change.new_status, OrderStatus::Paid);
    assert_eq!(record.change.remote_event_id.as_deref(), Some("evt-1"));

    let Ok(Some(order)) = h.store.order(order_id).await else {
        panic!("order missing");
    };
    assert_eq!(order.remote_order_id.as_deref(), Some("or_1"));
    assert_eq!(order.remote_charge_id.as_deref(), Some("ch_1"));
}

#[tokio::test]
async fn issued_tokens_verify_and_bind_the_charge() {
    let h = Harness::new(ScriptedGateway::settling(20_000));
    let catalog = seed_catalog(&h.store, 10, 10_000);
    let order_id = seed_order(&h.store, &[(catalog, 2, 10_000)]);

    let _ = h
        .webhooks
        .ingest(&order_paid("evt-1", order_id, "or_1", "ch_1"))
        .await;

    let Ok(tickets) = h.store.tickets_for_order(order_id).await else {
        panic!("tickets unreadable");
    };
    let signer = TicketSigner::new(SIGNING_SECRET);
    let codes: HashSet<_> = tickets.iter().map(|t| t.code.clone()).collect();
    assert_eq!(codes.len(), 2);
    for ticket in &tickets {
        assert!(ticket.code.starts_with("TKT-"));
        assert!(!ticket.used);
        assert_eq!(ticket.event_id, catalog.event_id);
        let Ok(claims) = signer.verify(&ticket.signed_token) else {
            panic!("token should verify");
        };
        assert_eq!(claims.ticket_id, ticket.id);
        assert_eq!(claims.charge_id, "ch_1");
        assert_eq!(claims.event_id, catalog.event_id);
    }
}

#[tokio::test]
async fn amount_mismatch_flags_fraud_without_tickets() {
    let h = Harness::new(ScriptedGateway::settling(25_000));
    let catalog = seed_catalog(&h.store, 10, 10_000);
    let order_id = seed_order(&h.store, &[(catalog, 3, 10_000)]);
    let mut events = h.event_bus.subscribe();

    let _ = h
        .webhooks
        .ingest(&order_paid("evt-1", order_id, "or_1", "ch_1"))
        .await;

    assert_eq!(h.order_status(order_id).await, OrderStatus::FraudFlagged);
    assert_eq!(h.ticket_count(order_id).await, 0);
    assert_eq!(h.available(catalog.lot_id).await, 10);

    let Ok(history) = h.store.status_history(order_id).await else {
        panic!("history unreadable");
    };
    let reasons: Vec<_> = history.iter().map(|r| r.change.reason).collect();
    assert_eq!(reasons, vec![TransitionReason::AmountMismatch]);

    let Ok(FulfillmentEvent::FraudFlagged {
        expected, settled, ..
    }) = events.try_recv()
    else {
        panic!("expected a fraud event");
    };
    assert_eq!(expected.get(), 30_000);
    assert_eq!(settled.get(), 25_000);
}

#[tokio::test]
async fn uncommitted_fraud_flag_is_not_reported_as_issuance_failure() {
    let h = Harness::new(ScriptedGateway::settling(25_000));
    let catalog = seed_catalog(&h.store, 10, 10_000);
    let order_id = seed_order(&h.store, &[(catalog, 3, 10_000)]);
    h.store.fail_audit_writes(true);
    let mut events = h.event_bus.subscribe();

    let outcome = h
        .fulfillment
        .fulfill(&PaymentContext {
            remote_event_id: "evt-1".to_string(),
            order_id,
            remote_order_id: Some("or_1".to_string()),
            remote_charge_id: Some("ch_1".to_string()),
        })
        .await;

    let Ok(FulfillmentOutcome::Aborted { reason, error }) = outcome else {
        panic!("expected an aborted run");
    };
    assert_eq!(reason, TransitionReason::FraudFlagFailed);
    assert!(matches!(error, FulfillmentError::FraudFlagFailed(_)));
    assert_eq!(h.order_status(order_id).await, OrderStatus::InProgress);
    assert_eq!(h.ticket_count(order_id).await, 0);
    assert_eq!(h.available(catalog.lot_id).await, 10);

    let Ok(FulfillmentEvent::FulfillmentAborted { reason, .. }) = events.try_recv() else {
        panic!("expected an abort event");
    };
    assert_eq!(reason, TransitionReason::FraudFlagFailed);
}

#[tokio::test]
async fn duplicate_delivery_is_acknowledged_without_mutation() {
    let h = Harness::new(ScriptedGateway::settling(30_000));
    let catalog = seed_catalog(&h.store, 10, 10_000);
    let order_id = seed_order(&h.store, &[(catalog, 3, 10_000)]);
    let body = order_paid("evt-1", order_id, "or_1", "ch_1");

    let first = h.webhooks.ingest(&body).await;
    let second = h.webhooks.ingest(&body).await;

    assert!(matches!(first, Ok(IngestOutcome::Processed { .. })));
    assert!(matches!(second, Ok(IngestOutcome::Duplicate)));
    assert_eq!(h.ticket_count(order_id).await, 3);
    assert_eq!(h.available(catalog.lot_id).await, 7);
    assert_eq!(h.gateway.settled_calls(), 1);

    let Ok(Some(record)) = h.store.webhook_event("evt-1").await else {
        panic!("webhook row missing");
    };
    assert!(record.processed);
    assert!(record.processed_at.is_some());
    assert_eq!(record.order_id, Some(order_id));
}

#[tokio::test]
async fn charge_paid_after_order_paid_is_a_no_op() {
    let h = Harness::new(ScriptedGateway::settling(30_000));
    let catalog = seed_catalog(&h.store, 10, 10_000);
    let order_id = seed_order(&h.store, &[(catalog, 3, 10_000)]);

    let _ = h
        .webhooks
        .ingest(&order_paid("evt-order", order_id, "or_1", "ch_1"))
        .await;
    let second = h
        .webhooks
        .ingest(&charge_paid("evt-charge", order_id, Some("or_1"), "ch_1"))
        .await;

    assert!(matches!(
        second,
        Ok(IngestOutcome::Processed { order_id: None })
    ));
    assert_eq!(h.ticket_count(order_id).await, 3);
    assert_eq!(h.available(catalog.lot_id).await, 7);
    assert_eq!(h.gateway.settled_calls(), 1);
}

#[tokio::test]
async fn charge_paid_alone_fulfills_using_stored_remote_order() {
    let h = Harness::new(ScriptedGateway::settling(10_000));
    let catalog = seed_catalog(&h.store, 10, 10_000);
    let order_id = seed_order(&h.store, &[(catalog, 1, 10_000)]);
    let Ok(()) = h.store.set_remote_ids(order_id, "or_stored", Some("ch_stored")).await else {
        panic!("remote ids not stored");
    };

    let outcome = h
        .webhooks
        .ingest(&charge_paid("evt-charge", order_id, None, "ch_2"))
        .await;

    assert!(matches!(outcome, Ok(IngestOutcome::Processed { order_id: Some(_) })));
    assert_eq!(h.order_status(order_id).await, OrderStatus::Paid);
    let Ok(Some(order)) = h.store.order(order_id).await else {
        panic!("order missing");
    };
    assert_eq!(order.remote_order_id.as_deref(), Some("or_stored"));
    assert_eq!(order.remote_charge_id.as_deref(), Some("ch_2"));
}

#[tokio::test]
async fn missing_remote_order_is_a_validation_failure() {
    let h = Harness::new(ScriptedGateway::settling(10_000));
    let catalog = seed_catalog(&h.store, 10, 10_000);
    let order_id = seed_order(&h.store, &[(catalog, 1, 10_000)]);

    let outcome = h
        .fulfillment
        .fulfill(&PaymentContext {
            remote_event_id: "evt-1".to_string(),
            order_id,
            remote_order_id: None,
            remote_charge_id: Some("ch_1".to_string()),
        })
        .await;

    assert!(matches!(
        outcome,
        Ok(FulfillmentOutcome::Aborted {
            reason: TransitionReason::PaymentValidationFailed,
            error: FulfillmentError::MissingRemoteOrderId(_),
        })
    ));
    assert_eq!(h.order_status(order_id).await, OrderStatus::InProgress);
    assert_eq!(h.gateway.settled_calls(), 0);
}

#[tokio::test]
async fn gateway_failure_leaves_order_in_progress() {
    let h = Harness::new(ScriptedGateway::unavailable());
    let catalog = seed_catalog(&h.store, 10, 10_000);
    let order_id = seed_order(&h.store, &[(catalog, 3, 10_000)]);
    let mut events = h.event_bus.subscribe();

    let outcome = h
        .webhooks
        .ingest(&order_paid("evt-1", order_id, "or_1", "ch_1"))
        .await;

    assert!(matches!(outcome, Ok(IngestOutcome::Processed { .. })));
    assert_eq!(h.order_status(order_id).await, OrderStatus::InProgress);
    assert_eq!(h.ticket_count(order_id).await, 0);
    assert_eq!(h.available(catalog.lot_id).await, 10);

    let Ok(history) = h.store.status_history(order_id).await else {
        panic!("history unreadable");
    };
    assert_eq!(history.len(), 1);
    let Some(record) = history.first() else {
        panic!("history empty");
    };
    assert_eq!(record.change.reason, TransitionReason::PaymentValidationFailed);
    assert!(record.change.error.is_some());

    let Ok(FulfillmentEvent::FulfillmentAborted { reason, .. }) = events.try_recv() else {
        panic!("expected an abort event");
    };
    assert_eq!(reason, TransitionReason::PaymentValidationFailed);
}

#[tokio::test]
async fn exhausted_lot_rolls_back_the_whole_order() {
    let h = Harness::new(ScriptedGateway::settling(40_000));
    let roomy = seed_catalog(&h.store, 10, 10_000);
    let scarce = seed_catalog(&h.store, 1, 10_000);
    let order_id = seed_order(&h.store, &[(roomy, 2, 10_000), (scarce, 2, 10_000)]);

    let outcome = h
        .fulfillment
        .fulfill(&PaymentContext {
            remote_event_id: "evt-1".to_string(),
            order_id,
            remote_order_id: Some("or_1".to_string()),
            remote_charge_id: Some("ch_1".to_string()),
        })
        .await;

    let Ok(FulfillmentOutcome::Aborted { reason, error }) = outcome else {
        panic!("expected an aborted run");
    };
    assert_eq!(reason, TransitionReason::IssuanceFailed);
    assert!(matches!(error, FulfillmentError::InventoryExhausted(lot) if lot == scarce.lot_id));

    assert_eq!(h.order_status(order_id).await, OrderStatus::InProgress);
    assert_eq!(h.ticket_count(order_id).await, 0);
    assert_eq!(h.available(roomy.lot_id).await, 10);
    assert_eq!(h.available(scarce.lot_id).await, 1);
    assert_eq!(h.sold(roomy.ticket_type_id).await, 0);
    assert_eq!(h.sold(scarce.ticket_type_id).await, 0);

    let Ok(Some(order)) = h.store.order(order_id).await else {
        panic!("order missing");
    };
    assert!(order.remote_order_id.is_none());

    let Ok(history) = h.store.status_history(order_id).await else {
        panic!("history unreadable");
    };
    let reasons: Vec<_> = history.iter().map(|r| r.change.reason).collect();
    assert_eq!(reasons, vec![TransitionReason::IssuanceFailed]);
}

#[tokio::test]
async fn issuance_debits_each_lot_before_its_ticket_type_in_a_fixed_order() {
    let h = Harness::new(ScriptedGateway::settling(60_000));
    let first = seed_catalog(&h.store, 10, 10_000);
    let second = seed_catalog(&h.store, 10, 10_000);
    let sibling = seed_ticket_type(&h.store, &first, 10_000);
    let order_id = seed_order(
        &h.store,
        &[(sibling, 2, 10_000), (second, 2, 10_000), (first, 2, 10_000)],
    );
    h.store.trace_counter_writes();

    let _ = h
        .webhooks
        .ingest(&order_paid("evt-1", order_id, "or_1", "ch_1"))
        .await;
    assert_eq!(h.order_status(order_id).await, OrderStatus::Paid);

    let writes = h.store.counter_writes();
    assert_eq!(writes.len(), 12);
    let lot_of = |ticket_type_id| {
        if ticket_type_id == second.ticket_type_id {
            second.lot_id
        } else {
            first.lot_id
        }
    };
    let mut keys = Vec::new();
    for pair in writes.chunks(2) {
        let [CounterWrite::Lot(lot_id), CounterWrite::TicketType(ticket_type_id)] = pair else {
            panic!("lot must be debited right before its ticket type: {pair:?}");
        };
        assert_eq!(*lot_id, lot_of(*ticket_type_id));
        keys.push((*lot_id, *ticket_type_id));
    }
    assert!(keys.is_sorted());
}

#[tokio::test]
async fn audit_write_failure_does_not_block_confirmation() {
    let h = Harness::new(ScriptedGateway::settling(30_000));
    let catalog = seed_catalog(&h.store, 10, 10_000);
    let order_id = seed_order(&h.store, &[(catalog, 3, 10_000)]);
    h.store.fail_audit_writes(true);

    let _ = h
        .webhooks
        .ingest(&order_paid("evt-1", order_id, "or_1", "ch_1"))
        .await;

    assert_eq!(h.order_status(order_id).await, OrderStatus::Paid);
    assert_eq!(h.ticket_count(order_id).await, 3);
    assert!(matches!(h.store.status_history(order_id).await, Ok(history) if history.is_empty()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_claim_an_order_once() {
    let h = Harness::new(ScriptedGateway::settling(30_000));
    let catalog = seed_catalog(&h.store, 10, 10_000);
    let order_id = seed_order(&h.store, &[(catalog, 3, 10_000)]);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let fulfillment = h.fulfillment.clone();
            tokio::spawn(async move {
                fulfillment
                    .fulfill(&PaymentContext {
                        remote_event_id: format!("evt-{i}"),
                        order_id,
                        remote_order_id: Some("or_1".to_string()),
                        remote_charge_id: Some("ch_1".to_string()),
                    })
                    .await
            })
        })
        .collect();

    let mut confirmed = 0;
    let mut lost = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(FulfillmentOutcome::Confirmed { tickets_issued })) => {
                assert_eq!(tickets_issued, 3);
                confirmed += 1;
            }
            Ok(Ok(FulfillmentOutcome::ClaimLost { .. })) => lost += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(confirmed, 1);
    assert_eq!(lost, 7);
    assert_eq!(h.ticket_count(order_id).await, 3);
    assert_eq!(h.available(catalog.lot_id).await, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_redeliveries_are_processed_once() {
    let h = Harness::new(ScriptedGateway::settling(30_000));
    let catalog = seed_catalog(&h.store, 10, 10_000);
    let order_id = seed_order(&h.store, &[(catalog, 3, 10_000)]);
    let body = order_paid("evt-1", order_id, "or_1", "ch_1");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let webhooks = std::sync::Arc::clone(&h.webhooks);
            let body = body.clone();
            tokio::spawn(async move { webhooks.ingest(&body).await })
        })
        .collect();

    let mut processed = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(IngestOutcome::Processed { .. })) => processed += 1,
            Ok(Ok(IngestOutcome::Duplicate)) => duplicates += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(processed, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Paid);
    assert_eq!(h.ticket_count(order_id).await, 3);
    assert_eq!(h.available(catalog.lot_id).await, 7);
    assert_eq!(h.sold(catalog.ticket_type_id).await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_order_and_charge_signals_fulfill_once() {
    for round in 0..25 {
        let h = Harness::new(ScriptedGateway::settling(20_000));
        let catalog = seed_catalog(&h.store, 10, 10_000);
        let order_id = seed_order(&h.store, &[(catalog, 2, 10_000)]);

        let bodies = [
            order_paid(&format!("evt-order-{round}"), order_id, "or_1", "ch_1"),
            charge_paid(&format!("evt-charge-{round}"), order_id, Some("or_1"), "ch_1"),
        ];
        let handles: Vec<_> = bodies
            .into_iter()
            .map(|body| {
                let webhooks = std::sync::Arc::clone(&h.webhooks);
                tokio::spawn(async move { webhooks.ingest(&body).await })
            })
            .collect();

        let mut linked = 0;
        for handle in handles {
            match handle.await {
                Ok(Ok(IngestOutcome::Processed { order_id: Some(id) })) => {
                    assert_eq!(id, order_id);
                    linked += 1;
                }
                Ok(Ok(IngestOutcome::Processed { order_id: None })) => {}
                other => panic!("round {round}: unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(linked, 1, "round {round}");
        assert_eq!(h.order_status(order_id).await, OrderStatus::Paid);
        assert_eq!(h.ticket_count(order_id).await, 2, "round {round}");
        assert_eq!(h.available(catalog.lot_id).await, 8, "round {round}");
        assert_eq!(h.sold(catalog.ticket_type_id).await, 2, "round {round}");
        let Ok(history) = h.store.status_history(order_id).await else {
            panic!("history unreadable");
        };
        let reasons: Vec<_> = history.iter().map(|r| r.change.reason).collect();
        assert_eq!(reasons, vec![TransitionReason::WebhookPaymentConfirmed]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_orders_never_oversell_a_lot() {
    let h = Harness::new(ScriptedGateway::settling(20_000));
    let catalog = seed_catalog(&h.store, 5, 10_000);
    let orders: Vec<_> = (0..3)
        .map(|_| seed_order(&h.store, &[(catalog, 2, 10_000)]))
        .collect();

    let handles: Vec<_> = orders
        .iter()
        .enumerate()
        .map(|(i, order_id)| {
            let webhooks = std::sync::Arc::clone(&h.webhooks);
            let body = order_paid(&format!("evt-{i}"), *order_id, &format!("or_{i}"), "ch");
            tokio::spawn(async move { webhooks.ingest(&body).await })
        })
        .collect();
    for handle in handles {
        assert!(matches!(handle.await, Ok(Ok(IngestOutcome::Processed { .. }))));
    }

    let mut tickets = 0;
    let mut paid = 0;
    for order_id in &orders {
        let count = h.ticket_count(*order_id).await;
        match h.order_status(*order_id).await {
            OrderStatus::Paid => {
                assert_eq!(count, 2);
                paid += 1;
            }
            OrderStatus::InProgress => assert_eq!(count, 0),
            other => panic!("unexpected status {other}"),
        }
        tickets += count;
    }

    assert_eq!(paid, 2);
    assert_eq!(tickets, 4);
    assert_eq!(h.available(catalog.lot_id).await, 1);
    assert_eq!(h.sold(catalog.ticket_type_id).await, 4);
}

#[tokio::test]
async fn confirmation_is_published() {
    let h = Harness::new(ScriptedGateway::settling(10_000));
    let catalog = seed_catalog(&h.store, 10, 10_000);
    let order_id = seed_order(&h.store, &[(catalog, 1, 10_000)]);
    let mut events = h.event_bus.subscribe();

    let _ = h
        .webhooks
        .ingest(&order_paid("evt-1", order_id, "or_1", "ch_1"))
        .await;

    let Ok(event) = events.try_recv() else {
        panic!("expected an event");
    };
    assert_eq!(event.event_type_str(), "payment_confirmed");
    assert_eq!(event.order_id(), order_id);
}

#[tokio::test]
async fn unknown_order_changes_nothing() {
    let h = Harness::new(ScriptedGateway::settling(10_000));
    let stranger = ticket_fulfillment::domain::OrderId::new();

    let outcome = h
        .webhooks
        .ingest(&order_paid("evt-1", stranger, "or_1", "ch_1"))
        .await;

    assert!(matches!(outcome, Ok(IngestOutcome::Processed { order_id: None })));
    assert_eq!(h.gateway.settled_calls(), 0);
}

#[tokio::test]
async fn unhandled_types_are_recorded_and_ignored() {
    let h = Harness::new(ScriptedGateway::settling(10_000));
    let body = serde_json::json!({
        "id": "evt-x",
        "type": "charge.refunded",
        "data": { "id": "ch_1" }
    })
    .to_string();

    let outcome = h.webhooks.ingest(body.as_bytes()).await;

    assert!(matches!(outcome, Ok(IngestOutcome::Processed { order_id: None })));
    let Ok(Some(record)) = h.store.webhook_event("evt-x").await else {
        panic!("webhook row missing");
    };
    assert!(record.processed);
}
