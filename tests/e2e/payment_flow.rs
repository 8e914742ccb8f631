//! Submissions and provider callbacks with payment gating on.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::{ProviderMode, TestHarness};
use bazaar_relay::http::SubmitResponse;
use bazaar_relay::nostr::KIND_BID;
use bazaar_relay::{Event, Filter, RelayEvent};
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;

const PRICE: u64 = 1000;

fn bid(content: &str) -> Event {
    Event::new(
        "bidder",
        1_700_000_000,
        KIND_BID,
        vec![vec!["e".to_string(), "f".repeat(64)]],
        content,
    )
}

fn charge_id(response: &SubmitResponse) -> String {
    match response {
        SubmitResponse::PaymentRequired { charge_id, .. } => charge_id.clone(),
        other => panic!("expected payment-required, got {other:?}"),
    }
}

async fn stored_count(harness: &TestHarness, event: &Event) -> usize {
    harness
        .relay()
        .store()
        .query(&Filter::id(&event.id))
        .await
        .expect("query")
        .len()
}

#[tokio::test]
async fn test_paid_event_is_stored_once() {
    let harness = TestHarness::start(PRICE).await.expect("start");
    let event = bid("5000");

    let (status, body) = harness.submit(&event).await.expect("submit");
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    match &body {
        SubmitResponse::PaymentRequired {
            payment_request,
            amount_sats,
            ..
        } => {
            assert_eq!(*amount_sats, PRICE);
            assert_eq!(payment_request, "lnbc1000000test");
        }
        other => panic!("unexpected {other:?}"),
    }
    let charge = charge_id(&body);
    assert_eq!(stored_count(&harness, &event).await, 0);

    harness.set_provider_status(&charge, "completed");
    let delivery = json!({ "id": charge, "status": "completed" });
    let (status, ack) = harness
        .payment_update(&event.id, &delivery)
        .await
        .expect("webhook");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack.outcome, "admitted");
    assert_eq!(stored_count(&harness, &event).await, 1);

    let (status, ack) = harness
        .payment_update(&event.id, &delivery)
        .await
        .expect("duplicate webhook");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack.outcome, "ignored");
    assert_eq!(stored_count(&harness, &event).await, 1);
    assert!(harness.relay().ledger().is_empty());

    // Resubmitting a paid event is accepted without a second invoice.
    let (status, body) = harness.submit(&event).await.expect("resubmit");
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, SubmitResponse::Accepted);
    assert_eq!(harness.provider_calls().await, 1);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_forged_completion_is_not_trusted() {
    let harness = TestHarness::start(PRICE).await.expect("start");
    let event = bid("5000");
    let (_, body) = harness.submit(&event).await.expect("submit");
    let charge = charge_id(&body);

    // Nobody paid, so the provider still reports the charge as pending.
    let (status, ack) = harness
        .payment_update(&event.id, &json!({ "status": "completed" }))
        .await
        .expect("forged webhook");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack.outcome, "pending");
    assert_eq!(stored_count(&harness, &event).await, 0);
    assert!(harness.relay().ledger().get(&charge).is_some());

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_late_callback_for_old_charge_spares_new_charge() {
    let harness = TestHarness::start(PRICE).await.expect("start");
    let event = bid("5000");
    let (_, body) = harness.submit(&event).await.expect("submit");
    let old = charge_id(&body);

    harness.set_provider_status(&old, "expired");
    let stale = json!({ "id": old, "status": "expired" });
    let (_, ack) = harness.payment_update(&event.id, &stale).await.expect("expire");
    assert_eq!(ack.outcome, "discarded");

    let (_, body) = harness.submit(&event).await.expect("resubmit");
    let new = charge_id(&body);
    assert_ne!(new, old);
    harness.set_provider_status(&new, "expired");

    let (_, ack) = harness.payment_update(&event.id, &stale).await.expect("replay");
    assert_eq!(ack.outcome, "ignored");
    assert!(harness.relay().ledger().get(&new).is_some());

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_resubmission_returns_same_charge() {
    let harness = TestHarness::start(PRICE).await.expect("start");
    let event = bid("5000");

    let submissions = (0..6).map(|_| harness.submit(&event));
    let responses = futures::future::join_all(submissions).await;

    let charges: Vec<String> = responses
        .iter()
        .map(|r| charge_id(&r.as_ref().expect("submit").1))
        .collect();
    assert!(charges.iter().all(|c| c == &charges[0]));

    let (_, again) = harness.submit(&event).await.expect("resubmit");
    assert_eq!(charge_id(&again), charges[0]);
    assert_eq!(harness.provider_calls().await, 1);
    assert_eq!(harness.relay().ledger().len(), 1);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_failed_payment_discards_event() {
    let mut harness = TestHarness::start(PRICE).await.expect("start");
    let event = bid("5000");
    let (_, body) = harness.submit(&event).await.expect("submit");
    let charge = charge_id(&body);

    harness.set_provider_status(&charge, "error");
    let (status, ack) = harness
        .payment_update(&charge, &json!({ "status": "error" }))
        .await
        .expect("webhook");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack.outcome, "discarded");

    let (_, late) = harness
        .payment_update(&charge, &json!({ "status": "completed" }))
        .await
        .expect("late success");
    assert_eq!(late.outcome, "ignored");
    assert_eq!(stored_count(&harness, &event).await, 0);

    let discarded = harness
        .wait_for_event(Duration::from_secs(2), |e| {
            matches!(e, RelayEvent::ChargeDiscarded { .. })
        })
        .await
        .expect("discard event");
    assert_eq!(
        discarded,
        RelayEvent::ChargeDiscarded {
            charge_id: charge,
            event_id: event.id.clone(),
            status: "failed".to_string(),
        }
    );

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_pending_status_keeps_charge() {
    let harness = TestHarness::start(PRICE).await.expect("start");
    let event = bid("5000");
    harness.submit(&event).await.expect("submit");

    let (status, ack) = harness
        .payment_update(&event.id, &json!({ "status": "pending" }))
        .await
        .expect("webhook");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack.outcome, "pending");
    assert_eq!(harness.relay().ledger().len(), 1);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_webhook_edge_cases() {
    let harness = TestHarness::start(PRICE).await.expect("start");

    let (status, ack) = harness
        .payment_update("never-issued", &json!({ "status": "completed" }))
        .await
        .expect("unknown reference");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack.outcome, "ignored");

    let response = harness
        .client()
        .post(harness.url("/payment-update/never-issued"))
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_provider_down_rejects_without_ledger_entry() {
    let harness = TestHarness::start_with(PRICE, ProviderMode::Down, |_| {})
        .await
        .expect("start");
    let event = bid("5000");

    let (status, body) = harness.submit(&event).await.expect("submit");
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    match body {
        SubmitResponse::Rejected { message, .. } => {
            assert_eq!(message, "error: payment backend unavailable");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(harness.relay().ledger().is_empty());
    assert_eq!(stored_count(&harness, &event).await, 0);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_unpaid_charge_expires() {
    let mut harness = TestHarness::start_with(PRICE, ProviderMode::Healthy, |config| {
        config.payment.charge_ttl_secs = 1;
        config.payment.sweep_interval_secs = 1;
    })
    .await
    .expect("start");
    let event = bid("5000");
    let (_, body) = harness.submit(&event).await.expect("submit");
    let charge = charge_id(&body);

    let expired = harness
        .wait_for_event(Duration::from_secs(5), |e| {
            matches!(e, RelayEvent::ChargeDiscarded { .. })
        })
        .await
        .expect("expiry");
    assert_eq!(
        expired,
        RelayEvent::ChargeDiscarded {
            charge_id: charge.clone(),
            event_id: event.id.clone(),
            status: "expired".to_string(),
        }
    );
    assert!(harness.relay().ledger().is_empty());

    let (_, ack) = harness
        .payment_update(&charge, &json!({ "status": "completed" }))
        .await
        .expect("late payment");
    assert_eq!(ack.outcome, "ignored");
    assert_eq!(stored_count(&harness, &event).await, 0);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_started_event_then_clean_shutdown() {
    let mut harness = TestHarness::start(0).await.expect("start");
    harness
        .wait_for_event(Duration::from_secs(2), |e| *e == RelayEvent::Started)
        .await
        .expect("started");
    harness.teardown().await.expect("teardown");
}
