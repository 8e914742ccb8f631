//! Submissions with payment gating off.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::{ProviderMode, TestHarness};
use bazaar_relay::http::SubmitResponse;
use bazaar_relay::nostr::{KIND_AUCTION, KIND_BID};
use bazaar_relay::{Event, UnknownKindPolicy};
use reqwest::StatusCode;
use serde_json::{json, Value};

const NOW: u64 = 1_700_000_000;

fn auction(closing_time: Option<u64>) -> Event {
    let mut content = json!({
        "description": "Signed first edition",
        "starting_bid": 100,
        "currency": "sat",
    });
    if let Some(closing_time) = closing_time {
        content["closing_time"] = json!(closing_time);
    }
    Event::new(
        "seller",
        NOW,
        KIND_AUCTION,
        vec![vec!["d".to_string(), "first-edition".to_string()]],
        content.to_string(),
    )
}

fn bid(pubkey: &str, auction_id: &str, amount: u64) -> Event {
    Event::new(
        pubkey,
        NOW + 60,
        KIND_BID,
        vec![vec!["e".to_string(), auction_id.to_string()]],
        amount.to_string(),
    )
}

fn rejected_reason(response: &SubmitResponse) -> &str {
    match response {
        SubmitResponse::Rejected { reason, .. } => reason,
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_relay_info_document() {
    let harness = TestHarness::start(0).await.expect("start");

    let info: Value = harness
        .client()
        .get(harness.url("/"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(info["name"], "JustBazar Relay");
    assert_eq!(info["limitation"]["payment_required"], false);

    let health: Value = harness
        .client()
        .get(harness.url("/healthz"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(health["status"], "ok");
    assert_eq!(health["pending_charges"], 0);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_auction_accepted_and_stored() {
    let harness = TestHarness::start(0).await.expect("start");
    let lot = auction(Some(NOW + 3600));

    let (status, body) = harness.submit(&lot).await.expect("submit");
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, SubmitResponse::Accepted);

    let stored = harness
        .relay()
        .store()
        .query(&bazaar_relay::Filter::id(&lot.id))
        .await
        .expect("query");
    assert_eq!(stored, vec![lot]);
    assert_eq!(harness.provider_calls().await, 0);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_auction_missing_closing_time_rejected() {
    let harness = TestHarness::start(0).await.expect("start");

    let (status, body) = harness.submit(&auction(None)).await.expect("submit");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(rejected_reason(&body), "missing closing time");
    assert!(harness.relay().ledger().is_empty());

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_auction_closing_in_the_past_rejected() {
    let harness = TestHarness::start(0).await.expect("start");

    let (status, body) = harness
        .submit(&auction(Some(NOW - 1)))
        .await
        .expect("submit");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(rejected_reason(&body).contains("closing time"));

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_bid_rules() {
    let harness = TestHarness::start(0).await.expect("start");
    let lot = auction(Some(NOW + 3600));
    harness.submit(&lot).await.expect("auction");

    let (status, body) = harness
        .submit(&bid("alice", &"0".repeat(64), 500))
        .await
        .expect("orphan bid");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(rejected_reason(&body), "auction-not-found");

    let (status, body) = harness
        .submit(&bid("alice", &lot.id, 50))
        .await
        .expect("under starting bid");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(rejected_reason(&body), "bid-too-low");

    let (status, _) = harness
        .submit(&bid("alice", &lot.id, 500))
        .await
        .expect("first bid");
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = harness
        .submit(&bid("bob", &lot.id, 500))
        .await
        .expect("equal bid");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(rejected_reason(&body), "bid-too-low");

    let (status, _) = harness
        .submit(&bid("bob", &lot.id, 501))
        .await
        .expect("higher bid");
    assert_eq!(status, StatusCode::CREATED);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_malformed_and_tampered_events_rejected() {
    let harness = TestHarness::start(0).await.expect("start");

    let response = harness
        .client()
        .post(harness.url("/pay-for-event"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut tampered = auction(Some(NOW + 3600));
    tampered.content = "{}".to_string();
    let (status, body) = harness.submit(&tampered).await.expect("submit");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(rejected_reason(&body), "event id does not match content");

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_unknown_kind_policy() {
    let note = Event::new("ab", NOW, 1, vec![], "gm");

    let accepting = TestHarness::start(0).await.expect("start");
    let (status, _) = accepting.submit(&note).await.expect("submit");
    assert_eq!(status, StatusCode::CREATED);
    accepting.teardown().await.expect("teardown");

    let rejecting = TestHarness::start_with(0, ProviderMode::Healthy, |config| {
        config.unknown_kinds = UnknownKindPolicy::Reject;
    })
    .await
    .expect("start");
    let (status, body) = rejecting.submit(&note).await.expect("submit");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    match body {
        SubmitResponse::Rejected { message, .. } => assert!(message.starts_with("blocked: ")),
        other => panic!("expected rejection, got {other:?}"),
    }
    rejecting.teardown().await.expect("teardown");
}
