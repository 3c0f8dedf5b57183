//! Integration tests for inbound message routing.
//!
//! Drives raw wire bytes from several simulated links through the router and
//! verifies stream separation, per-link ordering, and duplicate-response
//! suppression as one pipeline.

use peerlink::{ConnectionSecret, LinkId, MessageRouter};
use serde_json::json;

fn link(fill: u8) -> LinkId {
    ConnectionSecret::new([fill; 32]).derive_link_id()
}

fn dapp_request(id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "interactionId": id,
        "items": { "discriminator": "transaction" },
        "metadata": { "origin": "https://dapp.example" }
    }))
    .unwrap()
}

fn device_info_response(id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "discriminator": "getDeviceInfo",
        "interactionId": id,
        "success": { "model": "nanoS+", "id": "ab".repeat(32) }
    }))
    .unwrap()
}

#[tokio::test]
async fn test_interleaved_links_keep_per_link_order() {
    let router = MessageRouter::default();
    let (phone_link, laptop_link) = (link(1), link(2));
    let mut requests = router.dapp_requests();

    router.route(&phone_link, &dapp_request("p-1")).unwrap();
    router.route(&laptop_link, &dapp_request("l-1")).unwrap();
    router.route(&phone_link, &dapp_request("p-2")).unwrap();
    router.route(&laptop_link, &dapp_request("l-2")).unwrap();

    let mut phone_order = Vec::new();
    let mut laptop_order = Vec::new();
    for _ in 0..4 {
        let routed = requests.recv().await.unwrap();
        if routed.link_id == phone_link {
            phone_order.push(routed.request.interaction_id);
        } else {
            laptop_order.push(routed.request.interaction_id);
        }
    }
    assert_eq!(phone_order, ["p-1", "p-2"]);
    assert_eq!(laptop_order, ["l-1", "l-2"]);
}

#[tokio::test]
async fn test_retransmitted_response_is_delivered_once() {
    let router = MessageRouter::default();
    let link = link(3);
    let mut responses = router.ledger_responses();

    // The extension may retransmit after a transport blip
    router.route(&link, &device_info_response("req-1")).unwrap();
    router.route(&link, &device_info_response("req-1")).unwrap();
    router.route(&link, &device_info_response("req-1")).unwrap();

    let routed = responses.recv().await.unwrap();
    assert_eq!(routed.response.interaction_id(), "req-1");
    assert!(responses.try_recv().is_err());
}

#[tokio::test]
async fn test_terminated_link_dedup_state_is_forgotten() {
    let router = MessageRouter::default();
    let link = link(4);
    let mut responses = router.ledger_responses();

    router.route(&link, &device_info_response("req-1")).unwrap();
    responses.recv().await.unwrap();

    // Re-pairing the same secret yields the same link id; its routing
    // state must start fresh
    router.forget_link(&link);
    router.route(&link, &device_info_response("req-1")).unwrap();
    assert_eq!(
        responses.recv().await.unwrap().response.interaction_id(),
        "req-1"
    );
}

#[tokio::test]
async fn test_decode_failure_does_not_poison_the_stream() {
    let router = MessageRouter::default();
    let link = link(5);
    let mut requests = router.dapp_requests();

    assert!(router.route(&link, b"{ truncated").is_err());
    router.route(&link, &dapp_request("after-error")).unwrap();

    assert_eq!(
        requests.recv().await.unwrap().request.interaction_id,
        "after-error"
    );
}
