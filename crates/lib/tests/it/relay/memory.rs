//! Tests for `MemoryRelay` and the behavior it shares with every bundled relay.

use flock::{Origin, PeerLink, Relay, RelayStatus, relay::MemoryRelay};
use serde_json::json;

use super::wait_for;
use crate::helpers::{operation, setup_runtime};

#[tokio::test]
async fn test_status_notifications() {
    let runtime = setup_runtime();
    let relay = MemoryRelay::new(&runtime, "status");
    let mut status = relay.watch_status();
    assert_eq!(relay.status(), RelayStatus::Closed);

    relay.open().await.unwrap();
    status.changed().await.unwrap();
    assert_eq!(*status.borrow_and_update(), RelayStatus::Open);

    relay.close().await.unwrap();
    status.changed().await.unwrap();
    assert_eq!(*status.borrow_and_update(), RelayStatus::Closed);
}

#[tokio::test]
async fn test_closed_relay_refuses_work() {
    let runtime = setup_runtime();
    let relay = MemoryRelay::new(&runtime, "closed");
    let (link, _far) = PeerLink::pair("closed", "far");

    assert!(relay.connect(link).await.unwrap_err().is_backend_unavailable());
    let op = operation("Crow", "A1", 0, 1, "fly", json!({}));
    let err = relay.publish(&op, &Origin::Local).await.unwrap_err();
    assert!(err.is_relay_error());
    assert!(err.is_backend_unavailable());
}

#[tokio::test]
async fn test_publish_skips_the_origin_peer() {
    let runtime = setup_runtime();
    let relay = MemoryRelay::new(&runtime, "hub");
    relay.open().await.unwrap();
    let (near_a, mut far_a) = PeerLink::pair("hub", "a");
    let (near_b, mut far_b) = PeerLink::pair("hub", "b");
    let peer_a = relay.connect(near_a).await.unwrap();
    let peer_b = relay.connect(near_b).await.unwrap();
    assert_eq!(relay.peers(), vec![peer_a, peer_b]);

    let op = operation("Crow", "A1", 0, 1, "fly", json!({"x": 1}));
    let from_a = Origin::Relay {
        relay: relay.clone(),
        peer: Some(peer_a),
    };
    relay.publish(&op, &from_a).await.unwrap();

    assert_eq!(far_b.inbound.recv().await.unwrap(), op.to_wire());
    assert!(far_a.inbound.try_recv().is_err());

    relay.send_to(peer_a, &op).await.unwrap();
    assert_eq!(far_a.inbound.recv().await.unwrap(), op.to_wire());
}

#[tokio::test]
async fn test_unknown_peer_is_reported() {
    let runtime = setup_runtime();
    let relay = MemoryRelay::new(&runtime, "lonely");
    relay.open().await.unwrap();
    let op = operation("Crow", "A1", 0, 1, "fly", json!({}));
    assert!(relay.send_to(42, &op).await.is_err());
    assert!(relay.disconnect(42).await.is_err());
}

#[tokio::test]
async fn test_gone_peer_is_disconnected() {
    let runtime = setup_runtime();
    let relay = MemoryRelay::new(&runtime, "hub");
    relay.open().await.unwrap();
    let (near, far) = PeerLink::pair("hub", "leaving");
    relay.connect(near).await.unwrap();
    assert_eq!(relay.peers().len(), 1);

    drop(far);
    wait_for(|| relay.peers().is_empty()).await;
}

#[tokio::test]
async fn test_inbound_operations_reach_the_runtime() {
    let runtime = setup_runtime();
    let relay = MemoryRelay::new(&runtime, "inbound");
    relay.open().await.unwrap();
    let (near, mut far) = PeerLink::pair("inbound", "remote");
    relay.connect(near).await.unwrap();

    far.outbound.send("not an operation".to_string()).unwrap();
    let op = operation("Crow", "A1", 0, 1, "fly", json!({"x": 0.4, "y": 0.7}));
    far.outbound.send(op.to_wire()).unwrap();

    // The remote gets its operation back as an acknowledgment once it is applied.
    assert_eq!(far.inbound.recv().await.unwrap(), op.to_wire());
    let entity = runtime.cached("Crow", "A1").expect("entity created on first reference");
    assert_eq!(entity.state(), json!({"x": 0.4, "y": 0.7}));
    assert_eq!(entity.version(), 0);
}

#[tokio::test]
async fn test_link_connects_both_sides() {
    let one = setup_runtime();
    let two = setup_runtime();
    let a = MemoryRelay::new(&one, "a");
    let b = MemoryRelay::new(&two, "b");
    a.open().await.unwrap();
    b.open().await.unwrap();

    let (peer_on_a, peer_on_b) = MemoryRelay::link(&a, &b).await.unwrap();
    assert_eq!(a.peers(), vec![peer_on_a]);
    assert_eq!(b.peers(), vec![peer_on_b]);

    a.close().await.unwrap();
    assert!(a.peers().is_empty());
    // Closing drops the channel, so the other side notices.
    wait_for(|| b.peers().is_empty()).await;
}
