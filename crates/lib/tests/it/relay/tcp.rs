//! Tests for `TcpRelay` over loopback sockets.

use std::sync::Arc;

use flock::{Relay, Runtime, relay::TcpRelay};
use serde_json::json;
use tokio::io::AsyncWriteExt;

use super::wait_for;
use crate::helpers::{register_variants, test_config};

async fn tcp_replica(name: &str) -> (Runtime, Arc<TcpRelay>) {
    let runtime = Runtime::new(test_config());
    let relay = TcpRelay::new(&runtime, name);
    relay.open().await.unwrap();
    register_variants(&runtime, Some(relay.clone()));
    (runtime, relay)
}

#[tokio::test]
async fn test_client_operation_reaches_server() {
    let (server, server_relay) = tcp_replica("server").await;
    let addr = server_relay.listen("127.0.0.1:0").await.unwrap();
    let (client, client_relay) = tcp_replica("client").await;
    client_relay.dial(addr).await.unwrap();
    wait_for(|| server_relay.peers().len() == 1).await;

    let crow = client.entity("Crow", "A1").unwrap();
    crow.call("fly", json!({"x": 0.4, "y": 0.7})).await.unwrap();

    let replica = server.cached("Crow", "A1").expect("server knows the crow");
    assert_eq!(replica.state(), crow.state());
    assert_eq!(replica.version(), crow.version());
    assert_eq!(crow.pending_continuations(), 0);
}

#[tokio::test]
async fn test_server_fans_out_to_other_clients() {
    let (_server, server_relay) = tcp_replica("server").await;
    let addr = server_relay.listen("127.0.0.1:0").await.unwrap();
    let (first, first_relay) = tcp_replica("first").await;
    let (second, second_relay) = tcp_replica("second").await;
    first_relay.dial(addr).await.unwrap();
    second_relay.dial(addr).await.unwrap();
    wait_for(|| server_relay.peers().len() == 2).await;

    first
        .entity("Crow", "A1")
        .unwrap()
        .call("fly", json!({"x": 1}))
        .await
        .unwrap();

    wait_for(|| second.cached("Crow", "A1").is_some_and(|crow| crow.state() == json!({"x": 1}))).await;
}

#[tokio::test]
async fn test_malformed_lines_are_dropped() {
    let (server, server_relay) = tcp_replica("server").await;
    let addr = server_relay.listen("127.0.0.1:0").await.unwrap();

    let mut raw = tokio::net::TcpStream::connect(addr).await.unwrap();
    raw.write_all(b"garbage\n\nCrow$A1#0@1|raw.fly:{\"x\":3}\n")
        .await
        .unwrap();

    wait_for(|| server.cached("Crow", "A1").is_some_and(|crow| crow.state() == json!({"x": 3}))).await;
}

#[tokio::test]
async fn test_dial_failure_is_unavailable() {
    let (_runtime, relay) = tcp_replica("client").await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = relay.dial(addr).await.unwrap_err();
    assert!(err.is_backend_unavailable());
}

#[tokio::test]
async fn test_listen_requires_open_relay() {
    let runtime = Runtime::new(test_config());
    let relay = TcpRelay::new(&runtime, "closed");
    assert!(relay.listen("127.0.0.1:0").await.is_err());
}
