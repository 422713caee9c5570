// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Multi-id fan-out across nodes, including partial failure.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use common::{open_session, spawn_node};
use pinroute_core::registry::{LocationRegistry, MemoryRegistry};

const LEASE: Duration = Duration::from_secs(60);

async fn multi_close(client: &reqwest::Client, url: String, ids: &[String]) -> (u16, Value) {
    let response = client
        .delete(url)
        .json(&json!({"sessionIds": ids}))
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    let body: Value = response.json().await.unwrap();
    (status, body)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_close_spans_nodes() {
    let registry = Arc::new(MemoryRegistry::new());
    let node_a = spawn_node(registry.clone(), LEASE).await;
    let node_b = spawn_node(registry.clone(), LEASE).await;
    let client = reqwest::Client::new();

    let a1 = open_session(&client, &node_a, 1).await;
    let a2 = open_session(&client, &node_a, 1).await;
    let b1 = open_session(&client, &node_b, 1).await;

    let (status, body) = multi_close(
        &client,
        node_a.url("/api/v2/sessions"),
        &[a1.clone(), a2.clone(), b1.clone()],
    )
    .await;
    assert_eq!(status, 200);

    for (id, owner) in [(&a1, &node_a), (&a2, &node_a), (&b1, &node_b)] {
        let outcome = &body["results"][id.as_str()];
        assert_eq!(outcome["ok"], true, "outcome for {}: {}", id, outcome);
        assert_eq!(outcome["node"], owner.addr.to_string());
    }

    // Every session is gone everywhere.
    assert!(registry.list().await.unwrap().is_empty());
    for id in [&a1, &a2, &b1] {
        let response = client
            .get(node_b.url(&format!("/api/v2/sessions/{}/status", id)))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_close_all_local() {
    let registry = Arc::new(MemoryRegistry::new());
    let node = spawn_node(registry.clone(), LEASE).await;
    let client = reqwest::Client::new();

    let s1 = open_session(&client, &node, 2).await;
    let s2 = open_session(&client, &node, 2).await;

    let (status, body) = multi_close(
        &client,
        node.url("/api/v2/sessions"),
        &[s1.clone(), s2.clone()],
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["results"][s1.as_str()]["ok"], true);
    assert_eq!(body["results"][s2.as_str()]["ok"], true);
    assert!(registry.list().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_partial_failure_is_per_node() {
    let registry = Arc::new(MemoryRegistry::new());
    let node_a = spawn_node(registry.clone(), LEASE).await;
    let node_b = spawn_node(registry.clone(), LEASE).await;
    let client = reqwest::Client::new();

    let a1 = open_session(&client, &node_a, 1).await;
    let b1 = open_session(&client, &node_b, 1).await;
    node_b.crash();

    let (status, body) = multi_close(
        &client,
        node_a.url("/api/v2/sessions"),
        &[a1.clone(), b1.clone()],
    )
    .await;

    // Aggregation always answers 200; failure lives per id.
    assert_eq!(status, 200);
    assert_eq!(body["results"][a1.as_str()]["ok"], true);

    let failed = &body["results"][b1.as_str()];
    assert_eq!(failed["ok"], false);
    assert_eq!(failed["code"], "NODE_UNREACHABLE");
    assert_eq!(failed["node"], node_b.addr.to_string());

    // The reachable node's session really closed.
    let response = client
        .get(node_a.url(&format!("/api/v2/sessions/{}/status", a1)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_id_fails_only_itself() {
    let registry = Arc::new(MemoryRegistry::new());
    let node = spawn_node(registry.clone(), LEASE).await;
    let client = reqwest::Client::new();

    let live = open_session(&client, &node, 1).await;
    let ghost = "sid:1-999".to_string();

    let (status, body) = multi_close(
        &client,
        node.url("/api/v2/sessions"),
        &[live.clone(), ghost.clone()],
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["results"][live.as_str()]["ok"], true);

    let failed = &body["results"][ghost.as_str()];
    assert_eq!(failed["ok"], false);
    assert_eq!(failed["code"], "RESOURCE_EXPIRED_OR_UNKNOWN");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_id_list_is_a_client_error() {
    let registry = Arc::new(MemoryRegistry::new());
    let node = spawn_node(registry, LEASE).await;
    let client = reqwest::Client::new();

    let response = client
        .delete(node.url("/api/v2/sessions"))
        .json(&json!({"sessionIds": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_REQUEST");
}
