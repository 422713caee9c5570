// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers: spawn real HTTP nodes over one shared registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use pinroute_core::registry::{LocationRegistry, NodeAddress};
use pinroute_server::forwarder::Forwarder;
use pinroute_server::http::build_router;
use pinroute_server::state::AppState;
use pinroute_server::store::SessionStore;
use pinroute_server::strategy::{DEFAULT_STRATEGY, FanoutStrategy, RouteStrategy};

/// One in-process node, listening on a real loopback port.
pub struct TestNode {
    /// Address peers and the test client reach this node on.
    pub addr: NodeAddress,
    server: JoinHandle<()>,
}

impl TestNode {
    /// Full URL for a path on this node.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Kill the node abruptly, as a crash would. The port stops accepting
    /// connections; registry records are left behind to expire.
    pub fn crash(&self) {
        self.server.abort();
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Spawn a node over the shared registry with the given lease.
pub async fn spawn_node(registry: Arc<dyn LocationRegistry>, lease: Duration) -> TestNode {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let port = listener.local_addr().expect("listener address").port();
    let addr = NodeAddress::new("127.0.0.1", port);

    let fanout: Arc<dyn RouteStrategy> = Arc::new(FanoutStrategy);
    let strategies: HashMap<&'static str, Arc<dyn RouteStrategy>> = HashMap::from([
        (DEFAULT_STRATEGY, fanout.clone()),
        ("session-close", fanout),
    ]);

    let state = AppState::new(
        addr.clone(),
        registry,
        Arc::new(SessionStore::new()),
        Forwarder::new(Duration::from_secs(2)),
        strategies,
        lease,
        Duration::from_secs(2),
    );

    let app = build_router(state);
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });

    TestNode { addr, server }
}

/// Create a session on `node` and return its id.
pub async fn open_session(client: &reqwest::Client, node: &TestNode, datasource_id: i64) -> String {
    let response = client
        .post(node.url(&format!("/api/v2/datasources/{}/sessions", datasource_id)))
        .send()
        .await
        .expect("create session");
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let body: serde_json::Value = response.json().await.expect("create session body");
    body["sessionId"].as_str().expect("sessionId").to_string()
}
