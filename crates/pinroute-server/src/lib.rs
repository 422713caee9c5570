// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pinroute Server - HTTP layer of the stateful resource router.
//!
//! Exposes the routed session/task API on every node of the fleet. Clients
//! may send any request to any node; requests that target a pinned resource
//! are transparently executed locally or proxied to the owning node, and the
//! caller never learns which node actually served it.
//!
//! # Request flow
//!
//! ```text
//! request ──► routing middleware (directive resolve)
//!                 │
//!                 ├── creation op ──► local create + registry claim
//!                 │
//!                 ├── single id ──► registry lookup
//!                 │        ├── owner == self ──► per-id lock ──► handler ──► renew
//!                 │        └── owner != self ──► forwarder (single hop)
//!                 │
//!                 └── multi id ──► strategy plugin (per-owner fan-out,
//!                                  per-id result aggregation)
//! ```
//!
//! # Modules
//!
//! - [`error`]: HTTP mapping of the routing error taxonomy
//! - [`forwarder`]: inter-node request proxying over HTTP
//! - [`http`]: routed API surface, directives table, diagnostics
//! - [`router`]: routing middleware orchestration
//! - [`state`]: shared per-node state and registry helpers
//! - [`store`]: in-memory pinned resource store
//! - [`strategy`]: multi-id fan-out strategy plugins

#![deny(missing_docs)]

/// HTTP mapping of routing errors.
pub mod error;

/// Inter-node HTTP forwarding.
pub mod forwarder;

/// Routed API surface and route table.
pub mod http;

/// Routing middleware.
pub mod router;

/// Shared per-node state.
pub mod state;

/// In-memory pinned resource store.
pub mod store;

/// Multi-id strategy plugins.
pub mod strategy;
