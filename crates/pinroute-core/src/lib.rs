// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pinroute Core - Stateful Resource Routing
//!
//! This crate provides the routing core for a fleet of service nodes that host
//! pinned, stateful resources (live DB sessions, PL debug contexts, batch
//! compile jobs, export tasks). Each resource lives in the memory of exactly
//! one node, while clients address it through a uniform, node-agnostic HTTP
//! endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Clients                                     │
//! │                 (any node, uniform HTTP endpoint)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                    │                                 │
//!                    ▼                                 ▼
//! ┌───────────────────────────┐          ┌───────────────────────────┐
//! │         Node A            │ forward  │         Node B            │
//! │  Router + Resource Store  │◄────────►│  Router + Resource Store  │
//! └───────────────────────────┘          └───────────────────────────┘
//!                    │                                 │
//!                    └───────────────┬─────────────────┘
//!                                    ▼
//!                       ┌───────────────────────┐
//!                       │   Location Registry    │
//!                       │ (kind, id) → owner +   │
//!                       │   lease + version      │
//!                       └───────────────────────┘
//! ```
//!
//! A request that names a resource id is resolved against a declarative
//! [`directive::RoutingDirective`], looked up in the [`registry`], and either
//! executed locally (when this node owns the resource) or proxied to the
//! owning node. Ownership is a time-bounded lease: it is claimed atomically
//! when the resource is created, renewed on every successful local access,
//! and swept once it expires so that a crashed node's resources are
//! eventually observed as gone rather than pinned forever.
//!
//! # Ownership invariants
//!
//! For any `(kind, id)` at most one non-expired ownership record exists at
//! any instant. `claim` is linearizable with respect to `lookup`, `renew`,
//! and `evict` for the same key: concurrent claims yield exactly one winner.
//! Every node, including the one physically holding a resource, treats its
//! local belief of ownership as provisional until confirmed via `renew`.
//!
//! # Modules
//!
//! - [`config`]: Node configuration from environment variables
//! - [`directive`]: Routing directives, id accessors, and the resolver
//! - [`error`]: Error taxonomy with stable machine-readable codes
//! - [`locks`]: Per-resource mutual exclusion for local dispatch
//! - [`registry`]: Location registry trait with Postgres and in-memory backends
//! - [`store`]: Minimal capability interface onto the node-local resource store
//! - [`sweeper`]: Background worker that evicts expired ownership records

#![deny(missing_docs)]

/// Node configuration loaded from environment variables.
pub mod config;

/// Routing directives, id accessors, and directive resolution.
pub mod directive;

/// Error types for routing operations with stable error codes.
pub mod error;

/// Per-resource mutual exclusion.
pub mod locks;

/// Embedded registry schema migrations.
pub mod migrations;

/// Location registry: cluster-visible ownership records with leases.
pub mod registry;

/// Capability interface onto the node-local resource store.
pub mod store;

/// Background sweep of expired ownership records.
pub mod sweeper;
