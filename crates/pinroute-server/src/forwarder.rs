// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transparent request forwarding to the owning node.
//!
//! When a request lands on the wrong node, the router replays it verbatim
//! against the owner: same method, same path and query, same body bytes.
//! Three routing headers travel with the forwarded call so the receiving
//! node can short-circuit its own resolution and detect loops. Hop-by-hop
//! headers are stripped in both directions; everything else, including the
//! caller's cookies and the owner's response headers, passes through
//! untouched.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, Response, StatusCode, Uri};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

use pinroute_core::directive::{ResourceId, ResourceKind};
use pinroute_core::error::{Result, RouteError};
use pinroute_core::registry::NodeAddress;

/// Resource kind of a forwarded request.
pub const ROUTE_KIND_HEADER: &str = "x-pinroute-kind";
/// Resource id(s) of a forwarded request, comma-separated for fan-out.
pub const ROUTE_ID_HEADER: &str = "x-pinroute-id";
/// Hop counter; a value above one means the registry sent us in a circle.
pub const ROUTE_HOP_HEADER: &str = "x-pinroute-hop";

/// Headers that describe the connection rather than the request, plus the
/// framing headers reqwest recomputes.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn is_route_header(name: &str) -> bool {
    name.eq_ignore_ascii_case(ROUTE_KIND_HEADER)
        || name.eq_ignore_ascii_case(ROUTE_ID_HEADER)
        || name.eq_ignore_ascii_case(ROUTE_HOP_HEADER)
}

/// HTTP client for node-to-node forwarding.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl Forwarder {
    /// Create a forwarder with the given per-call deadline.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Replay a buffered request against `target` and stream the response
    /// back.
    ///
    /// `ids` is joined with commas into the id routing header; fan-out
    /// strategies pass the whole per-node subset, single-id routing passes
    /// one element.
    #[allow(clippy::too_many_arguments)]
    pub async fn forward(
        &self,
        target: &NodeAddress,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
        kind: ResourceKind,
        ids: &[ResourceId],
        hop: u32,
    ) -> Result<Response<Body>> {
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(uri.path());
        let url = format!("http://{}{}", target, path_and_query);

        debug!(
            target_node = %target,
            method = %method,
            path = path_and_query,
            kind = %kind,
            hop,
            "Forwarding request to owning node"
        );

        let mut outbound = HeaderMap::new();
        for (name, value) in headers {
            if is_hop_by_hop(name.as_str()) || is_route_header(name.as_str()) {
                continue;
            }
            outbound.append(name.clone(), value.clone());
        }
        outbound.insert(
            ROUTE_KIND_HEADER,
            HeaderValue::from_static(kind.as_str()),
        );
        let joined = ids
            .iter()
            .map(ResourceId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        outbound.insert(
            ROUTE_ID_HEADER,
            HeaderValue::from_str(&joined).map_err(|_| RouteError::InvalidRequest {
                detail: "resource id is not a valid header value".to_string(),
            })?,
        );
        outbound.insert(ROUTE_HOP_HEADER, HeaderValue::from(hop));

        let response = self
            .client
            .request(method, &url)
            .headers(outbound)
            .body(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RouteError::Timeout {
                        node: target.to_string(),
                    }
                } else {
                    RouteError::Unreachable {
                        node: target.to_string(),
                    }
                }
            })?;

        let mut builder = Response::builder().status(
            StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY),
        );
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in response.headers() {
                if is_hop_by_hop(name.as_str()) {
                    continue;
                }
                headers.append(name.clone(), value.clone());
            }
        }

        builder
            .body(Body::from_stream(response.bytes_stream()))
            .map_err(|err| RouteError::Registry {
                operation: "forward".to_string(),
                details: format!("failed to assemble forwarded response: {}", err),
            })
    }
}
