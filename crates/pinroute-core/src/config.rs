// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use crate::registry::NodeAddress;

/// Pinroute node configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub http_addr: SocketAddr,
    /// Host name peers use to reach this node
    pub advertise_host: String,
    /// PostgreSQL URL of the shared registry; `None` selects the in-memory
    /// backend (single-node deployments only)
    pub registry_url: Option<String>,
    /// Ownership lease duration
    pub lease: Duration,
    /// Interval between expiry sweeps
    pub sweep_interval: Duration,
    /// Deadline for one forwarded call
    pub forward_timeout: Duration,
    /// Deadline for one registry operation
    pub registry_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `PINROUTE_HTTP_PORT`: HTTP port (default: 8990)
    /// - `PINROUTE_ADVERTISE_HOST`: host peers forward to (default: 127.0.0.1)
    /// - `PINROUTE_REGISTRY_URL`: PostgreSQL registry URL (default: in-memory)
    /// - `PINROUTE_LEASE_SECS`: ownership lease in seconds (default: 600)
    /// - `PINROUTE_SWEEP_INTERVAL_SECS`: sweep interval in seconds (default: 30)
    /// - `PINROUTE_FORWARD_TIMEOUT_MS`: forward deadline in ms (default: 30000)
    /// - `PINROUTE_REGISTRY_TIMEOUT_MS`: registry deadline in ms (default: 5000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_port: u16 = std::env::var("PINROUTE_HTTP_PORT")
            .unwrap_or_else(|_| "8990".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("PINROUTE_HTTP_PORT", "must be a valid port number")
            })?;

        let advertise_host =
            std::env::var("PINROUTE_ADVERTISE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        if advertise_host.is_empty() {
            return Err(ConfigError::Invalid(
                "PINROUTE_ADVERTISE_HOST",
                "must not be empty",
            ));
        }

        let registry_url = std::env::var("PINROUTE_REGISTRY_URL").ok();

        let lease_secs: u64 = std::env::var("PINROUTE_LEASE_SECS")
            .unwrap_or_else(|_| "600".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("PINROUTE_LEASE_SECS", "must be a positive integer")
            })?;
        if lease_secs == 0 {
            return Err(ConfigError::Invalid(
                "PINROUTE_LEASE_SECS",
                "must be greater than zero",
            ));
        }

        let sweep_secs: u64 = std::env::var("PINROUTE_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("PINROUTE_SWEEP_INTERVAL_SECS", "must be a positive integer")
            })?;

        let forward_ms: u64 = std::env::var("PINROUTE_FORWARD_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("PINROUTE_FORWARD_TIMEOUT_MS", "must be a positive integer")
            })?;

        let registry_ms: u64 = std::env::var("PINROUTE_REGISTRY_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("PINROUTE_REGISTRY_TIMEOUT_MS", "must be a positive integer")
            })?;

        Ok(Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            advertise_host,
            registry_url,
            lease: Duration::from_secs(lease_secs),
            sweep_interval: Duration::from_secs(sweep_secs),
            forward_timeout: Duration::from_millis(forward_ms),
            registry_timeout: Duration::from_millis(registry_ms),
        })
    }

    /// The address peers use to forward requests to this node.
    pub fn node_address(&self) -> NodeAddress {
        NodeAddress::new(self.advertise_host.clone(), self.http_addr.port())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
