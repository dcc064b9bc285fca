// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

pub const DEFAULT_HOLD_TIME: u16 = 90;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 60_000;

/// Everything needed to run one peering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Peer address as `host:port`.
    pub peer: String,

    /// Local autonomous system number.
    pub asn: u32,

    /// Autonomous system number the peer must present in its OPEN.
    pub peer_asn: u32,

    /// BGP identifier. Derived from the local address of each connection
    /// when not set.
    #[serde(default)]
    pub router_id: Option<Ipv4Addr>,

    /// TCP MD5 signature key.
    #[serde(default)]
    pub password: Option<String>,

    /// Local address to connect from.
    #[serde(default)]
    pub source: Option<IpAddr>,

    /// Name of this node, used to derive a router ID when no local IPv4
    /// address is available.
    #[serde(default)]
    pub node_name: String,

    /// Proposed hold time in seconds. Zero disables keepalives.
    #[serde(default = "default_hold_time")]
    pub hold_time: u16,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Negotiate and accept IPv6 unicast advertisements.
    #[serde(default)]
    pub ipv6_unicast: bool,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_hold_time() -> u16 {
    DEFAULT_HOLD_TIME
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

impl SessionConfig {
    pub fn new(peer: impl Into<String>, asn: u32, peer_asn: u32) -> Self {
        Self {
            peer: peer.into(),
            asn,
            peer_asn,
            router_id: None,
            password: None,
            source: None,
            node_name: String::new(),
            hold_time: DEFAULT_HOLD_TIME,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            ipv6_unicast: false,
            backoff: BackoffConfig::default(),
        }
    }

    pub fn ibgp(&self) -> bool {
        self.asn == self.peer_asn
    }

    pub fn hold_time(&self) -> Duration {
        Duration::from_secs(u64::from(self.hold_time))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Reconnect delay bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial_ms")]
    pub initial_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
}

fn default_backoff_initial_ms() -> u64 {
    DEFAULT_BACKOFF_INITIAL_MS
}

fn default_backoff_max_ms() -> u64 {
    DEFAULT_BACKOFF_MAX_MS
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: DEFAULT_BACKOFF_INITIAL_MS,
            max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}
