// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A native BGP-4 speaker for announcing service addresses to upstream
//! routers.
//!
//! A [`session::Session`] owns one peering. Callers push the complete desired
//! set of advertisements with [`session::Session::set`] and the session
//! reconciles what the peer has been told with what it should be told, across
//! reconnects, until [`session::Session::close`] is called.

pub mod advertisement;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod connection;
pub mod connection_tcp;
pub mod error;
pub mod log;
pub mod manager;
pub mod messages;
pub mod metrics;
pub mod router_id;
pub mod session;

#[cfg(target_os = "linux")]
mod tcp_md5;


#[cfg(test)]
pub mod connection_channel;

pub const BGP_PORT: u16 = 179;
pub const COMPONENT_BGP: &str = "bgp";
pub const MOD_SESSION: &str = "session";
pub const MOD_CLOCK: &str = "clock";
pub const MOD_CONNECTION: &str = "connection";
