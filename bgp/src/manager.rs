// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The contract a load balancer speaker drives BGP implementations through,
//! and its native implementation.

use crate::advertisement::Advertisement;
use crate::config::SessionConfig;
use crate::connection::BgpConnector;
use crate::error::Error;
use crate::metrics::MetricsSink;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use slog::{info, Logger};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A running session as seen by its owner.
pub trait BgpSession: Send + Sync {
    fn set(&self, advertisements: &[Advertisement]) -> Result<(), Error>;
    fn close(&self) -> Result<(), Error>;
}

/// Receives implementation specific session events.
pub type EventCallback = Box<dyn Fn(Box<dyn Any + Send>) + Send + Sync>;

pub trait SessionManager: Send + Sync {
    fn new_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn BgpSession>, Error>;

    fn sync_bfd_profiles(
        &self,
        profiles: &BTreeMap<String, BfdProfile>,
    ) -> Result<(), Error>;

    fn sync_extra_info(&self, extra: &str) -> Result<(), Error>;

    fn set_event_callback(&self, callback: EventCallback);
}

/// Bidirectional forwarding detection parameters. Intervals are in
/// milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BfdProfile {
    pub name: String,
    pub receive_interval: Option<u32>,
    pub transmit_interval: Option<u32>,
    pub detect_multiplier: Option<u32>,
    pub echo_interval: Option<u32>,
    pub echo_mode: bool,
    pub passive_mode: bool,
    pub minimum_ttl: Option<u32>,
}

impl<C: BgpConnector> BgpSession for Session<C> {
    fn set(&self, advertisements: &[Advertisement]) -> Result<(), Error> {
        Session::set(self, advertisements)
    }

    fn close(&self) -> Result<(), Error> {
        Session::close(self)
    }
}

/// Creates sessions that speak BGP directly. There is nothing shared between
/// sessions beyond the connector, metrics sink and logger.
pub struct NativeSessionManager<C: BgpConnector + Clone> {
    connector: C,
    metrics: Arc<dyn MetricsSink>,
    log: Logger,
}

impl<C: BgpConnector + Clone> NativeSessionManager<C> {
    pub fn new(connector: C, metrics: Arc<dyn MetricsSink>, log: Logger) -> Self {
        Self {
            connector,
            metrics,
            log,
        }
    }
}

impl<C: BgpConnector + Clone> SessionManager for NativeSessionManager<C> {
    fn new_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn BgpSession>, Error> {
        let session = Session::new(
            config,
            self.connector.clone(),
            self.metrics.clone(),
            self.log.clone(),
        )?;
        Ok(Box::new(session))
    }

    fn sync_bfd_profiles(
        &self,
        _profiles: &BTreeMap<String, BfdProfile>,
    ) -> Result<(), Error> {
        Err(Error::UnsupportedOperation(
            "bfd profiles not supported in native mode".into(),
        ))
    }

    fn sync_extra_info(&self, extra: &str) -> Result<(), Error> {
        if !extra.is_empty() {
            return Err(Error::UnsupportedOperation(
                "extra info not supported in native mode".into(),
            ));
        }
        Ok(())
    }

    fn set_event_callback(&self, _callback: EventCallback) {
        info!(self.log, "native sessions emit no events, ignoring callback";
            "component" => crate::COMPONENT_BGP
        );
    }
}
