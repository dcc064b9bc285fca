// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use speaker_common::lock;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Where sessions report their counters. Peers are identified by the
/// configured peer address string.
pub trait MetricsSink: Send + Sync {
    fn session_up(&self, peer: &str);
    fn session_down(&self, peer: &str);
    fn update_sent(&self, peer: &str);
    fn advertised_prefixes(&self, peer: &str, count: usize);
    fn pending_prefixes(&self, peer: &str, count: usize);
    fn delete_session(&self, peer: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn session_up(&self, _peer: &str) {}
    fn session_down(&self, _peer: &str) {}
    fn update_sent(&self, _peer: &str) {}
    fn advertised_prefixes(&self, _peer: &str, _count: usize) {}
    fn pending_prefixes(&self, _peer: &str, _count: usize) {}
    fn delete_session(&self, _peer: &str) {}
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeerCounters {
    pub session_up: bool,
    pub updates_sent: u64,
    pub advertised: usize,
    pub pending: usize,
}

/// In-memory counters keyed by peer.
#[derive(Debug, Default)]
pub struct SessionCounters {
    peers: Mutex<BTreeMap<String, PeerCounters>>,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer: &str) -> Option<PeerCounters> {
        lock!(self.peers).get(peer).cloned()
    }

    fn update(&self, peer: &str, f: impl FnOnce(&mut PeerCounters)) {
        f(lock!(self.peers).entry(peer.to_string()).or_default())
    }
}

impl MetricsSink for SessionCounters {
    fn session_up(&self, peer: &str) {
        self.update(peer, |c| c.session_up = true)
    }

    fn session_down(&self, peer: &str) {
        self.update(peer, |c| c.session_up = false)
    }

    fn update_sent(&self, peer: &str) {
        self.update(peer, |c| c.updates_sent += 1)
    }

    fn advertised_prefixes(&self, peer: &str, count: usize) {
        self.update(peer, |c| c.advertised = count)
    }

    fn pending_prefixes(&self, peer: &str, count: usize) {
        self.update(peer, |c| c.pending = count)
    }

    fn delete_session(&self, peer: &str) {
        lock!(self.peers).remove(peer);
    }
}
