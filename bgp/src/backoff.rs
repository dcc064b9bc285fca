// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::config::BackoffConfig;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;

const MULTIPLIER: f64 = 2.0;

/// Delay between reconnect attempts. Delays double from the configured
/// initial value up to the configured ceiling and never shrink until
/// [`ReconnectBackoff::reset`] is called after a successful connect.
#[derive(Debug)]
pub struct ReconnectBackoff {
    inner: ExponentialBackoff,
    max: Duration,
    last: Duration,
}

impl ReconnectBackoff {
    pub fn new(config: &BackoffConfig) -> Self {
        let max = Duration::from_millis(config.max_ms.max(1));
        let initial = Duration::from_millis(config.initial_ms.max(1)).min(max);
        let inner = ExponentialBackoffBuilder::new()
            .with_initial_interval(initial)
            .with_multiplier(MULTIPLIER)
            .with_randomization_factor(0.0)
            .with_max_interval(max)
            .with_max_elapsed_time(None)
            .build();
        Self {
            inner,
            max,
            last: Duration::ZERO,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let next = self.inner.next_backoff().unwrap_or(self.max);
        // The underlying policy may jitter by a nanosecond even with no
        // randomization.
        let next = Duration::from_millis(next.as_millis() as u64).min(self.max);
        self.last = self.last.max(next);
        self.last
    }

    pub fn reset(&mut self) {
        self.inner.reset();
        self.last = Duration::ZERO;
    }
}
