// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod log;
pub mod net;
pub mod test;

#[macro_export]
macro_rules! lock {
    ($mtx:expr) => {
        $mtx.lock().expect("lock mutex")
    };
}

/// Block on a condition variable until `$cond` no longer holds for the
/// guarded value.
#[macro_export]
macro_rules! wait_while {
    ($cv:expr, $guard:expr, $cond:expr) => {
        $cv.wait_while($guard, $cond).expect("condvar wait")
    };
}

/// Like `wait_while!` but gives up after `$timeout`. Evaluates to the guard.
#[macro_export]
macro_rules! wait_timeout_while {
    ($cv:expr, $guard:expr, $timeout:expr, $cond:expr) => {
        $cv.wait_timeout_while($guard, $timeout, $cond)
            .expect("condvar wait")
            .0
    };
}
