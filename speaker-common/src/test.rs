// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test utilities and macros for use across multiple crates.

/// Polling period in milliseconds.
pub const DEFAULT_INTERVAL: u64 = 10;
pub const DEFAULT_ITERATIONS: u64 = 500;

#[macro_export]
macro_rules! wait_for_eq {
    ($lhs:expr, $rhs:expr, $period:expr, $count:expr) => {
        $crate::wait_for!($lhs, ==, $rhs, $period, $count);
    };
    ($lhs:expr, $rhs:expr) => {
        $crate::wait_for!(
            $lhs,
            ==,
            $rhs,
            $crate::test::DEFAULT_INTERVAL,
            $crate::test::DEFAULT_ITERATIONS
        );
    };
}

#[macro_export]
macro_rules! wait_for_neq {
    ($lhs:expr, $rhs:expr, $period:expr, $count:expr) => {
        $crate::wait_for!($lhs, !=, $rhs, $period, $count);
    };
    ($lhs:expr, $rhs:expr) => {
        $crate::wait_for!(
            $lhs,
            !=,
            $rhs,
            $crate::test::DEFAULT_INTERVAL,
            $crate::test::DEFAULT_ITERATIONS
        );
    };
}

#[macro_export]
macro_rules! wait_for {
    ($lhs:expr, $op:tt, $rhs:expr, $period:expr, $count:expr) => {
        let mut ok = false;
        for _ in 0..$count {
            if $lhs $op $rhs {
                ok = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis($period));
        }
        if !ok {
            assert!($lhs $op $rhs, "{:?} {} {:?}", $lhs, stringify!($op), $rhs);
        }
    };
    ($lhs:expr, $op:tt, $rhs:expr) => {
        $crate::wait_for!(
            $lhs,
            $op,
            $rhs,
            $crate::test::DEFAULT_INTERVAL,
            $crate::test::DEFAULT_ITERATIONS
        );
    };
}

#[macro_export]
macro_rules! parse {
    ($x:expr, $err:expr) => {
        $x.parse().expect($err)
    };
}

#[macro_export]
macro_rules! ip {
    ($x:expr) => {
        $crate::parse!($x, "ip address")
    };
}

#[macro_export]
macro_rules! cidr {
    ($x:expr) => {
        $crate::parse!($x, "ip cidr")
    };
}

#[macro_export]
macro_rules! sockaddr {
    ($x:expr) => {
        $crate::parse!($x, "socket address")
    };
}
