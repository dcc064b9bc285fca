// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Logging for anything holding a session's identity: `$self` must have
// `log`, `peer` and `config` fields.
macro_rules! session_log {
    ($self:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT_SESSION,
            "peer" => $self.peer,
            "asn" => $self.config.asn,
            "peer_asn" => $self.config.peer_asn,
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT_SESSION,
            "peer" => $self.peer,
            "asn" => $self.config.asn,
            "peer_asn" => $self.config.peer_asn,
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT_SESSION,
            "peer" => $self.peer,
            "asn" => $self.config.asn,
            "peer_asn" => $self.config.peer_asn,
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT_SESSION,
            "peer" => $self.peer,
            "asn" => $self.config.asn,
            "peer_asn" => $self.config.peer_asn,
        )
    };
}

// Connection setup happens before there is a connection object to hang
// context off, so the peer is passed explicitly.
macro_rules! connection_log {
    ($log:expr, $level:ident, $peer:expr, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($log,
            $msg;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_CONNECTION,
            "unit" => UNIT_CONNECTION,
            "peer" => $peer,
            $($key => $value),*
        )
    };
    ($log:expr, $level:ident, $peer:expr, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_CONNECTION,
            "unit" => UNIT_CONNECTION,
            "peer" => $peer,
            $($key => $value),*
        )
    };
    ($log:expr, $level:ident, $peer:expr, $msg:expr) => {
        slog::$level!($log,
            $msg;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_CONNECTION,
            "unit" => UNIT_CONNECTION,
            "peer" => $peer,
        )
    };
    ($log:expr, $level:ident, $peer:expr, $msg:expr, $($args:expr),*) => {
        slog::$level!($log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_CONNECTION,
            "unit" => UNIT_CONNECTION,
            "peer" => $peer,
        )
    };
}

pub(crate) use {connection_log, session_log};
