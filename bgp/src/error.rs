// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::{
    fmt::Display,
    net::{IpAddr, SocketAddr},
};

use num_enum::TryFromPrimitiveError;
use speaker_common::net::IpNet;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("too small: {0}")]
    TooSmall(String),

    #[error("too large: {0}")]
    TooLarge(String),

    #[error("no marker")]
    NoMarker,

    #[error("invalid message type {0}")]
    InvalidMessageType(u8),

    #[error("bad message length {length} for {typ:?} message")]
    BadMessageLength {
        length: u16,
        typ: crate::messages::MessageType,
    },

    #[error("bad version: {0}")]
    BadVersion(u8),

    #[error("hold time {0} too small, must be 0 or at least 3 seconds")]
    HoldTimeTooSmall(u16),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout")]
    Timeout,

    #[error("Path attribute type code error")]
    PathAttributeCode(
        #[from] TryFromPrimitiveError<crate::messages::PathAttributeTypeCode>,
    ),

    #[error("AS path type error")]
    AsPathType(#[from] TryFromPrimitiveError<crate::messages::AsPathType>),

    #[error("Path origin error")]
    PathOrigin(#[from] TryFromPrimitiveError<crate::messages::PathOrigin>),

    #[error("message parse error")]
    Parse(nom::Err<(Vec<u8>, nom::error::ErrorKind)>),

    #[error("Attempt to send a message when not connected")]
    NotConnected,

    #[error("Unsupported optional parameter code {0}")]
    UnsupportedOptionalParameterCode(u8),

    #[error("Unsupported address family: AFI={0} SAFI={1}")]
    UnsupportedAddressFamily(u16, u8),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Source address {0} does not exist on any local interface")]
    SourceAddressNotFound(IpAddr),

    #[error("Unexpected ASN: {0}")]
    UnexpectedAsn(ExpectationMismatch<u32>),

    #[error("Unexpected {0:?} message")]
    UnexpectedMessage(crate::messages::MessageType),

    #[error("Peer sent notification: {0}")]
    Notification(crate::messages::NotificationMessage),

    #[error("Peer {0} does not support 4-byte ASNs, required for ASN {1}")]
    FourOctetAsnRequired(SocketAddr, u32),

    #[error("Invalid prefix length {0}, max is {1}")]
    InvalidPrefixLength(u8, u8),

    #[error("No {0} next hop available for prefix {1}")]
    MissingNexthop(&'static str, IpNet),

    #[error("Tcpkey error: {0}")]
    TcpKey(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("session closed")]
    Closed,
}

/// Rejections of caller supplied advertisements. These are returned
/// synchronously from `Session::set` and never disturb a running session.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("cannot advertise non-v4 prefix {0}")]
    AddressFamily(IpNet),

    #[error("next hop {nexthop} is not the same address family as {prefix}")]
    NexthopFamily { prefix: IpNet, nexthop: IpAddr },

    #[error(
        "max supported communities is {max}, got {count} for prefix {prefix}"
    )]
    TooManyCommunities {
        prefix: IpNet,
        count: usize,
        max: usize,
    },

    #[error("session not established")]
    SessionNotEstablished,
}

/// Coarse classification of an [`Error`], used to decide how a failure
/// propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad caller input. Prior state is untouched.
    Validation,

    /// The peer violated the protocol. Fatal to the current connection only.
    Protocol,

    /// Dial, read or write failed. Fatal to the current connection only.
    Transport,

    /// The session has been closed.
    Closed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::UnsupportedOperation(_) => {
                ErrorKind::Validation
            }
            Self::Closed => ErrorKind::Closed,
            Self::Io(_)
            | Self::Timeout
            | Self::NotConnected
            | Self::InvalidAddress(_)
            | Self::SourceAddressNotFound(_)
            | Self::TcpKey(_) => ErrorKind::Transport,
            Self::TooSmall(_)
            | Self::TooLarge(_)
            | Self::NoMarker
            | Self::InvalidMessageType(_)
            | Self::BadMessageLength { .. }
            | Self::BadVersion(_)
            | Self::HoldTimeTooSmall(_)
            | Self::PathAttributeCode(_)
            | Self::AsPathType(_)
            | Self::PathOrigin(_)
            | Self::Parse(_)
            | Self::UnsupportedOptionalParameterCode(_)
            | Self::UnsupportedAddressFamily(..)
            | Self::UnexpectedAsn(_)
            | Self::UnexpectedMessage(_)
            | Self::Notification(_)
            | Self::FourOctetAsnRequired(..)
            | Self::InvalidPrefixLength(..)
            | Self::MissingNexthop(..) => ErrorKind::Protocol,
        }
    }
}

#[derive(Debug)]
pub struct ExpectationMismatch<T: Display> {
    pub expected: T,
    pub got: T,
}

impl<T: Display> Display for ExpectationMismatch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected: {} got: {}", self.expected, self.got)
    }
}

impl<'a> From<nom::Err<(&'a [u8], nom::error::ErrorKind)>> for Error {
    fn from(e: nom::Err<(&'a [u8], nom::error::ErrorKind)>) -> Error {
        Error::Parse(e.to_owned())
    }
}
