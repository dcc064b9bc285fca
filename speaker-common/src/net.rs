// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use nix::ifaddrs::getifaddrs;
use serde::{Deserialize, Serialize};
use std::{
    net::{
        AddrParseError, IpAddr, Ipv4Addr, Ipv6Addr, SocketAddrV4,
        SocketAddrV6,
    },
    num::ParseIntError,
};
use thiserror::Error;

/// An IP network. Host bits are always cleared, so two networks covering the
/// same address space compare and display identically.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum IpNet {
    V4(Ipv4Net),
    V6(Ipv6Net),
}

impl std::fmt::Display for IpNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V4(p) => p.fmt(f),
            Self::V6(p) => p.fmt(f),
        }
    }
}

impl IpNet {
    pub fn addr(&self) -> IpAddr {
        match self {
            Self::V4(s) => s.addr().into(),
            Self::V6(s) => s.addr().into(),
        }
    }

    pub fn length(&self) -> u8 {
        match self {
            Self::V4(s) => s.length(),
            Self::V6(s) => s.length(),
        }
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self, Self::V4(_))
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self, Self::V6(_))
    }
}

impl From<Ipv4Net> for IpNet {
    fn from(n: Ipv4Net) -> Self {
        Self::V4(n)
    }
}

impl From<Ipv6Net> for IpNet {
    fn from(n: Ipv6Net) -> Self {
        Self::V6(n)
    }
}

impl From<IpNet> for String {
    fn from(n: IpNet) -> Self {
        n.to_string()
    }
}

impl TryFrom<String> for IpNet {
    type Error = IpPrefixParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Error)]
pub enum IpPrefixParseError {
    #[error("v4 prefix parse error: {0}")]
    V4(#[from] Ipv4PrefixParseError),

    #[error("v6 prefix parse error: {0}")]
    V6(#[from] Ipv6PrefixParseError),
}

impl std::str::FromStr for IpNet {
    type Err = IpPrefixParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(':') {
            return Ok(IpNet::V6(Ipv6Net::from_str(s)?));
        }
        Ok(IpNet::V4(Ipv4Net::from_str(s)?))
    }
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
pub struct Ipv4Net {
    addr: Ipv4Addr,
    len: u8,
}

impl Ipv4Net {
    pub const MAX_LEN: u8 = 32;

    pub fn new(addr: Ipv4Addr, len: u8) -> Result<Self, Ipv4PrefixParseError> {
        if len > Self::MAX_LEN {
            return Err(Ipv4PrefixParseError::Length(len));
        }
        let mask = u32::MAX.checked_shl(32 - u32::from(len)).unwrap_or(0);
        Ok(Self {
            addr: Ipv4Addr::from(u32::from(addr) & mask),
            len,
        })
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn length(&self) -> u8 {
        self.len
    }
}

impl std::fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

#[derive(Debug, Error)]
pub enum Ipv4PrefixParseError {
    #[error("expected CIDR representation <addr>/<mask>")]
    Cidr,

    #[error("address parse error: {0}")]
    Addr(#[from] AddrParseError),

    #[error("mask parse error: {0}")]
    Mask(#[from] ParseIntError),

    #[error("prefix length {0} exceeds 32")]
    Length(u8),
}

impl std::str::FromStr for Ipv4Net {
    type Err = Ipv4PrefixParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s.split_once('/').ok_or(Ipv4PrefixParseError::Cidr)?;
        Ipv4Net::new(Ipv4Addr::from_str(addr)?, u8::from_str(len)?)
    }
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
pub struct Ipv6Net {
    addr: Ipv6Addr,
    len: u8,
}

impl Ipv6Net {
    pub const MAX_LEN: u8 = 128;

    pub fn new(addr: Ipv6Addr, len: u8) -> Result<Self, Ipv6PrefixParseError> {
        if len > Self::MAX_LEN {
            return Err(Ipv6PrefixParseError::Length(len));
        }
        let mask = u128::MAX.checked_shl(128 - u32::from(len)).unwrap_or(0);
        Ok(Self {
            addr: Ipv6Addr::from(u128::from(addr) & mask),
            len,
        })
    }

    pub fn addr(&self) -> Ipv6Addr {
        self.addr
    }

    pub fn length(&self) -> u8 {
        self.len
    }
}

impl std::fmt::Display for Ipv6Net {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

#[derive(Debug, Error)]
pub enum Ipv6PrefixParseError {
    #[error("expected CIDR representation <addr>/<mask>")]
    Cidr,

    #[error("address parse error: {0}")]
    Addr(#[from] AddrParseError),

    #[error("mask parse error: {0}")]
    Mask(#[from] ParseIntError),

    #[error("prefix length {0} exceeds 128")]
    Length(u8),
}

impl std::str::FromStr for Ipv6Net {
    type Err = Ipv6PrefixParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s.split_once('/').ok_or(Ipv6PrefixParseError::Cidr)?;
        Ipv6Net::new(Ipv6Addr::from_str(addr)?, u8::from_str(len)?)
    }
}

/// An address assigned to a local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub interface: String,
    pub addr: IpAddr,
}

/// Enumerate the IP addresses assigned to local interfaces.
pub fn interface_addresses() -> std::io::Result<Vec<InterfaceAddress>> {
    let mut result = Vec::new();
    for ifa in getifaddrs()? {
        let Some(storage) = ifa.address else {
            continue;
        };
        let addr: IpAddr = if let Some(sin) = storage.as_sockaddr_in() {
            (*SocketAddrV4::from(*sin).ip()).into()
        } else if let Some(sin6) = storage.as_sockaddr_in6() {
            (*SocketAddrV6::from(*sin6).ip()).into()
        } else {
            continue;
        };
        result.push(InterfaceAddress {
            interface: ifa.interface_name,
            addr,
        });
    }
    Ok(result)
}

/// Returns true if `addr` is assigned to one of this host's interfaces.
pub fn local_address_exists(addr: IpAddr) -> std::io::Result<bool> {
    let addr = addr.to_canonical();
    Ok(interface_addresses()?.iter().any(|ifa| ifa.addr == addr))
}

/// Find the first IPv4 address on the interface that `addr` is assigned to.
pub fn ipv4_on_same_interface(
    addr: IpAddr,
) -> std::io::Result<Option<Ipv4Addr>> {
    let addr = addr.to_canonical();
    let addrs = interface_addresses()?;
    let Some(owner) = addrs.iter().find(|ifa| ifa.addr == addr) else {
        return Ok(None);
    };
    Ok(addrs
        .iter()
        .filter(|ifa| ifa.interface == owner.interface)
        .find_map(|ifa| match ifa.addr {
            IpAddr::V4(a) => Some(a),
            IpAddr::V6(_) => None,
        }))
}
