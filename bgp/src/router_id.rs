// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! BGP identifier selection for sessions without a configured router ID.

use crc::{Crc, CRC_32_ISO_HDLC};
use speaker_common::net::ipv4_on_same_interface;
use std::net::{IpAddr, Ipv4Addr};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Pick a router ID given the local address of a connection. IPv4 addresses
/// are used as is. For IPv6 the first IPv4 address on the same interface is
/// used, falling back to a hash of the node name.
pub fn derive(local: IpAddr, node_name: &str) -> Ipv4Addr {
    derive_with(local, node_name, ipv4_on_same_interface)
}

fn derive_with(
    local: IpAddr,
    node_name: &str,
    lookup: impl FnOnce(IpAddr) -> std::io::Result<Option<Ipv4Addr>>,
) -> Ipv4Addr {
    match local.to_canonical() {
        IpAddr::V4(addr) => addr,
        addr @ IpAddr::V6(_) => match lookup(addr) {
            Ok(Some(v4)) => v4,
            Ok(None) | Err(_) => hash_node_name(node_name),
        },
    }
}

/// CRC-32 (IEEE) of the node name, laid out little endian.
pub fn hash_node_name(node_name: &str) -> Ipv4Addr {
    Ipv4Addr::from(CRC32.checksum(node_name.as_bytes()).to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use speaker_common::ip;

    #[test]
    fn ipv4_used_as_is() {
        let id = derive_with(ip!("10.1.2.3"), "node", |_| {
            panic!("no interface lookup for ipv4")
        });
        assert_eq!(id, Ipv4Addr::new(10, 1, 2, 3));

        let id = derive_with(ip!("::ffff:10.1.2.3"), "node", |_| {
            panic!("no interface lookup for mapped ipv4")
        });
        assert_eq!(id, Ipv4Addr::new(10, 1, 2, 3));
    }

    #[test]
    fn ipv6_uses_interface_ipv4() {
        let local: IpAddr = ip!("2001:db8::5");
        let id = derive_with(local, "node", |addr| {
            assert_eq!(addr, local);
            Ok(Some(Ipv4Addr::new(192, 0, 2, 5)))
        });
        assert_eq!(id, Ipv4Addr::new(192, 0, 2, 5));
    }

    #[test]
    fn ipv6_falls_back_to_hash() {
        let id = derive_with(ip!("2001:db8::5"), "123456789", |_| Ok(None));
        // crc32("123456789") = 0xcbf43926
        assert_eq!(id, Ipv4Addr::new(0x26, 0x39, 0xf4, 0xcb));

        let id = derive_with(ip!("2001:db8::5"), "123456789", |_| {
            Err(std::io::Error::from(std::io::ErrorKind::Other))
        });
        assert_eq!(id, hash_node_name("123456789"));
    }

    #[test]
    fn empty_node_name() {
        assert_eq!(hash_node_name(""), Ipv4Addr::UNSPECIFIED);
    }
}
