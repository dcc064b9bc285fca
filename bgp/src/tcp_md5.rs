// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TCP MD5 signatures (RFC 2385) on Linux.

use crate::error::Error;
use socket2::{SockAddr, Socket};
use std::mem::{size_of, zeroed};
use std::net::{IpAddr, SocketAddr};
use std::os::fd::AsRawFd;
use std::ptr;

/// Keys longer than this are rejected by the kernel.
pub const MAX_KEY_LEN: usize = libc::TCP_MD5SIG_MAXKEYLEN;

/// The kernel's `struct tcp_md5sig`. Zeroed flags, prefix length and
/// interface index select a key for one exact peer address on any interface.
#[repr(C)]
struct TcpMd5Sig {
    tcpm_addr: libc::sockaddr_storage,
    tcpm_flags: u8,
    tcpm_prefixlen: u8,
    tcpm_keylen: u16,
    tcpm_ifindex: libc::c_int,
    tcpm_key: [u8; MAX_KEY_LEN],
}

impl TcpMd5Sig {
    fn new(peer: IpAddr, key: &[u8]) -> Result<Self, Error> {
        if key.len() > MAX_KEY_LEN {
            return Err(Error::TcpKey(format!(
                "key is {} bytes, at most {MAX_KEY_LEN} are supported",
                key.len()
            )));
        }

        // Keys are matched on address alone, so the port stays zero.
        let addr = SockAddr::from(SocketAddr::new(peer.to_canonical(), 0));

        let mut sig: Self = unsafe { zeroed() };
        unsafe {
            ptr::copy_nonoverlapping(
                addr.as_ptr() as *const u8,
                ptr::addr_of_mut!(sig.tcpm_addr) as *mut u8,
                addr.len() as usize,
            );
        }
        sig.tcpm_keylen = key.len() as u16;
        sig.tcpm_key[..key.len()].copy_from_slice(key);
        Ok(sig)
    }

    fn apply(&self, socket: &Socket) -> Result<(), Error> {
        let rc = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::IPPROTO_TCP,
                libc::TCP_MD5SIG,
                ptr::addr_of!(*self) as *const libc::c_void,
                size_of::<Self>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            let e = std::io::Error::last_os_error();
            return Err(Error::TcpKey(format!("set TCP_MD5SIG: {e}")));
        }
        Ok(())
    }
}

/// Sign all traffic on `socket` to `peer` with `key`. Must be called before
/// the connection is established.
pub(crate) fn set_md5_sig(
    socket: &Socket,
    peer: IpAddr,
    key: &[u8],
) -> Result<(), Error> {
    TcpMd5Sig::new(peer, key)?.apply(socket)
}
