// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::connection::{remaining, BgpConnector};
use crate::error::Error;
use crate::log::connection_log;
use slog::Logger;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use speaker_common::net::local_address_exists;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Instant;

const UNIT_CONNECTION: &str = "connection_tcp";

/// Connects to peers over TCP, optionally signing segments with TCP MD5.
#[derive(Clone)]
pub struct BgpConnectorTcp {
    log: Logger,
}

impl BgpConnectorTcp {
    pub fn new(log: Logger) -> Self {
        Self { log }
    }
}

impl BgpConnector for BgpConnectorTcp {
    type Connection = TcpStream;

    fn connect(
        &self,
        peer: SocketAddr,
        source: Option<IpAddr>,
        password: Option<&str>,
        deadline: Instant,
    ) -> Result<TcpStream, Error> {
        let peer = SocketAddr::new(peer.ip().to_canonical(), peer.port());
        let source = source.map(|s| s.to_canonical());

        if let Some(src) = source {
            if !local_address_exists(src)? {
                return Err(Error::SourceAddressNotFound(src));
            }
            if src.is_ipv4() != peer.is_ipv4() {
                return Err(Error::InvalidAddress(format!(
                    "source {src} and peer {peer} are different address \
                    families"
                )));
            }
        }

        // socket2 sets close-on-exec on creation.
        let socket = Socket::new(
            Domain::for_address(peer),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        socket.set_nonblocking(true)?;

        if let Some(key) = password {
            set_md5_sig(&socket, peer.ip(), key.as_bytes())?;
        }

        let bind_addr = match source {
            Some(src) => SocketAddr::new(src, 0),
            None if peer.is_ipv4() => {
                SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
            }
            None => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
        };
        socket.bind(&SockAddr::from(bind_addr))?;

        connection_log!(self.log, debug, peer, "connecting";
            "source" => format!("{bind_addr}"),
            "md5" => password.is_some()
        );

        match socket.connect(&SockAddr::from(peer)) {
            Ok(()) => {}
            Err(e) if connect_pending(&e) => wait_connected(&socket, deadline)?,
            Err(e) => return Err(e.into()),
        }

        socket.set_nonblocking(false)?;
        let stream: TcpStream = socket.into();
        connection_log!(self.log, info, peer, "connected";
            "local" => format!("{:?}", stream.local_addr().ok())
        );
        Ok(stream)
    }
}

fn connect_pending(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EINPROGRESS | libc::EALREADY | libc::EINTR)
    )
}

/// Wait for a non-blocking connect to complete, giving up at `deadline`.
fn wait_connected(socket: &Socket, deadline: Instant) -> Result<(), Error> {
    loop {
        let timeout = remaining(deadline)?;
        let ms = timeout.as_millis().clamp(1, libc::c_int::MAX as u128);
        let mut pfd = libc::pollfd {
            fd: socket.as_raw_fd(),
            events: libc::POLLOUT,
            revents: 0,
        };
        let n = unsafe { libc::poll(&mut pfd, 1, ms as libc::c_int) };
        if n < 0 {
            let e = io::Error::last_os_error();
            if e.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(e.into());
        }
        if n == 0 {
            return Err(Error::Timeout);
        }
        match socket.take_error()? {
            None => return Ok(()),
            Some(e) if e.raw_os_error() == Some(libc::EISCONN) => {
                return Ok(())
            }
            Some(e) if connect_pending(&e) => continue,
            Some(e) => return Err(e.into()),
        }
    }
}

#[cfg(target_os = "linux")]
fn set_md5_sig(socket: &Socket, peer: IpAddr, key: &[u8]) -> Result<(), Error> {
    crate::tcp_md5::set_md5_sig(socket, peer, key)
}

#[cfg(not(target_os = "linux"))]
fn set_md5_sig(
    _socket: &Socket,
    _peer: IpAddr,
    _key: &[u8],
) -> Result<(), Error> {
    Err(Error::TcpKey(
        "tcp md5 signatures are not supported on this platform".into(),
    ))
}
