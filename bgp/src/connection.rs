// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::messages::Message;
use std::io::{Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// A byte stream to a BGP peer. The session writes framed messages to it and
/// a clone of it is handed to the inbound consumer for reading.
pub trait BgpConnection: Read + Write + Send + Sized + 'static {
    /// The locally bound address of the connection.
    fn local(&self) -> Result<SocketAddr, Error>;

    /// The remote address of the connection.
    fn peer(&self) -> Result<SocketAddr, Error>;

    /// Bound all subsequent reads and writes by `deadline`. `None` clears any
    /// deadline. Reads and writes that outlive the deadline fail.
    fn set_deadline(&self, deadline: Option<Instant>) -> Result<(), Error>;

    /// Another handle to the same underlying stream.
    fn try_clone(&self) -> Result<Self, Error>;

    /// Shut down both directions of the stream. Blocked readers on any clone
    /// are woken up.
    fn shutdown(&self) -> Result<(), Error>;
}

/// Establishes connections to BGP peers.
pub trait BgpConnector: Send + Sync + 'static {
    type Connection: BgpConnection;

    /// Connect to `peer`, optionally from `source` and with a TCP MD5
    /// signature keyed by `password`. Fails with [`Error::Timeout`] if the
    /// connection is not established by `deadline`.
    fn connect(
        &self,
        peer: SocketAddr,
        source: Option<IpAddr>,
        password: Option<&str>,
        deadline: Instant,
    ) -> Result<Self::Connection, Error>;
}

/// Time left until `deadline`, or `Timeout` if it has already passed.
pub(crate) fn remaining(deadline: Instant) -> Result<Duration, Error> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(Error::Timeout);
    }
    Ok(left)
}

/// Write a complete message, header included, to a connection.
pub fn send_msg<W: Write>(w: &mut W, msg: &Message) -> Result<(), Error> {
    let buf = msg.to_frame()?;
    w.write_all(&buf)?;
    w.flush()?;
    Ok(())
}

impl BgpConnection for TcpStream {
    fn local(&self) -> Result<SocketAddr, Error> {
        Ok(self.local_addr()?)
    }

    fn peer(&self) -> Result<SocketAddr, Error> {
        Ok(self.peer_addr()?)
    }

    fn set_deadline(&self, deadline: Option<Instant>) -> Result<(), Error> {
        let timeout = match deadline {
            Some(d) => Some(remaining(d)?),
            None => None,
        };
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)?;
        Ok(())
    }

    fn try_clone(&self) -> Result<Self, Error> {
        Ok(TcpStream::try_clone(self)?)
    }

    fn shutdown(&self) -> Result<(), Error> {
        Ok(TcpStream::shutdown(self, Shutdown::Both)?)
    }
}
