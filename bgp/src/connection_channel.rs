// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// This file contains code for testing purposes only. Note that it's only
/// included in `lib.rs` with a `#[cfg(test)]` guard. It implements
/// BgpConnector and BgpConnection over in-memory byte pipes so that sessions
/// can be driven by a test acting as the peer, without a network.
use crate::{
    connection::{remaining, BgpConnection, BgpConnector},
    error::Error,
    log::connection_log,
};
use slog::Logger;
use speaker_common::{lock, log::discard_logger};
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, Sender},
        Arc, Condvar, Mutex,
    },
    time::Instant,
};

const UNIT_CONNECTION: &str = "connection_channel";

#[derive(Default)]
struct PipeState {
    data: VecDeque<u8>,
    closed: bool,
}

/// One direction of a simulated stream.
#[derive(Default)]
struct Pipe {
    state: Mutex<PipeState>,
    cond: Condvar,
}

impl Pipe {
    fn close(&self) {
        lock!(self.state).closed = true;
        self.cond.notify_all();
    }
}

/// One end of an in-memory stream. Clones share the underlying pipes and
/// deadline, like clones of a socket.
pub struct ChannelStream {
    local: SocketAddr,
    peer: SocketAddr,
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl ChannelStream {
    /// Stop receiving. Writes from the other end fail with a broken pipe,
    /// while data still flows in the other direction.
    pub fn shutdown_read(&self) {
        self.rx.close();
    }
}

/// Create both ends of a stream between `a` and `b`.
pub fn pair(a: SocketAddr, b: SocketAddr) -> (ChannelStream, ChannelStream) {
    let ab = Arc::new(Pipe::default());
    let ba = Arc::new(Pipe::default());
    (
        ChannelStream {
            local: a,
            peer: b,
            rx: ba.clone(),
            tx: ab.clone(),
            deadline: Arc::new(Mutex::new(None)),
        },
        ChannelStream {
            local: b,
            peer: a,
            rx: ab,
            tx: ba,
            deadline: Arc::new(Mutex::new(None)),
        },
    )
}

impl Read for ChannelStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = *lock!(self.deadline);
        let mut s = lock!(self.rx.state);
        loop {
            if !s.data.is_empty() {
                let n = buf.len().min(s.data.len());
                for (dst, b) in buf.iter_mut().zip(s.data.drain(..n)) {
                    *dst = b;
                }
                return Ok(n);
            }
            if s.closed {
                return Ok(0);
            }
            s = match deadline {
                None => self.rx.cond.wait(s).expect("condvar wait"),
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(io::ErrorKind::TimedOut.into());
                    }
                    self.rx
                        .cond
                        .wait_timeout(s, left)
                        .expect("condvar wait")
                        .0
                }
            };
        }
    }
}

impl Write for ChannelStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut s = lock!(self.tx.state);
        if s.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        s.data.extend(buf);
        self.tx.cond.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BgpConnection for ChannelStream {
    fn local(&self) -> Result<SocketAddr, Error> {
        Ok(self.local)
    }

    fn peer(&self) -> Result<SocketAddr, Error> {
        Ok(self.peer)
    }

    fn set_deadline(&self, deadline: Option<Instant>) -> Result<(), Error> {
        if let Some(d) = deadline {
            remaining(d)?;
        }
        *lock!(self.deadline) = deadline;
        Ok(())
    }

    fn try_clone(&self) -> Result<Self, Error> {
        Ok(Self {
            local: self.local,
            peer: self.peer,
            rx: self.rx.clone(),
            tx: self.tx.clone(),
            deadline: self.deadline.clone(),
        })
    }

    fn shutdown(&self) -> Result<(), Error> {
        self.rx.close();
        self.tx.close();
        Ok(())
    }
}

struct ConnectorInner {
    local: SocketAddr,
    tx: Mutex<Sender<ChannelStream>>,
    refuse: AtomicBool,
    log: Logger,
}

/// Hands the far end of every connection it makes to a receiver, where a
/// test plays the peer.
#[derive(Clone)]
pub struct ChannelConnector {
    inner: Arc<ConnectorInner>,
}

impl ChannelConnector {
    /// Connections originate from `local` unless a source address is given.
    pub fn new(local: SocketAddr) -> (Self, Receiver<ChannelStream>) {
        let (tx, rx) = channel();
        let connector = Self {
            inner: Arc::new(ConnectorInner {
                local,
                tx: Mutex::new(tx),
                refuse: AtomicBool::new(false),
                log: discard_logger(),
            }),
        };
        (connector, rx)
    }

    /// Make subsequent connection attempts fail as if refused.
    pub fn refuse(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl BgpConnector for ChannelConnector {
    type Connection = ChannelStream;

    fn connect(
        &self,
        peer: SocketAddr,
        source: Option<IpAddr>,
        _password: Option<&str>,
        deadline: Instant,
    ) -> Result<ChannelStream, Error> {
        remaining(deadline)?;
        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
        }
        let local = SocketAddr::new(
            source.unwrap_or(self.inner.local.ip()),
            self.inner.local.port(),
        );
        let (ours, theirs) = pair(local, peer);
        if lock!(self.inner.tx).send(theirs).is_err() {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
        }
        connection_log!(self.inner.log, debug, peer, "connected";
            "local" => local
        );
        Ok(ours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use speaker_common::sockaddr;
    use std::time::Duration;

    #[test]
    fn bytes_flow_both_ways() {
        let (mut a, mut b) =
            pair(sockaddr!("10.0.0.1:1000"), sockaddr!("10.0.0.2:179"));
        a.write_all(b"open").expect("write");
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).expect("read");
        assert_eq!(&buf, b"open");

        b.write_all(b"ok").expect("write");
        let mut buf = [0u8; 2];
        a.read_exact(&mut buf).expect("read");
        assert_eq!(&buf, b"ok");
        assert_eq!(a.peer().expect("peer"), b.local().expect("local"));
    }

    #[test]
    fn shutdown_wakes_clones() {
        let (a, mut b) =
            pair(sockaddr!("10.0.0.1:1000"), sockaddr!("10.0.0.2:179"));
        let mut reader = a.try_clone().expect("clone");
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            reader.read(&mut buf).expect("read")
        });
        a.shutdown().expect("shutdown");
        assert_eq!(handle.join().expect("join reader"), 0);

        let err = b.write(b"x").expect_err("write after shutdown");
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn half_close() {
        let (mut a, mut b) =
            pair(sockaddr!("10.0.0.1:1000"), sockaddr!("10.0.0.2:179"));
        b.shutdown_read();
        let err = a.write(b"x").expect_err("write to half closed stream");
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        b.write_all(b"ok").expect("write");
        let mut buf = [0u8; 2];
        a.read_exact(&mut buf).expect("read");
        assert_eq!(&buf, b"ok");
    }

    #[test]
    fn read_deadline() {
        let (mut a, _b) =
            pair(sockaddr!("10.0.0.1:1000"), sockaddr!("10.0.0.2:179"));
        a.set_deadline(Some(Instant::now() + Duration::from_millis(20)))
            .expect("set deadline");
        let mut buf = [0u8; 1];
        let err = a.read(&mut buf).expect_err("read past deadline");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn connector_hands_over_peer_end() {
        let (connector, rx) = ChannelConnector::new(sockaddr!("10.0.0.1:1000"));
        let deadline = Instant::now() + Duration::from_secs(1);
        let conn = connector
            .connect(sockaddr!("10.0.0.2:179"), None, None, deadline)
            .expect("connect");
        let theirs = rx.try_recv().expect("peer end");
        assert_eq!(theirs.peer().expect("peer"), conn.local().expect("local"));

        connector.refuse(true);
        assert!(matches!(
            connector.connect(sockaddr!("10.0.0.2:179"), None, None, deadline),
            Err(Error::Io(_))
        ));
    }
}
