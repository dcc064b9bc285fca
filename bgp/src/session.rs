// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::advertisement::{Advertisement, UpdateContext};
use crate::backoff::ReconnectBackoff;
use crate::clock::{KeepaliveClock, KeepaliveTarget, DEFAULT_RESOLUTION};
use crate::config::SessionConfig;
use crate::connection::{send_msg, BgpConnection, BgpConnector};
use crate::error::{Error, ExpectationMismatch};
use crate::log::session_log;
use crate::messages::{
    read_frame, Afi, Capability, CeaseErrorSubcode, ErrorCode,
    HeaderErrorSubcode, Message, MessageType, NotificationMessage,
    OpenErrorSubcode, OpenMessage, Safi, UpdateMessage,
};
use crate::metrics::MetricsSink;
use crate::router_id;
use slog::Logger;
use speaker_common::net::{local_address_exists, IpNet};
use speaker_common::{lock, wait_timeout_while, wait_while};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

const UNIT_SESSION: &str = "session";

/// How long `close` waits to get a Cease notification onto the wire.
const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(1);

type Advertised = BTreeMap<String, Advertisement>;

/// A BGP session with a single peer. The session keeps reconnecting until
/// closed and reconciles what the peer has been told with the most recent
/// call to [`Session::set`]. Dropping the session closes it.
pub struct Session<C: BgpConnector> {
    inner: Arc<SessionInner<C>>,
}

pub struct SessionInner<C: BgpConnector> {
    pub(crate) config: SessionConfig,
    pub(crate) peer: SocketAddr,
    connector: C,
    metrics: Arc<dyn MetricsSink>,
    pub(crate) log: Logger,
    state: Mutex<SessionState<C::Connection>>,

    /// Signalled whenever `pending`, `conn` or `closed` changes.
    cond: Condvar,

    /// Wakes the keepalive clock to pick up a new hold time.
    clock_wake_tx: SyncSender<()>,
}

struct SessionState<Cnx> {
    closed: bool,
    conn: Option<Cnx>,

    /// Identifies the connection an inbound consumer was started for.
    generation: u64,

    actual_hold_time: Duration,

    /// Local address of the current connection, the default next hop.
    nexthop: Option<IpAddr>,

    peer_four_octet_asn: bool,

    /// The desired state the current connection was brought to, keyed by
    /// prefix.
    advertised: Advertised,

    /// Keys in `advertised` that could not be encoded for the current
    /// connection and so were never sent.
    unsent: BTreeSet<String>,

    /// Desired state not yet pushed to the peer. `None` means nothing has
    /// changed, `Some` of an empty map means withdraw everything.
    pending: Option<Advertised>,
}

/// What we learned from the peer's OPEN.
struct Handshake {
    nexthop: IpAddr,
    peer_hold_time: u16,
    four_octet_asn: bool,
}

impl<C: BgpConnector> Session<C> {
    /// Create a session and start connecting to the peer in the background.
    pub fn new(
        config: SessionConfig,
        connector: C,
        metrics: Arc<dyn MetricsSink>,
        log: Logger,
    ) -> Result<Self, Error> {
        let peer = resolve_peer(&config.peer)?;
        if config.hold_time == 1 || config.hold_time == 2 {
            return Err(Error::HoldTimeTooSmall(config.hold_time));
        }
        if let Some(source) = config.source {
            if !local_address_exists(source)? {
                return Err(Error::SourceAddressNotFound(source));
            }
        }

        let (clock_wake_tx, clock_wake_rx) = sync_channel(1);
        let backoff = ReconnectBackoff::new(&config.backoff);
        let clock =
            KeepaliveClock::new(DEFAULT_RESOLUTION, clock_wake_rx, log.clone());

        let inner = Arc::new(SessionInner {
            config,
            peer,
            connector,
            metrics,
            log,
            state: Mutex::new(SessionState {
                closed: false,
                conn: None,
                generation: 0,
                actual_hold_time: Duration::ZERO,
                nexthop: None,
                peer_four_octet_asn: false,
                advertised: BTreeMap::new(),
                unsent: BTreeSet::new(),
                pending: None,
            }),
            cond: Condvar::new(),
            clock_wake_tx,
        });

        inner.metrics.session_down(inner.key());
        inner.metrics.advertised_prefixes(inner.key(), 0);

        let runner = inner.clone();
        std::thread::Builder::new()
            .name(format!("bgp-session-{peer}"))
            .spawn(move || runner.run(backoff))?;

        if let Err(e) = clock.spawn(format!("bgp-keepalive-{peer}"), inner.clone())
        {
            inner.close();
            return Err(e.into());
        }

        session_log!(inner, info, "session created";
            "hold_time" => inner.config.hold_time
        );
        Ok(Self { inner })
    }

    /// Replace the complete set of advertisements the peer should have.
    /// Returns once the new set is recorded, the peer learns about it
    /// asynchronously. An invalid advertisement rejects the whole set and
    /// leaves the session as it was.
    pub fn set(&self, advertisements: &[Advertisement]) -> Result<(), Error> {
        self.inner.set(advertisements)
    }

    /// Shut the session down. Safe to call more than once.
    pub fn close(&self) -> Result<(), Error> {
        self.inner.close();
        Ok(())
    }

    pub fn peer(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn is_established(&self) -> bool {
        lock!(self.inner.state).conn.is_some()
    }

    /// The hold time in use on the current connection, if any.
    pub fn negotiated_hold_time(&self) -> Option<Duration> {
        let s = lock!(self.inner.state);
        s.conn.as_ref().map(|_| s.actual_hold_time)
    }

    /// What the peer has been told, or will be told once connected.
    /// Advertisements that cannot be encoded for the current connection are
    /// left out.
    pub fn advertised(&self) -> Vec<Advertisement> {
        let s = lock!(self.inner.state);
        s.advertised
            .iter()
            .filter(|(key, _)| !s.unsent.contains(key.as_str()))
            .map(|(_, adv)| adv.clone())
            .collect()
    }
}

impl<C: BgpConnector> Drop for Session<C> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

fn resolve_peer(peer: &str) -> Result<SocketAddr, Error> {
    let addr = peer
        .to_socket_addrs()
        .map_err(|e| Error::InvalidAddress(format!("{peer}: {e}")))?
        .next()
        .ok_or_else(|| Error::InvalidAddress(format!("{peer}: no address")))?;
    Ok(SocketAddr::new(addr.ip().to_canonical(), addr.port()))
}

impl<C: BgpConnector> SessionInner<C> {
    fn key(&self) -> &str {
        &self.config.peer
    }

    fn run(self: Arc<Self>, mut backoff: ReconnectBackoff) {
        loop {
            match self.connect() {
                Ok(()) => {}
                Err(Error::Closed) => break,
                Err(e) => {
                    let delay = backoff.next_delay();
                    session_log!(self, error, "failed to connect to peer: {e}";
                        "retry_in_ms" => delay.as_millis() as u64
                    );
                    if !self.sleep(delay) {
                        break;
                    }
                    continue;
                }
            }

            self.metrics.session_up(self.key());
            backoff.reset();
            session_log!(self, info, "session established");

            if !self.send_updates() {
                break;
            }
            self.metrics.session_down(self.key());
            session_log!(self, warn, "session down");
        }
        session_log!(self, info, "session closed");
        self.metrics.delete_session(self.key());
    }

    /// Wait out a reconnect delay. Returns false if the session was closed in
    /// the meantime.
    fn sleep(&self, delay: Duration) -> bool {
        let s = lock!(self.state);
        let s = wait_timeout_while!(self.cond, s, delay, |s| !s.closed);
        !s.closed
    }

    /// Dial the peer and exchange OPENs. The session lock is only taken to
    /// publish an established connection.
    fn connect(self: &Arc<Self>) -> Result<(), Error> {
        if lock!(self.state).closed {
            return Err(Error::Closed);
        }

        let deadline = Instant::now() + self.config.connect_timeout();
        let mut conn = self.connector.connect(
            self.peer,
            self.config.source,
            self.config.password.as_deref(),
            deadline,
        )?;

        match self.handshake(&mut conn, deadline) {
            Ok(h) => self.establish(conn, h),
            Err(e) => {
                let _ = conn.shutdown();
                Err(e)
            }
        }
    }

    fn handshake(
        &self,
        conn: &mut C::Connection,
        deadline: Instant,
    ) -> Result<Handshake, Error> {
        conn.set_deadline(Some(deadline))?;

        let nexthop = conn.local()?.ip().to_canonical();
        let router_id = self
            .config
            .router_id
            .unwrap_or_else(|| router_id::derive(nexthop, &self.config.node_name));

        let mut open = OpenMessage::new4(
            self.config.asn,
            self.config.hold_time,
            u32::from(router_id),
        );
        if self.config.ipv6_unicast {
            open.add_capabilities(&[
                Capability::MultiprotocolExtensions {
                    afi: Afi::Ipv4.into(),
                    safi: Safi::Unicast.into(),
                },
                Capability::MultiprotocolExtensions {
                    afi: Afi::Ipv6.into(),
                    safi: Safi::Unicast.into(),
                },
            ]);
        }
        send_msg(conn, &open.into())?;

        let peer_open = self.read_open(conn)?;
        let peer_asn = peer_open.asn();
        if peer_asn != self.config.peer_asn {
            self.send_notification(
                conn,
                NotificationMessage::new(
                    ErrorCode::Open,
                    OpenErrorSubcode::BadPeerAS,
                ),
            );
            return Err(Error::UnexpectedAsn(ExpectationMismatch {
                expected: self.config.peer_asn,
                got: peer_asn,
            }));
        }

        let four_octet_asn = peer_open.four_octet_asn().is_some();
        if self.config.asn > u32::from(u16::MAX) && !four_octet_asn {
            return Err(Error::FourOctetAsnRequired(self.peer, self.config.asn));
        }

        conn.set_deadline(None)?;

        session_log!(self, debug, "open exchanged";
            "router_id" => router_id.to_string(),
            "peer_hold_time" => peer_open.hold_time,
            "four_octet_asn" => four_octet_asn
        );

        Ok(Handshake {
            nexthop,
            peer_hold_time: peer_open.hold_time,
            four_octet_asn,
        })
    }

    fn read_open(&self, conn: &mut C::Connection) -> Result<OpenMessage, Error> {
        let (header, body) = read_frame(conn)?;
        match header.typ {
            MessageType::Open => match OpenMessage::from_wire(&body) {
                Ok(open) => Ok(open),
                Err(e) => {
                    self.send_notification(
                        conn,
                        NotificationMessage::new(
                            ErrorCode::Open,
                            open_error_subcode(&e),
                        ),
                    );
                    Err(e)
                }
            },
            MessageType::Notification => Err(Error::Notification(
                NotificationMessage::from_wire(&body)?,
            )),
            typ => Err(Error::UnexpectedMessage(typ)),
        }
    }

    /// Publish a connection that completed the OPEN exchange.
    fn establish(
        self: &Arc<Self>,
        mut conn: C::Connection,
        h: Handshake,
    ) -> Result<(), Error> {
        let mut s = lock!(self.state);
        if s.closed {
            let _ = conn.shutdown();
            return Err(Error::Closed);
        }

        let reader = match conn.try_clone() {
            Ok(reader) => reader,
            Err(e) => {
                let _ = conn.shutdown();
                return Err(e);
            }
        };
        s.generation += 1;
        let generation = s.generation;
        let consumer = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("bgp-consumer-{}", self.peer))
            .spawn(move || consumer.consume(reader, generation));
        if let Err(e) = spawned {
            let _ = conn.shutdown();
            return Err(e.into());
        }

        // Accept the peer's OPEN.
        if let Err(e) = send_msg(&mut conn, &Message::KeepAlive) {
            let _ = conn.shutdown();
            return Err(e);
        }

        let peer_hold_time = Duration::from_secs(u64::from(h.peer_hold_time));
        s.actual_hold_time = self.config.hold_time().min(peer_hold_time);
        s.nexthop = Some(h.nexthop);
        s.peer_four_octet_asn = h.four_octet_asn;
        s.conn = Some(conn);
        // A full channel already holds a wake-up, the clock reads the hold
        // time from state.
        let _ = self.clock_wake_tx.try_send(());
        self.cond.notify_all();

        session_log!(self, info, "connected";
            "hold_time_s" => s.actual_hold_time.as_secs(),
            "nexthop" => h.nexthop.to_string()
        );
        Ok(())
    }

    /// Push desired state to the peer until the connection drops (returns
    /// true) or the session is closed (returns false).
    fn send_updates(&self) -> bool {
        let mut guard = lock!(self.state);
        if guard.closed {
            return false;
        }
        let Some(ctx) = self.update_context(&guard) else {
            return true;
        };

        // A fresh connection starts from the latest desired state and gets
        // all of it.
        {
            let s = &mut *guard;
            if let Some(pending) = s.pending.take() {
                s.advertised = pending;
            }
            let Some(conn) = s.conn.as_mut() else {
                return true;
            };
            match self.announce(conn, &ctx, s.advertised.iter()) {
                Ok(skipped) => s.unsent = skipped,
                Err(e) => {
                    session_log!(self, error, "failed to send BGP update: {e}");
                    self.abort(s);
                    return true;
                }
            }
            self.report_advertised(s);
        }

        loop {
            guard = wait_while!(self.cond, guard, |s| {
                s.pending.is_none() && s.conn.is_some() && !s.closed
            });
            if guard.closed {
                return false;
            }

            let s = &mut *guard;
            let Some(conn) = s.conn.as_mut() else {
                return true;
            };
            let Some(new) = s.pending.take() else {
                continue;
            };

            let changed = new.iter().filter(|(key, adv)| {
                s.advertised.get(key.as_str()) != Some(*adv)
            });

            let result = self.announce(conn, &ctx, changed).and_then(|skipped| {
                // Withdraw what was sent before and is either gone now or has
                // an update that could not be encoded.
                let withdrawn: Vec<IpNet> = s
                    .advertised
                    .iter()
                    .filter(|(key, _)| !s.unsent.contains(key.as_str()))
                    .filter(|(key, _)| {
                        !new.contains_key(key.as_str())
                            || skipped.contains(key.as_str())
                    })
                    .map(|(_, adv)| adv.prefix)
                    .collect();
                self.withdraw(conn, &withdrawn)?;
                Ok(skipped)
            });
            let skipped = match result {
                Ok(skipped) => skipped,
                Err(e) => {
                    session_log!(self, error, "failed to send BGP update: {e}");
                    // The next connection starts from this desired state.
                    s.pending = Some(new);
                    self.abort(s);
                    return true;
                }
            };

            let mut unsent: BTreeSet<String> = s
                .unsent
                .iter()
                .filter(|key| {
                    new.get(key.as_str()) == s.advertised.get(key.as_str())
                })
                .cloned()
                .collect();
            unsent.extend(skipped);
            s.unsent = unsent;
            s.advertised = new;
            self.report_advertised(s);
        }
    }

    fn report_advertised(&self, s: &SessionState<C::Connection>) {
        self.metrics.advertised_prefixes(
            self.key(),
            s.advertised.len().saturating_sub(s.unsent.len()),
        );
    }

    fn update_context(
        &self,
        s: &SessionState<C::Connection>,
    ) -> Option<UpdateContext> {
        s.conn.as_ref()?;
        Some(UpdateContext {
            local_asn: self.config.asn,
            ibgp: self.config.ibgp(),
            four_octet_asn: s.peer_four_octet_asn,
            default_nexthop: s.nexthop?,
        })
    }

    /// Send one UPDATE per advertisement. Advertisements that cannot be
    /// expressed on this connection are skipped and their keys returned, only
    /// write failures are errors.
    fn announce<'a>(
        &self,
        conn: &mut C::Connection,
        ctx: &UpdateContext,
        advertisements: impl Iterator<Item = (&'a String, &'a Advertisement)>,
    ) -> Result<BTreeSet<String>, Error> {
        let mut skipped = BTreeSet::new();
        for (key, adv) in advertisements {
            let frame = match adv
                .update_message(ctx)
                .and_then(|update| Message::from(update).to_frame())
            {
                Ok(frame) => frame,
                Err(e) => {
                    session_log!(self, error, "cannot announce {}: {e}", adv.prefix);
                    skipped.insert(key.clone());
                    continue;
                }
            };
            conn.write_all(&frame)?;
            conn.flush()?;
            self.metrics.update_sent(self.key());
        }
        Ok(skipped)
    }

    fn withdraw(
        &self,
        conn: &mut C::Connection,
        prefixes: &[IpNet],
    ) -> Result<(), Error> {
        for update in UpdateMessage::withdraw(prefixes) {
            send_msg(conn, &update.into())?;
            self.metrics.update_sent(self.key());
        }
        if !prefixes.is_empty() {
            session_log!(self, debug, "withdrew {} prefixes", prefixes.len());
        }
        Ok(())
    }

    /// Tear down the current connection, if any. Any pending desired state
    /// becomes the state the next connection starts from.
    fn abort(&self, s: &mut SessionState<C::Connection>) {
        if let Some(conn) = s.conn.take() {
            let _ = conn.shutdown();
            self.metrics.session_down(self.key());
        }
        s.unsent.clear();
        if let Some(pending) = s.pending.take() {
            s.advertised = pending;
            self.metrics
                .pending_prefixes(self.key(), s.advertised.len());
        }
        self.cond.notify_all();
    }

    fn set(&self, advertisements: &[Advertisement]) -> Result<(), Error> {
        let mut new = BTreeMap::new();
        for adv in advertisements {
            adv.validate(self.config.ipv6_unicast)?;
            new.insert(adv.key(), adv.clone());
        }

        let mut s = lock!(self.state);
        if s.closed {
            return Err(Error::Closed);
        }
        self.metrics.pending_prefixes(self.key(), new.len());
        s.pending = Some(new);
        self.cond.notify_all();
        Ok(())
    }

    fn close(&self) {
        let mut guard = lock!(self.state);
        if guard.closed {
            return;
        }
        guard.closed = true;

        let s = &mut *guard;
        if let Some(conn) = s.conn.as_mut() {
            let _ = conn.set_deadline(Some(Instant::now() + NOTIFICATION_TIMEOUT));
            self.send_notification(
                conn,
                NotificationMessage::new(
                    ErrorCode::Cease,
                    CeaseErrorSubcode::AdministrativeShutdown,
                ),
            );
        }
        self.abort(s);
        let _ = self.clock_wake_tx.try_send(());
        session_log!(self, info, "closing session");
    }

    fn send_notification(
        &self,
        conn: &mut C::Connection,
        notification: NotificationMessage,
    ) {
        session_log!(self, info, "sending notification: {notification}");
        if let Err(e) = send_msg(conn, &notification.into()) {
            session_log!(self, debug, "send notification: {e}");
        }
    }

    /// Read and discard everything the peer sends until the connection ends
    /// or the peer sends a NOTIFICATION.
    fn consume(self: Arc<Self>, mut reader: C::Connection, generation: u64) {
        let mut header_error = None;
        loop {
            match read_frame(&mut reader) {
                Ok((header, body)) if header.typ == MessageType::Notification => {
                    match NotificationMessage::from_wire(&body) {
                        Ok(n) => session_log!(self, error,
                            "peer sent notification, closing connection: {n}"
                        ),
                        Err(e) => session_log!(self, error,
                            "malformed notification from peer: {e}"
                        ),
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    session_log!(self, info, "connection read ended: {e}");
                    header_error = header_error_notification(&e);
                    break;
                }
            }
        }

        let mut guard = lock!(self.state);
        let s = &mut *guard;
        if s.generation == generation && s.conn.is_some() {
            if let (Some(n), Some(conn)) = (header_error, s.conn.as_mut()) {
                let _ = conn
                    .set_deadline(Some(Instant::now() + NOTIFICATION_TIMEOUT));
                self.send_notification(conn, n);
            }
            self.abort(s);
        } else {
            let _ = reader.shutdown();
        }
    }
}

impl<C: BgpConnector> KeepaliveTarget for SessionInner<C> {
    fn send_keepalive(&self) -> Result<(), Error> {
        let mut guard = lock!(self.state);
        if guard.closed {
            return Err(Error::Closed);
        }
        let s = &mut *guard;
        let Some(conn) = s.conn.as_mut() else {
            return Ok(());
        };
        if let Err(e) = send_msg(conn, &Message::KeepAlive) {
            session_log!(self, error, "failed to send keepalive: {e}");
            self.abort(s);
            return Err(e);
        }
        Ok(())
    }

    fn closed(&self) -> bool {
        lock!(self.state).closed
    }

    fn hold_time(&self) -> Duration {
        let s = lock!(self.state);
        match s.conn {
            Some(_) if !s.closed => s.actual_hold_time,
            _ => Duration::ZERO,
        }
    }
}

/// The NOTIFICATION owed to a peer whose byte stream lost message framing.
fn header_error_notification(e: &Error) -> Option<NotificationMessage> {
    let (subcode, data) = match e {
        Error::NoMarker => {
            (HeaderErrorSubcode::ConnectionNotSynchronized, Vec::new())
        }
        Error::BadMessageLength { length, .. } => (
            HeaderErrorSubcode::BadMessageLength,
            length.to_be_bytes().to_vec(),
        ),
        Error::InvalidMessageType(typ) => {
            (HeaderErrorSubcode::BadMessageType, vec![*typ])
        }
        _ => return None,
    };
    let mut n = NotificationMessage::new(ErrorCode::Header, subcode);
    n.data = data;
    Some(n)
}

fn open_error_subcode(e: &Error) -> OpenErrorSubcode {
    match e {
        Error::BadVersion(_) => OpenErrorSubcode::UnsupportedVersionNumber,
        Error::HoldTimeTooSmall(_) => OpenErrorSubcode::UnacceptableHoldTime,
        Error::UnsupportedOptionalParameterCode(_) => {
            OpenErrorSubcode::UnsupportedOptionalParameter
        }
        _ => OpenErrorSubcode::Unspecific,
    }
}
