//! The MQTT session controller.
//!
//! [`Client`] owns the transport, the clock, one send buffer and one receive
//! buffer (each holds at most one packet at a time), the topic router and
//! the in-flight QoS tables. It is the engine's only entry point: every byte
//! of I/O happens inside [`Client::yield_for`] or inside a blocking call
//! that internally runs the same tick logic.
//!
//! Single-threaded and cooperative by design: the engine owns no threads,
//! suspends only inside the bounded tick wait, and bounds every blocking
//! operation by the configured command timeout.

use heapless::Vec;

use crate::error::Error;
use crate::handler::{MAX_TOPIC_LEN, Message, MessageHandler, QoS, Router};
use crate::inflight::{AckOutcome, InboundQos2, Outbound, OutboundState, StartOutcome};
use crate::packet::{self, Packet};
use crate::time::Clock;
use crate::transport::Transport;

/// QoS2 receptions tracked between PUBREC and PUBREL.
const MAX_INBOUND_QOS2: usize = 8;

/// Transport wait per tick inside blocking loops, in milliseconds.
const TICK_WAIT_MS: u32 = 10;

/// A will message registered at connect time.
///
/// The broker publishes it on the client's behalf if the session ends
/// without a clean DISCONNECT.
#[derive(Debug, Clone, Copy)]
pub struct Will<'a> {
    /// Topic the broker publishes the will to.
    pub topic: &'a str,
    /// Will payload bytes.
    pub payload: &'a [u8],
    /// QoS the broker uses for the will publication.
    pub qos: QoS,
    /// Whether the broker retains the will message.
    pub retained: bool,
}

/// Options for one CONNECT exchange.
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions<'a> {
    /// The client identifier, must be unique within the broker.
    pub client_id: &'a str,
    /// Maximum idle interval before the engine pings, in seconds.
    /// Zero disables keep-alive.
    pub keep_alive_seconds: u16,
    /// `true` discards broker-side session state; `false` resumes a previous
    /// session with the same client id if the broker holds one.
    pub clean_session: bool,
    /// Optional will registration.
    pub will: Option<Will<'a>>,
    /// Optional username.
    pub username: Option<&'a str>,
    /// Optional password; requires a username on compliant brokers.
    pub password: Option<&'a [u8]>,
}

impl<'a> ConnectOptions<'a> {
    /// Options with a 60 second keep-alive, clean session, no will and no
    /// credentials.
    pub fn new(client_id: &'a str) -> Self {
        Self {
            client_id,
            keep_alive_seconds: 60,
            clean_session: true,
            will: None,
            username: None,
            password: None,
        }
    }

    /// Sets the keep-alive interval.
    pub fn keep_alive_seconds(mut self, seconds: u16) -> Self {
        self.keep_alive_seconds = seconds;
        self
    }

    /// Sets the clean-session flag.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Registers a will message.
    pub fn will(mut self, will: Will<'a>) -> Self {
        self.will = Some(will);
        self
    }

    /// Sets the username.
    pub fn username(mut self, username: &'a str) -> Self {
        self.username = Some(username);
        self
    }

    /// Sets the password.
    pub fn password(mut self, password: &'a [u8]) -> Self {
        self.password = Some(password);
        self
    }
}

/// Outcome of a successful CONNECT/CONNACK exchange.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ConnectResult {
    /// Whether the broker resumed an existing session for this client id.
    pub session_present: bool,
}

/// Engine-level configuration, fixed for the client's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Bounds every blocking call's wait, in milliseconds.
    pub command_timeout_ms: u32,
    /// How long an in-flight QoS1/2 exchange waits for its acknowledgment
    /// before retransmitting with the DUP flag set.
    pub retry_interval_ms: u32,
    /// Retransmission ceiling per handshake stage; past it the exchange
    /// fails with [`Error::Timeout`].
    pub max_retries: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5000,
            retry_interval_ms: 1000,
            max_retries: 3,
        }
    }
}

/// Control packets that resolve a pending blocking call.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Event {
    ConnAck {
        session_present: bool,
        return_code: u8,
    },
    SubAck {
        packet_id: u16,
        return_code: u8,
    },
    UnsubAck {
        packet_id: u16,
    },
    PublishDone {
        packet_id: u16,
    },
}

#[derive(Debug, Default)]
struct Tick {
    event: Option<Event>,
    handled_frame: bool,
}

/// An MQTT 3.1.1 client protocol engine over fixed-size buffers.
///
/// `BUF` sizes the send and receive buffers (one packet each; a frame larger
/// than `BUF` cannot be sent or received) and `SUBS` bounds the number of
/// concurrent subscriptions.
///
/// # Examples
///
/// ```rust,no_run
/// use tickmq::{Client, Config, ConnectOptions, Message, QoS, Transport};
/// # struct Conn;
/// # impl Transport for Conn {
/// #     type Error = ();
/// #     fn read(&mut self, _buf: &mut [u8], _timeout_ms: u32) -> Result<usize, ()> { Ok(0) }
/// #     fn write(&mut self, buf: &[u8], _timeout_ms: u32) -> Result<usize, ()> { Ok(buf.len()) }
/// # }
/// # struct Tick;
/// # impl tickmq::Clock for Tick {
/// #     fn now_ms(&self) -> u64 { 0 }
/// # }
/// # fn main() -> Result<(), tickmq::Error> {
/// let on_message = |topic: &str, message: &Message<'_>| {
///     let _ = (topic, message.payload);
/// };
/// let mut client: Client<'_, _, _, 1024, 8> = Client::new(Conn, Tick, Config::default());
///
/// let result = client.connect(&ConnectOptions::new("TEST-ID").keep_alive_seconds(10))?;
/// assert!(!result.session_present);
///
/// client.subscribe("test/TEST-ID/sub", QoS::AtLeastOnce, &on_message)?;
/// client.publish(
///     "test/TEST-ID/pub",
///     &Message {
///         qos: QoS::AtLeastOnce,
///         retained: false,
///         dup: false,
///         payload: b"Test Message !!!",
///     },
/// )?;
///
/// // Process inbound traffic and keep-alives for 20 seconds.
/// client.yield_for(20_000)?;
/// client.disconnect()
/// # }
/// ```
pub struct Client<'h, T, K, const BUF: usize = 1024, const SUBS: usize = 8>
where
    T: Transport,
    K: Clock,
{
    transport: T,
    clock: K,
    config: Config,
    router: Router<'h, SUBS>,
    send_buf: Vec<u8, BUF>,
    recv_buf: [u8; BUF],
    /// Bytes of the in-progress inbound frame received so far.
    rx_len: usize,
    /// Total frame size once the fixed header is complete.
    rx_target: Option<usize>,
    connected: bool,
    clean_session: bool,
    keep_alive_ms: u64,
    last_outbound_ms: u64,
    ping_sent_at_ms: Option<u64>,
    last_packet_id: u16,
    outbound: Option<Outbound>,
    inbound_qos2: InboundQos2<MAX_INBOUND_QOS2>,
}

impl<'h, T, K, const BUF: usize, const SUBS: usize> core::fmt::Debug for Client<'h, T, K, BUF, SUBS>
where
    T: Transport,
    K: Clock,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("connected", &self.connected)
            .field("clean_session", &self.clean_session)
            .field("keep_alive_ms", &self.keep_alive_ms)
            .field("router", &self.router)
            .field("outbound", &self.outbound)
            .finish_non_exhaustive()
    }
}

impl<'h, T, K, const BUF: usize, const SUBS: usize> Client<'h, T, K, BUF, SUBS>
where
    T: Transport,
    K: Clock,
{
    /// Creates a disconnected engine over `transport` and `clock`.
    pub fn new(transport: T, clock: K, config: Config) -> Self {
        debug_assert!(BUF >= 16, "buffers must fit at least a fixed header");
        Self {
            transport,
            clock,
            config,
            router: Router::new(),
            send_buf: Vec::new(),
            recv_buf: [0; BUF],
            rx_len: 0,
            rx_target: None,
            connected: false,
            clean_session: true,
            keep_alive_ms: 0,
            last_outbound_ms: 0,
            ping_sent_at_ms: None,
            last_packet_id: 0,
            outbound: None,
            inbound_qos2: InboundQos2::new(),
        }
    }

    /// Whether a session is currently established.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether `filter` has a locally registered subscription.
    ///
    /// The local table survives disconnects; it is only cleared by
    /// `unsubscribe` or by a `disconnect` after a clean-session connect.
    pub fn is_subscribed(&self, filter: &str) -> bool {
        self.router.contains(filter)
    }

    /// Establishes a session: sends CONNECT and waits for CONNACK within the
    /// command timeout.
    ///
    /// Returns [`Error::NotConnected`] when a session is already active,
    /// [`Error::ConnectRefused`] with the broker's return code on rejection,
    /// and [`Error::Timeout`] when no CONNACK arrives in time.
    pub fn connect(&mut self, options: &ConnectOptions<'_>) -> Result<ConnectResult, Error> {
        if self.connected {
            return Err(Error::NotConnected);
        }
        packet::encode_connect(&mut self.send_buf, options)?;
        self.clean_session = options.clean_session;
        self.keep_alive_ms = u64::from(options.keep_alive_seconds) * 1000;
        self.ping_sent_at_ms = None;
        self.send_frame()?;

        let deadline = self.deadline();
        loop {
            let tick = self.tick(TICK_WAIT_MS)?;
            if let Some(Event::ConnAck {
                session_present,
                return_code,
            }) = tick.event
            {
                if return_code != 0 {
                    return Err(Error::ConnectRefused(return_code));
                }
                self.connected = true;
                return Ok(ConnectResult { session_present });
            }
            if self.clock.now_ms() >= deadline {
                return Err(Error::Timeout);
            }
        }
    }

    /// Subscribes `handler` to the exact topic `filter`.
    ///
    /// The subscription is recorded in the router only after the broker
    /// grants it; the granted QoS is returned and may be lower than the one
    /// requested. Fails with [`Error::SubscribeFailed`] on a broker failure
    /// code and [`Error::BufferOverflow`] when the router is at capacity.
    pub fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
        handler: &'h dyn MessageHandler,
    ) -> Result<QoS, Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if filter.len() > MAX_TOPIC_LEN || (self.router.is_full() && !self.router.contains(filter))
        {
            return Err(Error::BufferOverflow);
        }
        let packet_id = self.next_packet_id();
        packet::encode_subscribe(&mut self.send_buf, packet_id, filter, qos)?;
        self.send_frame()?;

        let deadline = self.deadline();
        loop {
            let tick = self.tick(TICK_WAIT_MS)?;
            if let Some(Event::SubAck {
                packet_id: acked,
                return_code,
            }) = tick.event
            {
                if acked == packet_id {
                    return match QoS::from_bits(return_code) {
                        Some(granted) => {
                            self.router.register(filter, granted, handler);
                            Ok(granted)
                        }
                        None => Err(Error::SubscribeFailed(return_code)),
                    };
                }
            }
            if self.clock.now_ms() >= deadline {
                return Err(Error::Timeout);
            }
        }
    }

    /// Removes the subscription for `filter`.
    ///
    /// The router entry is removed only after the broker confirms with
    /// UNSUBACK; messages already in flight before that can still be
    /// dispatched.
    pub fn unsubscribe(&mut self, filter: &str) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let packet_id = self.next_packet_id();
        packet::encode_unsubscribe(&mut self.send_buf, packet_id, filter)?;
        self.send_frame()?;

        let deadline = self.deadline();
        loop {
            let tick = self.tick(TICK_WAIT_MS)?;
            if let Some(Event::UnsubAck { packet_id: acked }) = tick.event {
                if acked == packet_id {
                    self.router.remove(filter);
                    return Ok(());
                }
            }
            if self.clock.now_ms() >= deadline {
                return Err(Error::Timeout);
            }
        }
    }

    /// Publishes `message` to `topic`.
    ///
    /// QoS0 returns as soon as the frame is handed to the transport. QoS1/2
    /// block across internal ticks until the acknowledgment handshake
    /// completes, retrying with the DUP flag per [`Config`]; on
    /// [`Error::Timeout`] the in-flight record is dropped and at-least-once
    /// delivery may have been broken.
    pub fn publish(&mut self, topic: &str, message: &Message<'_>) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if message.qos == QoS::AtMostOnce {
            packet::encode_publish(&mut self.send_buf, topic, message, None)?;
            return self.send_frame();
        }

        // The frame stays in the send buffer for DUP retransmission until
        // the handshake settles, so exactly one outbound exchange exists at
        // a time.
        let packet_id = self.next_packet_id();
        packet::encode_publish(&mut self.send_buf, topic, message, Some(packet_id))?;
        self.send_frame()?;
        self.outbound = Some(Outbound::new(packet_id, message.qos, self.clock.now_ms()));

        let deadline = self.deadline();
        loop {
            let tick = match self.tick(TICK_WAIT_MS) {
                Ok(tick) => tick,
                Err(e) => {
                    self.outbound = None;
                    return Err(e);
                }
            };
            if let Some(Event::PublishDone { packet_id: done }) = tick.event {
                if done == packet_id {
                    return Ok(());
                }
            }
            if self.clock.now_ms() >= deadline {
                self.outbound = None;
                return Err(Error::Timeout);
            }
        }
    }

    /// Drives the engine for up to `duration_ms` milliseconds.
    ///
    /// This is the cooperative scheduling point: it assembles at most one
    /// inbound packet per tick from bounded transport reads (partial reads
    /// resume on the next call), dispatches PUBLISH payloads to the router,
    /// runs the QoS acknowledgment machines, sends PINGREQ once
    /// three-quarters of the keep-alive interval passes without outbound
    /// traffic, and retransmits overdue in-flight exchanges.
    ///
    /// A `duration_ms` of zero runs until no pending work remains (no
    /// partial inbound frame, no in-flight exchange).
    pub fn yield_for(&mut self, duration_ms: u32) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if duration_ms == 0 {
            loop {
                let tick = self.tick(TICK_WAIT_MS)?;
                let pending =
                    tick.handled_frame || self.rx_len != 0 || self.outbound.is_some();
                if !pending {
                    return Ok(());
                }
            }
        }
        let deadline = self.clock.now_ms() + u64::from(duration_ms);
        while self.clock.now_ms() < deadline {
            self.tick(TICK_WAIT_MS)?;
        }
        Ok(())
    }

    /// Ends the session.
    ///
    /// DISCONNECT is sent best-effort (transport errors are ignored: the
    /// link may already be gone). Connection-scoped state is released; when
    /// the session was opened with `clean_session = true` the local
    /// subscription table and in-flight records are cleared as well.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let _ = Self::write_all(
            &mut self.transport,
            self.config.command_timeout_ms,
            &packet::DISCONNECT_FRAME,
        );
        self.reset_link();
        if self.clean_session {
            self.router.clear();
            self.inbound_qos2.clear();
        }
        Ok(())
    }

    fn deadline(&self) -> u64 {
        self.clock.now_ms() + u64::from(self.config.command_timeout_ms)
    }

    /// Next locally-initiated packet identifier: a monotonic counter with
    /// wraparound that skips zero and any id still in flight.
    fn next_packet_id(&mut self) -> u16 {
        loop {
            self.last_packet_id = self.last_packet_id.wrapping_add(1);
            let id = self.last_packet_id;
            if id == 0 {
                continue;
            }
            let in_flight = self.outbound.as_ref().is_some_and(|r| r.packet_id == id)
                || self.inbound_qos2.contains(id);
            if !in_flight {
                return id;
            }
        }
    }

    fn reset_link(&mut self) {
        self.connected = false;
        self.rx_len = 0;
        self.rx_target = None;
        self.ping_sent_at_ms = None;
        self.outbound = None;
    }

    /// Transport failure: force the disconnected state.
    fn lost(&mut self) -> Error {
        self.reset_link();
        Error::ConnectionLost
    }

    /// Codec rejection: framing is desynchronized, drop the connection.
    fn desync(&mut self) -> Error {
        self.reset_link();
        Error::MalformedPacket
    }

    fn write_all(transport: &mut T, timeout_ms: u32, bytes: &[u8]) -> Result<(), Error> {
        let mut written = 0;
        while written < bytes.len() {
            match transport.write(&bytes[written..], timeout_ms) {
                Ok(0) | Err(_) => return Err(Error::ConnectionLost),
                Ok(n) => written += n,
            }
        }
        Ok(())
    }

    /// Hands the frame composed in the send buffer to the transport.
    fn send_frame(&mut self) -> Result<(), Error> {
        if Self::write_all(
            &mut self.transport,
            self.config.command_timeout_ms,
            &self.send_buf,
        )
        .is_err()
        {
            return Err(self.lost());
        }
        self.last_outbound_ms = self.clock.now_ms();
        Ok(())
    }

    /// One pass of the cooperative loop: bounded read, keep-alive, retries.
    fn tick(&mut self, wait_ms: u32) -> Result<Tick, Error> {
        let mut out = Tick::default();
        if let Some(len) = self.fill_frame(wait_ms)? {
            out.handled_frame = true;
            out.event = self.handle_frame(len)?;
        }
        self.keep_alive_tick()?;
        self.retry_tick()?;
        Ok(out)
    }

    /// Assembles at most one inbound frame, resuming any partial read from a
    /// previous call. Returns the frame length once complete.
    fn fill_frame(&mut self, wait_ms: u32) -> Result<Option<usize>, Error> {
        // Header phase: one byte at a time until the remaining-length varint
        // is complete (at most 5 bytes total).
        while self.rx_target.is_none() {
            let n = match self
                .transport
                .read(&mut self.recv_buf[self.rx_len..self.rx_len + 1], wait_ms)
            {
                Ok(n) => n,
                Err(_) => return Err(self.lost()),
            };
            if n == 0 {
                return Ok(None);
            }
            self.rx_len += n;
            if self.rx_len < 2 {
                continue;
            }
            match packet::decode_remaining_length(&self.recv_buf[1..self.rx_len]) {
                Ok(Some((remaining, header_len))) => {
                    let total = 1 + header_len + remaining;
                    if total > BUF {
                        // The frame can never fit the fixed buffer; framing
                        // cannot be resynchronized from here.
                        return Err(self.desync());
                    }
                    self.rx_target = Some(total);
                }
                Ok(None) => {}
                Err(_) => return Err(self.desync()),
            }
        }

        let total = match self.rx_target {
            Some(total) => total,
            None => return Ok(None),
        };
        while self.rx_len < total {
            let n = match self
                .transport
                .read(&mut self.recv_buf[self.rx_len..total], wait_ms)
            {
                Ok(n) => n,
                Err(_) => return Err(self.lost()),
            };
            if n == 0 {
                return Ok(None);
            }
            self.rx_len += n;
        }
        Ok(Some(total))
    }

    /// Parses and reacts to one complete inbound frame.
    fn handle_frame(&mut self, len: usize) -> Result<Option<Event>, Error> {
        let timeout = self.config.command_timeout_ms;
        let mut link_failed = false;

        let event = match packet::decode(&self.recv_buf[..len]) {
            Err(_) => return Err(self.desync()),
            Ok(Packet::ConnAck {
                session_present,
                return_code,
            }) => Some(Event::ConnAck {
                session_present,
                return_code,
            }),
            Ok(Packet::SubAck {
                packet_id,
                return_code,
            }) => Some(Event::SubAck {
                packet_id,
                return_code,
            }),
            Ok(Packet::UnsubAck { packet_id }) => Some(Event::UnsubAck { packet_id }),
            Ok(Packet::PingResp) => {
                self.ping_sent_at_ms = None;
                None
            }
            Ok(Packet::PubAck { packet_id }) => self.apply_ack(packet::PUBACK, packet_id)?,
            Ok(Packet::PubRec { packet_id }) => self.apply_ack(packet::PUBREC, packet_id)?,
            Ok(Packet::PubComp { packet_id }) => self.apply_ack(packet::PUBCOMP, packet_id)?,
            Ok(Packet::PubRel { packet_id }) => {
                // PUBCOMP is sent even for an untracked id so a
                // retransmitting broker can settle the exchange.
                self.inbound_qos2.complete(packet_id);
                let frame = packet::ack_frame(packet::PUBCOMP, packet_id);
                if Self::write_all(&mut self.transport, timeout, &frame).is_err() {
                    link_failed = true;
                } else {
                    self.last_outbound_ms = self.clock.now_ms();
                }
                None
            }
            Ok(Packet::Publish(publish)) => {
                let message = Message {
                    qos: publish.qos,
                    retained: publish.retained,
                    dup: publish.dup,
                    payload: publish.payload,
                };
                match publish.qos {
                    QoS::AtMostOnce => {
                        self.router.dispatch(publish.topic, &message);
                    }
                    QoS::AtLeastOnce => {
                        // Deliver once, acknowledge independently.
                        self.router.dispatch(publish.topic, &message);
                        if let Some(id) = publish.packet_id {
                            let frame = packet::ack_frame(packet::PUBACK, id);
                            if Self::write_all(&mut self.transport, timeout, &frame).is_err() {
                                link_failed = true;
                            } else {
                                self.last_outbound_ms = self.clock.now_ms();
                            }
                        }
                    }
                    QoS::ExactlyOnce => {
                        if let Some(id) = publish.packet_id {
                            // Dispatch happens at reception, before the
                            // PUBREC/PUBREL/PUBCOMP handshake completes; a
                            // duplicate for a tracked id never re-dispatches.
                            // A full dedupe table gets no PUBREC at all, so
                            // the broker retransmits once a slot frees.
                            let outcome = self.inbound_qos2.start(id);
                            if outcome == StartOutcome::Fresh {
                                self.router.dispatch(publish.topic, &message);
                            }
                            if outcome != StartOutcome::Full {
                                let frame = packet::ack_frame(packet::PUBREC, id);
                                if Self::write_all(&mut self.transport, timeout, &frame).is_err() {
                                    link_failed = true;
                                } else {
                                    self.last_outbound_ms = self.clock.now_ms();
                                }
                            }
                        }
                    }
                }
                None
            }
        };

        self.rx_len = 0;
        self.rx_target = None;
        if link_failed {
            return Err(self.lost());
        }
        Ok(event)
    }

    /// Feeds an acknowledgment to the outbound in-flight record.
    /// Unexpected acknowledgments are ignored, not fatal.
    fn apply_ack(&mut self, first_byte: u8, packet_id: u16) -> Result<Option<Event>, Error> {
        let now = self.clock.now_ms();
        let Some(record) = self.outbound.as_mut() else {
            return Ok(None);
        };
        match record.on_ack(first_byte, packet_id, now) {
            AckOutcome::Complete => {
                self.outbound = None;
                Ok(Some(Event::PublishDone { packet_id }))
            }
            AckOutcome::SendPubRel => {
                let frame = packet::ack_frame(packet::PUBREL, packet_id);
                if Self::write_all(&mut self.transport, self.config.command_timeout_ms, &frame)
                    .is_err()
                {
                    return Err(self.lost());
                }
                self.last_outbound_ms = self.clock.now_ms();
                Ok(None)
            }
            AckOutcome::Ignored => Ok(None),
        }
    }

    /// Sends PINGREQ once three-quarters of the keep-alive interval elapses
    /// with no outbound traffic; an unanswered ping within the command
    /// timeout counts as a lost connection.
    fn keep_alive_tick(&mut self) -> Result<(), Error> {
        if !self.connected || self.keep_alive_ms == 0 {
            return Ok(());
        }
        let now = self.clock.now_ms();
        if let Some(sent_at) = self.ping_sent_at_ms {
            if now.saturating_sub(sent_at) >= u64::from(self.config.command_timeout_ms) {
                return Err(self.lost());
            }
        } else if now.saturating_sub(self.last_outbound_ms) >= self.keep_alive_ms * 3 / 4 {
            if Self::write_all(
                &mut self.transport,
                self.config.command_timeout_ms,
                &packet::PINGREQ_FRAME,
            )
            .is_err()
            {
                return Err(self.lost());
            }
            self.last_outbound_ms = now;
            self.ping_sent_at_ms = Some(now);
        }
        Ok(())
    }

    /// Retransmits the in-flight exchange once its acknowledgment is
    /// overdue; past the retry ceiling the record is dropped and the
    /// blocking caller gets [`Error::Timeout`].
    fn retry_tick(&mut self) -> Result<(), Error> {
        let now = self.clock.now_ms();
        let Some(mut record) = self.outbound else {
            return Ok(());
        };
        if !record.is_due(now, self.config.retry_interval_ms) {
            return Ok(());
        }
        if record.retries >= self.config.max_retries {
            self.outbound = None;
            return Err(Error::Timeout);
        }
        match record.state {
            OutboundState::AwaitPubAck | OutboundState::AwaitPubRec => {
                // The PUBLISH frame is still in the send buffer; resend it
                // with the DUP flag set.
                if let Some(first) = self.send_buf.first_mut() {
                    *first |= packet::DUP_FLAG;
                }
                if Self::write_all(
                    &mut self.transport,
                    self.config.command_timeout_ms,
                    &self.send_buf,
                )
                .is_err()
                {
                    return Err(self.lost());
                }
            }
            OutboundState::AwaitPubComp => {
                let frame = packet::ack_frame(packet::PUBREL, record.packet_id);
                if Self::write_all(&mut self.transport, self.config.command_timeout_ms, &frame)
                    .is_err()
                {
                    return Err(self.lost());
                }
            }
        }
        self.last_outbound_ms = self.clock.now_ms();
        record.mark_retry(now);
        self.outbound = Some(record);
        Ok(())
    }
}
