//! Per-connection circuit record and its windowed delivery state.
//!
//! Every method that changes protocol state runs under the circuit's own lock
//! and returns the packets it wants sent; callers hand those to
//! [`Circuit::transmit`] after the lock is released so no link I/O ever
//! happens while circuit state is held.

use std::{
    collections::{HashMap, VecDeque},
    fmt, io,
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use netrom_core::{
    callsign::Callsign,
    constants::{MAX_INFO_LEN, MAX_WINDOW, SEQUENCE_MODULUS},
    error::{ErrorKind, Result},
    transport::LinkId,
};
use netrom_protocol::{
    packet::{ConnectAckInfo, ConnectRequestInfo, NetRomPacket, Opcode},
    sequence::{self, Sequence},
};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{circuit_state::CircuitState, statistics::CircuitStatistics, stream::CircuitStream};

/// Where a circuit's outgoing packets go: the link toward the remote node.
pub trait PacketSink: Send + Sync {
    /// The link this sink writes to.
    fn link_id(&self) -> LinkId;

    /// Encodes and writes one packet.
    fn send_packet(&self, packet: &NetRomPacket) -> io::Result<()>;
}

/// Result of an outbound connect attempt, delivered once to the waiter.
#[derive(Debug)]
pub enum ConnectOutcome {
    /// The remote accepted; the stream is ready.
    Connected(CircuitStream),
    /// The remote answered with a refusal.
    Refused,
    /// The circuit died before an answer (link loss, cancellation).
    Failed,
}

/// Addressing fixed when the circuit is created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircuitAddress {
    /// This node
    pub source: Callsign,
    /// The remote node
    pub destination: Callsign,
    /// User who asked for the circuit
    pub user: Callsign,
    /// Node the user is attached to
    pub origin_node: Callsign,
}

struct CircuitInner {
    state: CircuitState,
    my_index: u8,
    my_id: u8,
    your_index: u8,
    your_id: u8,
    window: u8,
    /// Remote asked us to stop sending
    remote_choked: bool,
    /// When our DISCONNECT_REQUEST went out
    disconnecting_since: Option<Instant>,

    /// Next NS to assign
    tx_next: Sequence,
    /// Oldest unacknowledged NS
    tx_unacked: Sequence,
    /// Sent, unacknowledged frames by NS
    sent: HashMap<Sequence, NetRomPacket>,
    /// Data waiting for window space
    pending: VecDeque<Vec<u8>>,

    /// Next NS expected from the remote
    rx_expected: Sequence,
    /// Out-of-order frames by NS
    received: HashMap<Sequence, Vec<u8>>,

    /// Feeds the stream handed to the service or caller
    delivery: Option<Sender<Vec<u8>>>,
    /// One-shot notification for an outbound connect
    outcome: Option<Sender<ConnectOutcome>>,

    stats: CircuitStatistics,
}

/// One NetROM circuit.
pub struct Circuit {
    address: CircuitAddress,
    ttl: u8,
    sink: Arc<dyn PacketSink>,
    inner: Mutex<CircuitInner>,
}

impl fmt::Debug for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Circuit")
            .field("address", &self.address)
            .field("state", &inner.state)
            .field("my", &(inner.my_index, inner.my_id))
            .field("your", &(inner.your_index, inner.your_id))
            .field("window", &inner.window)
            .field("link", &self.sink.link_id())
            .finish()
    }
}

impl Circuit {
    fn with_inner(
        address: CircuitAddress,
        ttl: u8,
        sink: Arc<dyn PacketSink>,
        your: (u8, u8),
        window: u8,
        outcome: Option<Sender<ConnectOutcome>>,
    ) -> Arc<Self> {
        Arc::new(Circuit {
            address,
            ttl,
            sink,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Connecting,
                my_index: 0,
                my_id: 0,
                your_index: your.0,
                your_id: your.1,
                window: window.clamp(1, MAX_WINDOW),
                remote_choked: false,
                disconnecting_since: None,
                tx_next: 0,
                tx_unacked: 0,
                sent: HashMap::new(),
                pending: VecDeque::new(),
                rx_expected: 0,
                received: HashMap::new(),
                delivery: None,
                outcome,
                stats: CircuitStatistics::default(),
            }),
        })
    }

    /// Creates a circuit this node originates. The receiver yields exactly one
    /// [`ConnectOutcome`].
    pub fn outbound(
        address: CircuitAddress,
        ttl: u8,
        window: u8,
        sink: Arc<dyn PacketSink>,
    ) -> (Arc<Self>, Receiver<ConnectOutcome>) {
        let (tx, rx) = bounded(1);
        (Self::with_inner(address, ttl, sink, (0, 0), window, Some(tx)), rx)
    }

    /// Creates a circuit from a received CONNECT_REQUEST. The peer's circuit
    /// numbering and proposed window (capped at `max_window`) are adopted.
    pub fn inbound(
        request: &NetRomPacket,
        info: &ConnectRequestInfo,
        ttl: u8,
        max_window: u8,
        sink: Arc<dyn PacketSink>,
    ) -> Arc<Self> {
        let address = CircuitAddress {
            source: request.destination.clone(),
            destination: request.source.clone(),
            user: info.user.clone(),
            origin_node: info.node.clone(),
        };
        let window = info.window.min(max_window);
        Self::with_inner(
            address,
            ttl,
            sink,
            (request.circuit_index, request.circuit_id),
            window,
            None,
        )
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Fixed addressing of this circuit.
    pub fn address(&self) -> &CircuitAddress {
        &self.address
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// This node's (index, id) for the circuit.
    pub fn my_circuit(&self) -> (u8, u8) {
        let inner = self.inner.lock();
        (inner.my_index, inner.my_id)
    }

    /// The remote's (index, id) for the circuit.
    pub fn your_circuit(&self) -> (u8, u8) {
        let inner = self.inner.lock();
        (inner.your_index, inner.your_id)
    }

    /// Negotiated window in frames.
    pub fn window(&self) -> u8 {
        self.inner.lock().window
    }

    /// True while the remote has asserted choke.
    pub fn is_choked(&self) -> bool {
        self.inner.lock().remote_choked
    }

    /// Number of sent frames awaiting acknowledgment.
    pub fn unacked_count(&self) -> usize {
        self.inner.lock().sent.len()
    }

    /// Number of out-of-order frames held for reassembly.
    pub fn buffered_count(&self) -> usize {
        self.inner.lock().received.len()
    }

    /// Number of data chunks waiting for window space.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Snapshot of the transfer counters.
    pub fn statistics(&self) -> CircuitStatistics {
        self.inner.lock().stats.clone()
    }

    /// Link that owns this circuit.
    pub fn link_id(&self) -> LinkId {
        self.sink.link_id()
    }

    /// True once the circuit is closed, or has waited longer than `linger`
    /// for the DISCONNECT_ACK to its own close.
    pub fn is_stale(&self, linger: Duration) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Disconnected => true,
            CircuitState::Disconnecting => inner.disconnecting_since.is_some_and(|since| since.elapsed() >= linger),
            CircuitState::Connecting | CircuitState::Connected => false,
        }
    }

    /// Called by the registry when the circuit is registered.
    pub(crate) fn assign_ids(&self, index: u8, id: u8) {
        let mut inner = self.inner.lock();
        inner.my_index = index;
        inner.my_id = id;
    }

    // ------------------------------------------------------------------
    // Packet builders
    // ------------------------------------------------------------------

    fn packet(&self, inner: &CircuitInner, opcode: Opcode) -> NetRomPacket {
        NetRomPacket::new(
            self.address.source.clone(),
            self.address.destination.clone(),
            self.ttl,
            opcode,
            inner.your_index,
            inner.your_id,
        )
    }

    /// Builds the CONNECT_REQUEST for an outbound circuit. The header carries
    /// this node's own numbering.
    pub fn connect_request(&self) -> NetRomPacket {
        let inner = self.inner.lock();
        let info = ConnectRequestInfo {
            window: inner.window,
            user: self.address.user.clone(),
            node: self.address.origin_node.clone(),
        };
        NetRomPacket::new(
            self.address.source.clone(),
            self.address.destination.clone(),
            self.ttl,
            Opcode::ConnectRequest,
            inner.my_index,
            inner.my_id,
        )
        .with_payload(info.to_payload())
    }

    fn connect_ack(&self, inner: &CircuitInner, refused: bool) -> NetRomPacket {
        let info = ConnectAckInfo { window: inner.window, index: inner.my_index, id: inner.my_id };
        self.packet(inner, Opcode::ConnectAck).with_choke(refused).with_payload(info.to_payload())
    }

    fn information_ack(&self, inner: &CircuitInner, nak: bool) -> NetRomPacket {
        self.packet(inner, Opcode::InformationAck)
            .with_sequences(0, inner.rx_expected)
            .with_nak(nak)
    }

    // ------------------------------------------------------------------
    // State transitions
    // ------------------------------------------------------------------

    fn transition(&self, inner: &mut CircuitInner, next: CircuitState) -> bool {
        if !inner.state.can_transition_to(next) {
            debug!(
                "Circuit {}/{} ignoring {:?} -> {:?}",
                inner.my_index, inner.my_id, inner.state, next
            );
            return false;
        }
        trace!("Circuit {}/{} {:?} -> {:?}", inner.my_index, inner.my_id, inner.state, next);
        inner.state = next;
        if next == CircuitState::Disconnecting {
            inner.disconnecting_since = Some(Instant::now());
        }
        if next.is_terminal() {
            Self::close_endpoints(inner);
        }
        true
    }

    fn close_endpoints(inner: &mut CircuitInner) {
        inner.delivery = None;
        inner.pending.clear();
        inner.sent.clear();
        inner.received.clear();
        if let Some(outcome) = inner.outcome.take() {
            let _ = outcome.try_send(ConnectOutcome::Failed);
        }
    }

    fn open_stream(self: &Arc<Self>, inner: &mut CircuitInner) -> CircuitStream {
        let (tx, rx) = unbounded();
        inner.delivery = Some(tx);
        CircuitStream::new(self.clone(), rx)
    }

    /// Sink side: a local service took the circuit. Sends CONNECT_ACK and
    /// returns the stream for the service.
    pub fn accept(self: &Arc<Self>) -> Result<(Vec<NetRomPacket>, CircuitStream)> {
        let mut inner = self.inner.lock();
        if !self.transition(&mut inner, CircuitState::Connected) {
            return Err(ErrorKind::CircuitClosed);
        }
        let stream = self.open_stream(&mut inner);
        Ok((vec![self.connect_ack(&inner, false)], stream))
    }

    /// Sink side: the peer repeated its CONNECT_REQUEST because our ack was
    /// lost. Re-sends the ack while the circuit is still up.
    pub fn repeat_connect_ack(&self) -> Vec<NetRomPacket> {
        let inner = self.inner.lock();
        if inner.state.is_established() {
            vec![self.connect_ack(&inner, false)]
        } else {
            Vec::new()
        }
    }

    /// Sink side: no service wants the destination. Sends a refusing
    /// CONNECT_ACK and leaves the circuit disconnected.
    pub fn refuse(&self) -> Vec<NetRomPacket> {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Disconnected);
        vec![self.connect_ack(&inner, true)]
    }

    /// Originator side: apply a CONNECT_ACK and wake the waiter. An accepting
    /// ack for a circuit that was already given up gets a DISCONNECT_REQUEST
    /// so the remote end does not stay open.
    pub fn handle_connect_ack(self: &Arc<Self>, packet: &NetRomPacket) -> Vec<NetRomPacket> {
        let (outcome, stream) = {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::Disconnected && !packet.is_refusal() {
                return match ConnectAckInfo::parse(&packet.payload) {
                    Ok(info) => {
                        debug!("CONNECT_ACK for abandoned circuit {}/{}, closing", inner.my_index, inner.my_id);
                        inner.your_index = info.index;
                        inner.your_id = info.id;
                        vec![self.packet(&inner, Opcode::DisconnectRequest)]
                    }
                    Err(_) => Vec::new(),
                };
            }
            if inner.state != CircuitState::Connecting {
                debug!("Duplicate CONNECT_ACK for circuit in {:?}", inner.state);
                return Vec::new();
            }
            if packet.is_refusal() {
                if let Some(outcome) = inner.outcome.take() {
                    let _ = outcome.try_send(ConnectOutcome::Refused);
                }
                self.transition(&mut inner, CircuitState::Disconnected);
                return Vec::new();
            }
            match ConnectAckInfo::parse(&packet.payload) {
                Ok(info) => {
                    inner.your_index = info.index;
                    inner.your_id = info.id;
                    inner.window = inner.window.min(info.window).clamp(1, MAX_WINDOW);
                }
                Err(err) => {
                    warn!("CONNECT_ACK with bad body: {}", err);
                    return Vec::new();
                }
            }
            self.transition(&mut inner, CircuitState::Connected);
            let stream = self.open_stream(&mut inner);
            (inner.outcome.take(), stream)
        };

        // Sent unlocked: if the waiter is gone the returned stream is dropped
        // here, and dropping a stream closes the circuit.
        match outcome {
            Some(outcome) => {
                if outcome.try_send(ConnectOutcome::Connected(stream)).is_err() {
                    debug!("CONNECT_ACK after the caller gave up");
                }
            }
            None => debug!("CONNECT_ACK with nobody waiting"),
        }
        Vec::new()
    }

    /// Remote asked to close: reply DISCONNECT_ACK and finish.
    pub fn handle_disconnect_request(&self) -> Vec<NetRomPacket> {
        let mut inner = self.inner.lock();
        let ack = self.packet(&inner, Opcode::DisconnectAck);
        if inner.state.is_terminal() {
            return vec![ack];
        }
        inner.state = CircuitState::Disconnected;
        Self::close_endpoints(&mut inner);
        vec![ack]
    }

    /// Remote confirmed our close.
    pub fn handle_disconnect_ack(&self) {
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            inner.state = CircuitState::Disconnected;
            Self::close_endpoints(&mut inner);
        }
    }

    /// Local side wants to close. From `Connected` this sends
    /// DISCONNECT_REQUEST and waits for the ack; from `Connecting` the
    /// circuit is abandoned at once. Safe to call repeatedly.
    pub fn begin_disconnect(&self) -> Vec<NetRomPacket> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Connected => {
                self.transition(&mut inner, CircuitState::Disconnecting);
                inner.delivery = None;
                inner.pending.clear();
                vec![self.packet(&inner, Opcode::DisconnectRequest)]
            }
            CircuitState::Connecting => {
                self.transition(&mut inner, CircuitState::Disconnected);
                Vec::new()
            }
            CircuitState::Disconnecting | CircuitState::Disconnected => Vec::new(),
        }
    }

    /// Force the circuit to `Disconnected` without telling the remote
    /// (link loss, connect timeout). Idempotent.
    pub fn abort(&self) {
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            inner.state = CircuitState::Disconnected;
            Self::close_endpoints(&mut inner);
        }
    }

    // ------------------------------------------------------------------
    // Data transfer
    // ------------------------------------------------------------------

    /// Queues data for the remote, splitting it into frame sized chunks, and
    /// returns whatever the window allows to go out now.
    pub fn queue_data(&self, data: &[u8]) -> Result<Vec<NetRomPacket>> {
        let mut inner = self.inner.lock();
        if !inner.state.is_established() {
            return Err(ErrorKind::CircuitClosed);
        }
        for chunk in data.chunks(MAX_INFO_LEN) {
            inner.pending.push_back(chunk.to_vec());
        }
        Ok(self.pump(&mut inner))
    }

    /// Sends pending data while the remote is not choked and the window has room.
    fn pump(&self, inner: &mut CircuitInner) -> Vec<NetRomPacket> {
        let mut out = Vec::new();
        while !inner.remote_choked
            && (sequence::distance(inner.tx_unacked, inner.tx_next) as usize) < inner.window as usize
        {
            let Some(data) = inner.pending.pop_front() else { break };
            let ns = inner.tx_next;
            let packet = self
                .packet(inner, Opcode::Information)
                .with_sequences(ns, inner.rx_expected)
                .with_payload(data);
            inner.stats.record_sent(packet.payload.len());
            inner.sent.insert(ns, packet.clone());
            inner.tx_next = sequence::next(ns);
            out.push(packet);
        }
        out
    }

    /// Releases every sent frame below `nr`. Out-of-window values are ignored.
    fn acknowledge(inner: &mut CircuitInner, nr: Sequence) {
        if !sequence::within(inner.tx_unacked, nr, inner.tx_next) {
            debug!(
                "Ignoring NR {} outside [{}, {}]",
                nr, inner.tx_unacked, inner.tx_next
            );
            return;
        }
        while inner.tx_unacked != nr {
            inner.sent.remove(&inner.tx_unacked);
            inner.tx_unacked = sequence::next(inner.tx_unacked);
        }
    }

    /// Returns a fresh copy of the sent frame `ns`, with current NR.
    fn retransmit(inner: &CircuitInner, ns: Sequence) -> Option<NetRomPacket> {
        let mut packet = inner.sent.get(&ns)?.clone();
        packet.rx_sequence = inner.rx_expected;
        Some(packet)
    }

    /// Applies the choke/NAK/NR fields common to INFORMATION and INFORMATION_ACK.
    fn apply_flow_fields(inner: &mut CircuitInner, packet: &NetRomPacket, out: &mut Vec<NetRomPacket>) {
        inner.remote_choked = packet.choke;
        Self::acknowledge(inner, packet.rx_sequence);
        if packet.nak {
            match Self::retransmit(inner, packet.rx_sequence) {
                Some(frame) => {
                    debug!("NAK: resending NS {}", packet.rx_sequence);
                    inner.stats.retransmissions += 1;
                    out.push(frame);
                }
                None => debug!("NAK for NS {} which is not buffered", packet.rx_sequence),
            }
        }
    }

    /// Handles an INFORMATION frame: flow fields, then in-order delivery with
    /// out-of-order buffering. Returns acks, retransmissions and any data the
    /// opened window now lets through.
    pub fn handle_information(&self, packet: &NetRomPacket) -> Vec<NetRomPacket> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut out = Vec::new();
        if !inner.state.is_established() {
            debug!("INFORMATION on circuit in {:?}", inner.state);
            return out;
        }
        Self::apply_flow_fields(inner, packet, &mut out);

        let ns = packet.tx_sequence % SEQUENCE_MODULUS;
        if ns == inner.rx_expected {
            Self::deliver(inner, packet.payload.clone());
            inner.rx_expected = sequence::next(ns);
            while let Some(data) = inner.received.remove(&inner.rx_expected) {
                Self::deliver(inner, data);
                inner.rx_expected = sequence::next(inner.rx_expected);
            }
            out.push(self.information_ack(inner, false));
        } else if sequence::distance(inner.rx_expected, ns) < inner.window {
            trace!("Buffering out-of-order NS {} (expecting {})", ns, inner.rx_expected);
            inner.stats.out_of_order += 1;
            inner.received.entry(ns).or_insert_with(|| packet.payload.clone());
            out.push(self.information_ack(inner, true));
        } else {
            trace!("Duplicate NS {} (expecting {})", ns, inner.rx_expected);
            inner.stats.duplicates += 1;
            out.push(self.information_ack(inner, false));
        }

        out.extend(self.pump(inner));
        out
    }

    /// Handles an INFORMATION_ACK: advance the watermark, honour choke/NAK,
    /// then send queued data.
    pub fn handle_information_ack(&self, packet: &NetRomPacket) -> Vec<NetRomPacket> {
        let mut inner = self.inner.lock();
        let mut out = Vec::new();
        if !inner.state.is_established() {
            return out;
        }
        Self::apply_flow_fields(&mut inner, packet, &mut out);
        out.extend(self.pump(&mut inner));
        out
    }

    fn deliver(inner: &mut CircuitInner, data: Vec<u8>) {
        inner.stats.record_delivered(data.len());
        if let Some(delivery) = &inner.delivery {
            if delivery.send(data).is_err() {
                debug!("Circuit stream reader gone, dropping data");
            }
        }
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Writes packets to the owning link, logging failures.
    pub fn transmit(&self, packets: Vec<NetRomPacket>) {
        for packet in packets {
            trace!("TX {}", packet);
            if let Err(err) = self.sink.send_packet(&packet) {
                warn!("Failed to send {} on {}: {}", packet, self.sink.link_id(), err);
            }
        }
    }
}
