//! Per-link receive loop and opcode dispatch.
//!
//! Each attached link gets one `LinkHandler` running on its own thread. Frames
//! are classified as routing broadcasts or NetROM packets; packets addressed
//! to this node go to the circuit handlers, everything else is forwarded.

use std::sync::Arc;

use netrom_circuit::{Circuit, PacketSink};
use netrom_core::{
    constants::{PID_NETROM, ROUTING_SIGNATURE},
    transport::{Ax25Frame, FrameKind, FrameReader},
};
use netrom_protocol::{
    codec::PacketDecoder,
    inp3::decode_inp3_routing_body,
    nodes::decode_nodes_broadcast,
    packet::{ConnectAckInfo, ConnectRequestInfo, NetRomPacket, Opcode},
};
use tracing::{debug, info, trace, warn};

use crate::{
    context::{NodeContext, NodeCounters},
    link::LinkSender,
    routing::LearnContext,
};

/// Reads one link and drives the node's reaction to everything on it.
pub struct LinkHandler {
    ctx: Arc<NodeContext>,
    link: Arc<LinkSender>,
    reader: Box<dyn FrameReader>,
}

impl LinkHandler {
    /// Creates a handler for `link`; `reader` is the link's receiving half.
    pub fn new(ctx: Arc<NodeContext>, link: Arc<LinkSender>, reader: Box<dyn FrameReader>) -> Self {
        LinkHandler { ctx, link, reader }
    }

    /// Reads until EOF or an I/O error, then tears down every circuit the
    /// link carried.
    pub fn run(mut self) {
        loop {
            match self.reader.read_frame() {
                Ok(Some(frame)) => self.handle_frame(&frame),
                Ok(None) => {
                    info!("{} to {} closed", self.link.id(), self.link.neighbour());
                    break;
                }
                Err(err) => {
                    warn!("{} read failed: {}", self.link.id(), err);
                    break;
                }
            }
        }
        self.teardown();
    }

    fn teardown(&self) {
        self.ctx.detach_link(self.link.id());
        let circuits = self.ctx.circuits().remove_owned_by(self.link.id());
        if !circuits.is_empty() {
            info!("Tearing down {} circuits of {}", circuits.len(), self.link.id());
        }
        for circuit in circuits {
            circuit.abort();
        }
    }

    /// Classifies and handles one received frame.
    pub fn handle_frame(&self, frame: &Ax25Frame) {
        if frame.pid != PID_NETROM {
            trace!("Ignoring PID {:02x} from {}", frame.pid, frame.source);
            return;
        }
        if frame.source == *self.ctx.callsign() {
            return;
        }
        match (frame.kind, frame.payload.first()) {
            (FrameKind::Unnumbered, Some(&ROUTING_SIGNATURE)) => self.handle_nodes_broadcast(frame),
            (FrameKind::Information, Some(&ROUTING_SIGNATURE)) => self.handle_routing_information(frame),
            _ => match PacketDecoder::decode(&frame.payload) {
                Ok(packet) => {
                    NodeCounters::bump(&self.ctx.counters.packets_received);
                    self.handle_packet(packet);
                }
                Err(err) => {
                    NodeCounters::bump(&self.ctx.counters.decode_errors);
                    debug!("Dropping undecodable frame from {}: {}", frame.source, err);
                }
            },
        }
    }

    fn learn_context<'a>(&'a self, frame: &'a Ax25Frame) -> LearnContext<'a> {
        LearnContext {
            local: self.ctx.callsign(),
            neighbour: &frame.source,
            port: self.link.port(),
            now: self.ctx.now(),
        }
    }

    fn handle_nodes_broadcast(&self, frame: &Ax25Frame) {
        match decode_nodes_broadcast(&frame.payload) {
            Ok(broadcast) => {
                let config = self.ctx.config();
                let learned = self.ctx.routes().learn_nodes(
                    &self.learn_context(frame),
                    &broadcast,
                    config.neighbour_quality,
                    config.min_quality,
                );
                debug!("NODES from {}: {} routes", frame.source, learned);
            }
            Err(err) => {
                NodeCounters::bump(&self.ctx.counters.decode_errors);
                debug!("Bad NODES broadcast from {}: {}", frame.source, err);
            }
        }
    }

    fn handle_routing_information(&self, frame: &Ax25Frame) {
        match decode_inp3_routing_body(&frame.payload) {
            Ok(adverts) => {
                let learned = self.ctx.routes().learn_inp3(
                    &self.learn_context(frame),
                    &adverts,
                    self.ctx.config().inp3_hop_penalty,
                );
                debug!("RIF from {}: {} of {} adverts", frame.source, learned, adverts.len());
            }
            Err(err) => {
                NodeCounters::bump(&self.ctx.counters.decode_errors);
                debug!("Bad RIF from {}: {}", frame.source, err);
            }
        }
    }

    /// Sink or forward one decoded packet.
    pub fn handle_packet(&self, packet: NetRomPacket) {
        trace!("{} RX {}", self.link.id(), packet);
        if self.ctx.is_local(&packet.destination) {
            self.sink(packet);
        } else {
            self.forward(packet);
        }
    }

    // ------------------------------------------------------------------
    // Sink path
    // ------------------------------------------------------------------

    fn sink(&self, packet: NetRomPacket) {
        match packet.opcode {
            Opcode::ConnectRequest => self.on_connect_request(&packet),
            Opcode::ConnectAck => self.on_connect_ack(&packet),
            Opcode::DisconnectRequest => self.on_disconnect_request(&packet),
            Opcode::DisconnectAck => self.on_disconnect_ack(&packet),
            Opcode::Information => self.on_information(&packet),
            Opcode::InformationAck => self.on_information_ack(&packet),
            Opcode::Reset => self.on_reset(&packet),
        }
    }

    fn find_circuit(&self, packet: &NetRomPacket) -> Option<Arc<Circuit>> {
        let circuit = self.ctx.circuits().lookup(packet.circuit_index, packet.circuit_id);
        if circuit.is_none() {
            NodeCounters::bump(&self.ctx.counters.unknown_circuit_frames);
        }
        circuit
    }

    /// Reply addressed back to the sender of `packet`, echoing its circuit numbers.
    fn reply(&self, packet: &NetRomPacket, opcode: Opcode) -> NetRomPacket {
        NetRomPacket::new(
            packet.destination.clone(),
            packet.source.clone(),
            self.ctx.config().initial_ttl,
            opcode,
            packet.circuit_index,
            packet.circuit_id,
        )
    }

    fn send(&self, packet: &NetRomPacket) {
        if let Err(err) = self.link.send_packet(packet) {
            warn!("Failed to send {} on {}: {}", packet, self.link.id(), err);
        }
    }

    fn on_connect_request(&self, packet: &NetRomPacket) {
        let info = match ConnectRequestInfo::parse(&packet.payload) {
            Ok(info) => info,
            Err(err) => {
                debug!("CONNECT_REQUEST from {} with bad body: {}", packet.source, err);
                return;
            }
        };

        let registry = self.ctx.circuits();
        if let Some(existing) = registry.find_by_remote(&packet.source, packet.circuit_index, packet.circuit_id) {
            debug!("Repeated CONNECT_REQUEST from {}", packet.source);
            existing.transmit(existing.repeat_connect_ack());
            return;
        }

        let config = self.ctx.config();
        let sink: Arc<dyn PacketSink> = self.link.clone();
        let circuit = Circuit::inbound(packet, &info, config.initial_ttl, config.max_window, sink);

        let Some(service) = self.ctx.local_service(&packet.destination) else {
            info!("Refusing {} from {} at {}: no service", packet.destination, info.user, packet.source);
            NodeCounters::bump(&self.ctx.counters.connects_refused);
            circuit.transmit(circuit.refuse());
            return;
        };

        if let Err(err) = registry.register(circuit.clone(), self.link.id()) {
            warn!("Refusing {} from {}: {}", packet.destination, packet.source, err);
            NodeCounters::bump(&self.ctx.counters.connects_refused);
            circuit.transmit(circuit.refuse());
            return;
        }

        match circuit.accept() {
            Ok((packets, stream)) => {
                circuit.transmit(packets);
                let (index, id) = circuit.my_circuit();
                info!(
                    "Circuit {}/{} from {} via {} connected to {}",
                    index,
                    id,
                    info.user,
                    packet.source,
                    service.name()
                );
                service.on_connect(stream);
            }
            Err(err) => {
                let (index, id) = circuit.my_circuit();
                registry.remove(index, id);
                warn!("Could not accept circuit from {}: {}", packet.source, err);
            }
        }
    }

    fn on_connect_ack(&self, packet: &NetRomPacket) {
        let Some(circuit) = self.find_circuit(packet) else {
            warn!("CONNECT_ACK from {} for unknown circuit {}/{}", packet.source, packet.circuit_index, packet.circuit_id);
            // The remote opened a circuit we no longer want; close its end.
            if !packet.is_refusal() {
                if let Ok(info) = ConnectAckInfo::parse(&packet.payload) {
                    let mut close = self.reply(packet, Opcode::DisconnectRequest);
                    close.circuit_index = info.index;
                    close.circuit_id = info.id;
                    self.send(&close);
                }
            }
            return;
        };
        circuit.transmit(circuit.handle_connect_ack(packet));
        if circuit.state().is_terminal() {
            self.ctx.circuits().remove(packet.circuit_index, packet.circuit_id);
        }
    }

    fn on_disconnect_request(&self, packet: &NetRomPacket) {
        match self.find_circuit(packet) {
            Some(circuit) => {
                circuit.transmit(circuit.handle_disconnect_request());
                self.ctx.circuits().remove(packet.circuit_index, packet.circuit_id);
                debug!("Circuit {}/{} closed by {}", packet.circuit_index, packet.circuit_id, packet.source);
            }
            None => {
                debug!("DISCONNECT_REQUEST from {} for unknown circuit", packet.source);
                self.send(&self.reply(packet, Opcode::DisconnectAck));
            }
        }
    }

    fn on_disconnect_ack(&self, packet: &NetRomPacket) {
        let Some(circuit) = self.find_circuit(packet) else {
            warn!(
                "DISCONNECT_ACK from {} for unknown circuit {}/{}",
                packet.source, packet.circuit_index, packet.circuit_id
            );
            return;
        };
        circuit.handle_disconnect_ack();
        self.ctx.circuits().remove(packet.circuit_index, packet.circuit_id);
    }

    fn on_information(&self, packet: &NetRomPacket) {
        let Some(circuit) = self.find_circuit(packet) else {
            debug!(
                "INFORMATION from {} for dead circuit {}/{}, disconnecting",
                packet.source, packet.circuit_index, packet.circuit_id
            );
            self.send(&self.reply(packet, Opcode::DisconnectRequest));
            return;
        };
        circuit.transmit(circuit.handle_information(packet));
    }

    fn on_information_ack(&self, packet: &NetRomPacket) {
        let Some(circuit) = self.find_circuit(packet) else {
            warn!(
                "INFORMATION_ACK from {} for unknown circuit {}/{}",
                packet.source, packet.circuit_index, packet.circuit_id
            );
            return;
        };
        circuit.transmit(circuit.handle_information_ack(packet));
    }

    fn on_reset(&self, packet: &NetRomPacket) {
        NodeCounters::bump(&self.ctx.counters.resets_received);
        warn!("RESET from {} for circuit {}/{}", packet.source, packet.circuit_index, packet.circuit_id);
        if !self.ctx.config().teardown_on_reset {
            return;
        }
        if let Some(circuit) = self.ctx.circuits().remove(packet.circuit_index, packet.circuit_id) {
            circuit.abort();
        }
    }

    // ------------------------------------------------------------------
    // Forward path
    // ------------------------------------------------------------------

    fn forward(&self, mut packet: NetRomPacket) {
        if packet.ttl <= 1 {
            NodeCounters::bump(&self.ctx.counters.ttl_expired);
            debug!("TTL expired for {} -> {}", packet.source, packet.destination);
            return;
        }

        let Some(route) = self.ctx.routes().best_route_to(&packet.destination, self.ctx.now()) else {
            NodeCounters::bump(&self.ctx.counters.no_route);
            debug!("No route to {}, dropping {}", packet.destination, packet.opcode);
            return;
        };

        let next_hop = match self.ctx.link_to(&route.neighbour, route.port) {
            Ok(link) => link,
            Err(err) => {
                NodeCounters::bump(&self.ctx.counters.no_route);
                debug!("Cannot reach {} for {}: {}", route.neighbour, packet.destination, err);
                return;
            }
        };

        packet.ttl -= 1;
        match next_hop.send_packet(&packet) {
            Ok(()) => {
                NodeCounters::bump(&self.ctx.counters.packets_forwarded);
                trace!("Forwarded {} via {}", packet, route.neighbour);
            }
            Err(err) => warn!("Forward to {} failed: {}", route.neighbour, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::{unbounded, Receiver, Sender};
    use netrom_circuit::{CircuitState, CircuitStream};
    use netrom_core::{
        callsign::Callsign,
        config::NodeConfig,
        transport::{memory_link_pair, memory_pipe, LinkEndpoints, MemoryReader},
    };
    use netrom_protocol::packet::ConnectAckInfo;

    use super::*;
    use crate::{
        routing::Route,
        service::{Service, StaticServiceRegistry},
    };

    struct ChannelService(Sender<CircuitStream>);

    impl Service for ChannelService {
        fn name(&self) -> &str {
            "channel"
        }

        fn on_connect(&self, stream: CircuitStream) {
            let _ = self.0.send(stream);
        }
    }

    fn call(s: &str) -> Callsign {
        s.parse().unwrap()
    }

    struct Fixture {
        ctx: Arc<NodeContext>,
        handler: LinkHandler,
        /// What the node wrote on the link under test
        out: MemoryReader,
        accepted: Receiver<CircuitStream>,
        services: Arc<StaticServiceRegistry>,
    }

    impl Fixture {
        fn new(config: NodeConfig) -> Self {
            let services = Arc::new(StaticServiceRegistry::new());
            let (tx, accepted) = unbounded();
            services.register(call("A1"), Arc::new(ChannelService(tx)));
            let ctx = Arc::new(NodeContext::new(config, call("GB7AAA"), Some(call("A1")), services.clone()));

            let (writer, out) = memory_pipe();
            let link = Arc::new(LinkSender::new(call("GB7AAA"), call("B1"), 0, Box::new(writer)));
            let (_, idle_reader) = memory_pipe();
            let handler = LinkHandler::new(ctx.clone(), link, Box::new(idle_reader));
            Fixture { ctx, handler, out, accepted, services }
        }

        fn sent(&mut self) -> NetRomPacket {
            let frame = self.out.read_frame().unwrap().unwrap();
            PacketDecoder::decode(&frame.payload).unwrap()
        }
    }

    fn connect_request(window: u8, index: u8, id: u8) -> NetRomPacket {
        let info = ConnectRequestInfo { window, user: call("M0ABC"), node: call("B1") };
        NetRomPacket::new(call("B1"), call("A1"), 16, Opcode::ConnectRequest, index, id)
            .with_payload(info.to_payload())
    }

    #[test]
    fn test_inbound_connect_accepted_by_service() {
        let mut fx = Fixture::new(NodeConfig::default());
        fx.handler.handle_packet(connect_request(4, 3, 7));

        let ack = fx.sent();
        assert_eq!(ack.opcode, Opcode::ConnectAck);
        assert!(!ack.is_refusal());
        assert_eq!((ack.circuit_index, ack.circuit_id), (3, 7));
        let body = ConnectAckInfo::parse(&ack.payload).unwrap();
        let circuit = fx.ctx.circuits().lookup(body.index, body.id).unwrap();
        assert_eq!(circuit.state(), CircuitState::Connected);
        assert_eq!(circuit.window(), 4);

        let stream = fx.accepted.try_recv().unwrap();
        let info = NetRomPacket::new(call("B1"), call("A1"), 16, Opcode::Information, body.index, body.id)
            .with_payload(b"hello".to_vec());
        fx.handler.handle_packet(info);
        assert_eq!(stream.recv_timeout(Duration::from_secs(1)).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(fx.sent().opcode, Opcode::InformationAck);
    }

    #[test]
    fn test_connect_to_callsign_reaches_alias_service() {
        let mut fx = Fixture::new(NodeConfig::default());
        let mut request = connect_request(4, 3, 7);
        request.destination = call("GB7AAA");
        fx.handler.handle_packet(request);

        assert!(!fx.sent().is_refusal());
        assert_eq!(fx.ctx.circuits().len(), 1);
        assert!(fx.accepted.try_recv().is_ok());
    }

    #[test]
    fn test_connect_without_service_refused() {
        let mut fx = Fixture::new(NodeConfig::default());
        fx.services.unregister(&call("A1"));
        fx.handler.handle_packet(connect_request(4, 3, 7));

        let ack = fx.sent();
        assert!(ack.is_refusal());
        assert!(fx.ctx.circuits().is_empty());
        assert_eq!(fx.ctx.stats().connects_refused, 1);
    }

    #[test]
    fn test_connect_ack_for_unknown_circuit_closes_remote() {
        let mut fx = Fixture::new(NodeConfig::default());
        let ack = NetRomPacket::new(call("B1"), call("A1"), 16, Opcode::ConnectAck, 9, 9)
            .with_payload(ConnectAckInfo { window: 4, index: 40, id: 41 }.to_payload());
        fx.handler.handle_packet(ack);

        let reply = fx.sent();
        assert_eq!(reply.opcode, Opcode::DisconnectRequest);
        assert_eq!((reply.circuit_index, reply.circuit_id), (40, 41));
        assert_eq!(reply.destination, call("B1"));
        assert_eq!(reply.source, call("A1"));
    }

    #[test]
    fn test_repeated_connect_request_reacked() {
        let mut fx = Fixture::new(NodeConfig::default());
        fx.handler.handle_packet(connect_request(4, 3, 7));
        let first = fx.sent();
        fx.handler.handle_packet(connect_request(4, 3, 7));
        let second = fx.sent();
        assert_eq!(first, second);
        assert_eq!(fx.ctx.circuits().len(), 1);
    }

    #[test]
    fn test_information_for_dead_circuit_gets_disconnect() {
        let mut fx = Fixture::new(NodeConfig::default());
        let info = NetRomPacket::new(call("B1"), call("A1"), 16, Opcode::Information, 9, 9)
            .with_payload(b"x".to_vec());
        fx.handler.handle_packet(info);
        let reply = fx.sent();
        assert_eq!(reply.opcode, Opcode::DisconnectRequest);
        assert_eq!((reply.circuit_index, reply.circuit_id), (9, 9));
        assert_eq!(reply.destination, call("B1"));
        assert_eq!(fx.ctx.stats().unknown_circuit_frames, 1);
    }

    #[test]
    fn test_unknown_acks_counted_not_answered() {
        let mut fx = Fixture::new(NodeConfig::default());
        for opcode in [Opcode::InformationAck, Opcode::DisconnectAck] {
            fx.handler.handle_packet(NetRomPacket::new(call("B1"), call("A1"), 16, opcode, 9, 9));
        }
        assert_eq!(fx.ctx.stats().unknown_circuit_frames, 2);
        // The next frame on the link is this marker, so neither ack was answered.
        fx.handler.link.send_frame(&Ax25Frame::netrom(call("X"), call("Y"), vec![])).unwrap();
        assert_eq!(fx.out.read_frame().unwrap().unwrap().source, call("X"));
    }

    #[test]
    fn test_disconnect_request_removes_circuit() {
        let mut fx = Fixture::new(NodeConfig::default());
        fx.handler.handle_packet(connect_request(4, 3, 7));
        let body = ConnectAckInfo::parse(&fx.sent().payload).unwrap();
        let stream = fx.accepted.try_recv().unwrap();

        fx.handler.handle_packet(NetRomPacket::new(
            call("B1"),
            call("A1"),
            16,
            Opcode::DisconnectRequest,
            body.index,
            body.id,
        ));
        assert_eq!(fx.sent().opcode, Opcode::DisconnectAck);
        assert!(fx.ctx.circuits().is_empty());
        assert!(stream.recv().is_err());
    }

    #[test]
    fn test_reset_teardown_is_configurable() {
        let config = NodeConfig { teardown_on_reset: true, ..NodeConfig::default() };
        let mut fx = Fixture::new(config);
        fx.handler.handle_packet(connect_request(4, 3, 7));
        let body = ConnectAckInfo::parse(&fx.sent().payload).unwrap();

        fx.handler.handle_packet(NetRomPacket::new(call("B1"), call("A1"), 16, Opcode::Reset, body.index, body.id));
        assert_eq!(fx.ctx.stats().resets_received, 1);
        assert!(fx.ctx.circuits().is_empty());

        let mut fx = Fixture::new(NodeConfig::default());
        fx.handler.handle_packet(connect_request(4, 3, 7));
        let body = ConnectAckInfo::parse(&fx.sent().payload).unwrap();
        fx.handler.handle_packet(NetRomPacket::new(call("B1"), call("A1"), 16, Opcode::Reset, body.index, body.id));
        assert_eq!(fx.ctx.circuits().len(), 1);
    }

    /// Attaches a live link to `neighbour`; the returned far end sees what
    /// the node sends on it.
    fn attach_neighbour(ctx: &Arc<NodeContext>, neighbour: &str) -> LinkEndpoints {
        let (ours, theirs) = memory_link_pair();
        ctx.attach_link(call(neighbour), 0, ours).unwrap();
        theirs
    }

    #[test]
    fn test_forward_decrements_ttl() {
        let fx = Fixture::new(NodeConfig::default());
        let mut next_hop = attach_neighbour(&fx.ctx, "C1");
        fx.ctx.routes().upsert(Route::netrom(call("D1"), None, call("C1"), 0, 150, fx.ctx.now()));

        let packet = NetRomPacket::new(call("B1"), call("D1"), 2, Opcode::DisconnectRequest, 1, 1);
        fx.handler.handle_packet(packet);
        let frame = next_hop.reader.read_frame().unwrap().unwrap();
        assert_eq!(frame.destination, call("C1"));
        let relayed = PacketDecoder::decode(&frame.payload).unwrap();
        assert_eq!(relayed.ttl, 1);
        assert_eq!(fx.ctx.stats().packets_forwarded, 1);
    }

    #[test]
    fn test_forward_with_ttl_one_dropped() {
        let fx = Fixture::new(NodeConfig::default());
        let _next_hop = attach_neighbour(&fx.ctx, "C1");
        fx.ctx.routes().upsert(Route::netrom(call("D1"), None, call("C1"), 0, 150, fx.ctx.now()));

        fx.handler.handle_packet(NetRomPacket::new(call("B1"), call("D1"), 1, Opcode::DisconnectRequest, 1, 1));
        assert_eq!(fx.ctx.stats().ttl_expired, 1);
        assert_eq!(fx.ctx.stats().packets_forwarded, 0);
    }

    #[test]
    fn test_forward_without_route_dropped() {
        let fx = Fixture::new(NodeConfig::default());
        fx.handler.handle_packet(NetRomPacket::new(call("B1"), call("D1"), 5, Opcode::DisconnectRequest, 1, 1));
        assert_eq!(fx.ctx.stats().no_route, 1);
    }

    #[test]
    fn test_nodes_broadcast_learned() {
        use netrom_protocol::nodes::{encode_nodes_broadcast, NodesBroadcast, NodesEntry};

        let fx = Fixture::new(NodeConfig::default());
        let body = encode_nodes_broadcast(&NodesBroadcast {
            alias: Some(call("BBB")),
            entries: vec![NodesEntry { destination: call("C1"), alias: None, neighbour: call("C1"), quality: 255 }],
        });
        fx.handler.handle_frame(&Ax25Frame::nodes_broadcast(call("B1"), body));
        let route = fx.ctx.routes().best_route_to(&call("C1"), fx.ctx.now()).unwrap();
        assert_eq!(route.neighbour, call("B1"));
        assert!(fx.ctx.routes().best_route_to(&call("BBB"), fx.ctx.now()).is_some());
    }

    #[test]
    fn test_garbage_frame_counted() {
        let fx = Fixture::new(NodeConfig::default());
        fx.handler.handle_frame(&Ax25Frame::netrom(call("B1"), call("GB7AAA"), vec![1, 2, 3]));
        assert_eq!(fx.ctx.stats().decode_errors, 1);
    }
}
