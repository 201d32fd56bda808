//! Integration tests for the netrom-node crate.
//!
//! Nodes run in-process with their links joined by in-memory frame pipes, so
//! every test exercises the real reader threads, codecs and routing.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant, SystemTime},
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use netrom_circuit::{Circuit, CircuitAddress, CircuitState, CircuitStream};
use netrom_core::{
    callsign::Callsign,
    config::NodeConfig,
    error::ErrorKind,
    transport::{memory_link_pair, memory_pipe},
};
use netrom_node::{
    LinkHandler, LinkSender, ManualClock, NodeContext, NodeService, Route, RouteStore, RoutingTable, Service,
    StaticServiceRegistry,
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

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

struct TestNode {
    ctx: Arc<NodeContext>,
    service: NodeService,
    services: Arc<StaticServiceRegistry>,
}

impl TestNode {
    fn new(callsign: &str, alias: &str) -> Self {
        let services = Arc::new(StaticServiceRegistry::new());
        let ctx = Arc::new(NodeContext::new(
            NodeConfig::default(),
            call(callsign),
            Some(call(alias)),
            services.clone(),
        ));
        TestNode { service: NodeService::new(ctx.clone()), ctx, services }
    }

    /// Binds a service to this node's callsign; accepted streams arrive on the receiver.
    fn listen(&self) -> Receiver<CircuitStream> {
        let (tx, rx) = unbounded();
        self.services.register(self.ctx.callsign().clone(), Arc::new(ChannelService(tx)));
        rx
    }

    fn has_route(&self, target: &str) -> bool {
        self.ctx.routes().best_route_to(&call(target), self.ctx.now()).is_some()
    }
}

fn join(a: &TestNode, b: &TestNode) {
    let (a_end, b_end) = memory_link_pair();
    a.ctx.attach_link(b.ctx.callsign().clone(), 0, a_end).unwrap();
    b.ctx.attach_link(a.ctx.callsign().clone(), 0, b_end).unwrap();
}

#[test]
fn test_announce_connect_and_exchange_data() {
    let a = TestNode::new("GB7AAA", "A1");
    let b = TestNode::new("GB7BBB", "B1");
    let accepted = a.listen();
    join(&a, &b);

    assert_eq!(a.service.broadcast_announcement(), 1);
    wait_until("B to learn A", || b.has_route("A1"));

    let b_stream = b.service.connect_to_remote_node(&call("A1"), &call("M0ABC")).unwrap();
    let a_stream = accepted.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(a_stream.circuit().address().user, call("M0ABC"));
    assert_eq!(a_stream.circuit().address().origin_node, call("GB7BBB"));

    b_stream.send(b"hello").unwrap();
    assert_eq!(a_stream.recv_timeout(Duration::from_secs(5)).unwrap(), Some(b"hello".to_vec()));
    a_stream.send(b"73").unwrap();
    assert_eq!(b_stream.recv_timeout(Duration::from_secs(5)).unwrap(), Some(b"73".to_vec()));

    b_stream.close();
    assert!(a_stream.recv().is_err());
    wait_until("both registries to drain", || a.ctx.circuits().is_empty() && b.ctx.circuits().is_empty());
    assert_eq!(b_stream.circuit().state(), CircuitState::Disconnected);
}

#[test]
fn test_connect_through_intermediate_node() {
    let a = TestNode::new("GB7AAA", "A1");
    let b = TestNode::new("GB7BBB", "B1");
    let c = TestNode::new("GB7CCC", "C1");
    let accepted = a.listen();
    join(&a, &b);
    join(&b, &c);

    a.service.broadcast_announcement();
    wait_until("B to learn A", || b.has_route("GB7AAA"));
    c.service.broadcast_announcement();
    wait_until("B to learn C", || b.has_route("GB7CCC"));
    b.service.broadcast_announcement();
    wait_until("C to learn A", || c.has_route("A1"));

    let route = c.ctx.routes().best_route_to(&call("A1"), c.ctx.now()).unwrap();
    assert_eq!(route.neighbour, call("GB7BBB"));

    let c_stream = c.service.connect_to_remote_node(&call("A1"), &call("G0XYZ")).unwrap();
    let a_stream = accepted.recv_timeout(Duration::from_secs(5)).unwrap();
    c_stream.send(b"via B").unwrap();
    assert_eq!(a_stream.recv_timeout(Duration::from_secs(5)).unwrap(), Some(b"via B".to_vec()));
    assert!(b.ctx.circuits().is_empty());
    assert!(b.ctx.stats().packets_forwarded >= 2);
}

#[test]
fn test_connect_by_alias_to_alias_bound_service() {
    let a = TestNode::new("GB7AAA", "A1");
    let b = TestNode::new("GB7BBB", "B1");
    let (tx, accepted) = unbounded();
    a.services.register(call("A1"), Arc::new(ChannelService(tx)));
    join(&a, &b);
    a.service.broadcast_announcement();
    wait_until("B to learn A", || b.has_route("A1"));

    let b_stream = b.service.connect_to_remote_node(&call("A1"), &call("M0ABC")).unwrap();
    let a_stream = accepted.recv_timeout(Duration::from_secs(5)).unwrap();
    b_stream.send(b"by alias").unwrap();
    assert_eq!(a_stream.recv_timeout(Duration::from_secs(5)).unwrap(), Some(b"by alias".to_vec()));
    assert_eq!(a.ctx.stats().connects_refused, 0);
}

#[test]
fn test_late_connect_ack_closes_remote_circuit() {
    let a = TestNode::new("GB7AAA", "A1");
    let b = TestNode::new("GB7BBB", "B1");
    let accepted = a.listen();
    join(&a, &b);
    a.service.broadcast_announcement();
    wait_until("B to learn A", || b.has_route("A1"));

    // Given up on before A's answer can be processed.
    drop(b.service.begin_connect(&call("A1"), &call("M0ABC")).unwrap());
    let a_stream = accepted.recv_timeout(Duration::from_secs(5)).unwrap();
    wait_until("both registries to drain", || a.ctx.circuits().is_empty() && b.ctx.circuits().is_empty());
    assert!(a_stream.recv().is_err());
}

#[test]
fn test_abandoning_a_connected_circuit_disconnects() {
    let a = TestNode::new("GB7AAA", "A1");
    let b = TestNode::new("GB7BBB", "B1");
    let accepted = a.listen();
    join(&a, &b);
    a.service.broadcast_announcement();
    wait_until("B to learn A", || b.has_route("A1"));

    let pending = b.service.begin_connect(&call("A1"), &call("M0ABC")).unwrap();
    let circuit = pending.circuit().clone();
    wait_until("the ack to connect B's circuit", || circuit.state() == CircuitState::Connected);
    drop(pending);

    let a_stream = accepted.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(a_stream.recv().is_err());
    wait_until("both registries to drain", || a.ctx.circuits().is_empty() && b.ctx.circuits().is_empty());
    assert_eq!(circuit.state(), CircuitState::Disconnected);
}

#[test]
fn test_connect_refused_without_service() {
    let a = TestNode::new("GB7AAA", "A1");
    let b = TestNode::new("GB7BBB", "B1");
    join(&a, &b);
    a.service.broadcast_announcement();
    wait_until("B to learn A", || b.has_route("GB7AAA"));

    let err = b.service.connect_to_remote_node(&call("GB7AAA"), &call("M0ABC")).unwrap_err();
    assert!(matches!(err, ErrorKind::ConnectRefused(_)));
    assert!(b.ctx.circuits().is_empty());
    wait_until("A to count the refusal", || a.ctx.stats().connects_refused == 1);
}

#[test]
fn test_connect_times_out_and_cleans_up() {
    let a = TestNode::new("GB7AAA", "A1");
    let b = TestNode::new("GB7BBB", "B1");
    join(&a, &b);
    // B believes GB7DDD is behind A; A has never heard of it.
    b.ctx.routes().upsert(Route::netrom(call("GB7DDD"), None, call("GB7AAA"), 0, 200, b.ctx.now()));

    let pending = b.service.begin_connect(&call("GB7DDD"), &call("M0ABC")).unwrap();
    assert_eq!(b.ctx.circuits().len(), 1);
    let err = pending.wait(Duration::from_millis(100)).unwrap_err();
    assert!(matches!(err, ErrorKind::ConnectTimeout(_)));
    assert!(b.ctx.circuits().is_empty());
    wait_until("A to drop the request", || a.ctx.stats().no_route == 1);
}

#[test]
fn test_connect_can_be_cancelled() {
    let a = TestNode::new("GB7AAA", "A1");
    let b = TestNode::new("GB7BBB", "B1");
    join(&a, &b);
    b.ctx.routes().upsert(Route::netrom(call("GB7DDD"), None, call("GB7AAA"), 0, 200, b.ctx.now()));

    let pending = b.service.begin_connect(&call("GB7DDD"), &call("M0ABC")).unwrap();
    let circuit = pending.circuit().clone();
    let canceller = pending.canceller();
    let waiter = thread::spawn(move || pending.wait(Duration::from_secs(60)));
    canceller.cancel();

    let err = waiter.join().unwrap().unwrap_err();
    assert!(matches!(err, ErrorKind::ConnectCancelled));
    assert_eq!(circuit.state(), CircuitState::Disconnected);
    assert!(b.ctx.circuits().is_empty());
}

#[test]
fn test_no_route_is_an_error() {
    let b = TestNode::new("GB7BBB", "B1");
    let err = b.service.begin_connect(&call("GB7ZZZ"), &call("M0ABC")).unwrap_err();
    assert!(matches!(err, ErrorKind::RouteNotFound(_)));
}

#[test]
fn test_announcer_runs_until_stopped() {
    let config = NodeConfig { announce_interval: Duration::from_millis(20), ..NodeConfig::default() };
    let services = Arc::new(StaticServiceRegistry::new());
    let ctx = Arc::new(NodeContext::new(config, call("GB7AAA"), Some(call("A1")), services.clone()));
    let a = TestNode { service: NodeService::new(ctx.clone()), ctx, services };
    let b = TestNode::new("GB7BBB", "B1");
    join(&a, &b);

    let announcer = a.service.spawn_announcer().unwrap();
    wait_until("B to learn A", || b.has_route("A1"));
    announcer.stop();
}

#[test]
fn test_learned_routes_age_out() {
    let a = TestNode::new("GB7AAA", "A1");
    let clock = Arc::new(ManualClock::new(SystemTime::now()));
    let config = NodeConfig::default();
    let max_age = config.route_max_age;
    let services = Arc::new(StaticServiceRegistry::new());
    let ctx = Arc::new(
        NodeContext::new(config, call("GB7BBB"), Some(call("B1")), services.clone()).with_clock(clock.clone()),
    );
    let b = TestNode { service: NodeService::new(ctx.clone()), ctx, services };
    join(&a, &b);

    a.service.broadcast_announcement();
    // One NetROM and one INP3 route to A.
    wait_until("B to learn A", || b.ctx.routes().len() == 2);
    assert!(b.has_route("A1"));

    clock.advance(max_age + Duration::from_secs(1));
    assert!(!b.has_route("A1"));
    let err = b.service.begin_connect(&call("A1"), &call("M0ABC")).unwrap_err();
    assert!(matches!(err, ErrorKind::RouteNotFound(_)));
    assert_eq!(b.ctx.routes().purge_expired(b.ctx.now()), 2);
    assert!(b.ctx.routes().is_empty());
}

#[test]
fn test_link_eof_tears_down_its_circuits() {
    let node = TestNode::new("GB7AAA", "A1");
    let (writer, _far_reader) = memory_pipe();
    let link = Arc::new(LinkSender::new(call("GB7AAA"), call("GB7BBB"), 0, Box::new(writer)));

    let address = CircuitAddress {
        source: call("GB7AAA"),
        destination: call("GB7BBB"),
        user: call("GB7AAA"),
        origin_node: call("GB7AAA"),
    };
    let (circuit, _outcome) = Circuit::outbound(address, 16, 4, link.clone());
    node.ctx.circuits().register(circuit.clone(), link.id()).unwrap();

    let (closed_writer, reader) = memory_pipe();
    drop(closed_writer);
    LinkHandler::new(node.ctx.clone(), link, Box::new(reader)).run();

    assert!(node.ctx.circuits().is_empty());
    assert_eq!(circuit.state(), CircuitState::Disconnected);
}

#[test]
fn test_route_store_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("routes.bin");
    let now = SystemTime::now();

    let table = RoutingTable::new(Duration::from_secs(7200));
    table.upsert(Route::netrom(call("GB7AAA"), Some(call("A1")), call("GB7BBB"), 0, 144, now));
    table.upsert(Route::inp3(call("GB7CCC"), None, call("GB7BBB"), 1, 120, 2, now));
    assert_eq!(RouteStore::save(&path, &table).unwrap(), 2);

    let restored = RoutingTable::new(Duration::from_secs(7200));
    assert_eq!(RouteStore::load(&path, &restored, now).unwrap(), 2);
    let route = restored.best_route_to(&call("A1"), now).unwrap();
    assert_eq!(route.destination, call("GB7AAA"));

    let later = now + Duration::from_secs(3 * 3600);
    let stale = RoutingTable::new(Duration::from_secs(7200));
    assert_eq!(RouteStore::load(&path, &stale, later).unwrap(), 0);
}
