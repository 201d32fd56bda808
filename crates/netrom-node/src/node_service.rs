//! Node-level operations: route announcements and originating circuits.

use std::{
    fmt,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use netrom_circuit::{Circuit, CircuitAddress, CircuitStream, ConnectOutcome, PacketSink};
use netrom_core::{
    callsign::Callsign,
    error::{ErrorKind, Result},
};
use netrom_protocol::{
    inp3::{encode_inp3_routing_body, Inp3Advert},
    nodes::{encode_nodes_broadcast, NodesBroadcast, NodesEntry},
};
use tracing::{debug, info, warn};

use crate::{
    context::NodeContext,
    link::LinkSender,
    routing::{Route, RouteMetric},
};

/// NODES entries per broadcast frame; keeps the frame within one AX.25 I-field.
const NODES_PER_FRAME: usize = 11;
/// INP3 advertisements per routing information frame.
const ADVERTS_PER_FRAME: usize = 10;

/// Identity-level operations of a node.
#[derive(Debug, Clone)]
pub struct NodeService {
    ctx: Arc<NodeContext>,
}

impl NodeService {
    /// Wraps a shared node context.
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        NodeService { ctx }
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    /// Operating callsign.
    pub fn callsign(&self) -> &Callsign {
        self.ctx.callsign()
    }

    /// Operating alias.
    pub fn alias(&self) -> Option<&Callsign> {
        self.ctx.alias()
    }

    // ------------------------------------------------------------------
    // Announcements
    // ------------------------------------------------------------------

    /// Best live routes of one kind worth telling `link`'s neighbour about:
    /// everything not learned from or leading to that neighbour.
    fn advertisable(&self, link: &LinkSender, inp3: bool) -> Vec<Route> {
        self.ctx
            .routes()
            .best_routes_where(self.ctx.now(), |route| route.is_inp3() == inp3)
            .into_iter()
            .filter(|route| route.neighbour != *link.neighbour() && route.destination != *link.neighbour())
            .collect()
    }

    /// NODES broadcast for `link`: this node at full quality, then the best
    /// NetROM route per destination.
    pub fn nodes_announcement(&self, link: &LinkSender) -> Vec<NodesEntry> {
        let mut entries = vec![NodesEntry {
            destination: self.ctx.callsign().clone(),
            alias: self.ctx.alias().cloned(),
            neighbour: self.ctx.callsign().clone(),
            quality: self.ctx.config().self_quality,
        }];
        for route in self.advertisable(link, false) {
            if let RouteMetric::NetRom { quality } = route.metric {
                entries.push(NodesEntry {
                    destination: route.destination,
                    alias: route.alias,
                    neighbour: route.neighbour,
                    quality,
                });
            }
        }
        entries
    }

    /// INP3 advertisements for `link`: this node at zero hops, then the best
    /// INP3 route per destination.
    pub fn inp3_announcement(&self, link: &LinkSender) -> Vec<Inp3Advert> {
        let mut own = Inp3Advert::new(self.ctx.callsign().clone(), 0, 0);
        if let Some(alias) = self.ctx.alias() {
            own = own.with_alias(alias);
        }
        let mut adverts = vec![own];
        for route in self.advertisable(link, true) {
            if let RouteMetric::Inp3 { trip_time, hops } = route.metric {
                let mut advert = Inp3Advert::new(route.destination, hops, trip_time);
                if let Some(alias) = &route.alias {
                    advert = advert.with_alias(alias);
                }
                adverts.push(advert);
            }
        }
        adverts
    }

    /// Sends a NODES broadcast and an INP3 RIF on every attached link.
    /// Returns the number of links announced on.
    pub fn broadcast_announcement(&self) -> usize {
        let links = self.ctx.links();
        let mut announced = 0;
        for link in &links {
            match self.announce_on(link) {
                Ok(()) => announced += 1,
                Err(err) => warn!("Announcement on {} failed: {}", link.id(), err),
            }
        }
        debug!("Announced on {} of {} links", announced, links.len());
        announced
    }

    fn announce_on(&self, link: &LinkSender) -> std::io::Result<()> {
        for chunk in self.nodes_announcement(link).chunks(NODES_PER_FRAME) {
            let body = encode_nodes_broadcast(&NodesBroadcast {
                alias: self.ctx.alias().cloned(),
                entries: chunk.to_vec(),
            });
            link.send_nodes_broadcast(body)?;
        }
        for chunk in self.inp3_announcement(link).chunks(ADVERTS_PER_FRAME) {
            link.send_routing_information(encode_inp3_routing_body(chunk))?;
        }
        Ok(())
    }

    /// Purges expired routes and drops circuits that are closed or whose
    /// close was never acknowledged. Returns (routes, circuits) removed.
    pub fn sweep(&self) -> (usize, usize) {
        let routes = self.ctx.routes().purge_expired(self.ctx.now());
        let circuits = self.ctx.circuits().reap_stale(self.ctx.config().disconnect_timeout);
        if routes + circuits > 0 {
            debug!("Sweep dropped {} routes and {} circuits", routes, circuits);
        }
        (routes, circuits)
    }

    /// Announces now and then every `announce_interval`, sweeping stale
    /// routes and circuits each round, until the returned handle is stopped
    /// or dropped.
    pub fn spawn_announcer(&self) -> Result<Announcer> {
        let (shutdown, stop) = bounded::<()>(1);
        let service = self.clone();
        let interval = self.ctx.config().announce_interval;
        let handle = thread::Builder::new().name("netrom-announcer".into()).spawn(move || loop {
            service.broadcast_announcement();
            service.sweep();
            select! {
                recv(stop) -> _ => break,
                default(interval) => {}
            }
        })?;
        Ok(Announcer { shutdown, handle: Some(handle) })
    }

    // ------------------------------------------------------------------
    // Outbound circuits
    // ------------------------------------------------------------------

    /// Sends a CONNECT_REQUEST toward `target` (callsign or alias) on behalf
    /// of `user` and returns a handle to wait for the answer.
    pub fn begin_connect(&self, target: &Callsign, user: &Callsign) -> Result<PendingConnect> {
        let route = self
            .ctx
            .routes()
            .best_route_to(target, self.ctx.now())
            .ok_or_else(|| ErrorKind::RouteNotFound(target.to_string()))?;
        let link = self.ctx.link_to(&route.neighbour, route.port)?;

        let config = self.ctx.config();
        let address = CircuitAddress {
            source: self.ctx.callsign().clone(),
            destination: route.destination.clone(),
            user: user.clone(),
            origin_node: self.ctx.callsign().clone(),
        };
        let sink: Arc<dyn PacketSink> = link.clone();
        let (circuit, outcome) = Circuit::outbound(address, config.initial_ttl, config.default_window, sink);
        self.ctx.circuits().register(circuit.clone(), link.id())?;
        info!("Connecting to {} via {}", route.destination, route.neighbour);
        circuit.transmit(vec![circuit.connect_request()]);

        let (cancel_tx, cancel_rx) = bounded(1);
        Ok(PendingConnect {
            ctx: self.ctx.clone(),
            target: target.clone(),
            circuit,
            outcome,
            cancel_tx,
            cancel_rx,
            finished: false,
        })
    }

    /// Connects to `target` and blocks until it answers or the configured
    /// connect timeout passes.
    pub fn connect_to_remote_node(&self, target: &Callsign, user: &Callsign) -> Result<CircuitStream> {
        let timeout = self.ctx.config().connect_timeout;
        self.begin_connect(target, user)?.wait(timeout)
    }
}

/// An outbound connect waiting for its CONNECT_ACK.
///
/// Dropping it without a successful [`wait`](Self::wait) abandons the circuit.
pub struct PendingConnect {
    ctx: Arc<NodeContext>,
    target: Callsign,
    circuit: Arc<Circuit>,
    outcome: Receiver<ConnectOutcome>,
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
    finished: bool,
}

impl fmt::Debug for PendingConnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingConnect")
            .field("target", &self.target)
            .field("circuit", &self.circuit)
            .finish()
    }
}

impl PendingConnect {
    /// The circuit being connected.
    pub fn circuit(&self) -> &Arc<Circuit> {
        &self.circuit
    }

    /// Handle that aborts the wait from another thread.
    pub fn canceller(&self) -> ConnectCanceller {
        ConnectCanceller { tx: self.cancel_tx.clone() }
    }

    /// Blocks until the remote answers, the wait is cancelled or `timeout`
    /// passes.
    pub fn wait(mut self, timeout: Duration) -> Result<CircuitStream> {
        let result = select! {
            recv(self.outcome) -> outcome => match outcome {
                Ok(ConnectOutcome::Connected(stream)) => Ok(stream),
                Ok(ConnectOutcome::Refused) => Err(ErrorKind::ConnectRefused(self.target.to_string())),
                Ok(ConnectOutcome::Failed) | Err(_) => Err(ErrorKind::CircuitClosed),
            },
            recv(self.cancel_rx) -> _ => Err(ErrorKind::ConnectCancelled),
            default(timeout) => Err(ErrorKind::ConnectTimeout(self.target.to_string())),
        };
        match &result {
            Ok(_) => {
                self.finished = true;
                info!("Connected to {}", self.target);
            }
            Err(err) => debug!("Connect to {} failed: {}", self.target, err),
        }
        result
    }

    /// A circuit the ack already connected is closed properly and stays
    /// registered until its DISCONNECT_ACK or the sweep; one still connecting
    /// is dropped at once.
    fn abandon(&self) {
        let packets = self.circuit.begin_disconnect();
        let closing = !packets.is_empty();
        self.circuit.transmit(packets);
        if !closing {
            let (index, id) = self.circuit.my_circuit();
            self.ctx.circuits().remove(index, id);
        }
    }
}

impl Drop for PendingConnect {
    fn drop(&mut self) {
        if !self.finished {
            self.abandon();
        }
    }
}

/// Cancels a [`PendingConnect`] wait.
#[derive(Debug, Clone)]
pub struct ConnectCanceller {
    tx: Sender<()>,
}

impl ConnectCanceller {
    /// Wakes the waiter with `ConnectCancelled`. Extra calls do nothing.
    pub fn cancel(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Handle to the periodic announcer thread.
#[derive(Debug)]
pub struct Announcer {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Announcer {
    /// Stops the announcer and waits for its thread.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Announcer thread panicked");
            }
        }
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
