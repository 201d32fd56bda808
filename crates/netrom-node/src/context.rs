//! Node-wide shared state.
//!
//! One `NodeContext` is built at startup and shared (behind an `Arc`) by every
//! link handler and by the node service. It owns the circuit registry, the
//! routing table and the table of attached links.

use std::{
    collections::HashMap,
    fmt, io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::SystemTime,
};

use netrom_circuit::CircuitRegistry;
use netrom_core::{
    callsign::Callsign,
    config::NodeConfig,
    error::{ErrorKind, Result},
    transport::{Ax25Connector, LinkEndpoints, LinkId},
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    link::LinkSender,
    link_handler::LinkHandler,
    routing::RoutingTable,
    service::{Service, ServiceRegistry},
    time::{Clock, SystemClock},
};

/// Snapshot of the node's traffic counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStatistics {
    /// NetROM packets decoded from any link
    pub packets_received: u64,
    /// Packets relayed toward another node
    pub packets_forwarded: u64,
    /// Packets dropped because their TTL ran out
    pub ttl_expired: u64,
    /// Packets dropped for lack of a live route
    pub no_route: u64,
    /// Frames that failed to decode
    pub decode_errors: u64,
    /// Frames addressed to a circuit this node does not have
    pub unknown_circuit_frames: u64,
    /// RESET packets received
    pub resets_received: u64,
    /// Inbound connects refused
    pub connects_refused: u64,
}

#[derive(Default)]
pub(crate) struct NodeCounters {
    pub packets_received: AtomicU64,
    pub packets_forwarded: AtomicU64,
    pub ttl_expired: AtomicU64,
    pub no_route: AtomicU64,
    pub decode_errors: AtomicU64,
    pub unknown_circuit_frames: AtomicU64,
    pub resets_received: AtomicU64,
    pub connects_refused: AtomicU64,
}

impl NodeCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> NodeStatistics {
        NodeStatistics {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            ttl_expired: self.ttl_expired.load(Ordering::Relaxed),
            no_route: self.no_route.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unknown_circuit_frames: self.unknown_circuit_frames.load(Ordering::Relaxed),
            resets_received: self.resets_received.load(Ordering::Relaxed),
            connects_refused: self.connects_refused.load(Ordering::Relaxed),
        }
    }
}

/// Everything a node's link handlers and service share.
pub struct NodeContext {
    config: NodeConfig,
    callsign: Callsign,
    alias: Option<Callsign>,
    circuits: CircuitRegistry,
    routes: RoutingTable,
    links: Mutex<HashMap<LinkId, Arc<LinkSender>>>,
    services: Arc<dyn ServiceRegistry>,
    connector: Option<Arc<dyn Ax25Connector>>,
    clock: Arc<dyn Clock>,
    pub(crate) counters: NodeCounters,
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("callsign", &self.callsign)
            .field("alias", &self.alias)
            .field("circuits", &self.circuits)
            .field("routes", &self.routes)
            .field("links", &self.links.lock().len())
            .finish()
    }
}

impl NodeContext {
    /// Creates a node identity with no links attached.
    pub fn new(
        config: NodeConfig,
        callsign: Callsign,
        alias: Option<Callsign>,
        services: Arc<dyn ServiceRegistry>,
    ) -> Self {
        let routes = RoutingTable::new(config.route_max_age);
        NodeContext {
            config,
            callsign,
            alias,
            circuits: CircuitRegistry::new(),
            routes,
            links: Mutex::new(HashMap::new()),
            services,
            connector: None,
            clock: Arc::new(SystemClock),
            counters: NodeCounters::default(),
        }
    }

    /// Sets the collaborator used to open links to neighbours on demand.
    pub fn with_connector(mut self, connector: Arc<dyn Ax25Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replaces the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// This node's callsign.
    pub fn callsign(&self) -> &Callsign {
        &self.callsign
    }

    /// This node's alias.
    pub fn alias(&self) -> Option<&Callsign> {
        self.alias.as_ref()
    }

    /// True if `call` addresses this node by callsign or alias.
    pub fn is_local(&self, call: &Callsign) -> bool {
        call == &self.callsign || self.alias.as_ref() == Some(call)
    }

    /// Live circuits.
    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    /// Routing table.
    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    /// Local service lookup.
    pub fn services(&self) -> &Arc<dyn ServiceRegistry> {
        &self.services
    }

    /// Service for a circuit addressed to `destination`. A service bound to
    /// either of the node's names answers for both.
    pub fn local_service(&self, destination: &Callsign) -> Option<Arc<dyn Service>> {
        self.services.find_service_for_callsign(destination).or_else(|| {
            if !self.is_local(destination) {
                return None;
            }
            std::iter::once(&self.callsign)
                .chain(self.alias.as_ref())
                .filter(|name| *name != destination)
                .find_map(|name| self.services.find_service_for_callsign(name))
        })
    }

    /// Current time from the node's clock.
    pub fn now(&self) -> SystemTime {
        self.clock.now()
    }

    /// Snapshot of the traffic counters.
    pub fn stats(&self) -> NodeStatistics {
        self.counters.snapshot()
    }

    /// All attached links.
    pub fn links(&self) -> Vec<Arc<LinkSender>> {
        self.links.lock().values().cloned().collect()
    }

    /// Attached link by id.
    pub fn link(&self, id: LinkId) -> Option<Arc<LinkSender>> {
        self.links.lock().get(&id).cloned()
    }

    /// Attaches an established link to `neighbour` and starts its reader
    /// thread. The thread runs until the link reports EOF or an error.
    pub fn attach_link(
        self: &Arc<Self>,
        neighbour: Callsign,
        port: u8,
        endpoints: LinkEndpoints,
    ) -> Result<Arc<LinkSender>> {
        let LinkEndpoints { reader, writer } = endpoints;
        let link = Arc::new(LinkSender::new(self.callsign.clone(), neighbour, port, writer));
        self.links.lock().insert(link.id(), link.clone());

        let handler = LinkHandler::new(self.clone(), link.clone(), reader);
        let spawned = thread::Builder::new()
            .name(format!("netrom-{}", link.id()))
            .spawn(move || handler.run());
        if let Err(err) = spawned {
            self.links.lock().remove(&link.id());
            return Err(err.into());
        }
        info!("Attached {} to {} on port {}", link.id(), link.neighbour(), port);
        Ok(link)
    }

    /// Forgets a link; its circuits are left to the caller.
    pub fn detach_link(&self, id: LinkId) -> Option<Arc<LinkSender>> {
        self.links.lock().remove(&id)
    }

    /// Returns a link to `neighbour`, opening one through the connector when
    /// none is attached.
    pub fn link_to(self: &Arc<Self>, neighbour: &Callsign, port: u8) -> Result<Arc<LinkSender>> {
        let existing = self
            .links
            .lock()
            .values()
            .find(|link| link.neighbour() == neighbour && link.port() == port)
            .cloned();
        if let Some(link) = existing {
            return Ok(link);
        }

        let Some(connector) = self.connector.clone() else {
            debug!("No link to {} and no connector", neighbour);
            return Err(ErrorKind::IOError(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("no link to {}", neighbour),
            )));
        };
        // Connect without holding the link table lock.
        let endpoints = connector.connect(port, &self.callsign, neighbour)?;
        self.attach_link(neighbour.clone(), port, endpoints)
    }
}
