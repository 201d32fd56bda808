#![warn(missing_docs)]

//! netrom-node: link handlers, routing and the node service on top of the
//! circuit layer.

/// Node-wide shared state.
pub mod context;
/// Sending half of an attached link.
pub mod link;
/// Per-link receive loop and opcode dispatch.
pub mod link_handler;
/// Route announcements and outbound connects.
pub mod node_service;
/// Routing table persistence.
pub mod route_store;
/// NetROM and INP3 routing table.
pub mod routing;
/// Local service lookup.
pub mod service;
/// Time utilities for the node.
pub mod time;

pub use context::{NodeContext, NodeStatistics};
pub use link::LinkSender;
pub use link_handler::LinkHandler;
pub use node_service::{Announcer, ConnectCanceller, NodeService, PendingConnect};
pub use route_store::RouteStore;
pub use routing::{LearnContext, Route, RouteMetric, RoutingTable};
pub use service::{Service, ServiceRegistry, StaticServiceRegistry};
pub use time::{Clock, ManualClock, SystemClock};
