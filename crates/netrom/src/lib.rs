#![warn(missing_docs)]

//! NetROM: a small public API facade for the workspace.
//!
//! This crate re-exports the types most applications need to run a NetROM
//! node over links provided by an AX.25 stack:
//!
//! - Node identity and shared state (`NodeContext`, `NodeService`, `NodeConfig`)
//! - Local services (`Service`, `StaticServiceRegistry`) and circuit streams
//! - Routing (`RoutingTable`, `Route`, `RouteStore`)
//! - The link transport seam (`Ax25Connector`, `FrameReader`, `FrameWriter`)
//!
//! Example
//! ```ignore
//! use std::sync::Arc;
//! use netrom::prelude::*;
//!
//! let services = Arc::new(StaticServiceRegistry::new());
//! let ctx = Arc::new(NodeContext::new(
//!     NodeConfig::default(),
//!     "GB7AAA".parse().unwrap(),
//!     Some("A1".parse().unwrap()),
//!     services,
//! ));
//! ctx.attach_link("GB7BBB".parse().unwrap(), 0, endpoints_from_your_ax25_stack)?;
//!
//! let node = NodeService::new(ctx);
//! let _announcer = node.spawn_announcer()?;
//! let stream = node.connect_to_remote_node(&"GB7BBB".parse().unwrap(), &"M0ABC".parse().unwrap())?;
//! stream.send(b"hello")?;
//! ```

// Core primitives
pub use netrom_core::{
    callsign::Callsign,
    config::NodeConfig,
    error::{DecodingErrorKind, ErrorKind, Result},
    transport::{
        memory_link_pair, Ax25Connector, Ax25Frame, FrameKind, FrameReader, FrameWriter, LinkEndpoints, LinkId,
    },
};
// Wire formats
pub use netrom_protocol::{
    codec::{PacketDecoder, PacketEncoder},
    inp3::Inp3Advert,
    nodes::{NodesBroadcast, NodesEntry},
    packet::{NetRomPacket, Opcode},
};
// Circuits
pub use netrom_circuit::{Circuit, CircuitState, CircuitStatistics, CircuitStream};
// Node
pub use netrom_node::{
    Announcer, Clock, ConnectCanceller, NodeContext, NodeService, NodeStatistics, PendingConnect, Route,
    RouteMetric, RouteStore, RoutingTable, Service, ServiceRegistry, StaticServiceRegistry, SystemClock,
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Callsign, CircuitStream, ErrorKind, LinkEndpoints, NodeConfig, NodeContext, NodeService, Service,
        StaticServiceRegistry,
    };
}
