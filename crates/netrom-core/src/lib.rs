#![warn(missing_docs)]

//! netrom-core: foundational types shared by every layer of the node.
//!
//! This crate provides the minimal set of primitives the protocol, circuit and
//! node crates agree on:
//! - Callsigns and their AX.25 shifted encoding
//! - AX.25 frames and the link transport traits the node consumes
//! - Node configuration
//! - Error handling
//! - Protocol constants

/// Protocol constants shared across layers.
pub mod constants {
    /// AX.25 protocol identifier carried by every NetROM frame.
    pub const PID_NETROM: u8 = 0xCF;
    /// Leading byte of NODES broadcasts and INP3 routing information frames.
    pub const ROUTING_SIGNATURE: u8 = 0xFF;
    /// Size of an encoded callsign (six shifted characters plus SSID byte).
    pub const CALLSIGN_LEN: usize = 7;
    /// Size of the fixed NetROM header (network + transport layer).
    pub const NETROM_HEADER_SIZE: usize = 20;
    /// Sequence numbers occupy the low six bits of the NR byte.
    pub const SEQUENCE_MODULUS: u8 = 64;
    /// Highest quality value a NetROM route can carry.
    pub const MAX_QUALITY: u8 = 255;
    /// INP3 trip times at or beyond this value withdraw a route.
    pub const INP3_HORIZON: u16 = 60_000;
    /// Largest information payload carried by one NetROM frame.
    pub const MAX_INFO_LEN: usize = 236;
    /// Largest window a circuit can use with six-bit sequence numbers.
    pub const MAX_WINDOW: u8 = 32;
    /// AX.25 destination used for NODES broadcasts.
    pub const NODES_BROADCAST_CALL: &str = "NODES";
}

/// AX.25 callsigns.
pub mod callsign;
/// Configuration options for the node.
pub mod config;
/// Error types and results.
pub mod error;
/// AX.25 frames and link transport abstractions.
pub mod transport;

pub use callsign::Callsign;
pub use config::NodeConfig;
pub use error::{DecodingErrorKind, ErrorKind, Result};
pub use transport::{Ax25Connector, Ax25Frame, FrameKind, FrameReader, FrameWriter, LinkEndpoints, LinkId};
