//! Error kinds surfaced by the node engine.
//!
//! Nothing in the engine is fatal: decoding failures are logged and dropped by
//! the link handlers, everything else comes back as a result value.

use std::io;

use thiserror::Error;

/// Convenience result alias used across the workspace.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Top level error kind.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A wire frame could not be decoded.
    #[error("decoding error: {0}")]
    DecodingError(#[from] DecodingErrorKind),
    /// A callsign string or SSID was out of range.
    #[error("invalid callsign: {0}")]
    InvalidCallsign(String),
    /// A frame referenced a circuit that is not registered.
    #[error("no circuit registered for index {index} id {id}")]
    UnknownCircuit {
        /// Circuit index from the frame header
        index: u8,
        /// Circuit id from the frame header
        id: u8,
    },
    /// The remote node refused the connect request.
    #[error("connection to {0} refused")]
    ConnectRefused(String),
    /// No connect acknowledgment arrived in time.
    #[error("connection to {0} timed out")]
    ConnectTimeout(String),
    /// The caller abandoned a pending connect.
    #[error("connection attempt cancelled")]
    ConnectCancelled,
    /// No live route exists toward the destination.
    #[error("no route to {0}")]
    RouteNotFound(String),
    /// The circuit has been disconnected.
    #[error("circuit is closed")]
    CircuitClosed,
    /// Every circuit index is in use.
    #[error("circuit table is full")]
    CircuitTableFull,
    /// The persisted route table is corrupt.
    #[error("route store error: {0}")]
    RouteStore(String),
    /// Wrapper around an I/O error from a link or file.
    #[error("io error: {0}")]
    IOError(#[from] io::Error),
}

/// Reasons a wire frame failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodingErrorKind {
    /// The buffer ended before the field being read.
    #[error("frame truncated: needed {needed} bytes, had {available}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes present
        available: usize,
    },
    /// A callsign field held non-callsign bytes.
    #[error("malformed callsign field")]
    Callsign,
    /// The opcode nibble is not a NetROM opcode.
    #[error("unknown opcode {0}")]
    Opcode(u8),
    /// A routing frame did not start with the 0xFF signature.
    #[error("missing routing signature")]
    Signature,
}
