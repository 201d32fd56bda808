#![warn(missing_docs)]

//! netrom-circuit: circuit state machine, windowed delivery and the
//! node-wide circuit registry.

/// Circuit record, flow control and reassembly.
pub mod circuit;
mod circuit_state;
/// Table of live circuits.
pub mod registry;
/// Per-circuit transfer counters.
pub mod statistics;
/// Stream handle over an established circuit.
pub mod stream;

pub use circuit::{Circuit, CircuitAddress, ConnectOutcome, PacketSink};
pub use circuit_state::CircuitState;
pub use registry::CircuitRegistry;
pub use statistics::CircuitStatistics;
pub use stream::CircuitStream;
