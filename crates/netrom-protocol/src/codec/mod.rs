//! NetROM packet serialization and deserialization.
//!
//! Provides binary encoding/decoding of NetROM packets exchanged between nodes.
//!
//! # Module Organization
//!
//! - [`encoder`] - Packet encoding to the 20-byte header + payload wire format
//! - [`decoder`] - Packet decoding and opcode-specific body validation

pub mod decoder;
pub mod encoder;


pub use decoder::PacketDecoder;
pub use encoder::PacketEncoder;

/// NR byte bit asking the peer to stop sending.
pub const CHOKE_FLAG: u8 = 0x80;
/// NR byte bit asking the peer to resend the named sequence.
pub const NAK_FLAG: u8 = 0x40;
/// NR byte bits holding the sequence.
pub const SEQUENCE_MASK: u8 = 0x3F;
