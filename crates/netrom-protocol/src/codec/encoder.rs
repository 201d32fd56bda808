//! NetROM packet encoding.
//!
//! Header layout (20 bytes):
//!
//! ```text
//! | dest (7) | source (7) | ttl | opcode | index | id | NS | NR+flags | payload |
//! ```

use netrom_core::constants::NETROM_HEADER_SIZE;

use super::{CHOKE_FLAG, NAK_FLAG, SEQUENCE_MASK};
use crate::packet::NetRomPacket;

/// Serializes packets to network bytes.
pub struct PacketEncoder;

impl PacketEncoder {
    /// Encodes a packet into a fresh buffer.
    pub fn encode(packet: &NetRomPacket) -> Vec<u8> {
        let mut out = Vec::with_capacity(NETROM_HEADER_SIZE + packet.payload.len());
        Self::encode_into(&mut out, packet);
        out
    }

    /// Appends an encoded packet to `out`. Writing into a `Vec` cannot fail, so
    /// the buffer always ends on a frame boundary.
    pub fn encode_into(out: &mut Vec<u8>, packet: &NetRomPacket) {
        out.reserve(NETROM_HEADER_SIZE + packet.payload.len());
        out.extend_from_slice(&packet.destination.to_bytes());
        out.extend_from_slice(&packet.source.to_bytes());
        out.push(packet.ttl);
        out.push(packet.opcode.to_u8());
        out.push(packet.circuit_index);
        out.push(packet.circuit_id);
        out.push(packet.tx_sequence);
        out.push(Self::rx_byte(packet));
        out.extend_from_slice(&packet.payload);
    }

    fn rx_byte(packet: &NetRomPacket) -> u8 {
        let mut value = packet.rx_sequence & SEQUENCE_MASK;
        if packet.choke {
            value |= CHOKE_FLAG;
        }
        if packet.nak {
            value |= NAK_FLAG;
        }
        value
    }
}
