//! NetROM packet decoding.
//!
//! Decoding is a pure transformation: any failure comes back as a
//! `DecodingErrorKind` for the link handler to log before dropping the frame.

use std::convert::TryFrom;

use netrom_core::{
    callsign::Callsign,
    constants::{CALLSIGN_LEN, NETROM_HEADER_SIZE},
    error::DecodingErrorKind,
};

use super::{CHOKE_FLAG, NAK_FLAG, SEQUENCE_MASK};
use crate::packet::{ConnectAckInfo, ConnectRequestInfo, NetRomPacket, Opcode};

/// Deserializes packets from network bytes.
pub struct PacketDecoder;

impl PacketDecoder {
    /// Decodes one packet: fixed header, then opcode-specific body checks.
    pub fn decode(data: &[u8]) -> Result<NetRomPacket, DecodingErrorKind> {
        if data.len() < NETROM_HEADER_SIZE {
            return Err(DecodingErrorKind::Truncated {
                needed: NETROM_HEADER_SIZE,
                available: data.len(),
            });
        }

        let destination = Callsign::from_bytes(&data[..CALLSIGN_LEN])?;
        let source = Callsign::from_bytes(&data[CALLSIGN_LEN..2 * CALLSIGN_LEN])?;
        let transport = &data[2 * CALLSIGN_LEN..NETROM_HEADER_SIZE];
        let ttl = transport[0];
        let opcode = Opcode::try_from(transport[1])?;
        let rx_byte = transport[5];
        let payload = &data[NETROM_HEADER_SIZE..];

        match opcode {
            Opcode::ConnectRequest => {
                ConnectRequestInfo::parse(payload)?;
            }
            Opcode::ConnectAck => {
                ConnectAckInfo::parse(payload)?;
            }
            _ => {}
        }

        Ok(NetRomPacket {
            source,
            destination,
            ttl,
            opcode,
            circuit_index: transport[2],
            circuit_id: transport[3],
            tx_sequence: transport[4],
            rx_sequence: rx_byte & SEQUENCE_MASK,
            choke: rx_byte & CHOKE_FLAG != 0,
            nak: rx_byte & NAK_FLAG != 0,
            payload: payload.to_vec(),
        })
    }
}
