//! NetROM packet types.
//!
//! A `NetRomPacket` is the network + transport layer unit carried inside an
//! AX.25 I-frame with PID 0xCF:
//! - `Opcode`: the seven transport opcodes
//! - `ConnectRequestInfo` / `ConnectAckInfo`: typed views of the connect payloads

use std::{convert::TryFrom, fmt};

use netrom_core::{
    callsign::Callsign,
    constants::CALLSIGN_LEN,
    error::DecodingErrorKind,
};

// ============================================================================
// Opcodes
// ============================================================================

/// NetROM transport opcode (low nibble of the opcode byte).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Open a circuit
    ConnectRequest = 1,
    /// Accept or refuse a circuit
    ConnectAck = 2,
    /// Close a circuit
    DisconnectRequest = 3,
    /// Confirm a close
    DisconnectAck = 4,
    /// Sequenced data
    Information = 5,
    /// Acknowledge / NAK sequenced data
    InformationAck = 6,
    /// Reset the circuit
    Reset = 7,
}

impl Opcode {
    /// Returns the wire value of this opcode.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = DecodingErrorKind;

    /// Decodes the opcode from the low nibble; the high nibble is ignored.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value & 0x0F {
            1 => Ok(Opcode::ConnectRequest),
            2 => Ok(Opcode::ConnectAck),
            3 => Ok(Opcode::DisconnectRequest),
            4 => Ok(Opcode::DisconnectAck),
            5 => Ok(Opcode::Information),
            6 => Ok(Opcode::InformationAck),
            7 => Ok(Opcode::Reset),
            other => Err(DecodingErrorKind::Opcode(other)),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::ConnectRequest => "CONN REQ",
            Opcode::ConnectAck => "CONN ACK",
            Opcode::DisconnectRequest => "DISC REQ",
            Opcode::DisconnectAck => "DISC ACK",
            Opcode::Information => "INFO",
            Opcode::InformationAck => "INFO ACK",
            Opcode::Reset => "RESET",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Packet
// ============================================================================

/// One NetROM packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetRomPacket {
    /// Originating node
    pub source: Callsign,
    /// Destination node
    pub destination: Callsign,
    /// Remaining hop budget
    pub ttl: u8,
    /// Transport opcode
    pub opcode: Opcode,
    /// Circuit index, in the receiver's numbering
    pub circuit_index: u8,
    /// Circuit id, in the receiver's numbering
    pub circuit_id: u8,
    /// Send sequence (NS)
    pub tx_sequence: u8,
    /// Receive sequence (NR), six bits
    pub rx_sequence: u8,
    /// Sender asks us to stop sending
    pub choke: bool,
    /// Sender asks for retransmission of `rx_sequence`
    pub nak: bool,
    /// Opcode dependent payload
    pub payload: Vec<u8>,
}

impl NetRomPacket {
    /// Creates a packet with zeroed sequence fields and no payload.
    pub fn new(
        source: Callsign,
        destination: Callsign,
        ttl: u8,
        opcode: Opcode,
        circuit_index: u8,
        circuit_id: u8,
    ) -> Self {
        NetRomPacket {
            source,
            destination,
            ttl,
            opcode,
            circuit_index,
            circuit_id,
            tx_sequence: 0,
            rx_sequence: 0,
            choke: false,
            nak: false,
            payload: Vec::new(),
        }
    }

    /// Sets the sequence fields.
    pub fn with_sequences(mut self, tx_sequence: u8, rx_sequence: u8) -> Self {
        self.tx_sequence = tx_sequence;
        self.rx_sequence = rx_sequence;
        self
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the choke flag.
    pub fn with_choke(mut self, choke: bool) -> Self {
        self.choke = choke;
        self
    }

    /// Sets the NAK flag.
    pub fn with_nak(mut self, nak: bool) -> Self {
        self.nak = nak;
        self
    }

    /// A CONNECT_ACK uses the choke bit to refuse the circuit.
    pub fn is_refusal(&self) -> bool {
        self.opcode == Opcode::ConnectAck && self.choke
    }
}

impl fmt::Display for NetRomPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}>{} ttl={} {} c={}/{}",
            self.source, self.destination, self.ttl, self.opcode, self.circuit_index, self.circuit_id
        )?;
        if matches!(self.opcode, Opcode::Information | Opcode::InformationAck) {
            write!(f, " ns={} nr={}", self.tx_sequence, self.rx_sequence)?;
        }
        if self.choke {
            f.write_str(" CHOKE")?;
        }
        if self.nak {
            f.write_str(" NAK")?;
        }
        if !self.payload.is_empty() {
            write!(f, " len={}", self.payload.len())?;
        }
        Ok(())
    }
}

// ============================================================================
// Connect payloads
// ============================================================================

/// Payload of a CONNECT_REQUEST.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectRequestInfo {
    /// Proposed window (frames)
    pub window: u8,
    /// User who asked for the circuit
    pub user: Callsign,
    /// Node where the user is attached
    pub node: Callsign,
}

impl ConnectRequestInfo {
    /// Wire size of the payload.
    pub const SIZE: usize = 1 + 2 * CALLSIGN_LEN;

    /// Encodes the payload.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.push(self.window);
        out.extend_from_slice(&self.user.to_bytes());
        out.extend_from_slice(&self.node.to_bytes());
        out
    }

    /// Parses the payload; trailing extension bytes are ignored.
    pub fn parse(payload: &[u8]) -> Result<Self, DecodingErrorKind> {
        if payload.len() < Self::SIZE {
            return Err(DecodingErrorKind::Truncated { needed: Self::SIZE, available: payload.len() });
        }
        Ok(ConnectRequestInfo {
            window: payload[0],
            user: Callsign::from_bytes(&payload[1..1 + CALLSIGN_LEN])?,
            node: Callsign::from_bytes(&payload[1 + CALLSIGN_LEN..Self::SIZE])?,
        })
    }
}

/// Payload of a CONNECT_ACK: accepted window and the acker's own circuit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectAckInfo {
    /// Accepted window (frames)
    pub window: u8,
    /// Acker's circuit index
    pub index: u8,
    /// Acker's circuit id
    pub id: u8,
}

impl ConnectAckInfo {
    /// Wire size of the payload.
    pub const SIZE: usize = 3;

    /// Encodes the payload.
    pub fn to_payload(&self) -> Vec<u8> {
        vec![self.window, self.index, self.id]
    }

    /// Parses the payload.
    pub fn parse(payload: &[u8]) -> Result<Self, DecodingErrorKind> {
        if payload.len() < Self::SIZE {
            return Err(DecodingErrorKind::Truncated { needed: Self::SIZE, available: payload.len() });
        }
        Ok(ConnectAckInfo { window: payload[0], index: payload[1], id: payload[2] })
    }
}
