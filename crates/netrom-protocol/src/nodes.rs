//! Classic NODES routing broadcasts.
//!
//! Sent as AX.25 UI frames to `NODES` with PID 0xCF:
//!
//! ```text
//! 0xFF | sender alias (6) | { dest (7) | alias (6) | best neighbour (7) | quality (1) }*
//! ```

use netrom_core::{
    callsign::Callsign,
    constants::{CALLSIGN_LEN, ROUTING_SIGNATURE},
    error::DecodingErrorKind,
};
use tracing::debug;

const ALIAS_LEN: usize = 6;
const HEADER_LEN: usize = 1 + ALIAS_LEN;
const ENTRY_LEN: usize = 2 * CALLSIGN_LEN + ALIAS_LEN + 1;

/// One destination advertised in a NODES broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodesEntry {
    /// Advertised node
    pub destination: Callsign,
    /// Advertised node's mnemonic
    pub alias: Option<Callsign>,
    /// Neighbour the sender uses to reach `destination`
    pub neighbour: Callsign,
    /// Sender's quality toward `destination`
    pub quality: u8,
}

/// A decoded NODES broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodesBroadcast {
    /// Sender's own mnemonic
    pub alias: Option<Callsign>,
    /// Advertised destinations
    pub entries: Vec<NodesEntry>,
}

/// Parses a NODES broadcast. Entries with unparsable callsigns are skipped and
/// a trailing partial entry is ignored.
pub fn decode_nodes_broadcast(data: &[u8]) -> Result<NodesBroadcast, DecodingErrorKind> {
    if data.len() < HEADER_LEN {
        return Err(DecodingErrorKind::Truncated { needed: HEADER_LEN, available: data.len() });
    }
    if data[0] != ROUTING_SIGNATURE {
        return Err(DecodingErrorKind::Signature);
    }
    let alias = Callsign::from_alias_bytes(&data[1..HEADER_LEN]);

    let mut entries = Vec::new();
    for chunk in data[HEADER_LEN..].chunks_exact(ENTRY_LEN) {
        match decode_entry(chunk) {
            Ok(entry) => entries.push(entry),
            Err(err) => debug!("Skipping NODES entry: {}", err),
        }
    }
    Ok(NodesBroadcast { alias, entries })
}

fn decode_entry(chunk: &[u8]) -> Result<NodesEntry, DecodingErrorKind> {
    let destination = Callsign::from_bytes(&chunk[..CALLSIGN_LEN])?;
    let alias = Callsign::from_alias_bytes(&chunk[CALLSIGN_LEN..CALLSIGN_LEN + ALIAS_LEN]);
    let neighbour = Callsign::from_bytes(&chunk[CALLSIGN_LEN + ALIAS_LEN..ENTRY_LEN - 1])?;
    Ok(NodesEntry { destination, alias, neighbour, quality: chunk[ENTRY_LEN - 1] })
}

/// Encodes a NODES broadcast.
pub fn encode_nodes_broadcast(broadcast: &NodesBroadcast) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + broadcast.entries.len() * ENTRY_LEN);
    out.push(ROUTING_SIGNATURE);
    out.extend_from_slice(&alias_field(broadcast.alias.as_ref()));
    for entry in &broadcast.entries {
        out.extend_from_slice(&entry.destination.to_bytes());
        out.extend_from_slice(&alias_field(entry.alias.as_ref()));
        out.extend_from_slice(&entry.neighbour.to_bytes());
        out.push(entry.quality);
    }
    out
}

fn alias_field(alias: Option<&Callsign>) -> [u8; ALIAS_LEN] {
    alias.map(Callsign::to_alias_bytes).unwrap_or([b' '; ALIAS_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(s: &str) -> Callsign {
        s.parse().unwrap()
    }

    #[test]
    fn test_encode_decode_broadcast() {
        let broadcast = NodesBroadcast {
            alias: Some(call("A1")),
            entries: vec![
                NodesEntry {
                    destination: call("GB7AA"),
                    alias: Some(call("A1")),
                    neighbour: call("GB7AA"),
                    quality: 255,
                },
                NodesEntry {
                    destination: call("GB7CC-3"),
                    alias: None,
                    neighbour: call("GB7DD"),
                    quality: 120,
                },
            ],
        };
        let bytes = encode_nodes_broadcast(&broadcast);
        assert_eq!(bytes.len(), 7 + 2 * 21);
        assert_eq!(decode_nodes_broadcast(&bytes).unwrap(), broadcast);
    }

    #[test]
    fn test_bad_entry_is_skipped() {
        let entry = NodesEntry {
            destination: call("GB7AA"),
            alias: None,
            neighbour: call("GB7BB"),
            quality: 100,
        };
        let broadcast = NodesBroadcast { alias: None, entries: vec![entry.clone(), entry.clone()] };
        let mut bytes = encode_nodes_broadcast(&broadcast);
        bytes[7] |= 0x01; // first entry destination
        let decoded = decode_nodes_broadcast(&bytes).unwrap();
        assert_eq!(decoded.entries, vec![entry]);
    }

    #[test]
    fn test_signature_and_length_checked() {
        assert_eq!(decode_nodes_broadcast(b"\x00ABCDEF"), Err(DecodingErrorKind::Signature));
        assert!(matches!(decode_nodes_broadcast(&[0xFF]), Err(DecodingErrorKind::Truncated { .. })));
    }
}
