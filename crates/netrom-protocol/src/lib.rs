#![warn(missing_docs)]

//! netrom-protocol: NetROM wire packets and routing broadcast formats.

/// NetROM packet encoding and decoding.
pub mod codec;
/// INP3 routing information frames.
pub mod inp3;
/// Classic NODES routing broadcasts.
pub mod nodes;
/// NetROM packet types.
pub mod packet;
/// Modulo-64 sequence number arithmetic.
pub mod sequence;

pub use codec::{PacketDecoder, PacketEncoder};
pub use inp3::{decode_inp3_routing_body, encode_inp3_routing_body, Inp3Advert, Inp3Option, Inp3OptionType};
pub use nodes::{decode_nodes_broadcast, encode_nodes_broadcast, NodesBroadcast, NodesEntry};
pub use packet::{ConnectAckInfo, ConnectRequestInfo, NetRomPacket, Opcode};
