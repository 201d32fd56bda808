use std::{fmt, io};

use netrom_circuit::PacketSink;
use netrom_core::{
    callsign::Callsign,
    transport::{Ax25Frame, FrameWriter, LinkId},
};
use netrom_protocol::{codec::PacketEncoder, packet::NetRomPacket};
use parking_lot::Mutex;
use tracing::trace;

/// Sending half of one attached AX.25 link.
///
/// Writes are serialized by the link's own lock so frames from different
/// circuits never interleave; no registry or routing lock is held while
/// writing.
pub struct LinkSender {
    id: LinkId,
    local: Callsign,
    neighbour: Callsign,
    port: u8,
    writer: Mutex<Box<dyn FrameWriter>>,
}

impl fmt::Debug for LinkSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSender")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("neighbour", &self.neighbour)
            .field("port", &self.port)
            .finish()
    }
}

impl LinkSender {
    /// Wraps the writer of a link from `local` to `neighbour`.
    pub fn new(local: Callsign, neighbour: Callsign, port: u8, writer: Box<dyn FrameWriter>) -> Self {
        LinkSender { id: LinkId::next(), local, neighbour, port, writer: Mutex::new(writer) }
    }

    /// Process-unique id of this link.
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Station at the far end.
    pub fn neighbour(&self) -> &Callsign {
        &self.neighbour
    }

    /// AX.25 port the link runs on.
    pub fn port(&self) -> u8 {
        self.port
    }

    /// Writes one raw frame.
    pub fn send_frame(&self, frame: &Ax25Frame) -> io::Result<()> {
        self.writer.lock().write_frame(frame)
    }

    /// Sends a routing broadcast as a UI frame to `NODES`.
    pub fn send_nodes_broadcast(&self, body: Vec<u8>) -> io::Result<()> {
        self.send_frame(&Ax25Frame::nodes_broadcast(self.local.clone(), body))
    }

    /// Sends an INP3 routing information frame as an I-frame to the neighbour.
    pub fn send_routing_information(&self, body: Vec<u8>) -> io::Result<()> {
        self.send_frame(&Ax25Frame::netrom(self.local.clone(), self.neighbour.clone(), body))
    }
}

impl PacketSink for LinkSender {
    fn link_id(&self) -> LinkId {
        self.id
    }

    fn send_packet(&self, packet: &NetRomPacket) -> io::Result<()> {
        trace!("{} TX {}", self.id, packet);
        let bytes = PacketEncoder::encode(packet);
        self.send_frame(&Ax25Frame::netrom(self.local.clone(), self.neighbour.clone(), bytes))
    }
}
