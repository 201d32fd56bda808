//! AX.25 frames and link transport abstractions.
//!
//! The node never drives the AX.25 link layer itself. It reads and writes
//! whole frames through these traits; serial/TCP KISS drivers and the
//! connected-mode state machine live behind them.

use std::{
    fmt, io,
    sync::atomic::{AtomicU64, Ordering},
};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::{callsign::Callsign, constants::PID_NETROM};

/// Kind of AX.25 frame carrying the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Unnumbered information (connectionless broadcast).
    Unnumbered,
    /// Numbered information on an established link.
    Information,
}

/// A raw AX.25 frame as delivered by the link layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ax25Frame {
    /// Sending station
    pub source: Callsign,
    /// Receiving station
    pub destination: Callsign,
    /// Digipeater path, in order
    pub digipeaters: Vec<Callsign>,
    /// Protocol identifier byte
    pub pid: u8,
    /// UI or I frame
    pub kind: FrameKind,
    /// Information field
    pub payload: Vec<u8>,
}

impl Ax25Frame {
    /// Creates a NetROM I-frame between two stations.
    pub fn netrom(source: Callsign, destination: Callsign, payload: Vec<u8>) -> Self {
        Ax25Frame {
            source,
            destination,
            digipeaters: Vec::new(),
            pid: PID_NETROM,
            kind: FrameKind::Information,
            payload,
        }
    }

    /// Creates a NetROM UI broadcast addressed to `NODES`.
    pub fn nodes_broadcast(source: Callsign, payload: Vec<u8>) -> Self {
        Ax25Frame {
            source,
            destination: Callsign::nodes_broadcast(),
            digipeaters: Vec::new(),
            pid: PID_NETROM,
            kind: FrameKind::Unnumbered,
            payload,
        }
    }
}

/// Identifies one physical link (one AX.25 session) for the node's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl LinkId {
    /// Allocates a fresh process-unique link id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        LinkId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Receiving half of a link.
pub trait FrameReader: Send {
    /// Blocks until the next frame arrives. `Ok(None)` signals the link closed.
    fn read_frame(&mut self) -> io::Result<Option<Ax25Frame>>;
}

/// Sending half of a link.
pub trait FrameWriter: Send {
    /// Writes one complete frame to the link.
    fn write_frame(&mut self, frame: &Ax25Frame) -> io::Result<()>;
}

/// Both halves of an established link.
pub struct LinkEndpoints {
    /// Receiving half
    pub reader: Box<dyn FrameReader>,
    /// Sending half
    pub writer: Box<dyn FrameWriter>,
}

impl fmt::Debug for LinkEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkEndpoints")
            .field("reader", &"<reader>")
            .field("writer", &"<writer>")
            .finish()
    }
}

/// Establishes connected-mode AX.25 links to neighbours on demand.
pub trait Ax25Connector: Send + Sync {
    /// Opens a link from `local` to `remote` on the given port.
    fn connect(&self, port: u8, local: &Callsign, remote: &Callsign) -> io::Result<LinkEndpoints>;
}

/// In-memory frame reader backed by a crossbeam channel.
#[derive(Debug)]
pub struct MemoryReader {
    rx: Receiver<Ax25Frame>,
}

impl FrameReader for MemoryReader {
    fn read_frame(&mut self) -> io::Result<Option<Ax25Frame>> {
        Ok(self.rx.recv().ok())
    }
}

/// In-memory frame writer backed by a crossbeam channel.
#[derive(Debug, Clone)]
pub struct MemoryWriter {
    tx: Sender<Ax25Frame>,
}

impl FrameWriter for MemoryWriter {
    fn write_frame(&mut self, frame: &Ax25Frame) -> io::Result<()> {
        self.tx
            .send(frame.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "memory link closed"))
    }
}

/// Creates one unidirectional in-memory frame pipe.
pub fn memory_pipe() -> (MemoryWriter, MemoryReader) {
    let (tx, rx) = unbounded();
    (MemoryWriter { tx }, MemoryReader { rx })
}

/// Creates two cross-connected link endpoints, as if two stations shared a link.
///
/// Dropping every writer feeding one side makes that side's reader return EOF.
pub fn memory_link_pair() -> (LinkEndpoints, LinkEndpoints) {
    let (a_tx, b_rx) = memory_pipe();
    let (b_tx, a_rx) = memory_pipe();
    (
        LinkEndpoints { reader: Box::new(a_rx), writer: Box::new(a_tx) },
        LinkEndpoints { reader: Box::new(b_rx), writer: Box::new(b_tx) },
    )
}
