use std::{fmt, sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use netrom_core::error::{ErrorKind, Result};

use crate::{circuit::Circuit, circuit_state::CircuitState};

/// Byte stream over an established circuit, handed to a local service or to
/// the caller of an outbound connect.
///
/// Each received item is the payload of one in-order INFORMATION frame.
/// Dropping the stream closes the circuit.
pub struct CircuitStream {
    circuit: Arc<Circuit>,
    incoming: Receiver<Vec<u8>>,
}

impl fmt::Debug for CircuitStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitStream").field("circuit", &self.circuit).finish()
    }
}

impl CircuitStream {
    pub(crate) fn new(circuit: Arc<Circuit>, incoming: Receiver<Vec<u8>>) -> Self {
        CircuitStream { circuit, incoming }
    }

    /// The underlying circuit.
    pub fn circuit(&self) -> &Arc<Circuit> {
        &self.circuit
    }

    /// True while data can still be sent.
    pub fn is_open(&self) -> bool {
        self.circuit.state() == CircuitState::Connected
    }

    /// Blocks for the next payload. Fails once the circuit is closed and all
    /// delivered data has been read.
    pub fn recv(&self) -> Result<Vec<u8>> {
        self.incoming.recv().map_err(|_| ErrorKind::CircuitClosed)
    }

    /// Like [`recv`](Self::recv) with a deadline. `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self.incoming.recv_timeout(timeout) {
            Ok(data) => Ok(Some(data)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ErrorKind::CircuitClosed),
        }
    }

    /// Returns the next payload if one is ready.
    pub fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        match self.incoming.try_recv() {
            Ok(data) => Ok(Some(data)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ErrorKind::CircuitClosed),
        }
    }

    /// Queues data for the remote end. Data beyond the current window waits
    /// for acknowledgments.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        let packets = self.circuit.queue_data(data)?;
        self.circuit.transmit(packets);
        Ok(())
    }

    /// Starts an orderly close (DISCONNECT_REQUEST). Repeated calls do nothing.
    pub fn close(&self) {
        let packets = self.circuit.begin_disconnect();
        self.circuit.transmit(packets);
    }
}

impl Drop for CircuitStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use netrom_protocol::packet::Opcode;

    use crate::circuit::test_support::*;

    #[test]
    fn test_send_goes_out_on_sink() {
        let (_circuit, stream, sink) = connected_circuit(4);
        stream.send(b"hello").unwrap();
        let sent = sink.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].opcode, Opcode::Information);
        assert_eq!(sent[0].payload, b"hello".to_vec());
        assert_eq!((sent[0].circuit_index, sent[0].circuit_id), (3, 7));
    }

    #[test]
    fn test_drop_sends_disconnect_request_once() {
        let (circuit, stream, sink) = connected_circuit(4);
        stream.close();
        drop(stream);
        let sent = sink.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].opcode, Opcode::DisconnectRequest);
        assert!(circuit.queue_data(b"x").is_err());
    }

    #[test]
    fn test_recv_after_remote_close() {
        let (circuit, stream, _sink) = connected_circuit(4);
        circuit.handle_information(&info_from_remote(0, 0, b"last"));
        circuit.handle_disconnect_request();
        assert_eq!(stream.recv().unwrap(), b"last".to_vec());
        assert!(stream.recv().is_err());
        assert!(!stream.is_open());
    }
}
