//! Node-wide table of live circuits.
//!
//! Every circuit this node terminates gets a local (index, id) pair. The index
//! is unique among live circuits and selects the slot; the id is random so a
//! stale packet for a reused index is rejected.

use std::{collections::HashMap, sync::Arc, time::Duration};

use netrom_core::{
    callsign::Callsign,
    error::{ErrorKind, Result},
    transport::LinkId,
};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, trace};

use crate::circuit::Circuit;

/// Number of circuit slots addressable by a one byte index.
pub const CIRCUIT_CAPACITY: usize = u8::MAX as usize + 1;

struct Entry {
    circuit: Arc<Circuit>,
    owner: LinkId,
}

#[derive(Default)]
struct RegistryInner {
    circuits: HashMap<u8, Entry>,
    next_index: u8,
}

/// Registry of live circuits, shared by every link handler.
#[derive(Default)]
pub struct CircuitRegistry {
    inner: Mutex<RegistryInner>,
}

impl std::fmt::Debug for CircuitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitRegistry").field("len", &self.len()).finish()
    }
}

impl CircuitRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the circuit a fresh (index, id) and records `owner` as the link
    /// it runs over. Fails when all indices are taken.
    pub fn register(&self, circuit: Arc<Circuit>, owner: LinkId) -> Result<(u8, u8)> {
        let mut inner = self.inner.lock();
        if inner.circuits.len() >= CIRCUIT_CAPACITY {
            return Err(ErrorKind::CircuitTableFull);
        }

        let mut index = inner.next_index;
        while inner.circuits.contains_key(&index) {
            index = index.wrapping_add(1);
        }
        inner.next_index = index.wrapping_add(1);

        // (0, 0) is what a refusal carries; never hand it out.
        let mut rng = rand::rng();
        let mut id: u8 = rng.random();
        while index == 0 && id == 0 {
            id = rng.random();
        }

        circuit.assign_ids(index, id);
        trace!("Registered circuit {}/{} on {}", index, id, owner);
        inner.circuits.insert(index, Entry { circuit, owner });
        Ok((index, id))
    }

    /// Finds the circuit addressed by a received header. The id must match.
    pub fn lookup(&self, index: u8, id: u8) -> Option<Arc<Circuit>> {
        let inner = self.inner.lock();
        let entry = inner.circuits.get(&index)?;
        if entry.circuit.my_circuit() != (index, id) {
            debug!("Circuit index {} has id mismatch (got {})", index, id);
            return None;
        }
        Some(entry.circuit.clone())
    }

    /// Finds a live circuit by the remote's numbering; used to spot a
    /// retransmitted CONNECT_REQUEST.
    pub fn find_by_remote(&self, remote: &Callsign, index: u8, id: u8) -> Option<Arc<Circuit>> {
        let inner = self.inner.lock();
        inner
            .circuits
            .values()
            .map(|entry| &entry.circuit)
            .find(|circuit| {
                &circuit.address().destination == remote && circuit.your_circuit() == (index, id)
            })
            .cloned()
    }

    /// Removes a circuit; a no-op when the id no longer matches.
    pub fn remove(&self, index: u8, id: u8) -> Option<Arc<Circuit>> {
        let mut inner = self.inner.lock();
        match inner.circuits.get(&index) {
            Some(entry) if entry.circuit.my_circuit() == (index, id) => {}
            _ => return None,
        }
        inner.circuits.remove(&index).map(|entry| entry.circuit)
    }

    /// Removes and returns every circuit running over `link`.
    pub fn remove_owned_by(&self, link: LinkId) -> Vec<Arc<Circuit>> {
        let mut inner = self.inner.lock();
        let indices: Vec<u8> = inner
            .circuits
            .iter()
            .filter(|(_, entry)| entry.owner == link)
            .map(|(index, _)| *index)
            .collect();
        indices
            .into_iter()
            .filter_map(|index| inner.circuits.remove(&index))
            .map(|entry| entry.circuit)
            .collect()
    }

    /// Drops closed circuits and those whose DISCONNECT_ACK has not arrived
    /// within `linger`; the latter are forced closed. Returns how many went.
    pub fn reap_stale(&self, linger: Duration) -> usize {
        let reaped: Vec<Arc<Circuit>> = {
            let mut inner = self.inner.lock();
            let indices: Vec<u8> = inner
                .circuits
                .iter()
                .filter(|(_, entry)| entry.circuit.is_stale(linger))
                .map(|(index, _)| *index)
                .collect();
            indices
                .into_iter()
                .filter_map(|index| inner.circuits.remove(&index))
                .map(|entry| entry.circuit)
                .collect()
        };
        for circuit in &reaped {
            let (index, id) = circuit.my_circuit();
            debug!("Reaping circuit {}/{} in {:?}", index, id, circuit.state());
            circuit.abort();
        }
        reaped.len()
    }

    /// Snapshot of the live circuits.
    pub fn circuits(&self) -> Vec<Arc<Circuit>> {
        self.inner.lock().circuits.values().map(|entry| entry.circuit.clone()).collect()
    }

    /// Number of registered circuits.
    pub fn len(&self) -> usize {
        self.inner.lock().circuits.len()
    }

    /// True when no circuit is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
