use std::{collections::HashMap, fmt, sync::Arc};

use netrom_circuit::CircuitStream;
use netrom_core::callsign::Callsign;
use parking_lot::RwLock;

/// A local application reachable by a NetROM circuit.
pub trait Service: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Takes ownership of an accepted circuit. Called on the link's reader
    /// thread, so long-running work belongs on a thread of its own.
    fn on_connect(&self, stream: CircuitStream);
}

/// Decides which local service, if any, answers for a callsign.
pub trait ServiceRegistry: Send + Sync {
    /// Returns the service bound to `callsign`.
    fn find_service_for_callsign(&self, callsign: &Callsign) -> Option<Arc<dyn Service>>;
}

/// A fixed map of callsigns to services.
#[derive(Default)]
pub struct StaticServiceRegistry {
    services: RwLock<HashMap<Callsign, Arc<dyn Service>>>,
}

impl fmt::Debug for StaticServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let services = self.services.read();
        f.debug_map().entries(services.iter().map(|(call, svc)| (call.to_string(), svc.name().to_string()))).finish()
    }
}

impl StaticServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `service` to `callsign`, replacing any previous binding.
    pub fn register(&self, callsign: Callsign, service: Arc<dyn Service>) {
        self.services.write().insert(callsign, service);
    }

    /// Removes the binding for `callsign`.
    pub fn unregister(&self, callsign: &Callsign) -> Option<Arc<dyn Service>> {
        self.services.write().remove(callsign)
    }
}

impl ServiceRegistry for StaticServiceRegistry {
    fn find_service_for_callsign(&self, callsign: &Callsign) -> Option<Arc<dyn Service>> {
        self.services.read().get(callsign).cloned()
    }
}
