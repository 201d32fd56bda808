use std::{default::Default, time::Duration};

use crate::constants::MAX_QUALITY;

#[derive(Clone, Debug)]
/// Configuration options to tune protocol and routing behavior.
pub struct NodeConfig {
    /// How long an originator waits for a CONNECT_ACK before giving up.
    pub connect_timeout: Duration,
    /// How long a closing circuit waits for its DISCONNECT_ACK before the
    /// announcer sweep drops it.
    pub disconnect_timeout: Duration,
    /// Routes not heard for longer than this are expired.
    pub route_max_age: Duration,
    /// Time-to-live stamped on packets this node originates.
    pub initial_ttl: u8,
    /// Window proposed on outgoing connect requests (frames).
    pub default_window: u8,
    /// Largest window this node accepts from a peer (frames).
    pub max_window: u8,
    /// Quality assigned to a neighbour heard via NODES broadcasts.
    pub neighbour_quality: u8,
    /// Derived NetROM routes below this quality are discarded.
    pub min_quality: u8,
    /// Quality this node advertises for itself.
    pub self_quality: u8,
    /// Trip time (10 ms units) added to INP3 routes for the hop to the neighbour.
    pub inp3_hop_penalty: u16,
    /// Interval between route announcements.
    pub announce_interval: Duration,
    /// Tear the circuit down when a RESET opcode arrives.
    pub teardown_on_reset: bool,
    /// AX.25 port used for outbound links when a route does not name one.
    pub default_port: u8,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(120),
            disconnect_timeout: Duration::from_secs(180),
            route_max_age: Duration::from_secs(2 * 60 * 60),
            initial_ttl: 16,
            default_window: 4,
            max_window: 32,
            neighbour_quality: 192,
            min_quality: 10,
            self_quality: MAX_QUALITY,
            inp3_hop_penalty: 10, // 100 ms per hop until link RTT is measured
            announce_interval: Duration::from_secs(30 * 60),
            teardown_on_reset: false,
            default_port: 0,
        }
    }
}
