//! Reachability table for NetROM and INP3 routes.
//!
//! Routes are keyed by (destination, neighbour, metric kind): a fresh
//! advertisement for the same key replaces the stored one outright, while a
//! neighbour's NetROM and INP3 routes to one destination live side by side. Entries are kept most recent
//! first. Expiry is re-checked on every lookup, so a sweep is never needed for
//! correctness.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    time::{Duration, SystemTime},
};

use netrom_core::{callsign::Callsign, constants::INP3_HORIZON};
use netrom_protocol::{inp3::Inp3Advert, nodes::NodesBroadcast};
use parking_lot::Mutex;
use tracing::{debug, trace};

/// Cost metric of a route; the kind of advertisement it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteMetric {
    /// Classic NetROM route; higher quality is better.
    NetRom {
        /// 0..=255
        quality: u8,
    },
    /// INP3 route; lower trip time is better.
    Inp3 {
        /// 10 ms units
        trip_time: u16,
        /// Hops from this node
        hops: u8,
    },
}

/// One way to reach a destination node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    /// Node this route reaches
    pub destination: Callsign,
    /// Destination's mnemonic, if advertised
    pub alias: Option<Callsign>,
    /// Next hop; the station the advertisement was heard from
    pub neighbour: Callsign,
    /// AX.25 port the neighbour was heard on
    pub port: u8,
    /// Route cost
    pub metric: RouteMetric,
    /// When the advertisement was last heard
    pub last_heard: SystemTime,
}

impl Route {
    /// Creates a NetROM route.
    pub fn netrom(
        destination: Callsign,
        alias: Option<Callsign>,
        neighbour: Callsign,
        port: u8,
        quality: u8,
        last_heard: SystemTime,
    ) -> Self {
        Route { destination, alias, neighbour, port, metric: RouteMetric::NetRom { quality }, last_heard }
    }

    /// Creates an INP3 route.
    pub fn inp3(
        destination: Callsign,
        alias: Option<Callsign>,
        neighbour: Callsign,
        port: u8,
        trip_time: u16,
        hops: u8,
        last_heard: SystemTime,
    ) -> Self {
        Route {
            destination,
            alias,
            neighbour,
            port,
            metric: RouteMetric::Inp3 { trip_time, hops },
            last_heard,
        }
    }

    /// True once the route has not been heard for longer than `max_age`.
    /// A timestamp in the future counts as fresh.
    pub fn is_expired(&self, now: SystemTime, max_age: Duration) -> bool {
        match now.duration_since(self.last_heard) {
            Ok(age) => age > max_age,
            Err(_) => false,
        }
    }

    /// True if `target` names this route's destination or its alias.
    pub fn matches(&self, target: &Callsign) -> bool {
        &self.destination == target || self.alias.as_ref() == Some(target)
    }

    /// True for INP3 routes.
    pub fn is_inp3(&self) -> bool {
        matches!(self.metric, RouteMetric::Inp3 { .. })
    }

    fn same_key(&self, other: &Route) -> bool {
        self.destination == other.destination
            && self.neighbour == other.neighbour
            && self.is_inp3() == other.is_inp3()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.metric {
            RouteMetric::NetRom { quality } => {
                write!(f, "{} via {} q={}", self.destination, self.neighbour, quality)
            }
            RouteMetric::Inp3 { trip_time, hops } => {
                write!(f, "{} via {} tt={} hops={}", self.destination, self.neighbour, trip_time, hops)
            }
        }
    }
}

/// Picks the better of two live routes to the same destination.
///
/// INP3 beats NetROM; within INP3 the lower trip time wins, within NetROM the
/// higher quality. On a tie the first (most recently heard) stays.
fn better<'a>(current: &'a Route, candidate: &'a Route) -> &'a Route {
    match (current.metric, candidate.metric) {
        (RouteMetric::Inp3 { trip_time: a, .. }, RouteMetric::Inp3 { trip_time: b, .. }) => {
            if b < a { candidate } else { current }
        }
        (RouteMetric::NetRom { quality: a }, RouteMetric::NetRom { quality: b }) => {
            if b > a { candidate } else { current }
        }
        (RouteMetric::NetRom { .. }, RouteMetric::Inp3 { .. }) => candidate,
        (RouteMetric::Inp3 { .. }, RouteMetric::NetRom { .. }) => current,
    }
}

/// Parameters for turning a neighbour's advertisement into local routes.
#[derive(Clone, Debug)]
pub struct LearnContext<'a> {
    /// This node, never routed to through a neighbour
    pub local: &'a Callsign,
    /// Station the advertisement came from
    pub neighbour: &'a Callsign,
    /// Port it was heard on
    pub port: u8,
    /// Timestamp for the new routes
    pub now: SystemTime,
}

/// Shared routing table.
pub struct RoutingTable {
    routes: Mutex<VecDeque<Route>>,
    max_age: Duration,
}

impl fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTable")
            .field("routes", &self.routes.lock().len())
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl RoutingTable {
    /// Creates an empty table whose routes expire after `max_age`.
    pub fn new(max_age: Duration) -> Self {
        RoutingTable { routes: Mutex::new(VecDeque::new()), max_age }
    }

    /// Age after which routes are ignored.
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Stores `route`, replacing any entry with the same key.
    pub fn upsert(&self, route: Route) {
        let mut routes = self.routes.lock();
        routes.retain(|existing| !existing.same_key(&route));
        trace!("Route {}", route);
        routes.push_front(route);
    }

    /// Removes every route to `destination` learned from `neighbour`.
    /// Returns how many were removed.
    pub fn remove(&self, destination: &Callsign, neighbour: &Callsign) -> usize {
        self.remove_where(|route| &route.destination == destination && &route.neighbour == neighbour)
    }

    fn remove_where(&self, mut doomed: impl FnMut(&Route) -> bool) -> usize {
        let mut routes = self.routes.lock();
        let before = routes.len();
        routes.retain(|route| !doomed(route));
        before - routes.len()
    }

    /// Best live route toward a callsign or alias.
    pub fn best_route_to(&self, target: &Callsign, now: SystemTime) -> Option<Route> {
        let routes = self.routes.lock();
        routes
            .iter()
            .filter(|route| route.matches(target) && !route.is_expired(now, self.max_age))
            .fold(None, |best: Option<&Route>, route| match best {
                None => Some(route),
                Some(current) => Some(better(current, route)),
            })
            .cloned()
    }

    /// Best live route to every known destination.
    pub fn best_routes(&self, now: SystemTime) -> Vec<Route> {
        self.best_routes_where(now, |_| true)
    }

    /// Best live route to every destination, choosing only among routes
    /// accepted by `keep`.
    pub fn best_routes_where(&self, now: SystemTime, keep: impl Fn(&Route) -> bool) -> Vec<Route> {
        let routes = self.routes.lock();
        let mut order = Vec::new();
        let mut best: HashMap<&Callsign, &Route> = HashMap::new();
        for route in routes.iter().filter(|route| keep(route) && !route.is_expired(now, self.max_age)) {
            match best.get(&route.destination).copied() {
                Some(current) => {
                    let chosen = better(current, route);
                    best.insert(&route.destination, chosen);
                }
                None => {
                    order.push(&route.destination);
                    best.insert(&route.destination, route);
                }
            }
        }
        order.into_iter().filter_map(|dest| best.get(dest).map(|route| (*route).clone())).collect()
    }

    /// Drops every expired route. Returns how many were removed.
    pub fn purge_expired(&self, now: SystemTime) -> usize {
        let max_age = self.max_age;
        let purged = self.remove_where(|route| route.is_expired(now, max_age));
        if purged > 0 {
            debug!("Purged {} expired routes", purged);
        }
        purged
    }

    /// All stored routes, most recent first, expired ones included.
    pub fn routes(&self) -> Vec<Route> {
        self.routes.lock().iter().cloned().collect()
    }

    /// Number of stored routes.
    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }

    /// True when the table holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Learns from a classic NODES broadcast: the neighbour itself at
    /// `neighbour_quality`, plus each advertised destination at
    /// `quality * neighbour_quality / 256`. Entries for this node, entries
    /// routed back through this node and entries under `min_quality` are
    /// skipped. Returns the number of routes stored.
    pub fn learn_nodes(
        &self,
        from: &LearnContext<'_>,
        broadcast: &NodesBroadcast,
        neighbour_quality: u8,
        min_quality: u8,
    ) -> usize {
        let mut learned = vec![Route::netrom(
            from.neighbour.clone(),
            broadcast.alias.clone(),
            from.neighbour.clone(),
            from.port,
            neighbour_quality,
            from.now,
        )];

        for entry in &broadcast.entries {
            if &entry.destination == from.local
                || &entry.destination == from.neighbour
                || &entry.neighbour == from.local
            {
                continue;
            }
            let quality = (entry.quality as u32 * neighbour_quality as u32 / 256) as u8;
            if quality < min_quality {
                trace!("Ignoring {} at quality {}", entry.destination, quality);
                continue;
            }
            learned.push(Route::netrom(
                entry.destination.clone(),
                entry.alias.clone(),
                from.neighbour.clone(),
                from.port,
                quality,
                from.now,
            ));
        }

        let count = learned.len();
        for route in learned {
            self.upsert(route);
        }
        count
    }

    /// Learns from INP3 advertisements: one more hop and `hop_penalty` more
    /// trip time than the neighbour reports. Advertisements at or past the
    /// horizon withdraw the route. Returns the number of routes stored.
    pub fn learn_inp3(&self, from: &LearnContext<'_>, adverts: &[Inp3Advert], hop_penalty: u16) -> usize {
        let mut count = 0;
        for advert in adverts {
            if &advert.destination == from.local {
                continue;
            }
            let trip_time = advert.trip_time.saturating_add(hop_penalty);
            if advert.trip_time >= INP3_HORIZON || trip_time >= INP3_HORIZON {
                let withdrawn = self.remove_where(|route| {
                    route.is_inp3() && route.destination == advert.destination && &route.neighbour == from.neighbour
                });
                if withdrawn > 0 {
                    debug!("{} withdrew {}", from.neighbour, advert.destination);
                }
                continue;
            }
            self.upsert(Route::inp3(
                advert.destination.clone(),
                advert.alias(),
                from.neighbour.clone(),
                from.port,
                trip_time,
                advert.hops.saturating_add(1),
                from.now,
            ));
            count += 1;
        }
        count
    }
}
