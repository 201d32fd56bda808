//! Routing table persistence.
//!
//! ```text
//! count (u32 BE) | route* | crc32 of everything before (u32 BE)
//!
//! route: destination (7) | has alias (1) | alias (6) | neighbour (7) | port (1)
//!        | kind (1) | metric (3) | last heard, unix seconds (u64 BE)
//! ```
//!
//! NetROM metrics store the quality in the first metric byte; INP3 metrics
//! store the trip time (u16 BE) followed by the hop count.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Cursor, Read, Write},
    path::Path,
    time::{Duration, SystemTime},
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use netrom_core::{
    callsign::Callsign,
    constants::CALLSIGN_LEN,
    error::{ErrorKind, Result},
};
use tracing::{debug, info};

use crate::routing::{Route, RouteMetric, RoutingTable};

const KIND_NETROM: u8 = 0;
const KIND_INP3: u8 = 1;
const ALIAS_LEN: usize = 6;
const CHECKSUM_LEN: usize = 4;

/// Saves and restores a [`RoutingTable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteStore;

impl RouteStore {
    /// Serializes routes, checksum included.
    pub fn encode(routes: &[Route]) -> Vec<u8> {
        let mut out = Vec::new();
        // Writes into a Vec cannot fail.
        let _ = write_routes(&mut out, routes);
        let checksum = crc32fast::hash(&out);
        let _ = out.write_u32::<BigEndian>(checksum);
        out
    }

    /// Parses bytes produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Vec<Route>> {
        if bytes.len() < 4 + CHECKSUM_LEN {
            return Err(ErrorKind::RouteStore(format!("file too short ({} bytes)", bytes.len())));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        let expected = Cursor::new(trailer).read_u32::<BigEndian>()?;
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(ErrorKind::RouteStore(format!(
                "checksum mismatch (stored {:08x}, computed {:08x})",
                expected, actual
            )));
        }

        let mut cursor = Cursor::new(body);
        let count = cursor.read_u32::<BigEndian>()?;
        let mut routes = Vec::new();
        for n in 0..count {
            let route = read_route(&mut cursor)
                .map_err(|err| ErrorKind::RouteStore(format!("route {}: {}", n, err)))?;
            routes.push(route);
        }
        if (cursor.position() as usize) != body.len() {
            return Err(ErrorKind::RouteStore("trailing bytes after last route".into()));
        }
        Ok(routes)
    }

    /// Writes every route of `table` to `writer`.
    pub fn save_to<W: Write>(writer: &mut W, table: &RoutingTable) -> Result<usize> {
        let routes = table.routes();
        writer.write_all(&Self::encode(&routes))?;
        writer.flush()?;
        Ok(routes.len())
    }

    /// Reads routes from `reader` into `table`, skipping ones already expired
    /// at `now`. Returns the number loaded.
    pub fn load_from<R: Read>(reader: &mut R, table: &RoutingTable, now: SystemTime) -> Result<usize> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let routes = Self::decode(&bytes)?;
        let total = routes.len();
        // Stored most recent first; insert oldest first to keep that order.
        let live: Vec<Route> = routes
            .into_iter()
            .filter(|route| !route.is_expired(now, table.max_age()))
            .collect();
        let loaded = live.len();
        for route in live.into_iter().rev() {
            table.upsert(route);
        }
        if loaded < total {
            debug!("Discarded {} expired routes on load", total - loaded);
        }
        Ok(loaded)
    }

    /// Saves `table` to a file, replacing it.
    pub fn save(path: impl AsRef<Path>, table: &RoutingTable) -> Result<usize> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        let saved = Self::save_to(&mut writer, table)?;
        info!("Saved {} routes to {}", saved, path.display());
        Ok(saved)
    }

    /// Loads routes from a file into `table`.
    pub fn load(path: impl AsRef<Path>, table: &RoutingTable, now: SystemTime) -> Result<usize> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let loaded = Self::load_from(&mut reader, table, now)?;
        info!("Loaded {} routes from {}", loaded, path.display());
        Ok(loaded)
    }
}

fn write_routes(out: &mut Vec<u8>, routes: &[Route]) -> std::io::Result<()> {
    out.write_u32::<BigEndian>(routes.len() as u32)?;
    for route in routes {
        out.write_all(&route.destination.to_bytes())?;
        match &route.alias {
            Some(alias) => {
                out.write_u8(1)?;
                out.write_all(&alias.to_alias_bytes())?;
            }
            None => {
                out.write_u8(0)?;
                out.write_all(&[b' '; ALIAS_LEN])?;
            }
        }
        out.write_all(&route.neighbour.to_bytes())?;
        out.write_u8(route.port)?;
        match route.metric {
            RouteMetric::NetRom { quality } => {
                out.write_u8(KIND_NETROM)?;
                out.write_all(&[quality, 0, 0])?;
            }
            RouteMetric::Inp3 { trip_time, hops } => {
                out.write_u8(KIND_INP3)?;
                out.write_u16::<BigEndian>(trip_time)?;
                out.write_u8(hops)?;
            }
        }
        let secs = route
            .last_heard
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        out.write_u64::<BigEndian>(secs)?;
    }
    Ok(())
}

fn read_callsign(cursor: &mut Cursor<&[u8]>) -> Result<Callsign> {
    let mut raw = [0u8; CALLSIGN_LEN];
    cursor.read_exact(&mut raw)?;
    Ok(Callsign::from_bytes(&raw)?)
}

fn read_route(cursor: &mut Cursor<&[u8]>) -> Result<Route> {
    let destination = read_callsign(cursor)?;
    let has_alias = cursor.read_u8()? != 0;
    let mut alias_raw = [0u8; ALIAS_LEN];
    cursor.read_exact(&mut alias_raw)?;
    let alias = if has_alias { Callsign::from_alias_bytes(&alias_raw) } else { None };
    let neighbour = read_callsign(cursor)?;
    let port = cursor.read_u8()?;
    let metric = match cursor.read_u8()? {
        KIND_NETROM => {
            let quality = cursor.read_u8()?;
            cursor.read_u16::<BigEndian>()?;
            RouteMetric::NetRom { quality }
        }
        KIND_INP3 => {
            let trip_time = cursor.read_u16::<BigEndian>()?;
            let hops = cursor.read_u8()?;
            RouteMetric::Inp3 { trip_time, hops }
        }
        other => return Err(ErrorKind::RouteStore(format!("unknown route kind {}", other))),
    };
    let last_heard = SystemTime::UNIX_EPOCH + Duration::from_secs(cursor.read_u64::<BigEndian>()?);
    Ok(Route { destination, alias, neighbour, port, metric, last_heard })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_AGE: Duration = Duration::from_secs(2 * 60 * 60);

    fn call(s: &str) -> Callsign {
        s.parse().unwrap()
    }

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn sample_table() -> RoutingTable {
        let table = RoutingTable::new(MAX_AGE);
        table.upsert(Route::netrom(call("GB7AA"), Some(call("AAA")), call("N1"), 0, 150, now()));
        table.upsert(Route::inp3(call("GB7BB-3"), None, call("N2"), 1, 320, 3, now()));
        table
    }

    #[test]
    fn test_save_load_preserves_routes_and_order() {
        let table = sample_table();
        let mut buf = Vec::new();
        assert_eq!(RouteStore::save_to(&mut buf, &table).unwrap(), 2);

        let restored = RoutingTable::new(MAX_AGE);
        assert_eq!(RouteStore::load_from(&mut buf.as_slice(), &restored, now()).unwrap(), 2);
        assert_eq!(restored.routes(), table.routes());
    }

    #[test]
    fn test_expired_routes_discarded_on_load() {
        let table = RoutingTable::new(MAX_AGE);
        table.upsert(Route::netrom(call("OLD"), None, call("N1"), 0, 90, now() - MAX_AGE * 3));
        table.upsert(Route::netrom(call("NEW"), None, call("N1"), 0, 90, now()));
        let bytes = RouteStore::encode(&table.routes());

        let restored = RoutingTable::new(MAX_AGE);
        assert_eq!(RouteStore::load_from(&mut bytes.as_slice(), &restored, now()).unwrap(), 1);
        assert_eq!(restored.routes()[0].destination, call("NEW"));
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = RouteStore::encode(&sample_table().routes());
        bytes[6] ^= 0x20;
        assert!(matches!(RouteStore::decode(&bytes), Err(ErrorKind::RouteStore(_))));
        assert!(matches!(RouteStore::decode(&[0, 0]), Err(ErrorKind::RouteStore(_))));
    }

    #[test]
    fn test_empty_table() {
        let bytes = RouteStore::encode(&[]);
        assert_eq!(bytes.len(), 8);
        assert!(RouteStore::decode(&bytes).unwrap().is_empty());
    }
}
