//! Country lookup for client addresses.
//!
//! The default locator knows nothing and answers `"Unknown"`. A MaxMind
//! GeoLite2 Country or City database gives real enrichment. A small CIDR table
//! (`cidr,country` per line) is also accepted for deployments without one.

use maxminddb::{geoip2, MaxMindDBError, Reader};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{AnalyticsError, GeoLocator, Result};

/// Country reported when no lookup succeeds.
pub const UNKNOWN_COUNTRY: &str = "Unknown";

/// Locator used when no GeoIP table is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownGeoLocator;

impl GeoLocator for UnknownGeoLocator {
    fn country(&self, _address: &str) -> String {
        UNKNOWN_COUNTRY.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CidrEntry {
    network: IpAddr,
    prefix: u8,
    country: String,
}

impl CidrEntry {
    fn contains(&self, addr: &IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(*ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(*ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn prefix_mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

/// Longest-prefix-match country table.
#[derive(Debug, Clone, Default)]
pub struct CidrGeoLocator {
    entries: Vec<CidrEntry>,
}

impl CidrGeoLocator {
    /// Parse a table of `cidr,country` lines. Blank lines, `#` comments and a
    /// `cidr,country` header are skipped.
    pub fn from_csv(content: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.eq_ignore_ascii_case("cidr,country") {
                continue;
            }
            let entry = parse_line(line).map_err(|msg| {
                AnalyticsError::Configuration(format!("geoip table line {}: {msg}", idx + 1))
            })?;
            entries.push(entry);
        }
        // Most specific first so the first hit is the longest prefix.
        entries.sort_by(|a, b| b.prefix.cmp(&a.prefix));
        Ok(Self { entries })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let locator = Self::from_csv(&content)?;
        info!(path = %path.display(), entries = locator.len(), "Loaded GeoIP table");
        Ok(locator)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_line(line: &str) -> std::result::Result<CidrEntry, String> {
    let (cidr, country) = line
        .split_once(',')
        .ok_or_else(|| "expected `cidr,country`".to_string())?;
    let country = country.trim();
    if country.is_empty() {
        return Err("missing country code".into());
    }

    let cidr = cidr.trim();
    let (addr, prefix) = match cidr.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (cidr, None),
    };
    let network: IpAddr = addr
        .parse()
        .map_err(|_| format!("invalid network address {addr:?}"))?;
    let max = if network.is_ipv4() { 32 } else { 128 };
    let prefix = match prefix {
        Some(p) => p
            .parse::<u8>()
            .ok()
            .filter(|p| *p <= max)
            .ok_or_else(|| format!("invalid prefix length {p:?}"))?,
        None => max,
    };

    Ok(CidrEntry {
        network,
        prefix,
        country: country.to_ascii_uppercase(),
    })
}

fn is_non_routable(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Parse `address` and keep it only if a public lookup makes sense.
/// IPv4-mapped IPv6 addresses are unwrapped.
fn routable_address(address: &str) -> Option<IpAddr> {
    let addr = address.trim().parse::<IpAddr>().ok()?;
    let addr = match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(addr),
        v4 => v4,
    };
    (!is_non_routable(&addr)).then_some(addr)
}

impl GeoLocator for CidrGeoLocator {
    fn country(&self, address: &str) -> String {
        let Some(addr) = routable_address(address) else {
            return UNKNOWN_COUNTRY.to_string();
        };
        self.entries
            .iter()
            .find(|e| e.contains(&addr))
            .map(|e| e.country.clone())
            .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string())
    }
}

/// GeoLite2 database names looked for when no path is configured, in order.
pub const GEOLITE2_DATABASES: [&str; 2] = ["GeoLite2-Country.mmdb", "GeoLite2-City.mmdb"];

/// Country lookup backed by a MaxMind database.
///
/// Country and City editions both carry the `country` record, so either works.
pub struct MaxMindGeoLocator {
    reader: Reader<Vec<u8>>,
}

impl MaxMindGeoLocator {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path).map_err(|e| {
            AnalyticsError::Configuration(format!("geoip database {}: {e}", path.display()))
        })?;
        info!(
            path = %path.display(),
            database_type = %reader.metadata.database_type,
            "Loaded GeoIP database"
        );
        Ok(Self { reader })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let reader = Reader::from_source(bytes)
            .map_err(|e| AnalyticsError::Configuration(format!("geoip database: {e}")))?;
        Ok(Self { reader })
    }

    /// First GeoLite2 database present in `dirs`.
    pub fn discover(dirs: &[&Path]) -> Option<PathBuf> {
        dirs.iter()
            .flat_map(|dir| GEOLITE2_DATABASES.iter().map(move |name| dir.join(name)))
            .find(|path| path.is_file())
    }

    pub fn database_type(&self) -> &str {
        &self.reader.metadata.database_type
    }
}

impl std::fmt::Debug for MaxMindGeoLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxMindGeoLocator")
            .field("database_type", &self.database_type())
            .finish()
    }
}

impl GeoLocator for MaxMindGeoLocator {
    fn country(&self, address: &str) -> String {
        let Some(addr) = routable_address(address) else {
            return UNKNOWN_COUNTRY.to_string();
        };
        match self.reader.lookup::<geoip2::Country>(addr) {
            Ok(record) => record
                .country
                .and_then(|c| c.iso_code)
                .map(str::to_string)
                .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string()),
            Err(MaxMindDBError::AddressNotFoundError(_)) => UNKNOWN_COUNTRY.to_string(),
            Err(e) => {
                debug!(error = %e, "GeoIP lookup failed");
                UNKNOWN_COUNTRY.to_string()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    fn mmdb_str(s: &str) -> Vec<u8> {
        let mut out = vec![0x40 | s.len() as u8];
        out.extend_from_slice(s.as_bytes());
        out
    }

    /// One-node IPv4 GeoLite2 database: 0.0.0.0/1 is US, 128.0.0.0/1 has no entry.
    pub(crate) fn tiny_database() -> Vec<u8> {
        let mut db = Vec::new();
        // Search tree, 24-bit records: left -> data offset 0, right -> not found
        db.extend_from_slice(&[0x00, 0x00, 0x11, 0x00, 0x00, 0x01]);
        db.extend_from_slice(&[0u8; 16]);

        db.push(0xE1);
        db.extend(mmdb_str("country"));
        db.push(0xE1);
        db.extend(mmdb_str("iso_code"));
        db.extend(mmdb_str("US"));

        db.extend_from_slice(b"\xAB\xCD\xEFMaxMind.com");
        db.push(0xE9);
        db.extend(mmdb_str("binary_format_major_version"));
        db.extend_from_slice(&[0xA1, 0x02]);
        db.extend(mmdb_str("binary_format_minor_version"));
        db.push(0xA0);
        db.extend(mmdb_str("build_epoch"));
        db.extend_from_slice(&[0x04, 0x02, 0x65, 0x53, 0xF1, 0x00]);
        db.extend(mmdb_str("database_type"));
        db.extend(mmdb_str("GeoLite2-Country"));
        db.extend(mmdb_str("description"));
        db.push(0xE0);
        db.extend(mmdb_str("ip_version"));
        db.extend_from_slice(&[0xA1, 0x04]);
        db.extend(mmdb_str("languages"));
        db.extend_from_slice(&[0x01, 0x04]);
        db.extend(mmdb_str("en"));
        db.extend(mmdb_str("node_count"));
        db.extend_from_slice(&[0xC1, 0x01]);
        db.extend(mmdb_str("record_size"));
        db.extend_from_slice(&[0xA1, 0x18]);
        db
    }
}
