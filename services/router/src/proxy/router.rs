//! Route table and hostname lookups.
//!
//! - Exact, case-sensitive hostname match (no wildcards)
//! - A single trailing dot is trimmed on both sides of the comparison
//! - First entry wins when a hostname is listed twice
//! - Reloads publish a complete new snapshot in one atomic swap

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;
use tracing::{debug, info};

/// Longest hostname a route may carry.
pub const MAX_HOSTNAME_LEN: usize = 253;

/// Route-level errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Hostname is empty after normalization.
    #[error("hostname is empty")]
    EmptyHostname,

    /// Hostname exceeds [`MAX_HOSTNAME_LEN`].
    #[error("hostname is {len} bytes, limit is {}", MAX_HOSTNAME_LEN)]
    HostnameTooLong { len: usize },

    /// Port is not a number in 1..=65535.
    #[error("invalid backend port '{0}'")]
    InvalidPort(String),

    /// A reload produced no valid routes.
    #[error("configuration contains no valid routes")]
    EmptyConfig,
}

/// An unvalidated route as read from a configuration line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRoute {
    /// 1-based line number in the source, for logging.
    pub line: usize,
    pub hostname: String,
    pub port: String,
}

impl RawRoute {
    pub fn new(line: usize, hostname: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            line,
            hostname: hostname.into(),
            port: port.into(),
        }
    }
}

/// A validated hostname -> backend port mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub hostname: String,
    pub backend_port: u16,
}

impl RouteEntry {
    /// Validate and build a route entry.
    pub fn new(hostname: &str, backend_port: u16) -> Result<Self, RouteError> {
        let hostname = Self::normalize_hostname(hostname);
        if hostname.is_empty() {
            return Err(RouteError::EmptyHostname);
        }
        if hostname.len() > MAX_HOSTNAME_LEN {
            return Err(RouteError::HostnameTooLong {
                len: hostname.len(),
            });
        }
        if backend_port == 0 {
            return Err(RouteError::InvalidPort(backend_port.to_string()));
        }

        Ok(Self {
            hostname: hostname.to_string(),
            backend_port,
        })
    }

    /// Validate a raw configuration route.
    pub fn from_raw(raw: &RawRoute) -> Result<Self, RouteError> {
        let port = raw
            .port
            .trim()
            .parse::<u16>()
            .map_err(|_| RouteError::InvalidPort(raw.port.clone()))?;
        Self::new(&raw.hostname, port)
    }

    /// Normalize a hostname for matching.
    ///
    /// Clients that resolved the server through an SRV record send the fully
    /// qualified name, so one trailing dot is dropped. Case is preserved.
    pub fn normalize_hostname(hostname: &str) -> &str {
        hostname.strip_suffix('.').unwrap_or(hostname)
    }
}

/// Immutable snapshot of the configured routes.
#[derive(Debug, Default)]
pub struct RoutingTable {
    /// Entries in source order, duplicates included.
    entries: Vec<RouteEntry>,
    /// First backend port per hostname.
    by_hostname: HashMap<String, u16>,
}

impl RoutingTable {
    /// Build a table from raw routes, skipping any that fail validation.
    pub fn build(raw_routes: impl IntoIterator<Item = RawRoute>) -> Self {
        let entries = raw_routes
            .into_iter()
            .filter_map(|raw| match RouteEntry::from_raw(&raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(
                        line = raw.line,
                        hostname = %raw.hostname,
                        error = %e,
                        "Skipping invalid route"
                    );
                    None
                }
            })
            .collect();

        Self::from_entries(entries)
    }

    /// Build a table from already validated entries.
    pub fn from_entries(entries: Vec<RouteEntry>) -> Self {
        let mut by_hostname = HashMap::with_capacity(entries.len());
        for entry in &entries {
            by_hostname
                .entry(entry.hostname.clone())
                .or_insert(entry.backend_port);
        }

        Self {
            entries,
            by_hostname,
        }
    }

    /// Resolve a requested hostname to a backend port.
    pub fn lookup(&self, hostname: &str) -> Option<u16> {
        self.by_hostname
            .get(RouteEntry::normalize_hostname(hostname))
            .copied()
    }

    /// Entries in source order.
    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared holder of the current routing snapshot.
///
/// Uses ArcSwap for lock-free atomic config updates.
/// Readers get consistent snapshots without blocking.
/// Writers atomically swap in new snapshots.
pub struct RouteTable {
    snapshot: ArcSwap<RoutingTable>,
}

impl RouteTable {
    /// Create an empty route table.
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RoutingTable::default()),
        }
    }

    /// Create a route table publishing `table`.
    pub fn with_table(table: RoutingTable) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(table),
        }
    }

    /// Current snapshot. Stays valid after later reloads.
    pub fn load(&self) -> Arc<RoutingTable> {
        self.snapshot.load_full()
    }

    /// Resolve a hostname against the current snapshot.
    pub fn lookup(&self, hostname: &str) -> Option<u16> {
        self.snapshot.load().lookup(hostname)
    }

    /// Publish `table` unconditionally.
    pub fn replace(&self, table: RoutingTable) {
        let route_count = table.len();
        self.snapshot.store(Arc::new(table));
        info!(route_count = route_count, "Route table updated atomically");
    }

    /// Rebuild from raw routes and publish the result.
    ///
    /// Nothing is published when no route survives validation.
    pub fn reload(&self, raw_routes: impl IntoIterator<Item = RawRoute>) -> Result<usize, RouteError> {
        let table = RoutingTable::build(raw_routes);
        if table.is_empty() {
            return Err(RouteError::EmptyConfig);
        }

        let route_count = table.len();
        self.replace(table);
        Ok(route_count)
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared route table reference.
pub type SharedRouteTable = Arc<RouteTable>;
