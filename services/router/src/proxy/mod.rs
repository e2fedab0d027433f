//! Hostname-routing TCP proxy.
//!
//! This module provides:
//! - TCP listener management
//! - Handshake inspection (hostname extraction without consuming bytes)
//! - Route lookup against an atomically swapped table
//! - Connection relaying to loopback backends
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> Handshake Sniffer -> Route Table -> Relay -> Backend
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use proxy::{Listener, ListenerConfig, RouteTable, RoutingTable};
//!
//! let route_table = Arc::new(RouteTable::with_table(RoutingTable::build(raw_routes)));
//!
//! let config = ListenerConfig::new("0.0.0.0:25565".parse()?);
//! let listener = Listener::bind(config, route_table).await?;
//! listener.run().await?;
//! ```

mod handshake;
mod listener;
mod relay;
mod router;
pub mod varint;

pub use handshake::{
    parse_handshake, Handshake, HandshakeSniffer, SniffConfig, SniffError, DEFAULT_MAX_FRAME_LEN,
    DEFAULT_SNIFF_TIMEOUT,
};
pub use listener::{
    ConnectionHandler, ConnectionOutcome, Listener, ListenerConfig, ListenerStats,
    DEFAULT_MAX_CONNECTIONS,
};
pub use relay::{connect_backend, relay, RelayTotals, DEFAULT_BACKEND_IP, DEFAULT_CONNECT_TIMEOUT};
pub use router::{
    RawRoute, RouteEntry, RouteError, RouteTable, RoutingTable, SharedRouteTable, MAX_HOSTNAME_LEN,
};
pub use varint::{decode_varint, encode_varint, varint_len, VarintError};
