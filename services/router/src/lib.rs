pub mod config;
pub mod error;
pub mod proxy;
pub mod reload;
pub mod routes;

pub use config::{Config, LogFormat};
pub use error::{ConfigError, RouterError};
pub use proxy::{
    ConnectionHandler, ConnectionOutcome, Handshake, HandshakeSniffer, Listener, ListenerConfig,
    ListenerStats, RawRoute, RouteEntry, RouteError, RouteTable, RoutingTable, SharedRouteTable,
    SniffConfig, SniffError,
};
pub use reload::{ReloadPolicy, Reloader};
pub use routes::{LoadedRoutes, RouteSource};
