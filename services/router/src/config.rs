//! Process configuration.
//!
//! Every option is a CLI flag that can also be set through the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::proxy::{ListenerConfig, SniffConfig, DEFAULT_MAX_CONNECTIONS};
use crate::reload::ReloadPolicy;
use crate::routes::RouteSource;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable lines.
    Pretty,
}

/// minetd - route game clients to backends by requested hostname.
#[derive(Debug, Clone, Parser)]
#[command(name = "minetd")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Public port to accept clients on.
    #[arg(env = "MINETD_PORT", value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Routes file. When omitted, ./minetd.conf, the user config directory
    /// and /etc/minetd/minetd.conf are tried in that order.
    #[arg(long, env = "MINETD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, env = "MINETD_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Address the backends listen on.
    #[arg(long, env = "MINETD_BACKEND_IP", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub backend_ip: IpAddr,

    /// Maximum concurrent client connections.
    #[arg(long, env = "MINETD_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Time a client gets to send its handshake (milliseconds).
    #[arg(long, env = "MINETD_SNIFF_TIMEOUT_MS", default_value_t = 5000)]
    pub sniff_timeout_ms: u64,

    /// Backend connect timeout (milliseconds).
    #[arg(long, env = "MINETD_CONNECT_TIMEOUT_MS", default_value_t = 2000)]
    pub connect_timeout_ms: u64,

    /// Close relayed connections idle for this long (seconds).
    #[arg(long, env = "MINETD_IDLE_TIMEOUT_SECS")]
    pub idle_timeout_secs: Option<u64>,

    /// What to do when a SIGHUP reload finds no valid routes.
    #[arg(long, env = "MINETD_ON_RELOAD_FAILURE", value_enum, default_value_t = ReloadPolicy::Exit)]
    pub on_reload_failure: ReloadPolicy,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, env = "MINETD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "MINETD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Config {
    /// Address of the public listener.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Listener settings derived from the flags.
    pub fn listener_config(&self) -> ListenerConfig {
        let mut listener_config = ListenerConfig::new(self.bind_addr());
        listener_config.backend_ip = self.backend_ip;
        listener_config.max_connections = self.max_connections.max(1);
        listener_config.sniff_config = SniffConfig {
            timeout: Duration::from_millis(self.sniff_timeout_ms.max(1)),
            ..SniffConfig::default()
        };
        listener_config.connect_timeout = Duration::from_millis(self.connect_timeout_ms.max(1));
        listener_config.idle_timeout = self.idle_timeout_secs.map(Duration::from_secs);
        listener_config
    }

    /// Where routes are loaded from.
    pub fn route_source(&self) -> RouteSource {
        RouteSource::new(self.config.clone())
    }
}
