//! TCP listener and connection handling.
//!
//! The listener owns the public socket. Every accepted connection moves into
//! its own task which sniffs the handshake, resolves the hostname and relays
//! to the backend. Rejections are silent: the socket is simply dropped.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn, Instrument};

use super::handshake::{HandshakeSniffer, SniffConfig, SniffError};
use super::relay::{self, DEFAULT_BACKEND_IP, DEFAULT_CONNECT_TIMEOUT};
use super::router::RouteTable;

/// Default maximum concurrent connections per listener.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Default idle timeout (none; game sessions may be quiet for long periods).
pub const DEFAULT_IDLE_TIMEOUT: Option<Duration> = None;

/// Back-off after an accept error that is not a per-connection failure.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Address backends listen on; the port comes from the route.
    pub backend_ip: IpAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Handshake sniffing limits.
    pub sniff_config: SniffConfig,
    /// Timeout for connecting to a backend.
    pub connect_timeout: Duration,
    /// Idle timeout for relayed connections.
    pub idle_timeout: Option<Duration>,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            backend_ip: DEFAULT_BACKEND_IP,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            sniff_config: SniffConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Total connections currently active.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
    /// Connections rejected due to max limit.
    pub connections_rejected: AtomicU64,
    /// Handshakes decoded.
    pub handshakes_decoded: AtomicU64,
    /// Handshakes that were malformed, truncated or timed out.
    pub handshakes_failed: AtomicU64,
    /// Hostnames found in the route table.
    pub routes_matched: AtomicU64,
    /// Hostnames with no route.
    pub routes_unmatched: AtomicU64,
    /// Backend connection successes.
    pub backend_connected: AtomicU64,
    /// Backend connection failures.
    pub backend_failed: AtomicU64,
    /// Bytes proxied to backend.
    pub bytes_to_backend: AtomicU64,
    /// Bytes proxied from backend.
    pub bytes_from_backend: AtomicU64,
}

impl ListenerStats {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Relayed until both sides closed.
    Relayed,
    /// Handshake could not be decoded.
    Malformed,
    /// No route for the requested hostname.
    Unrouted,
    /// Route found but the backend refused or timed out.
    BackendUnavailable,
}

/// A TCP listener routing connections by handshake hostname.
///
/// Owns the public socket exclusively. Connection tasks only receive the
/// shared [`ConnectionHandler`].
pub struct Listener {
    /// The TCP listener.
    listener: TcpListener,
    /// Connection semaphore for limiting concurrent connections.
    conn_semaphore: Arc<Semaphore>,
    /// Per-connection state shared with every task.
    handler: Arc<ConnectionHandler>,
}

impl Listener {
    /// Bind a new listener.
    pub async fn bind(config: ListenerConfig, route_table: Arc<RouteTable>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            conn_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            listener,
            handler: Arc::new(ConnectionHandler::new(config, route_table)),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> &ListenerStats {
        &self.handler.stats
    }

    /// Statistics handle that outlives the listener.
    pub fn shared_stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.handler.stats)
    }

    /// Handler used for accepted connections.
    pub fn handler(&self) -> Arc<ConnectionHandler> {
        Arc::clone(&self.handler)
    }

    /// Run the accept loop. Only returns if the local address is unavailable.
    ///
    /// Dropping the future closes the public socket even while relayed
    /// connections are still running.
    pub async fn run(self) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    // Try to acquire a permit
                    let permit = match self.conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            ListenerStats::incr(&self.handler.stats.connections_rejected);
                            warn!(peer_addr = %peer_addr, "Connection rejected: max connections reached");
                            continue;
                        }
                    };

                    let stats = &self.handler.stats;
                    ListenerStats::incr(&stats.connections_accepted);
                    ListenerStats::incr(&stats.connections_active);

                    let handler = Arc::clone(&self.handler);

                    tokio::spawn(
                        async move {
                            match handler.handle_connection(stream, peer_addr).await {
                                Ok(outcome) => debug!(outcome = ?outcome, "Connection finished"),
                                Err(e) => debug!(error = %e, "Connection error"),
                            }

                            handler.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            ListenerStats::incr(&handler.stats.connections_closed);
                            drop(permit);
                        }
                        .instrument(tracing::info_span!("connection", peer = %peer_addr)),
                    );
                }
                Err(e) if is_connection_error(&e) => {
                    debug!(error = %e, "Accept interrupted, retrying");
                }
                Err(e) => {
                    warn!(error = %e, "Accept error");
                    // Brief sleep to avoid tight loop on persistent errors
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
}

/// Sniffs, routes and relays a single accepted connection.
pub struct ConnectionHandler {
    config: ListenerConfig,
    route_table: Arc<RouteTable>,
    sniffer: HandshakeSniffer,
    stats: Arc<ListenerStats>,
}

impl ConnectionHandler {
    pub fn new(config: ListenerConfig, route_table: Arc<RouteTable>) -> Self {
        Self {
            sniffer: HandshakeSniffer::with_config(config.sniff_config.clone()),
            config,
            route_table,
            stats: Arc::new(ListenerStats::default()),
        }
    }

    /// Handle a single connection: sniff, route, relay.
    ///
    /// The client socket is dropped on every return path.
    pub async fn handle_connection(
        &self,
        mut client: TcpStream,
        peer_addr: SocketAddr,
    ) -> io::Result<ConnectionOutcome> {
        debug!(peer_addr = %peer_addr, "Handling connection");

        let handshake = match self.sniffer.sniff(&client).await {
            Ok(handshake) => {
                ListenerStats::incr(&self.stats.handshakes_decoded);
                handshake
            }
            Err(SniffError::Io(e)) => {
                ListenerStats::incr(&self.stats.handshakes_failed);
                return Err(e);
            }
            Err(e) => {
                ListenerStats::incr(&self.stats.handshakes_failed);
                debug!(error = %e, "Handshake rejected");
                return Ok(ConnectionOutcome::Malformed);
            }
        };

        let Some(backend_port) = self.route_table.lookup(&handshake.hostname) else {
            ListenerStats::incr(&self.stats.routes_unmatched);
            info!(hostname = %handshake.hostname, "Nothing found for host");
            return Ok(ConnectionOutcome::Unrouted);
        };
        ListenerStats::incr(&self.stats.routes_matched);

        let backend_addr = SocketAddr::new(self.config.backend_ip, backend_port);
        info!(
            hostname = %handshake.hostname,
            requested_port = ?handshake.requested_port,
            backend_addr = %backend_addr,
            "Route matched"
        );

        let mut backend = match relay::connect_backend(backend_addr, self.config.connect_timeout).await {
            Ok(stream) => {
                ListenerStats::incr(&self.stats.backend_connected);
                stream
            }
            Err(e) => {
                ListenerStats::incr(&self.stats.backend_failed);
                warn!(backend_addr = %backend_addr, error = %e, "Backend connection failed");
                return Ok(ConnectionOutcome::BackendUnavailable);
            }
        };

        let totals = relay::relay(
            &mut client,
            &mut backend,
            handshake.frame_len(),
            self.config.idle_timeout,
        )
        .await?;

        self.stats
            .bytes_to_backend
            .fetch_add(totals.to_backend, Ordering::Relaxed);
        self.stats
            .bytes_from_backend
            .fetch_add(totals.from_backend, Ordering::Relaxed);

        debug!(
            bytes_to_backend = totals.to_backend,
            bytes_from_backend = totals.from_backend,
            "Connection closed"
        );

        Ok(ConnectionOutcome::Relayed)
    }
}

/// Accept errors caused by a single failed connection rather than the
/// listener itself.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}
