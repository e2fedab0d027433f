//! Backend connection and bidirectional relay.
//!
//! The relay is a transparent byte pipe. The handshake frame that was peeked
//! during sniffing is drained from the client and written to the backend
//! before anything else, then bytes flow both ways. EOF or an error on one
//! side shuts down the write half of the other, and the remaining direction
//! gets [`CLOSE_GRACE`] to drain before both sockets are released.

use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Default connect timeout for backend connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Backends listen on loopback unless configured otherwise.
pub const DEFAULT_BACKEND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Time the surviving direction may keep flowing after the other one ended.
pub const CLOSE_GRACE: Duration = Duration::from_millis(500);

const COPY_BUFFER_SIZE: usize = 8192;

/// Bytes moved by a finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayTotals {
    /// Client -> backend, handshake frame included.
    pub to_backend: u64,
    /// Backend -> client.
    pub from_backend: u64,
}

/// Open a connection to a backend, bounded by `connect_timeout`.
pub async fn connect_backend(addr: SocketAddr, connect_timeout: Duration) -> io::Result<TcpStream> {
    debug!(backend_addr = %addr, "Connecting to backend");

    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout")),
    }
}

/// Relay a routed connection.
///
/// `frame_len` bytes are still pending on `client` (the peeked handshake);
/// they are forwarded to `backend` before the bidirectional copy starts.
pub async fn relay(
    client: &mut TcpStream,
    backend: &mut TcpStream,
    frame_len: usize,
    idle_timeout: Option<Duration>,
) -> io::Result<RelayTotals> {
    let mut frame = vec![0u8; frame_len];
    client.read_exact(&mut frame).await?;
    backend.write_all(&frame).await?;

    let (mut client_read, mut client_write) = client.split();
    let (mut backend_read, mut backend_write) = backend.split();

    let upstream = copy_half(&mut client_read, &mut backend_write, idle_timeout);
    let downstream = copy_half(&mut backend_read, &mut client_write, idle_timeout);
    tokio::pin!(upstream, downstream);

    let (to_backend, from_backend) = tokio::select! {
        to_backend = &mut upstream => (to_backend, drain(downstream).await),
        from_backend = &mut downstream => (drain(upstream).await, from_backend),
    };

    if let Err(e) = &to_backend {
        debug!(error = %e, "Client -> backend ended with error");
    }
    if let Err(e) = &from_backend {
        debug!(error = %e, "Backend -> client ended with error");
    }

    // Return bytes transferred even if one direction errored
    Ok(RelayTotals {
        to_backend: frame_len as u64 + to_backend.unwrap_or(0),
        from_backend: from_backend.unwrap_or(0),
    })
}

/// Let the remaining direction finish within [`CLOSE_GRACE`].
async fn drain<F>(remaining: F) -> io::Result<u64>
where
    F: Future<Output = io::Result<u64>>,
{
    match timeout(CLOSE_GRACE, remaining).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "peer closed, drain expired")),
    }
}

/// Copy `reader` into `writer` until EOF, error or idle timeout, then shut
/// the writer down so the peer observes the close.
async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle_timeout: Option<Duration>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = copy_until_eof(reader, writer, idle_timeout).await;
    let _ = writer.shutdown().await;
    result
}

async fn copy_until_eof<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle_timeout: Option<Duration>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    loop {
        let read_result = if let Some(idle) = idle_timeout {
            match timeout(idle, reader.read(&mut buf)).await {
                Ok(result) => result,
                Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout")),
            }
        } else {
            reader.read(&mut buf).await
        };

        match read_result? {
            0 => return Ok(total),
            n => {
                writer.write_all(&buf[..n]).await?;
                total += n as u64;
            }
        }
    }
}
