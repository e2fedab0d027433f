//! Hostname extraction from the client handshake.
//!
//! The handshake is the first frame a client sends and is never encrypted:
//!
//! ```text
//! varint  frame length (excluding itself)
//! varint  packet id
//! varint  protocol version
//! u8      hostname length L
//! [u8; L] hostname
//! u16     port (big endian)
//! varint  next state
//! ```
//!
//! The frame is only peeked, so every byte stays queued on the socket for the
//! relay to forward.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::debug;

use super::router::RouteEntry;
use super::varint::{decode_varint, VarintError, MAX_VARINT_LEN};

/// Default time a client gets to deliver its whole handshake.
pub const DEFAULT_SNIFF_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper bound for a handshake frame, length prefix included.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024;

/// Delay between peeks while a partial frame is buffered.
const PEEK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// A decoded handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// The complete frame as peeked, length prefix included.
    pub raw: Vec<u8>,
    /// Requested hostname, trailing dot removed.
    pub hostname: String,
    /// Requested port, when the frame carries one.
    pub requested_port: Option<u16>,
}

impl Handshake {
    /// Number of bytes the frame occupies on the wire.
    pub fn frame_len(&self) -> usize {
        self.raw.len()
    }
}

/// Reasons a handshake could not be decoded.
#[derive(Debug, Error)]
pub enum SniffError {
    /// A varint field has no terminator where one was required.
    #[error("truncated varint in {field}: {source}")]
    TruncatedVarint {
        field: &'static str,
        #[source]
        source: VarintError,
    },

    /// The frame length prefix decoded to zero.
    #[error("empty handshake frame")]
    EmptyFrame,

    /// The declared frame is larger than the configured limit.
    #[error("handshake frame of {len} bytes exceeds limit of {max}")]
    Oversized { len: usize, max: usize },

    /// The frame body does not follow the handshake layout.
    #[error("malformed handshake: {0}")]
    Malformed(&'static str),

    /// The client did not deliver the full frame in time.
    #[error("timed out waiting for handshake")]
    Timeout,

    /// The client closed before sending anything.
    #[error("connection closed before handshake")]
    Closed,

    /// Socket error while peeking.
    #[error("i/o error while peeking handshake: {0}")]
    Io(#[from] io::Error),
}

/// Configuration for handshake sniffing.
#[derive(Debug, Clone)]
pub struct SniffConfig {
    /// Maximum time to wait for the complete frame.
    pub timeout: Duration,
    /// Maximum frame size, length prefix included.
    pub max_frame_len: usize,
}

impl Default for SniffConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SNIFF_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Peeks and decodes handshakes from freshly accepted sockets.
#[derive(Debug, Clone, Default)]
pub struct HandshakeSniffer {
    config: SniffConfig,
}

impl HandshakeSniffer {
    /// Create a sniffer with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sniffer with custom limits.
    pub fn with_config(config: SniffConfig) -> Self {
        Self { config }
    }

    /// Peek the handshake frame on `stream` and decode it.
    ///
    /// No bytes are consumed: on success the whole frame is still pending on
    /// the socket and its copy is returned in [`Handshake::raw`].
    pub async fn sniff(&self, stream: &TcpStream) -> Result<Handshake, SniffError> {
        match timeout(self.config.timeout, self.peek_frame(stream)).await {
            Ok(result) => parse_handshake(result?),
            Err(_) => Err(SniffError::Timeout),
        }
    }

    async fn peek_frame(&self, stream: &TcpStream) -> Result<Vec<u8>, SniffError> {
        let mut prefix = [0u8; MAX_VARINT_LEN];

        let (body_len, prefix_len) = loop {
            let n = peek_some(stream, &mut prefix).await?;
            match decode_varint(&prefix[..n], 0, MAX_VARINT_LEN) {
                Ok(decoded) => break decoded,
                Err(_) if n < MAX_VARINT_LEN => sleep(PEEK_RETRY_INTERVAL).await,
                Err(source) => {
                    return Err(SniffError::TruncatedVarint {
                        field: "frame length",
                        source,
                    })
                }
            }
        };

        if body_len == 0 {
            return Err(SniffError::EmptyFrame);
        }

        let frame_len = prefix_len.saturating_add(body_len as usize);
        if frame_len > self.config.max_frame_len {
            return Err(SniffError::Oversized {
                len: frame_len,
                max: self.config.max_frame_len,
            });
        }

        let mut frame = vec![0u8; frame_len];
        while peek_some(stream, &mut frame).await? < frame_len {
            sleep(PEEK_RETRY_INTERVAL).await;
        }

        debug!(frame_len = frame_len, "Handshake frame buffered");
        Ok(frame)
    }
}

/// Peek whatever is buffered, waiting until at least one byte is.
async fn peek_some(stream: &TcpStream, buf: &mut [u8]) -> Result<usize, SniffError> {
    match stream.peek(buf).await? {
        0 => Err(SniffError::Closed),
        n => Ok(n),
    }
}

/// Decode a complete handshake frame.
///
/// The three leading varints (length, packet id, protocol version) are only
/// skipped. The hostname length is a single raw byte.
pub fn parse_handshake(raw: Vec<u8>) -> Result<Handshake, SniffError> {
    let mut cursor = 0;
    for field in ["packet length", "packet id", "protocol version"] {
        let (_, next) = decode_varint(&raw, cursor, MAX_VARINT_LEN)
            .map_err(|source| SniffError::TruncatedVarint { field, source })?;
        cursor = next;
    }

    let host_len = *raw
        .get(cursor)
        .ok_or(SniffError::Malformed("missing hostname length"))? as usize;
    cursor += 1;

    if host_len == 0 {
        return Err(SniffError::Malformed("empty hostname"));
    }

    let host_bytes = raw
        .get(cursor..cursor + host_len)
        .ok_or(SniffError::Malformed("hostname runs past end of frame"))?;
    let hostname = std::str::from_utf8(host_bytes)
        .map_err(|_| SniffError::Malformed("hostname is not valid UTF-8"))?;
    let hostname = RouteEntry::normalize_hostname(hostname).to_string();
    cursor += host_len;

    let requested_port = raw
        .get(cursor..cursor + 2)
        .map(|port| u16::from_be_bytes([port[0], port[1]]));

    Ok(Handshake {
        raw,
        hostname,
        requested_port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::proxy::varint::encode_varint;

    fn build_handshake(hostname: &str, port: u16) -> Vec<u8> {
        let mut body = Vec::new();
        encode_varint(0x00, &mut body);
        encode_varint(763, &mut body);
        body.push(hostname.len() as u8);
        body.extend_from_slice(hostname.as_bytes());
        body.extend_from_slice(&port.to_be_bytes());
        encode_varint(2, &mut body);

        let mut frame = Vec::new();
        encode_varint(body.len() as u32, &mut frame);
        frame.extend_from_slice(&body);
        frame
    }

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[test]
    fn test_parse_example_hostname() {
        let frame = build_handshake("example.com", 25565);
        let handshake = parse_handshake(frame.clone()).unwrap();
        assert_eq!(handshake.hostname, "example.com");
        assert_eq!(handshake.requested_port, Some(25565));
        assert_eq!(handshake.raw, frame);
    }

    #[test]
    fn test_parse_strips_trailing_dot() {
        let handshake = parse_handshake(build_handshake("example.com.", 25565)).unwrap();
        assert_eq!(handshake.hostname, "example.com");
    }

    #[test]
    fn test_parse_literal_frame() {
        let mut frame = vec![0x10, 0x00, 0x00, 0x0B];
        frame.extend_from_slice(b"example.com");
        frame.extend_from_slice(&[0x63, 0xDD, 0x01]);

        let handshake = parse_handshake(frame).unwrap();
        assert_eq!(handshake.hostname, "example.com");
        assert_eq!(handshake.requested_port, Some(25565));
    }

    #[test]
    fn test_parse_frame_without_port() {
        let mut frame = vec![0x0E, 0x00, 0x00, 0x0B];
        frame.extend_from_slice(b"example.com");

        let handshake = parse_handshake(frame).unwrap();
        assert_eq!(handshake.hostname, "example.com");
        assert_eq!(handshake.requested_port, None);
    }

    #[test]
    fn test_parse_hostname_past_end() {
        let mut frame = vec![0x08, 0x00, 0x00, 0x20];
        frame.extend_from_slice(b"short");
        assert!(matches!(
            parse_handshake(frame),
            Err(SniffError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_empty_hostname() {
        let frame = vec![0x04, 0x00, 0x00, 0x00, 0x63, 0xDD];
        assert!(matches!(
            parse_handshake(frame),
            Err(SniffError::Malformed("empty hostname"))
        ));
    }

    #[test]
    fn test_parse_unterminated_protocol_version() {
        let frame = vec![0x06, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            parse_handshake(frame),
            Err(SniffError::TruncatedVarint {
                field: "protocol version",
                ..
            })
        ));
    }

    #[test]
    fn test_parse_invalid_utf8_hostname() {
        let frame = vec![0x05, 0x00, 0x00, 0x02, 0xFF, 0xFE];
        assert!(matches!(
            parse_handshake(frame),
            Err(SniffError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_sniff_leaves_bytes_on_socket() {
        let (mut client, mut server) = socket_pair().await;
        let frame = build_handshake("alpha.test", 25565);
        client.write_all(&frame).await.unwrap();
        client.write_all(b"login").await.unwrap();

        let handshake = HandshakeSniffer::new().sniff(&server).await.unwrap();
        assert_eq!(handshake.hostname, "alpha.test");
        assert_eq!(handshake.frame_len(), frame.len());

        let mut pending = vec![0u8; frame.len()];
        server.read_exact(&mut pending).await.unwrap();
        assert_eq!(pending, frame);
    }

    #[tokio::test]
    async fn test_sniff_waits_for_split_frame() {
        let (mut client, server) = socket_pair().await;
        let frame = build_handshake("beta.test", 25566);

        let (head, tail) = frame.split_at(6);
        let tail = tail.to_vec();
        client.write_all(head).await.unwrap();
        let writer = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            client.write_all(&tail).await.unwrap();
            client
        });

        let handshake = HandshakeSniffer::new().sniff(&server).await.unwrap();
        assert_eq!(handshake.hostname, "beta.test");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_sniff_rejects_unterminated_length() {
        let (mut client, server) = socket_pair().await;
        client.write_all(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]).await.unwrap();

        let result = HandshakeSniffer::new().sniff(&server).await;
        assert!(matches!(
            result,
            Err(SniffError::TruncatedVarint {
                field: "frame length",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_sniff_rejects_oversized_frame() {
        let (mut client, server) = socket_pair().await;
        // 0x4000 byte body
        client.write_all(&[0x80, 0x80, 0x01]).await.unwrap();

        let result = HandshakeSniffer::new().sniff(&server).await;
        assert!(matches!(result, Err(SniffError::Oversized { .. })));
    }

    #[tokio::test]
    async fn test_sniff_rejects_empty_frame() {
        let (mut client, server) = socket_pair().await;
        client.write_all(&[0x00]).await.unwrap();

        let result = HandshakeSniffer::new().sniff(&server).await;
        assert!(matches!(result, Err(SniffError::EmptyFrame)));
    }

    #[tokio::test]
    async fn test_sniff_timeout_on_partial_frame() {
        let (mut client, server) = socket_pair().await;
        client.write_all(&[0x20, 0x00, 0x00]).await.unwrap();

        let sniffer = HandshakeSniffer::with_config(SniffConfig {
            timeout: Duration::from_millis(100),
            ..SniffConfig::default()
        });
        let result = sniffer.sniff(&server).await;
        assert!(matches!(result, Err(SniffError::Timeout)));
    }

    #[tokio::test]
    async fn test_sniff_closed_before_data() {
        let (client, server) = socket_pair().await;
        drop(client);

        let result = HandshakeSniffer::new().sniff(&server).await;
        assert!(matches!(result, Err(SniffError::Closed)));
    }
}
