use std::fmt;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

/// SOCKSv4 request-granted/rejected status codes (the reply's second byte).
const REQUEST_GRANTED: u8 = 0x5a;
const REQUEST_REJECTED: u8 = 0x5b;
const REQUEST_REJECTED_IDENTD: u8 = 0x5c;
const REQUEST_REJECTED_USER: u8 = 0x5d;

const VERSION: u8 = 0x04;
const COMMAND_CONNECT: u8 = 0x01;

/// SOCKSv4a's sentinel "invalid" IP (0.0.0.1) that tells the proxy to
/// resolve `DSTIP`'s accompanying hostname itself instead of dialing it.
const INVALID_SERVER: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksVersion {
    /// Client resolves the hostname itself before the handshake.
    V4,
    /// Client sends the hostname and lets the proxy resolve it.
    V4a,
}

#[derive(Debug)]
pub enum SocksError {
    Rejected { server: Ipv4Addr, port: u16 },
    IdentdRejected { server: Ipv4Addr, port: u16 },
    UserRejected { server: Ipv4Addr, port: u16 },
    Malformed(String),
    Io(io::Error),
}

impl fmt::Display for SocksError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksError::Rejected { server, port } => {
                write!(f, "socks request rejected ({}:{})", server, port)
            }
            SocksError::IdentdRejected { server, port } => write!(
                f,
                "socks request rejected: proxy could not reach client identd ({}:{})",
                server, port
            ),
            SocksError::UserRejected { server, port } => write!(
                f,
                "socks request rejected: client/identd user-id mismatch ({}:{})",
                server, port
            ),
            SocksError::Malformed(msg) => write!(f, "malformed socks reply: {}", msg),
            SocksError::Io(e) => write!(f, "socks io error: {}", e),
        }
    }
}

impl std::error::Error for SocksError {}

impl From<io::Error> for SocksError {
    fn from(e: io::Error) -> Self {
        SocksError::Io(e)
    }
}

/// Performs the SOCKSv4/v4a CONNECT handshake over an already-connected
/// stream to the proxy, then wraps it so that all subsequent reads/writes
/// transparently pass through to the tunnel — the caller dials the proxy,
/// hands the stream here, and gets back something that behaves exactly like
/// a direct connection to `host:port`.
pub async fn connect<S>(
    mut stream: S,
    version: SocksVersion,
    host: &str,
    port: u16,
    user: &str,
) -> Result<SocksStream<S>, SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut packed = Vec::with_capacity(32);
    packed.push(VERSION);
    packed.push(COMMAND_CONNECT);
    packed.extend_from_slice(&port.to_be_bytes());

    match version {
        SocksVersion::V4 => {
            let ip: Ipv4Addr = host
                .parse()
                .map_err(|_| SocksError::Malformed(format!("SOCKSv4 requires a resolved IPv4 address, got {:?}", host)))?;
            packed.extend_from_slice(&ip.octets());
            packed.extend_from_slice(user.as_bytes());
            packed.push(0);
        }
        SocksVersion::V4a => {
            packed.extend_from_slice(&INVALID_SERVER.octets());
            packed.extend_from_slice(user.as_bytes());
            packed.push(0);
            packed.extend_from_slice(host.as_bytes());
            packed.push(0);
        }
    }

    stream.write_all(&packed).await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;

    let status = reply[1];
    let server_port = u16::from_be_bytes([reply[2], reply[3]]);
    let server = Ipv4Addr::new(reply[4], reply[5], reply[6], reply[7]);

    match status {
        REQUEST_GRANTED => Ok(SocksStream { inner: stream }),
        REQUEST_REJECTED => Err(SocksError::Rejected {
            server,
            port: server_port,
        }),
        REQUEST_REJECTED_IDENTD => Err(SocksError::IdentdRejected {
            server,
            port: server_port,
        }),
        REQUEST_REJECTED_USER => Err(SocksError::UserRejected {
            server,
            port: server_port,
        }),
        other => Err(SocksError::Malformed(format!(
            "unexpected socks reply status: 0x{:02x}",
            other
        ))),
    }
}

/// A transport tunneled through a SOCKS proxy. Once constructed by
/// [`connect`], it reads and writes exactly like the underlying stream would
/// if dialed directly — everything above this layer (TLS, the HTTP protocol
/// engine) is none the wiser.
pub struct SocksStream<S> {
    inner: S,
}

impl<S: AsyncRead + Unpin> AsyncRead for SocksStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for SocksStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
