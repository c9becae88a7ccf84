//! A single client connection: one duplex byte stream plus the bookkeeping
//! the pool needs to decide whether it may be reused.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::trace;

use crate::error::{Error, Result, TimeoutPhase};

/// Scheme component of a pool key. `ws`/`wss` collapse onto the
/// corresponding HTTP scheme so sessions share the HTTP pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub(crate) fn from_url_scheme(s: &str) -> Option<Scheme> {
        match s {
            "http" | "ws" => Some(Scheme::Http),
            "https" | "wss" => Some(Scheme::Https),
            _ => None,
        }
    }

    pub(crate) fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub(crate) fn is_tls(&self) -> bool {
        matches!(self, Scheme::Https)
    }
}

/// Identity of the remote a connection is good for: the origin, plus the
/// proxy it was established through (a tunneled connection must never be
/// reused for a direct one).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ConnectionKey {
    pub(crate) scheme: Scheme,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) proxy: Option<String>,
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
        };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)?;
        if let Some(ref proxy) = self.proxy {
            write!(f, " via {}", proxy)?;
        }
        Ok(())
    }
}

/// The transport under a connection.
pub(crate) enum Io {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Io {
    fn tcp(&self) -> &TcpStream {
        match self {
            Io::Plain(tcp) => tcp,
            Io::Tls(tls) => tls.get_ref().0,
        }
    }
}

impl AsyncRead for Io {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Io::Plain(tcp) => Pin::new(tcp).poll_read(cx, buf),
            Io::Tls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Io {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Io::Plain(tcp) => Pin::new(tcp).poll_write(cx, buf),
            Io::Tls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Io::Plain(tcp) => Pin::new(tcp).poll_flush(cx),
            Io::Tls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Io::Plain(tcp) => Pin::new(tcp).poll_shutdown(cx),
            Io::Tls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
        }
    }
}

/// One pooled client connection.
///
/// A connection is always in exactly one of three states: idle inside a
/// pool, leased by a single exchange, or closed. The pool is the only
/// place transitions happen; this type just records the facts the pool
/// consults.
pub(crate) struct Connection {
    pub(crate) key: ConnectionKey,
    io: Io,
    /// Bytes read past the end of the previous message.
    pub(crate) read_buf: BytesMut,
    created_at: Instant,
    last_used_at: Instant,
    requests_served: u64,
    keep_alive: bool,
    closed: bool,
}

impl Connection {
    pub(crate) fn new(key: ConnectionKey, io: Io) -> Connection {
        let now = Instant::now();
        Connection {
            key,
            io,
            read_buf: BytesMut::with_capacity(8 * 1024),
            created_at: now,
            last_used_at: now,
            requests_served: 0,
            keep_alive: true,
            closed: false,
        }
    }

    pub(crate) fn requests_served(&self) -> u64 {
        self.requests_served
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    pub(crate) fn is_keep_alive(&self) -> bool {
        self.keep_alive && !self.closed
    }

    pub(crate) fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Record the start of one request/response exchange.
    pub(crate) fn mark_used(&mut self) {
        self.requests_served += 1;
        self.last_used_at = Instant::now();
    }

    /// Non-blocking liveness peek on the underlying socket.
    ///
    /// An idle HTTP connection must have nothing to read. A pending EOF,
    /// an error, or stray bytes (a late body, a TLS close-notify) all make
    /// the connection unusable for another exchange.
    pub(crate) fn is_stale(&self) -> bool {
        if self.closed || !self.read_buf.is_empty() {
            return true;
        }
        let mut probe = [0u8; 1];
        match self.io.tcp().try_read(&mut probe) {
            Ok(0) => true,
            Ok(_) => true,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }

    /// Read more bytes into the parse buffer, bounded by `budget`.
    ///
    /// Returns the number of new bytes; 0 means a clean EOF.
    pub(crate) async fn fill_buf(&mut self, budget: Duration) -> Result<usize> {
        use tokio::io::AsyncReadExt;

        let read = tokio::time::timeout(budget, self.io.read_buf(&mut self.read_buf))
            .await
            .map_err(|_| Error::timeout(TimeoutPhase::Read))?
            .map_err(|e| {
                self.closed = true;
                Error::from(e)
            })?;
        if read == 0 {
            trace!(key = %self.key, "connection saw EOF");
            self.keep_alive = false;
        }
        Ok(read)
    }

    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.io.write_all(buf).await.map_err(|e| {
            self.closed = true;
            Error::from(e)
        })
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        self.io.flush().await.map_err(|e| {
            self.closed = true;
            Error::from(e)
        })
    }

    /// Detach the transport for protocols that take the stream over after
    /// an upgrade, along with any bytes already read past the response.
    pub(crate) fn into_parts(self) -> (Io, BytesMut) {
        (self.io, self.read_buf)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("age", &self.created_at.elapsed())
            .field("requests_served", &self.requests_served)
            .field("keep_alive", &self.keep_alive)
            .field("closed", &self.closed)
            .finish()
    }
}
