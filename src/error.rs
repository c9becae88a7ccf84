//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use http::{Method, StatusCode};
use url::Url;

/// Result type often returned from methods that can have gale `Error`s.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur handling HTTP, WebSocket or SSE traffic.
///
/// The error carries a stable [`ErrorKind`] discriminator, the request
/// context it happened under (URL, method, response status when one was
/// received), and an optional underlying cause.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: ErrorKind,
    cause: Option<Cause>,
    url: Option<Url>,
    method: Option<Method>,
    status: Option<StatusCode>,
}

/// The phase a timeout applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TimeoutPhase {
    /// Establishing the TCP connection.
    Connect,
    /// Reading from the transport.
    Read,
    /// Writing to the transport.
    Write,
    /// Waiting for a pool slot.
    PoolAcquire,
    /// The whole request exchange.
    Request,
}

/// A stable discriminator for the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The resolver returned no addresses or failed outright.
    Dns,
    /// All resolved addresses failed to connect.
    Connect,
    /// TLS handshake or certificate verification failed.
    Tls,
    /// No pool slot became available within the deadline.
    PoolAcquireTimeout,
    /// Malformed status line, header block, or chunk framing.
    Parse,
    /// The response body exceeded a caller-specified cap.
    BodyTooLarge,
    /// A deadline elapsed during the named phase.
    Timeout(TimeoutPhase),
    /// The redirect chain exceeded the limit.
    TooManyRedirects,
    /// Corrupt gzip or deflate stream.
    Decompress,
    /// The WebSocket upgrade handshake was refused or invalid.
    WsHandshake,
    /// The peer violated the WebSocket framing rules.
    WsProtocol,
    /// An incoming WebSocket frame exceeded the configured cap.
    WsFrameTooLarge,
    /// The WebSocket session is closed.
    WsClosed {
        /// Close code received or sent, if any.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// The SSE endpoint refused the stream or returned a wrong content type.
    SseConnection,
    /// A malformed SSE field was encountered.
    SseParsing,
    /// Two tasks attempted to read from one session at once.
    ConcurrentRead,
    /// An I/O error on a connection not covered by a more specific kind.
    Io,
    /// The request could not be built (bad URL, bad header value, bad body).
    Builder,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Error {
            inner: Box::new(ErrorImpl {
                kind,
                cause: None,
                url: None,
                method: None,
                status: None,
            }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn with_url(mut self, url: Url) -> Error {
        self.inner.url = Some(url);
        self
    }

    pub(crate) fn with_method(mut self, method: Method) -> Error {
        self.inner.method = Some(method);
        self
    }

    pub(crate) fn with_status(mut self, status: StatusCode) -> Error {
        self.inner.status = Some(status);
        self
    }

    // constructors for each kind, used across the crate

    pub(crate) fn dns<C: Into<Cause>>(host: &str, cause: C) -> Error {
        Error::new(ErrorKind::Dns).with(format!("failed to resolve {}: {}", host, cause.into()))
    }

    pub(crate) fn connect<C: Into<Cause>>(cause: C) -> Error {
        Error::new(ErrorKind::Connect).with(cause)
    }

    pub(crate) fn tls<C: Into<Cause>>(cause: C) -> Error {
        Error::new(ErrorKind::Tls).with(cause)
    }

    pub(crate) fn pool_acquire_timeout() -> Error {
        Error::new(ErrorKind::PoolAcquireTimeout)
    }

    pub(crate) fn parse<C: Into<Cause>>(cause: C) -> Error {
        Error::new(ErrorKind::Parse).with(cause)
    }

    pub(crate) fn body_too_large(limit: usize) -> Error {
        Error::new(ErrorKind::BodyTooLarge).with(format!("body exceeded {} bytes", limit))
    }

    pub(crate) fn timeout(phase: TimeoutPhase) -> Error {
        Error::new(ErrorKind::Timeout(phase))
    }

    pub(crate) fn too_many_redirects(chain: Vec<Url>) -> Error {
        let mut err = Error::new(ErrorKind::TooManyRedirects);
        err.inner.url = chain.last().cloned();
        err.inner.cause = Some(Box::new(RedirectChain(chain)));
        err
    }

    pub(crate) fn decompress<C: Into<Cause>>(cause: C) -> Error {
        Error::new(ErrorKind::Decompress).with(cause)
    }

    pub(crate) fn ws_handshake<C: Into<Cause>>(cause: C) -> Error {
        Error::new(ErrorKind::WsHandshake).with(cause)
    }

    pub(crate) fn ws_protocol<C: Into<Cause>>(cause: C) -> Error {
        Error::new(ErrorKind::WsProtocol).with(cause)
    }

    pub(crate) fn ws_frame_too_large(len: usize) -> Error {
        Error::new(ErrorKind::WsFrameTooLarge).with(format!("frame payload of {} bytes", len))
    }

    pub(crate) fn ws_closed(code: u16, reason: impl Into<String>) -> Error {
        Error::new(ErrorKind::WsClosed {
            code,
            reason: reason.into(),
        })
    }

    pub(crate) fn sse_connection<C: Into<Cause>>(cause: C) -> Error {
        Error::new(ErrorKind::SseConnection).with(cause)
    }

    pub(crate) fn sse_parsing<C: Into<Cause>>(cause: C) -> Error {
        Error::new(ErrorKind::SseParsing).with(cause)
    }

    pub(crate) fn concurrent_read() -> Error {
        Error::new(ErrorKind::ConcurrentRead)
    }

    pub(crate) fn io(err: io::Error) -> Error {
        Error::new(ErrorKind::Io).with(err)
    }

    pub(crate) fn builder<C: Into<Cause>>(cause: C) -> Error {
        Error::new(ErrorKind::Builder).with(cause)
    }

    /// The discriminator for this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    /// The URL of the request this error happened under, when known.
    pub fn url(&self) -> Option<&Url> {
        self.inner.url.as_ref()
    }

    /// The method of the request this error happened under, when known.
    pub fn method(&self) -> Option<&Method> {
        self.inner.method.as_ref()
    }

    /// The response status, when a response head had been received.
    pub fn status(&self) -> Option<StatusCode> {
        self.inner.status
    }

    /// Returns true if this error came from any elapsed deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.inner.kind,
            ErrorKind::Timeout(_) | ErrorKind::PoolAcquireTimeout
        )
    }

    /// Returns true for errors produced by the redirect limit.
    pub fn is_redirect(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::TooManyRedirects)
    }

    /// The redirect chain recorded by a [`ErrorKind::TooManyRedirects`] error.
    pub fn redirect_chain(&self) -> Option<&[Url]> {
        self.inner
            .cause
            .as_ref()
            .and_then(|c| c.downcast_ref::<RedirectChain>())
            .map(|c| &c.0[..])
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            ErrorKind::Dns => "dns resolution failed",
            ErrorKind::Connect => "tcp connect failed",
            ErrorKind::Tls => "tls handshake failed",
            ErrorKind::PoolAcquireTimeout => "timed out waiting for a pool slot",
            ErrorKind::Parse => "invalid HTTP message",
            ErrorKind::BodyTooLarge => "response body too large",
            ErrorKind::Timeout(TimeoutPhase::Connect) => "connect deadline elapsed",
            ErrorKind::Timeout(TimeoutPhase::Read) => "read deadline elapsed",
            ErrorKind::Timeout(TimeoutPhase::Write) => "write deadline elapsed",
            ErrorKind::Timeout(TimeoutPhase::PoolAcquire) => "pool acquire deadline elapsed",
            ErrorKind::Timeout(TimeoutPhase::Request) => "request deadline elapsed",
            ErrorKind::TooManyRedirects => "too many redirects",
            ErrorKind::Decompress => "corrupt compressed body",
            ErrorKind::WsHandshake => "websocket handshake failed",
            ErrorKind::WsProtocol => "websocket protocol violation",
            ErrorKind::WsFrameTooLarge => "websocket frame too large",
            ErrorKind::WsClosed { .. } => "websocket closed",
            ErrorKind::SseConnection => "sse connection failed",
            ErrorKind::SseParsing => "invalid sse stream",
            ErrorKind::ConcurrentRead => "concurrent read on one session",
            ErrorKind::Io => "connection error",
            ErrorKind::Builder => "invalid request",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("gale::Error");
        d.field("kind", &self.inner.kind);
        if let Some(ref url) = self.inner.url {
            d.field("url", &url.as_str());
        }
        if let Some(ref method) = self.inner.method {
            d.field("method", method);
        }
        if let Some(status) = self.inner.status {
            d.field("status", &status);
        }
        if let Some(ref cause) = self.inner.cause {
            d.field("cause", cause);
        }
        d.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())?;
        match (&self.inner.method, &self.inner.url) {
            (Some(method), Some(url)) => write!(f, " ({} {})", method, url)?,
            (None, Some(url)) => write!(f, " ({})", url)?,
            _ => (),
        }
        if let Some(status) = self.inner.status {
            write!(f, " (status: {})", status.as_u16())?;
        }
        if let Some(ref cause) = self.inner.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        if err.kind() == io::ErrorKind::TimedOut {
            Error::timeout(TimeoutPhase::Read).with(err)
        } else {
            Error::io(err)
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Error {
        Error::builder(err)
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Error {
        Error::builder(err)
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(err: http::header::InvalidHeaderName) -> Error {
        Error::builder(err)
    }
}

impl From<httparse::Error> for Error {
    fn from(err: httparse::Error) -> Error {
        Error::parse(err)
    }
}

/// Cause payload that carries the visited URLs for `TooManyRedirects`.
#[derive(Debug)]
struct RedirectChain(Vec<Url>);

impl fmt::Display for RedirectChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hops", self.0.len())
    }
}

impl StdError for RedirectChain {}
