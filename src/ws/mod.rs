//! The WebSocket engine: upgrade handshake, session management, ping/pong
//! keepalive and the close handshake.

pub(crate) mod frame;
pub mod protocol;

pub use self::frame::Opcode;
pub use self::protocol::{JsonProtocol, ProtocolHandler};

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderValue, CONNECTION, HOST, UPGRADE};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::client::HttpClient;
use crate::conn::Io;
use crate::error::{Error, Result, TimeoutPhase};
use crate::headers::{connection_upgrade, set_if_missing};
use crate::into_url::IntoUrl;
use crate::proto::h1::{dispatch, encode};
use crate::timeout::Deadline;

use self::frame::{Frame, MAX_CONTROL_PAYLOAD, WS_GUID};

const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";
const SEC_WEBSOCKET_VERSION: &str = "sec-websocket-version";
const SEC_WEBSOCKET_ACCEPT: &str = "sec-websocket-accept";
const SEC_WEBSOCKET_PROTOCOL: &str = "sec-websocket-protocol";

/// Close code for an abnormal closure; never written to the wire.
const CLOSE_ABNORMAL: u16 = 1006;
/// Close code when no code was present in the close frame.
const CLOSE_NO_STATUS: u16 = 1005;

/// Options for establishing a WebSocket session.
pub struct WsOptions {
    /// Extra handshake headers.
    pub headers: HeaderMap,
    /// Subprotocols offered in `Sec-WebSocket-Protocol`, in order.
    pub subprotocols: Vec<String>,
    /// A codec whose name is offered alongside `subprotocols` and which
    /// wraps payloads on `send_protocol`/`receive_protocol`.
    pub protocol_handler: Option<Arc<dyn ProtocolHandler>>,
    /// Verify TLS certificates for `wss`.
    pub verify_ssl: bool,
    /// Enable automatic keepalive pings at this interval.
    ///
    /// Pong replies are observed while the consumer is reading; a session
    /// that is never read can be closed by its own keepalive.
    pub ping_interval: Option<Duration>,
    /// How long a keepalive ping may remain unanswered before the session
    /// closes with 1011.
    pub pong_timeout: Duration,
    /// Incoming frames larger than this fail with `WsFrameTooLarge`.
    pub max_frame_size: usize,
    /// Per-phase deadline overrides for the handshake.
    pub timeouts: Option<crate::Timeouts>,
}

impl Default for WsOptions {
    fn default() -> WsOptions {
        WsOptions {
            headers: HeaderMap::new(),
            subprotocols: Vec::new(),
            protocol_handler: None,
            verify_ssl: true,
            ping_interval: None,
            pong_timeout: Duration::from_secs(10),
            max_frame_size: 16 * 1024 * 1024,
            timeouts: None,
        }
    }
}

impl WsOptions {
    /// Options with every field at its default.
    pub fn new() -> WsOptions {
        WsOptions::default()
    }

    /// Add one handshake header line.
    pub fn header(mut self, name: &str, value: &str) -> Result<WsOptions> {
        let name: http::header::HeaderName = name.parse()?;
        self.headers.append(name, HeaderValue::from_str(value)?);
        Ok(self)
    }

    /// Offer a subprotocol during negotiation.
    pub fn subprotocol(mut self, name: impl Into<String>) -> WsOptions {
        self.subprotocols.push(name.into());
        self
    }

    /// Install a subprotocol codec; its name joins the offer list.
    pub fn protocol_handler(mut self, handler: Arc<dyn ProtocolHandler>) -> WsOptions {
        self.protocol_handler = Some(handler);
        self
    }

    /// Verify TLS certificates for `wss` (on by default).
    pub fn verify_ssl(mut self, verify: bool) -> WsOptions {
        self.verify_ssl = verify;
        self
    }

    /// Enable keepalive pings, closing with 1011 after an unanswered one.
    pub fn keepalive(mut self, ping_interval: Duration, pong_timeout: Duration) -> WsOptions {
        self.ping_interval = Some(ping_interval);
        self.pong_timeout = pong_timeout;
        self
    }

    /// Cap on a single incoming frame (and assembled message) size.
    pub fn max_frame_size(mut self, limit: usize) -> WsOptions {
        self.max_frame_size = limit;
        self
    }
}

impl std::fmt::Debug for WsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsOptions")
            .field("subprotocols", &self.subprotocols)
            .field("ping_interval", &self.ping_interval)
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

/// A message delivered from a WebSocket session.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A complete text message (reassembled across fragments).
    Text(String),
    /// A complete binary message.
    Binary(Bytes),
    /// The server's close frame; the session is closed after this.
    Close {
        /// The close code, or 1005 when none was sent.
        code: u16,
        /// The close reason, possibly empty.
        reason: String,
    },
}

impl Message {
    /// The opcode that produced this message.
    pub fn opcode(&self) -> u8 {
        match self {
            Message::Text(_) => Opcode::Text.as_u8(),
            Message::Binary(_) => Opcode::Binary.as_u8(),
            Message::Close { .. } => Opcode::Close.as_u8(),
        }
    }

    /// The payload as bytes; close frames yield their reason.
    pub fn into_data(self) -> Bytes {
        match self {
            Message::Text(text) => Bytes::from(text),
            Message::Binary(data) => data,
            Message::Close { reason, .. } => Bytes::from(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Closing,
    Closed,
}

struct State {
    phase: Phase,
    close: Option<(u16, String)>,
}

struct Reader {
    io: ReadHalf<Io>,
    buf: BytesMut,
    fragment: Option<(Opcode, BytesMut)>,
}

struct Shared {
    writer: TokioMutex<WriteHalf<Io>>,
    reader: TokioMutex<Reader>,
    state: StdMutex<State>,
    pongs: StdMutex<VecDeque<oneshot::Sender<Bytes>>>,
    keepalive: StdMutex<Option<JoinHandle<()>>>,
    max_frame_size: usize,
    handler: Option<Arc<dyn ProtocolHandler>>,
}

/// An established WebSocket session.
///
/// Cloning shares the session: one task may send while another receives,
/// but only a single consumer may read at a time. An overlapping read
/// fails with [`ErrorKind::ConcurrentRead`](crate::ErrorKind::ConcurrentRead).
#[derive(Clone)]
pub struct WebSocket {
    shared: Arc<Shared>,
    subprotocol: Option<String>,
}

/// Resolves with the payload of the PONG answering a sent PING.
#[derive(Debug)]
pub struct Pong {
    rx: oneshot::Receiver<Bytes>,
}

impl Future for Pong {
    type Output = Result<Bytes>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.map_err(|_| Error::ws_closed(CLOSE_ABNORMAL, "session closed awaiting pong"))
        })
    }
}

impl HttpClient {
    /// Perform the WebSocket upgrade handshake against `url`.
    ///
    /// On success the connection leaves the pool and belongs to the
    /// returned session until close.
    pub async fn websocket(&self, url: impl IntoUrl, opts: WsOptions) -> Result<WebSocket> {
        let url = url.into_url()?;
        let timeouts = opts.timeouts.unwrap_or(*self.connector().timeouts());
        let deadline = Deadline(timeouts.request_deadline());

        let key_bytes: [u8; 16] = rand::random();
        let key = BASE64.encode(key_bytes);

        let mut headers = opts.headers.clone();
        let host_value = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_owned(),
        };
        set_if_missing(&mut headers, HOST, HeaderValue::from_str(&host_value)?);
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(SEC_WEBSOCKET_KEY, HeaderValue::from_str(&key)?);
        headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));

        let mut offers: Vec<&str> = Vec::new();
        if let Some(ref handler) = opts.protocol_handler {
            offers.push(handler.name());
        }
        offers.extend(opts.subprotocols.iter().map(String::as_str));
        if !offers.is_empty() {
            headers.insert(
                SEC_WEBSOCKET_PROTOCOL,
                HeaderValue::from_str(&offers.join(", "))?,
            );
        }

        let target = encode::request_target(&url, false);
        let mut head_bytes = BytesMut::new();
        encode::write_head(&mut head_bytes, &Method::GET, &target, &headers);

        let mut lease = self
            .connector()
            .acquire(&url, opts.verify_ssl, &timeouts, deadline, false)
            .await
            .map_err(|e| e.with_url(url.clone()))?;
        lease.mark_used();

        let mut body = crate::Body::empty();
        let head = dispatch::exchange(
            lease.conn_mut(),
            &head_bytes,
            &mut body,
            timeouts.sock_read,
            deadline,
        )
        .await
        .map_err(|e| e.with_url(url.clone()))?;

        if head.status != StatusCode::SWITCHING_PROTOCOLS {
            lease.discard();
            return Err(Error::ws_handshake(format!(
                "server answered {} instead of 101",
                head.status
            ))
            .with_url(url)
            .with_status(head.status));
        }
        let upgrade_ok = head
            .headers
            .get(UPGRADE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        if !upgrade_ok {
            lease.discard();
            return Err(Error::ws_handshake("missing Upgrade: websocket").with_url(url));
        }
        let connection_ok = head
            .headers
            .get_all(CONNECTION)
            .iter()
            .any(connection_upgrade);
        if !connection_ok {
            lease.discard();
            return Err(Error::ws_handshake("missing Connection: upgrade").with_url(url));
        }
        let expected = accept_key(&key);
        let accept_ok = head
            .headers
            .get(SEC_WEBSOCKET_ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == expected);
        if !accept_ok {
            lease.discard();
            return Err(Error::ws_handshake("Sec-WebSocket-Accept mismatch").with_url(url));
        }
        let subprotocol = head
            .headers
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_owned());

        debug!(%url, ?subprotocol, "websocket established");
        let conn = lease.detach();
        let (io, read_buf) = conn.into_parts();
        let (read_half, write_half) = tokio::io::split(io);

        let shared = Arc::new(Shared {
            writer: TokioMutex::new(write_half),
            reader: TokioMutex::new(Reader {
                io: read_half,
                // bytes the HTTP parser read past the 101 head are the
                // first websocket bytes
                buf: read_buf,
                fragment: None,
            }),
            state: StdMutex::new(State {
                phase: Phase::Open,
                close: None,
            }),
            pongs: StdMutex::new(VecDeque::new()),
            keepalive: StdMutex::new(None),
            max_frame_size: opts.max_frame_size,
            handler: opts.protocol_handler.clone(),
        });

        if let Some(interval) = opts.ping_interval {
            let handle = spawn_keepalive(&shared, interval, opts.pong_timeout);
            *shared.keepalive.lock().unwrap() = Some(handle);
        }

        Ok(WebSocket {
            shared,
            subprotocol,
        })
    }
}

/// `base64(sha1(key ++ GUID))` per RFC 6455 §1.3.
fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(WS_GUID.as_bytes());
    BASE64.encode(sha.finalize())
}

impl WebSocket {
    /// The subprotocol the server selected, if any.
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    /// Whether the session is still open for messages.
    pub fn is_open(&self) -> bool {
        self.shared.state.lock().unwrap().phase == Phase::Open
    }

    /// Send one text message.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.shared
            .write_frame(Opcode::Text, text.as_bytes())
            .await
    }

    /// Send one binary message.
    pub async fn send_bytes(&self, data: &[u8]) -> Result<()> {
        self.shared.write_frame(Opcode::Binary, data).await
    }

    /// Send a value as a JSON text message.
    pub async fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let data = serde_json::to_vec(value).map_err(Error::builder)?;
        self.shared.write_frame(Opcode::Text, &data).await
    }

    /// Encode with the negotiated protocol handler and send.
    pub async fn send_protocol(&self, value: &serde_json::Value) -> Result<()> {
        let handler = self
            .shared
            .handler
            .as_ref()
            .ok_or_else(|| Error::builder("no protocol handler configured"))?;
        let data = handler.encode(value)?;
        self.shared.write_frame(Opcode::Binary, &data).await
    }

    /// Send a PING and obtain the future PONG payload.
    ///
    /// The pong arrives while some task is receiving; awaiting it without
    /// a concurrent reader waits forever.
    pub async fn ping(&self, payload: &[u8]) -> Result<Pong> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(Error::builder("ping payload must be 125 bytes or less"));
        }
        let rx = self.shared.register_pong();
        self.shared.write_frame(Opcode::Ping, payload).await?;
        Ok(Pong { rx })
    }

    /// Receive the next message.
    ///
    /// Control frames are handled out of band: PINGs are answered, PONGs
    /// resolve their waiters. Returns [`Message::Close`] exactly once when
    /// the server closes; afterwards (and after a local
    /// [`close`](Self::close)) this fails with `WsClosed`.
    pub async fn receive(&self) -> Result<Message> {
        let mut reader = self
            .shared
            .reader
            .try_lock()
            .map_err(|_| Error::concurrent_read())?;
        self.shared.recv_message(&mut reader).await
    }

    /// Receive a single text message, bounded by `timeout` when given.
    pub async fn receive_text(&self, timeout: Option<Duration>) -> Result<String> {
        match self.receive_bounded(timeout).await? {
            Message::Text(text) => Ok(text),
            Message::Binary(_) => Err(Error::ws_protocol("expected a text message")),
            Message::Close { code, reason } => Err(Error::ws_closed(code, reason)),
        }
    }

    /// Receive a single binary message, bounded by `timeout` when given.
    pub async fn receive_bytes(&self, timeout: Option<Duration>) -> Result<Bytes> {
        match self.receive_bounded(timeout).await? {
            Message::Binary(data) => Ok(data),
            Message::Text(_) => Err(Error::ws_protocol("expected a binary message")),
            Message::Close { code, reason } => Err(Error::ws_closed(code, reason)),
        }
    }

    /// Receive a JSON text message and deserialize it.
    pub async fn receive_json<T: DeserializeOwned>(&self, timeout: Option<Duration>) -> Result<T> {
        let text = self.receive_text(timeout).await?;
        serde_json::from_str(&text).map_err(|e| Error::ws_protocol(e.to_string()))
    }

    /// Receive and decode with the negotiated protocol handler.
    pub async fn receive_protocol(
        &self,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        let handler = self
            .shared
            .handler
            .as_ref()
            .ok_or_else(|| Error::builder("no protocol handler configured"))?;
        let data = self.receive_bytes(timeout).await?;
        handler.decode(&data)
    }

    async fn receive_bounded(&self, timeout: Option<Duration>) -> Result<Message> {
        match timeout {
            Some(budget) => tokio::time::timeout(budget, self.receive())
                .await
                .map_err(|_| Error::timeout(TimeoutPhase::Read))?,
            None => self.receive().await,
        }
    }

    /// The session as a lazy message sequence, ending after the close
    /// message.
    pub fn messages(self) -> impl futures_core::Stream<Item = Result<Message>> + Send {
        futures_util::stream::try_unfold((self, false), |(ws, done)| async move {
            if done {
                return Ok(None);
            }
            let message = ws.receive().await?;
            let done = matches!(message, Message::Close { .. });
            Ok(Some((message, (ws, done))))
        })
    }

    /// Close the session. `code` defaults to 1000 via [`WebSocket::close_default`];
    /// 1006 is reserved and never sent.
    pub async fn close(&self, code: u16, reason: &str) -> Result<()> {
        if let Some(handle) = self.shared.keepalive.lock().unwrap().take() {
            handle.abort();
        }
        self.shared.close_with(code, reason).await
    }

    /// Close with the normal-closure code 1000.
    pub async fn close_default(&self) -> Result<()> {
        self.close(1000, "").await
    }
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("subprotocol", &self.subprotocol)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Shared {
    fn phase(&self) -> Phase {
        self.state.lock().unwrap().phase
    }

    fn close_info(&self) -> (u16, String) {
        let state = self.state.lock().unwrap();
        state
            .close
            .clone()
            .unwrap_or((CLOSE_ABNORMAL, String::new()))
    }

    fn register_pong(&self) -> oneshot::Receiver<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.pongs.lock().unwrap().push_back(tx);
        rx
    }

    fn mark_closed(&self, code: u16, reason: &str) {
        let mut state = self.state.lock().unwrap();
        if state.phase != Phase::Closed {
            state.phase = Phase::Closed;
            state.close = Some((code, reason.to_owned()));
        }
        drop(state);
        // waiters learn the session is gone through the dropped senders
        self.pongs.lock().unwrap().clear();
    }

    async fn write_frame(&self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        match self.phase() {
            Phase::Open => {}
            Phase::Closing if opcode == Opcode::Close => {}
            _ => {
                let (code, reason) = self.close_info();
                return Err(Error::ws_closed(code, reason));
            }
        }
        let mut dst = BytesMut::new();
        frame::encode(&mut dst, opcode, true, payload, rand::random());
        trace!(?opcode, len = payload.len(), "sending frame");

        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(&dst).await?;
            writer.flush().await
        };
        write.await.map_err(|e| {
            self.mark_closed(CLOSE_ABNORMAL, "write failed");
            Error::io(e)
        })
    }

    /// Send our CLOSE and move to the closing (or closed) state.
    async fn close_with(&self, code: u16, reason: &str) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            match state.phase {
                Phase::Open => state.phase = Phase::Closing,
                // already closing or closed: nothing to send
                _ => return Ok(()),
            }
        }
        // 1006 is reserved for abnormal closures and never goes on the wire
        let mut payload = Vec::new();
        if code != CLOSE_ABNORMAL {
            payload.extend_from_slice(&code.to_be_bytes());
            payload.extend_from_slice(reason.as_bytes());
            payload.truncate(MAX_CONTROL_PAYLOAD);
        }
        let result = self.write_frame(Opcode::Close, &payload).await;
        self.mark_closed(code, reason);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        result
    }

    async fn read_frame(&self, reader: &mut Reader) -> Result<Frame> {
        loop {
            if let Some(frame) = frame::decode(&mut reader.buf, self.max_frame_size)? {
                return Ok(frame);
            }
            let read = reader.io.read_buf(&mut reader.buf).await.map_err(Error::io)?;
            if read == 0 {
                self.mark_closed(CLOSE_ABNORMAL, "connection closed abruptly");
                return Err(Error::ws_closed(CLOSE_ABNORMAL, "connection closed abruptly"));
            }
        }
    }

    async fn recv_message(&self, reader: &mut Reader) -> Result<Message> {
        if self.phase() == Phase::Closed {
            let (code, reason) = self.close_info();
            return Err(Error::ws_closed(code, reason));
        }
        loop {
            let frame = self.read_frame(reader).await?;
            match frame.opcode {
                Opcode::Ping => {
                    trace!("answering ping");
                    // answered even while closing, per the control-frame rules
                    let _ = self.write_frame(Opcode::Pong, &frame.payload).await;
                }
                Opcode::Pong => {
                    if let Some(waiter) = self.pongs.lock().unwrap().pop_front() {
                        let _ = waiter.send(frame.payload);
                    }
                }
                Opcode::Close => {
                    let (code, reason) = parse_close(&frame.payload);
                    let was_open = self.phase() == Phase::Open;
                    if was_open {
                        // echo the close before shutting the session
                        self.state.lock().unwrap().phase = Phase::Closing;
                        let _ = self.write_frame(Opcode::Close, &frame.payload).await;
                    }
                    self.mark_closed(code, &reason);
                    let mut writer = self.writer.lock().await;
                    let _ = writer.shutdown().await;
                    debug!(code, %reason, "close handshake complete");
                    return Ok(Message::Close { code, reason });
                }
                Opcode::Text | Opcode::Binary => {
                    if reader.fragment.is_some() {
                        return Err(self.protocol_violation("data frame interleaved in a fragmented message"));
                    }
                    if frame.fin {
                        return complete_message(frame.opcode, frame.payload.to_vec());
                    }
                    let mut assembly = BytesMut::new();
                    assembly.extend_from_slice(&frame.payload);
                    reader.fragment = Some((frame.opcode, assembly));
                }
                Opcode::Continuation => {
                    let Some((opcode, mut assembly)) = reader.fragment.take() else {
                        return Err(self.protocol_violation("continuation without a message"));
                    };
                    if assembly.len() + frame.payload.len() > self.max_frame_size {
                        return Err(Error::ws_frame_too_large(
                            assembly.len() + frame.payload.len(),
                        ));
                    }
                    assembly.extend_from_slice(&frame.payload);
                    if frame.fin {
                        return complete_message(opcode, assembly.to_vec());
                    }
                    reader.fragment = Some((opcode, assembly));
                }
            }
        }
    }

    fn protocol_violation(&self, what: &'static str) -> Error {
        warn!(what, "websocket protocol violation");
        self.mark_closed(CLOSE_ABNORMAL, what);
        Error::ws_protocol(what)
    }
}

fn complete_message(opcode: Opcode, payload: Vec<u8>) -> Result<Message> {
    match opcode {
        Opcode::Text => String::from_utf8(payload)
            .map(Message::Text)
            .map_err(|_| Error::ws_protocol("text message is not valid UTF-8")),
        Opcode::Binary => Ok(Message::Binary(Bytes::from(payload))),
        _ => unreachable!("only data opcodes assemble messages"),
    }
}

fn parse_close(payload: &[u8]) -> (u16, String) {
    if payload.len() >= 2 {
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
        (code, reason)
    } else {
        (CLOSE_NO_STATUS, String::new())
    }
}

fn spawn_keepalive(
    shared: &Arc<Shared>,
    interval: Duration,
    pong_timeout: Duration,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(shared);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let Some(shared) = weak.upgrade() else { return };
            if shared.phase() != Phase::Open {
                return;
            }
            let rx = shared.register_pong();
            if shared.write_frame(Opcode::Ping, b"").await.is_err() {
                return;
            }
            match tokio::time::timeout(pong_timeout, rx).await {
                Ok(Ok(_payload)) => trace!("keepalive pong received"),
                _ => {
                    warn!("keepalive pong missed, closing session");
                    let _ = shared.close_with(1011, "keepalive timeout").await;
                    return;
                }
            }
        }
    })
}
