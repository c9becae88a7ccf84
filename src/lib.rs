#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

//! # gale
//!
//! gale is an asynchronous HTTP/1.1, WebSocket and Server-Sent Events
//! client for Rust, built on tokio.
//!
//! The pieces:
//!
//! - [`HttpClient`]: pooled, keep-alive HTTP/1.1 with streaming bodies,
//!   automatic decompression and redirect following.
//! - [`WebSocket`](ws::WebSocket): RFC 6455 sessions with ping/pong
//!   keepalive and subprotocol negotiation, established via
//!   [`HttpClient::websocket`].
//! - [`EventSource`](sse::EventSource): `text/event-stream` consumption
//!   with `Last-Event-ID` reconnection, established via
//!   [`HttpClient::sse`].
//!
//! ```no_run
//! use gale::{HttpClient, RequestOptions};
//!
//! # async fn run() -> gale::Result<()> {
//! let client = HttpClient::new();
//! let mut res = client
//!     .get("http://httpbin.org/get", RequestOptions::new())
//!     .await?;
//! println!("{}", res.text(None).await?);
//! # Ok(())
//! # }
//! ```

pub use http::{header, HeaderMap, Method, StatusCode};
pub use url::Url;

pub use crate::base::BaseClient;
pub use crate::body::Body;
pub use crate::client::{ClientBuilder, HttpClient, RequestOptions};
pub use crate::connect::{Proxy, DEFAULT_POOL_PATTERN};
pub use crate::error::{Error, ErrorKind, Result, TimeoutPhase};
pub use crate::into_url::IntoUrl;
pub use crate::multipart::MultipartForm;
pub use crate::pool::{PoolConfig, PoolKind, PoolStats};
pub use crate::response::Response;
pub use crate::sse::{SseEvent, SseOptions};
pub use crate::timeout::Timeouts;
pub use crate::ws::{Message, WebSocket, WsOptions};

mod base;
mod body;
mod client;
mod conn;
mod connect;
mod cookies;
mod decompress;
pub mod dns;
mod error;
mod headers;
mod into_url;
mod multipart;
mod pool;
mod proto;
mod redirect;
mod response;
pub mod sse;
mod timeout;
pub mod ws;
