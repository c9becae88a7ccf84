//! The response: head data plus a scoped, streamable body.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, CONTENT_TYPE};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::decompress::Decompressor;
use crate::error::{Error, Result};
use crate::pool::Lease;
use crate::proto::h1::Decoder;
use crate::timeout::Deadline;

/// An HTTP response.
///
/// The body starts out unread on the leased connection. Consuming it (via
/// [`content`](Response::content), [`text`](Response::text),
/// [`json`](Response::json), or by draining [`chunk`](Response::chunk) /
/// [`read_chunks`](Response::read_chunks)) returns the connection to its
/// pool. Dropping the response with the body unread closes the connection
/// instead; a partially read connection is never reused.
pub struct Response {
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
    raw_head: Bytes,
    chunked: bool,
    url: Url,
    method: Method,
    body: BodyState,
    consumed: bool,
    max_body_size: Option<usize>,
}

enum BodyState {
    Streaming(StreamingBody),
    /// Delivered already, or there was never a body to deliver.
    Done,
}

struct StreamingBody {
    lease: Lease,
    decoder: Decoder,
    decompress: Option<Decompressor>,
    sock_read: Duration,
    deadline: Deadline,
}

impl Response {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        head: crate::proto::h1::ResponseHead,
        lease: Lease,
        decoder: Decoder,
        url: Url,
        method: Method,
        sock_read: Duration,
        deadline: Deadline,
        max_body_size: Option<usize>,
    ) -> Response {
        let decompress = Decompressor::from_headers(&head.headers);
        let chunked = decoder.is_chunked();
        let body = if decoder.is_eof() {
            // bodiless response: the connection is immediately reusable
            release(lease, &decoder);
            BodyState::Done
        } else {
            BodyState::Streaming(StreamingBody {
                lease,
                decoder,
                decompress,
                sock_read,
                deadline,
            })
        };
        Response {
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            raw_head: head.raw,
            chunked,
            url,
            method,
            body,
            consumed: false,
            max_body_size,
        }
    }

    /// The response status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The reason phrase as sent by the server, possibly empty.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// The response headers.
    ///
    /// Repeated headers keep every value; `headers().get_all(name)` is the
    /// multi-valued accessor, `get` returns the first.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The response head exactly as it came off the wire.
    pub fn raw_headers(&self) -> &Bytes {
        &self.raw_head
    }

    /// Whether the body arrived with chunked transfer encoding.
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// The URL this response answered (after any redirects).
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request method that produced this response.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Produce the next decoded block of the body.
    ///
    /// `None` marks the end; at that point the connection has been handed
    /// back to the pool. Each wire read is bounded by `sock_read`.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        self.chunk_inner()
            .await
            .map_err(|e| self.context(e))
    }

    async fn chunk_inner(&mut self) -> Result<Option<Bytes>> {
        // Take the streaming state out; any early return via `?` drops it,
        // which closes the half-read connection instead of re-pooling it.
        let mut state = match std::mem::replace(&mut self.body, BodyState::Done) {
            BodyState::Streaming(state) => state,
            BodyState::Done => {
                self.consumed = true;
                return Ok(None);
            }
        };
        loop {
            let budget = state.deadline.clamp(state.sock_read)?;
            let block = state.decoder.decode(state.lease.conn_mut(), budget).await?;
            if block.is_empty() {
                // wire body complete; flush any decompressor tail
                let tail = match state.decompress.as_mut().map(Decompressor::finish) {
                    Some(tail) => tail?,
                    None => Bytes::new(),
                };
                release(state.lease, &state.decoder);
                if tail.is_empty() {
                    self.consumed = true;
                    return Ok(None);
                }
                return Ok(Some(tail));
            }
            let block = match state.decompress.as_mut() {
                Some(dec) => dec.push(&block)?,
                None => block,
            };
            if !block.is_empty() {
                self.body = BodyState::Streaming(state);
                return Ok(Some(block));
            }
            // the decompressor swallowed the block (header bytes); read on
        }
    }

    /// The whole body, fully buffered. At most one of the body-consuming
    /// operations may run on a response.
    pub async fn content(&mut self) -> Result<Bytes> {
        if self.consumed {
            return Err(Error::builder("response body already consumed"));
        }
        self.consumed = true;
        let limit = self.max_body_size;
        let mut buf = BytesMut::new();
        while let Some(block) = self.chunk().await? {
            if let Some(limit) = limit {
                if buf.len() + block.len() > limit {
                    return Err(self
                        .context(Error::body_too_large(limit)));
                }
            }
            buf.extend_from_slice(&block);
        }
        trace!(bytes = buf.len(), "body buffered");
        Ok(buf.freeze())
    }

    /// The body decoded to text.
    ///
    /// An explicit `encoding` label wins; otherwise the `Content-Type`
    /// charset parameter, a BOM, and finally UTF-8 decide.
    pub async fn text(&mut self, encoding: Option<&str>) -> Result<String> {
        let content = self.content().await?;
        let label = match encoding {
            Some(label) => Some(label.to_owned()),
            None => self.charset(),
        };
        let encoding = label
            .as_deref()
            .and_then(|l| encoding_rs::Encoding::for_label(l.as_bytes()))
            .or_else(|| encoding_rs::Encoding::for_bom(&content).map(|(e, _)| e))
            .unwrap_or(encoding_rs::UTF_8);
        let (text, _, _) = encoding.decode(&content);
        Ok(text.into_owned())
    }

    /// Parse the body as JSON, regardless of its `Content-Type`.
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let content = self.content().await?;
        serde_json::from_slice(&content).map_err(|e| self.context(Error::parse(e)))
    }

    /// Consume the response into a lazy stream of body blocks.
    pub fn read_chunks(self) -> impl futures_core::Stream<Item = Result<Bytes>> + Send {
        futures_util::stream::try_unfold(self, |mut res| async move {
            Ok(res.chunk().await?.map(|block| (block, res)))
        })
    }

    fn charset(&self) -> Option<String> {
        let value = self.headers.get(CONTENT_TYPE)?.to_str().ok()?;
        let mime: mime::Mime = value.parse().ok()?;
        mime.get_param(mime::CHARSET).map(|c| c.as_str().to_owned())
    }

    fn context(&self, err: Error) -> Error {
        err.with_url(self.url.clone())
            .with_method(self.method.clone())
            .with_status(self.status)
    }
}

fn release(lease: Lease, decoder: &Decoder) {
    if decoder.keeps_connection() {
        trace!("body consumed, releasing connection");
        lease.release();
    } else {
        debug!("close-delimited body, discarding connection");
        lease.discard();
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("chunked", &self.chunked)
            .finish()
    }
}
