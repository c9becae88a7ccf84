//! The SSE engine: stream validation, event delivery, reconnection with
//! `Last-Event-ID`, and duplicate suppression after reconnects.

pub(crate) mod parse;

pub use self::parse::SseEvent;

use std::time::Duration;

use http::header::{HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use http::Method;
use tracing::{debug, trace, warn};
use url::Url;

use crate::client::{HttpClient, RequestOptions};
use crate::error::{Error, ErrorKind, Result};
use crate::headers::set_if_missing;
use crate::into_url::IntoUrl;
use crate::response::Response;

use self::parse::EventParser;

const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");

/// Options for an SSE connection.
#[derive(Debug)]
pub struct SseOptions {
    /// The HTTP method to open the stream with.
    pub method: Method,
    /// The request inputs (headers, params, body, timeouts, TLS).
    ///
    /// With `reconnect` enabled the body must be an in-memory one, so it
    /// can be replayed on every reconnection.
    pub options: RequestOptions,
    /// Reopen the stream when it ends or fails.
    pub reconnect: bool,
    /// Delay before reconnecting; server `retry:` fields update it.
    pub retry_delay: Duration,
}

impl Default for SseOptions {
    fn default() -> SseOptions {
        SseOptions {
            method: Method::GET,
            options: RequestOptions::default(),
            reconnect: true,
            retry_delay: Duration::from_secs(3),
        }
    }
}

impl SseOptions {
    /// Options with every field at its default.
    pub fn new() -> SseOptions {
        SseOptions::default()
    }

    /// Open the stream with this HTTP method (GET by default).
    pub fn method(mut self, method: Method) -> SseOptions {
        self.method = method;
        self
    }

    /// The request inputs used for the stream and every reconnect.
    pub fn options(mut self, options: RequestOptions) -> SseOptions {
        self.options = options;
        self
    }

    /// Reopen the stream when it ends or fails (on by default).
    pub fn reconnect(mut self, reconnect: bool) -> SseOptions {
        self.reconnect = reconnect;
        self
    }

    /// The initial reconnection delay.
    pub fn retry_delay(mut self, delay: Duration) -> SseOptions {
        self.retry_delay = delay;
        self
    }
}

/// An open event stream.
///
/// Events arrive in wire order. When the transport drops and reconnection
/// is enabled, the stream reopens with `Last-Event-ID` and the first
/// duplicated event is suppressed.
pub struct EventSource {
    client: HttpClient,
    url: Url,
    method: Method,
    template: RequestOptions,
    reconnect: bool,
    retry_delay: Duration,
    response: Option<Response>,
    parser: EventParser,
    last_event_id: Option<String>,
    last_data: Option<String>,
    just_reconnected: bool,
    closed: bool,
}

impl HttpClient {
    /// Open a Server-Sent-Events stream at `url`.
    ///
    /// The server must answer with a 2xx status and
    /// `Content-Type: text/event-stream`.
    pub async fn sse(&self, url: impl IntoUrl, opts: SseOptions) -> Result<EventSource> {
        let url = url.into_url()?;
        let mut template = opts.options;
        set_if_missing(
            &mut template.headers,
            ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        set_if_missing(
            &mut template.headers,
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        );
        // reconnects replay the body, so it must be one that clones; the
        // first connection may still carry a one-shot body
        let first_body = std::mem::take(&mut template.body);
        let replay = first_body.clone_buffered();
        if opts.reconnect && replay.is_none() {
            return Err(Error::builder(
                "sse reconnection requires an in-memory request body",
            ));
        }
        template.body = replay.unwrap_or_default();

        let mut source = EventSource {
            client: self.clone(),
            url,
            method: opts.method,
            template,
            reconnect: opts.reconnect,
            retry_delay: opts.retry_delay,
            response: None,
            parser: EventParser::new(),
            last_event_id: None,
            last_data: None,
            just_reconnected: false,
            closed: false,
        };
        source.response = Some(source.connect_with(first_body).await?);
        Ok(source)
    }
}

impl EventSource {
    /// The id carried by the most recent event, sent as `Last-Event-ID`
    /// on reconnects.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// The current reconnection delay.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Deliver the next event.
    ///
    /// `Ok(None)` means the stream ended and reconnection is disabled (or
    /// the source was closed). Parsing errors are never retried.
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>> {
        loop {
            if self.closed {
                return Ok(None);
            }
            if let Some(event) = self.parser.next_event()? {
                if let Some(retry) = event.retry {
                    trace!(?retry, "server updated retry delay");
                    self.retry_delay = retry;
                }
                if self.just_reconnected {
                    self.just_reconnected = false;
                    if self.is_duplicate(&event) {
                        debug!(id = ?event.id, "dropping duplicated event after reconnect");
                        continue;
                    }
                }
                if let Some(ref id) = event.id {
                    self.last_event_id = Some(id.clone());
                }
                self.last_data = Some(event.data.clone());
                return Ok(Some(event));
            }

            // the parser ran dry: feed it, or reconnect
            match self.response.as_mut() {
                Some(response) => match response.chunk().await {
                    Ok(Some(block)) => self.parser.push(&block),
                    Ok(None) => {
                        trace!("event stream ended");
                        self.response = None;
                        if !self.reconnect {
                            self.closed = true;
                            return Ok(None);
                        }
                    }
                    Err(err) => {
                        self.response = None;
                        if !self.reconnect {
                            self.closed = true;
                            return Err(err);
                        }
                        warn!(error = %err, "event stream failed, will reconnect");
                    }
                },
                None => {
                    tokio::time::sleep(self.retry_delay).await;
                    match self.connect().await {
                        Ok(response) => {
                            self.response = Some(response);
                            self.parser = EventParser::new();
                            self.just_reconnected = true;
                        }
                        Err(err) if matches!(err.kind(), ErrorKind::SseConnection) => {
                            // the server answered and refused; surface it
                            self.closed = true;
                            return Err(err);
                        }
                        Err(err) => {
                            debug!(error = %err, "reconnect attempt failed");
                        }
                    }
                }
            }
        }
    }

    /// The source as a lazy event sequence.
    pub fn events(self) -> impl futures_core::Stream<Item = Result<SseEvent>> + Send {
        futures_util::stream::try_unfold(self, |mut source| async move {
            Ok(source.next_event().await?.map(|event| (event, source)))
        })
    }

    /// Stop the stream; the current connection closes unread.
    pub fn close(&mut self) {
        self.closed = true;
        // dropping the response closes the underlying connection
        self.response = None;
    }

    fn is_duplicate(&self, event: &SseEvent) -> bool {
        if let (Some(id), Some(last)) = (event.id.as_deref(), self.last_event_id.as_deref()) {
            if id == last {
                return true;
            }
        }
        matches!(self.last_data.as_deref(), Some(last) if last == event.data)
    }

    async fn connect(&mut self) -> Result<Response> {
        let body = self.template.body.clone_buffered().unwrap_or_default();
        self.connect_with(body).await
    }

    async fn connect_with(&mut self, body: crate::Body) -> Result<Response> {
        let mut opts = RequestOptions {
            params: self.template.params.clone(),
            headers: self.template.headers.clone(),
            body,
            timeouts: self.template.timeouts,
            follow: self.template.follow,
            verify_ssl: self.template.verify_ssl,
            handle_cookies: self.template.handle_cookies,
            retain_authorization: self.template.retain_authorization,
            max_body_size: self.template.max_body_size,
        };
        if let Some(ref id) = self.last_event_id {
            opts.headers
                .insert(LAST_EVENT_ID, HeaderValue::from_str(id)?);
        }

        let response = self
            .client
            .request(self.method.clone(), self.url.clone(), opts)
            .await?;

        if !response.status().is_success() {
            let err = Error::sse_connection(format!(
                "endpoint answered {}",
                response.status()
            ))
            .with_url(self.url.clone())
            .with_status(response.status());
            return Err(err);
        }
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<mime::Mime>().ok())
            // parameters (charset etc.) are ignored on purpose
            .is_some_and(|m| m.type_() == mime::TEXT && m.subtype() == "event-stream");
        if !is_event_stream {
            return Err(Error::sse_connection("endpoint did not return text/event-stream")
                .with_url(self.url.clone()));
        }
        debug!(url = %self.url, "event stream connected");
        Ok(response)
    }
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("url", &self.url.as_str())
            .field("last_event_id", &self.last_event_id)
            .field("reconnect", &self.reconnect)
            .field("closed", &self.closed)
            .finish()
    }
}
