//! Response head parsing.

use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use tracing::trace;

use crate::error::{Error, Result};
use crate::headers;

/// A message head larger than this is rejected outright.
pub(crate) const MAX_HEAD_SIZE: usize = 64 * 1024;

const MAX_HEADERS: usize = 100;

/// The parsed response head, plus the raw bytes it came from.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub(crate) status: StatusCode,
    pub(crate) reason: String,
    /// `1` for HTTP/1.1, `0` for HTTP/1.0.
    pub(crate) version_minor: u8,
    pub(crate) headers: HeaderMap,
    /// The head block exactly as received, through the final CRLFCRLF.
    pub(crate) raw: Bytes,
}

impl ResponseHead {
    /// Whether the connection may serve another exchange afterwards.
    pub(crate) fn keep_alive(&self) -> bool {
        let mut default = self.version_minor >= 1;
        for value in self.headers.get_all(http::header::CONNECTION) {
            if headers::connection_close(value) {
                return false;
            }
            if headers::connection_keep_alive(value) {
                default = true;
            }
        }
        default
    }
}

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyLength {
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Exactly this many bytes.
    Length(u64),
    /// Read until the server closes the connection.
    Eof,
}

/// Attempt to parse a response head out of `buf`.
///
/// Returns `None` until the terminating CRLFCRLF has arrived. The parsed
/// bytes are split off `buf`; whatever follows belongs to the body.
pub(crate) fn parse_head(buf: &mut BytesMut) -> Result<Option<ResponseHead>> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut res = httparse::Response::new(&mut headers);
    let len = match res.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => {
            if buf.len() > MAX_HEAD_SIZE {
                return Err(Error::parse("response head exceeds 64 KiB"));
            }
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    trace!(len, "response head complete");

    let code = res.code.expect("complete response has a code");
    let status = StatusCode::from_u16(code).map_err(Error::parse)?;
    // an empty reason phrase is tolerated; httparse yields ""
    let reason = res.reason.unwrap_or("").to_owned();
    let version_minor = res.version.expect("complete response has a version") as u8;

    let mut map = HeaderMap::with_capacity(res.headers.len());
    for h in res.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())?;
        let value = HeaderValue::from_bytes(h.value).map_err(Error::parse)?;
        map.append(name, value);
    }

    let raw = buf.split_to(len).freeze();
    Ok(Some(ResponseHead {
        status,
        reason,
        version_minor,
        headers: map,
        raw,
    }))
}

/// Decide the body framing for a response to `method`.
pub(crate) fn body_length(head: &ResponseHead, method: &Method) -> Result<BodyLength> {
    let status = head.status;
    if method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(BodyLength::Length(0));
    }
    if headers::transfer_encoding_is_chunked(&head.headers) {
        return Ok(BodyLength::Chunked);
    }
    if head
        .headers
        .contains_key(http::header::CONTENT_LENGTH)
    {
        return match headers::content_length_parse(&head.headers) {
            Some(len) => Ok(BodyLength::Length(len)),
            None => Err(Error::parse("conflicting or invalid Content-Length")),
        };
    }
    Ok(BodyLength::Eof)
}
