//! Request serialization: start line, headers, and chunked body framing.

use std::fmt::Write as _;

use bytes::{BufMut, BytesMut};
use http::header::HeaderMap;
use http::Method;
use url::Url;

/// The closing frame of a chunked request body.
pub(crate) const CHUNKED_TERMINATOR: &[u8] = b"0\r\n\r\n";

/// The request-target portion of the start line.
///
/// Direct requests use origin form (path plus query); plain-HTTP requests
/// through a proxy use the absolute URI.
pub(crate) fn request_target(url: &Url, absolute_form: bool) -> String {
    if absolute_form {
        return url.as_str().to_owned();
    }
    let mut target = url.path().to_owned();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

/// Serialize the request head through the blank line.
pub(crate) fn write_head(dst: &mut BytesMut, method: &Method, target: &str, headers: &HeaderMap) {
    dst.reserve(target.len() + headers.len() * 32 + 32);
    dst.put_slice(method.as_str().as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(target.as_bytes());
    dst.put_slice(b" HTTP/1.1\r\n");
    for (name, value) in headers {
        dst.put_slice(name.as_str().as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
}

/// Frame one chunk of a chunked body: `hex(len) CRLF bytes CRLF`.
///
/// Empty blocks are skipped entirely; a zero-length chunk would terminate
/// the body early.
pub(crate) fn write_chunk(dst: &mut BytesMut, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    let mut size = String::with_capacity(10);
    write!(&mut size, "{:X}\r\n", data.len()).expect("formatting a usize cannot fail");
    dst.reserve(size.len() + data.len() + 2);
    dst.put_slice(size.as_bytes());
    dst.put_slice(data);
    dst.put_slice(b"\r\n");
}
