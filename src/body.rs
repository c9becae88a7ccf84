//! Request body sources and their wire framing.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;
use http::header::HeaderValue;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::multipart::MultipartForm;

/// A request body.
///
/// The variant decides the framing: sized bodies are sent with
/// `Content-Length`, lazy streams with `Transfer-Encoding: chunked`.
pub struct Body {
    pub(crate) kind: Kind,
    content_type: Option<HeaderValue>,
}

pub(crate) enum Kind {
    Empty,
    Full(Bytes),
    /// Unknown total size; each item becomes one chunk frame.
    Stream(Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + Sync + 'static>>),
    Multipart(MultipartForm),
}

impl Body {
    /// A body with nothing in it.
    pub fn empty() -> Body {
        Body {
            kind: Kind::Empty,
            content_type: None,
        }
    }

    /// A sized body from in-memory bytes.
    pub fn bytes(data: impl Into<Bytes>) -> Body {
        Body {
            kind: Kind::Full(data.into()),
            content_type: None,
        }
    }

    /// A `application/x-www-form-urlencoded` body from key/value pairs.
    pub fn form<K, V, I>(pairs: I) -> Body
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in pairs {
            serializer.append_pair(k.as_ref(), v.as_ref());
        }
        Body {
            kind: Kind::Full(Bytes::from(serializer.finish())),
            content_type: Some(HeaderValue::from_static(
                "application/x-www-form-urlencoded",
            )),
        }
    }

    /// A JSON body. Falsey values (`0`, `false`, empty collections) still
    /// serialize and transmit.
    pub fn json<T: Serialize>(value: &T) -> Result<Body> {
        let data = serde_json::to_vec(value).map_err(Error::builder)?;
        Ok(Body {
            kind: Kind::Full(Bytes::from(data)),
            content_type: Some(HeaderValue::from_static("application/json")),
        })
    }

    /// A lazy byte stream, framed as chunked transfer.
    pub fn stream<S>(stream: S) -> Body
    where
        S: Stream<Item = Result<Bytes>> + Send + Sync + 'static,
    {
        Body {
            kind: Kind::Stream(Box::pin(stream)),
            content_type: None,
        }
    }

    /// A multipart form body.
    pub fn multipart(form: MultipartForm) -> Body {
        let content_type = form.content_type();
        Body {
            kind: Kind::Multipart(form),
            content_type: Some(content_type),
        }
    }

    /// The `Content-Type` this body implies, unless the caller overrides it.
    pub(crate) fn content_type(&self) -> Option<&HeaderValue> {
        self.content_type.as_ref()
    }

    /// Total size when knowable up front; `None` selects chunked framing.
    pub(crate) fn content_length(&self) -> Option<u64> {
        match self.kind {
            Kind::Empty => Some(0),
            Kind::Full(ref data) => Some(data.len() as u64),
            Kind::Stream(_) => None,
            Kind::Multipart(ref form) => Some(form.content_length()),
        }
    }

    pub(crate) fn is_empty_kind(&self) -> bool {
        matches!(self.kind, Kind::Empty)
    }

    /// Whether the body can be written a second time; the stale-retry path
    /// requires this.
    pub(crate) fn is_replayable(&self) -> bool {
        !matches!(self.kind, Kind::Stream(_))
    }

    /// A clone of this body when it is fully in memory; reconnecting
    /// engines need one to replay the request.
    pub(crate) fn clone_buffered(&self) -> Option<Body> {
        let kind = match self.kind {
            Kind::Empty => Kind::Empty,
            Kind::Full(ref data) => Kind::Full(data.clone()),
            Kind::Stream(_) | Kind::Multipart(_) => return None,
        };
        Some(Body {
            kind,
            content_type: self.content_type.clone(),
        })
    }
}

impl Default for Body {
    fn default() -> Body {
        Body::empty()
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Body {
        Body::bytes(data)
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Body {
        Body::bytes(data)
    }
}

impl From<&'static [u8]> for Body {
    fn from(data: &'static [u8]) -> Body {
        Body::bytes(data)
    }
}

impl From<String> for Body {
    fn from(data: String) -> Body {
        Body::bytes(data)
    }
}

impl From<&'static str> for Body {
    fn from(data: &'static str) -> Body {
        Body::bytes(data)
    }
}

impl From<MultipartForm> for Body {
    fn from(form: MultipartForm) -> Body {
        Body::multipart(form)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            Kind::Empty => "Empty",
            Kind::Full(_) => "Full",
            Kind::Stream(_) => "Stream",
            Kind::Multipart(_) => "Multipart",
        };
        f.debug_struct("Body").field("kind", &kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_encodes_pairs_in_order() {
        let body = Body::form([("b", "2"), ("a", "1 2")]);
        match body.kind {
            Kind::Full(ref data) => assert_eq!(&data[..], b"b=2&a=1+2"),
            _ => panic!("form body should be sized"),
        }
        assert_eq!(
            body.content_type().unwrap(),
            "application/x-www-form-urlencoded"
        );
    }

    #[test]
    fn falsey_json_still_has_a_body() {
        let body = Body::json(&serde_json::json!(0)).unwrap();
        assert_eq!(body.content_length(), Some(1));
        let body = Body::json(&serde_json::json!([])).unwrap();
        assert_eq!(body.content_length(), Some(2));
        let body = Body::json(&false).unwrap();
        assert_eq!(body.content_length(), Some(5));
    }

    #[test]
    fn stream_bodies_have_no_length() {
        let body = Body::stream(futures_util::stream::iter(vec![Ok(Bytes::from_static(
            b"x",
        ))]));
        assert_eq!(body.content_length(), None);
        assert!(!body.is_replayable());
    }
}
