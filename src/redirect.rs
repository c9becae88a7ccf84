//! Redirect policy: which 3xx responses are followed, and how the next
//! request is derived.

use http::header::HeaderValue;
use http::{Method, StatusCode};
use url::Url;

use crate::error::{Error, Result};

/// Longest redirect chain followed before giving up.
pub(crate) const MAX_REDIRECTS: usize = 30;

/// The request derived from a redirect response.
#[derive(Debug, PartialEq)]
pub(crate) struct NextHop {
    pub(crate) url: Url,
    pub(crate) method: Method,
    /// True when the method rewrite discards the request body.
    pub(crate) drop_body: bool,
    /// True when the hop leaves the original origin; sensitive headers are
    /// stripped unless configuration retains them.
    pub(crate) cross_origin: bool,
}

/// Whether `status` redirects at all.
pub(crate) fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Derive the next request from a redirect response.
///
/// 301/302 rewrite non-GET/HEAD methods to GET and drop the body; 303
/// always rewrites to GET; 307/308 preserve both method and body.
pub(crate) fn next_hop(
    status: StatusCode,
    method: &Method,
    current: &Url,
    location: Option<&HeaderValue>,
) -> Result<NextHop> {
    let location = location
        .ok_or_else(|| Error::parse("redirect without Location"))?
        .to_str()
        .map_err(|_| Error::parse("non-ascii Location header"))?;
    // Location may be relative; resolve against the current URL
    let url = current
        .join(location)
        .map_err(|e| Error::parse(format!("invalid Location {:?}: {}", location, e)))?;

    let (method, drop_body) = match status {
        StatusCode::SEE_OTHER => (Method::GET, true),
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => {
            if method == Method::GET || method == Method::HEAD {
                (method.clone(), false)
            } else {
                (Method::GET, true)
            }
        }
        _ => (method.clone(), false),
    };

    let cross_origin = url.scheme() != current.scheme()
        || url.host_str() != current.host_str()
        || url.port_or_known_default() != current.port_or_known_default();

    Ok(NextHop {
        url,
        method,
        drop_body,
        cross_origin,
    })
}
