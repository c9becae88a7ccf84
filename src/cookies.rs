//! A minimal in-memory cookie jar.
//!
//! Session-scoped only: nothing persists, expiry attributes are honored
//! just enough to drop cookies deleted by the server (`Max-Age=0`).

use std::sync::Mutex;

use http::header::HeaderValue;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
struct Cookie {
    name: String,
    value: String,
    domain: String,
    host_only: bool,
    path: String,
    secure: bool,
}

/// Shared across requests through the facade; mutation is serialized by a
/// single jar-level mutex.
#[derive(Debug, Default)]
pub(crate) struct CookieJar {
    cookies: Mutex<Vec<Cookie>>,
}

impl CookieJar {
    pub(crate) fn new() -> CookieJar {
        CookieJar::default()
    }

    /// Record cookies from one response's `Set-Cookie` headers.
    pub(crate) fn store<'a>(&self, url: &Url, set_cookies: impl Iterator<Item = &'a HeaderValue>) {
        let request_host = match url.host_str() {
            Some(host) => host.to_ascii_lowercase(),
            None => return,
        };
        let mut cookies = self.cookies.lock().unwrap();
        for value in set_cookies {
            let Ok(raw) = value.to_str() else { continue };
            let Some(mut cookie) = parse_set_cookie(raw, &request_host, url.path()) else {
                continue;
            };
            // a server-set domain must cover the request host
            if !cookie.host_only && !domain_matches(&request_host, &cookie.domain) {
                continue;
            }
            cookies.retain(|c| {
                !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
            });
            if cookie.value.is_empty() && raw.to_ascii_lowercase().contains("max-age=0") {
                continue;
            }
            cookie.domain = cookie.domain.to_ascii_lowercase();
            cookies.push(cookie);
        }
    }

    /// The `Cookie` header for a request to `url`, if any cookie applies.
    pub(crate) fn header_for(&self, url: &Url) -> Option<HeaderValue> {
        let host = url.host_str()?.to_ascii_lowercase();
        let path = url.path();
        let https = url.scheme() == "https" || url.scheme() == "wss";
        let cookies = self.cookies.lock().unwrap();
        let mut pairs = Vec::new();
        for cookie in cookies.iter() {
            if cookie.secure && !https {
                continue;
            }
            let domain_ok = if cookie.host_only {
                host == cookie.domain
            } else {
                domain_matches(&host, &cookie.domain)
            };
            if domain_ok && path_matches(path, &cookie.path) {
                pairs.push(format!("{}={}", cookie.name, cookie.value));
            }
        }
        if pairs.is_empty() {
            return None;
        }
        HeaderValue::from_str(&pairs.join("; ")).ok()
    }
}

fn parse_set_cookie(raw: &str, request_host: &str, request_path: &str) -> Option<Cookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mut cookie = Cookie {
        name: name.to_owned(),
        value: value.trim().to_owned(),
        domain: request_host.to_owned(),
        host_only: true,
        path: default_path(request_path),
        secure: false,
    };
    for attr in parts {
        let attr = attr.trim();
        let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
        match key.to_ascii_lowercase().as_str() {
            "domain" => {
                let domain = val.trim().trim_start_matches('.');
                if !domain.is_empty() {
                    cookie.domain = domain.to_ascii_lowercase();
                    cookie.host_only = false;
                }
            }
            "path" => {
                if val.starts_with('/') {
                    cookie.path = val.to_owned();
                }
            }
            "secure" => cookie.secure = true,
            _ => {}
        }
    }
    Some(cookie)
}

fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_owned(),
        Some(i) => request_path[..i].to_owned(),
    }
}

fn domain_matches(host: &str, cookie_domain: &str) -> bool {
    host == cookie_domain || host.ends_with(&format!(".{}", cookie_domain))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/')
                || request_path[cookie_path.len()..].starts_with('/')))
}
