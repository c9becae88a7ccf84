use url::Url;

use crate::error::{Error, Result};

/// A helper trait to convert common objects into a Url.
pub trait IntoUrl {
    /// Consumes the object, trying to return a Url.
    fn into_url(self) -> Result<Url>;
}

impl IntoUrl for Url {
    fn into_url(self) -> Result<Url> {
        check_supported(self)
    }
}

impl<'a> IntoUrl for &'a str {
    fn into_url(self) -> Result<Url> {
        check_supported(Url::parse(self)?)
    }
}

impl IntoUrl for String {
    fn into_url(self) -> Result<Url> {
        self.as_str().into_url()
    }
}

impl<'a> IntoUrl for &'a String {
    fn into_url(self) -> Result<Url> {
        self.as_str().into_url()
    }
}

fn check_supported(url: Url) -> Result<Url> {
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => {}
        other => {
            return Err(Error::builder(format!("unsupported scheme: {}", other)));
        }
    }
    if url.host_str().is_none() {
        return Err(Error::builder("url has no host"));
    }
    Ok(url)
}
