//! A thin convenience wrapper for talking to one API: a base URL plus
//! default headers, delegating to [`HttpClient`].

use http::header::HeaderMap;
use http::Method;
use url::Url;

use crate::client::{HttpClient, RequestOptions};
use crate::error::{Error, Result};
use crate::into_url::IntoUrl;
use crate::response::Response;

/// Issues requests relative to a base URL with a set of default headers.
#[derive(Debug, Clone)]
pub struct BaseClient {
    client: HttpClient,
    base_url: Url,
    default_headers: HeaderMap,
}

impl BaseClient {
    /// Wrap `client` with requests resolved against `base_url`.
    pub fn new(client: HttpClient, base_url: impl IntoUrl) -> Result<BaseClient> {
        Ok(BaseClient {
            client,
            base_url: base_url.into_url()?,
            default_headers: HeaderMap::new(),
        })
    }

    /// Headers applied to every request unless the request sets them.
    pub fn default_headers(mut self, headers: HeaderMap) -> BaseClient {
        self.default_headers = headers;
        self
    }

    /// The wrapped client.
    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Resolve `path` against the base URL; absolute URLs pass through.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.into_url();
        }
        self.base_url
            .join(path)
            .map_err(|e| Error::builder(format!("cannot join {:?}: {}", path, e)))
    }

    /// Issue a request against `path` resolved on the base URL.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        mut opts: RequestOptions,
    ) -> Result<Response> {
        let url = self.resolve(path)?;
        for (name, value) in &self.default_headers {
            if !opts.headers.contains_key(name) {
                opts.headers.insert(name.clone(), value.clone());
            }
        }
        self.client.request(method, url, opts).await
    }

    /// `GET` sugar.
    pub async fn get(&self, path: &str, opts: RequestOptions) -> Result<Response> {
        self.request(Method::GET, path, opts).await
    }

    /// `POST` sugar.
    pub async fn post(&self, path: &str, opts: RequestOptions) -> Result<Response> {
        self.request(Method::POST, path, opts).await
    }

    /// `PUT` sugar.
    pub async fn put(&self, path: &str, opts: RequestOptions) -> Result<Response> {
        self.request(Method::PUT, path, opts).await
    }

    /// `PATCH` sugar.
    pub async fn patch(&self, path: &str, opts: RequestOptions) -> Result<Response> {
        self.request(Method::PATCH, path, opts).await
    }

    /// `DELETE` sugar.
    pub async fn delete(&self, path: &str, opts: RequestOptions) -> Result<Response> {
        self.request(Method::DELETE, path, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BaseClient {
        BaseClient::new(HttpClient::new(), "http://api.example.com/v1/").unwrap()
    }

    #[test]
    fn relative_paths_join_the_base() {
        let client = base();
        assert_eq!(
            client.resolve("users/7").unwrap().as_str(),
            "http://api.example.com/v1/users/7"
        );
        assert_eq!(
            client.resolve("/top").unwrap().as_str(),
            "http://api.example.com/top"
        );
    }

    #[test]
    fn absolute_urls_pass_through() {
        let client = base();
        assert_eq!(
            client.resolve("https://other.example/x").unwrap().as_str(),
            "https://other.example/x"
        );
    }
}
