//! Request descriptor
//!
//! A value describing one API call. The descriptor is owned by the call that
//! created it and moves through the pipeline by value; the only state change
//! it ever sees is `mark_retried`, which consumes it and returns the replay
//! copy, so no two concurrent requests can share a mutable marker.

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};

/// Placeholder origin for parsing relative URLs; only the path is kept.
const RELATIVE_ORIGIN: &str = "http://relative.invalid/";

/// Method, URL, headers and body of an API call, plus the replay marker.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    id: String,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    retried: bool,
}

impl RequestDescriptor {
    /// `url` is either absolute or a path resolved against the transport's base URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            id: format!("req_{}", uuid::Uuid::new_v4().as_simple()),
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set `content-type`.
    pub fn with_json<T: serde::Serialize + ?Sized>(
        self,
        value: &T,
    ) -> std::result::Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body))
    }

    /// Correlation id for logs (`req_<uuid>`); replays keep the original id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Consume the descriptor and return its replay copy.
    ///
    /// A replayed descriptor never qualifies for another refresh.
    pub fn mark_retried(mut self) -> Self {
        self.retried = true;
        self
    }

    /// Path portion of the URL: scheme, authority, query and fragment removed.
    ///
    /// Relative URLs are parsed against a placeholder origin, so a query
    /// that embeds another URL never leaks into the path.
    pub fn path(&self) -> String {
        Url::parse(&self.url)
            .or_else(|_| Url::parse(RELATIVE_ORIGIN).and_then(|origin| origin.join(&self.url)))
            .map(|url| url.path().to_owned())
            .unwrap_or_else(|_| "/".to_owned())
    }
}
