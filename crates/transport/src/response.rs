//! Successful response returned to callers

use bytes::Bytes;
use reqwest::header::HeaderMap;

/// A fully-read successful response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Body as UTF-8 text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_json_accessors() {
        let response = ApiResponse::new(200, r#"{"id":7,"name":"widget"}"#);
        assert!(response.text().contains("widget"));

        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["id"], 7);
    }

    #[test]
    fn json_reports_invalid_body() {
        let response = ApiResponse::new(200, "not json");
        assert!(response.json::<serde_json::Value>().is_err());
    }
}
