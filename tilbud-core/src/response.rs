//! HTTP response as seen by listeners and stored in the cache.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::ApiError;

/// Status, headers and body of one completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    status: u16,
    headers: Vec<(SmolStr, String)>,
    body: Bytes,
}

impl Response {
    /// Creates a response.
    pub fn new(status: u16, headers: Vec<(SmolStr, String)>, body: impl Into<Bytes>) -> Self {
        Response {
            status,
            headers,
            body: body.into(),
        }
    }

    /// A `200 OK` JSON response, convenient in tests and mocks.
    pub fn json_ok(body: impl Into<Bytes>) -> Self {
        Response::new(
            200,
            vec![(SmolStr::new_static("content-type"), "application/json".to_owned())],
            body,
        )
    }

    /// The same status and headers with `body` in place of the original.
    pub fn with_body(&self, body: impl Into<Bytes>) -> Self {
        Response::new(self.status, self.headers.clone(), body)
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// All response headers in arrival order.
    pub fn headers(&self) -> &[(SmolStr, String)] {
        &self.headers
    }

    /// First header value with a case-insensitive name match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The entity tag, if any.
    pub fn etag(&self) -> Option<&str> {
        self.header("etag")
    }

    /// `true` if the content type announces JSON.
    pub fn is_json(&self) -> bool {
        self.header("content-type")
            .is_some_and(|value| value.to_ascii_lowercase().contains("json"))
    }

    /// Raw body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decodes the body as JSON into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|err| ApiError::MalformedResponse(err.to_string()))
    }

    /// Decodes the body as an untyped JSON value.
    pub fn json_value(&self) -> Result<serde_json::Value, ApiError> {
        self.json()
    }
}
