//! Per-request span and request ids.

use axum::extract::Request;
use axum::http::HeaderValue;
use tracing::Span;

/// Header carrying the request id, read from the request and echoed on the response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest client supplied request id that is reused.
const MAX_REQUEST_ID_LEN: usize = 64;

/// Id identifying a request in the logs.
///
/// Stored in the request extensions by the endpoint and extractable by handlers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    /// Random 8-byte id, hex encoded.
    pub fn random() -> Self {
        Self(format!("{:016x}", rand::random::<u64>()))
    }

    /// Reuse the client's `x-request-id` when it is short printable ASCII.
    pub(crate) fn from_request(req: &Request) -> Self {
        req.headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|id| {
                !id.is_empty()
                    && id.len() <= MAX_REQUEST_ID_LEN
                    && id.bytes().all(|b| b.is_ascii_graphic())
            })
            .map(|id| Self(id.to_string()))
            .unwrap_or_else(Self::random)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0).ok()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for RequestId {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(RequestId::random))
    }
}

pub(crate) fn request_span(req: &Request, id: &RequestId) -> Span {
    tracing::info_span!(
        target: "restkit_axum",
        "request",
        method = %req.method(),
        path = %req.uri().path(),
        id = %id,
    )
}
