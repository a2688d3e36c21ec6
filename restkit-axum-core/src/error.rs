//! Structured API error type.
//!
//! [`ApiError`] is the single payload shape shared by every failure path:
//! application errors, negotiation and decode failures, encode failures and
//! recovered panics all end up serialized as an `ApiError`.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Extra error context sent to the client.
pub type Details = Map<String, Value>;

/// An error that describes why a request failed.
///
/// The status code determines the HTTP status of the error response. When the
/// message is left empty it is replaced by the canonical reason phrase of the
/// status code.
///
/// # Wire format
///
/// ```json
/// {"error_code": 102, "status_code": 404, "msg": "account not found", "details": {"id": "ac_1"}}
/// ```
///
/// `error_code` is omitted when absent and `details` when empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_code: Option<i32>,
    #[serde(with = "status_code")]
    status_code: StatusCode,
    #[serde(rename = "msg", default)]
    message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    details: Details,
}

impl ApiError {
    /// Create an error for the given status with the canonical reason phrase as message.
    pub fn new(status_code: StatusCode) -> Self {
        Self {
            error_code: None,
            status_code,
            message: String::new(),
            details: Details::new(),
        }
        .with_default_message()
    }

    /// Create an error for a raw status code.
    ///
    /// Returns `None` if `code` is not a valid HTTP status.
    pub fn from_u16(code: u16) -> Option<Self> {
        StatusCode::from_u16(code).ok().map(Self::new)
    }

    /// Set the user-facing message. An empty message falls back to the reason phrase.
    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = message.into();
        self.with_default_message()
    }

    /// Set the application specific error code. Zero clears it.
    pub fn with_error_code(mut self, code: i32) -> Self {
        self.error_code = (code != 0).then_some(code);
        self
    }

    /// Add a detail entry.
    pub fn with_detail<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Replace all details.
    pub fn with_details(mut self, details: Details) -> Self {
        self.details = details;
        self
    }

    pub fn error_code(&self) -> Option<i32> {
        self.error_code
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &Details {
        &self.details
    }

    /// Drop all details, keeping code and message.
    pub fn clear_details(&mut self) {
        self.details.clear();
    }

    /// Fill an empty message with the canonical reason phrase.
    ///
    /// Errors built through the constructors already have a message; this is
    /// needed for errors that were deserialized or built with an empty message.
    pub fn with_default_message(mut self) -> Self {
        if self.message.is_empty() {
            self.message = self
                .status_code
                .canonical_reason()
                .unwrap_or_default()
                .to_string();
        }
        self
    }

    /// A view of this error without `details`, used by formats that cannot carry them.
    pub fn without_details(&self) -> ErrorSummary<'_> {
        ErrorSummary {
            error_code: self.error_code,
            status_code: self.status_code.as_u16(),
            message: &self.message,
        }
    }
}

// ---- Taxonomy ----

impl ApiError {
    /// 406: no registered encoder satisfies the `Accept` header.
    pub fn not_acceptable<I, S>(accept: &str, supported: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(StatusCode::NOT_ACCEPTABLE)
            .with_message("unsupported request Accept header")
            .with_detail("accept-header", accept)
            .with_detail("supported", string_list(supported))
    }

    /// 415: no decoder is registered for the request media type.
    pub fn unsupported_content_type<I, S>(content_type: &str, available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE)
            .with_message("unsupported request Content-Type")
            .with_detail("content-type", content_type)
            .with_detail("available", string_list(available))
    }

    /// 415: the request body uses a charset other than UTF-8.
    pub fn unsupported_charset(charset: &str) -> Self {
        Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE)
            .with_message("unsupported request content encoding charset")
            .with_detail("charset", charset)
            .with_detail("available", string_list(["UTF-8"]))
    }

    /// 400: the request parameter could not be deserialized.
    pub fn decode_failure(err: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::BAD_REQUEST)
            .with_message("failed to deserialize request parameter")
            .with_detail("err", err.to_string())
    }

    /// 500: the response could not be serialized.
    pub fn encode_failure() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR).with_message("failed to encode response")
    }

    /// 500 wrapping an arbitrary error message in `details.err`.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR).with_detail("err", err.to_string())
    }

    /// 404 for a path no route matches.
    pub fn not_found(path: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND).with_detail("path", path)
    }

    /// 405 for a path that exists but does not accept the method.
    pub fn method_not_allowed(method: &str) -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED).with_detail("method", method)
    }
}

impl From<StatusCode> for ApiError {
    fn from(status: StatusCode) -> Self {
        Self::new(status)
    }
}

/// [`ApiError`] without details.
///
/// Serialized as `<Error>` by the XML encoder.
#[derive(Debug, Serialize)]
#[serde(rename = "Error")]
pub struct ErrorSummary<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<i32>,
    status_code: u16,
    #[serde(rename = "msg")]
    message: &'a str,
}

fn string_list<I, S>(items: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Value::Array(items.into_iter().map(|s| Value::String(s.into())).collect())
}

mod status_code {
    use http::StatusCode;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(status: &StatusCode, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(status.as_u16())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StatusCode, D::Error> {
        let code = u16::deserialize(deserializer)?;
        StatusCode::from_u16(code).map_err(D::Error::custom)
    }
}
