//! Per-request response handle and abort controller.
//!
//! A [`Reply`] is handed to every endpoint handler. It owns the encoder chosen
//! for the request and the response under construction, and guarantees that
//! at most one response is written, whichever of [`Reply::encode`],
//! [`Reply::abort`] or the panic handler gets there first.
//!
//! ```text
//!   Idle ──encode / abort──▶ Written
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::BoxError;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use restkit_axum_core::{ApiError, EncodeFailure, Encoder, SafeEncoder};
use serde::Serialize;

/// Result type of endpoint handlers.
///
/// `Err(Aborted)` means the handler stopped early through [`Reply::abort`];
/// the error response has already been written.
pub type Outcome = Result<(), Aborted>;

/// Signal that the request was aborted and its error response written.
///
/// Only [`Reply`] creates this value. Return it from the handler to stop
/// processing; the endpoint consumes it and sends the written response.
#[derive(Debug)]
#[must_use = "return `Aborted` from the handler to stop processing the request"]
pub struct Aborted(());

impl From<EncodeFailed> for Aborted {
    /// A failed encode has already written its fallback response.
    fn from(_: EncodeFailed) -> Self {
        Aborted(())
    }
}

/// Error returned by [`Reply::encode`].
#[derive(Debug, thiserror::Error)]
pub enum EncodeFailed {
    /// The value could not be serialized; a `500` fallback was written instead.
    #[error(transparent)]
    Encode(#[from] EncodeFailure),
    /// A response had already been written; nothing was sent.
    #[error("response already written")]
    AlreadyWritten,
}

/// Handle to the response of the current request.
///
/// Cloning is cheap; all clones share the same response state.
///
/// # Example
///
/// ```ignore
/// async fn show_account(reply: Reply, Param(q): Param<ShowAccount>) -> Outcome {
///     let account = match accounts::find(&q.id) {
///         Some(account) => account,
///         None => {
///             return Err(reply.abort(
///                 ApiError::new(StatusCode::NOT_FOUND)
///                     .with_error_code(102)
///                     .with_message("account not found")
///                     .with_detail("id", q.id),
///             ));
///         }
///     };
///     reply.encode(&account)?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Reply {
    inner: Arc<Inner>,
}

struct Inner {
    encoder: SafeEncoder,
    content_type: String,
    debug: bool,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    written: bool,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    content_type: Option<&'static str>,
}

impl Reply {
    pub(crate) fn new<S: Into<String>>(
        encoder: Arc<dyn Encoder>,
        content_type: S,
        debug: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                encoder: SafeEncoder::new(encoder),
                content_type: content_type.into(),
                debug,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Negotiated response content type.
    pub fn content_type(&self) -> &str {
        &self.inner.content_type
    }

    /// Whether the endpoint runs in debug mode.
    pub fn is_debug(&self) -> bool {
        self.inner.debug
    }

    /// Whether a response has been written.
    pub fn is_written(&self) -> bool {
        self.lock().written
    }

    /// Status the response is (or will be) sent with.
    pub fn status(&self) -> StatusCode {
        self.lock().status
    }

    /// Set the status used by the next [`encode`](Self::encode). Ignored once written.
    pub fn set_status(&self, status: StatusCode) {
        let mut state = self.lock();
        if state.written {
            tracing::debug!(
                status = status.as_u16(),
                "response already written, status ignored"
            );
            return;
        }
        state.status = status;
    }

    /// Add a response header, replacing any previous value.
    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.lock().headers.insert(name, value);
    }

    /// Serialize `value` with the negotiated encoder and write it.
    ///
    /// On a serialization failure a `500 failed to encode response` payload is
    /// written instead and the failure is returned. `?` turns the error into
    /// [`Aborted`].
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<(), EncodeFailed> {
        if self.is_written() {
            tracing::warn!("response already written, value not encoded");
            return Err(EncodeFailed::AlreadyWritten);
        }

        match self.inner.encoder.encode(value) {
            Ok(body) => {
                if self.write(None, None, body) {
                    Ok(())
                } else {
                    Err(EncodeFailed::AlreadyWritten)
                }
            }
            Err(failure) => {
                self.write(
                    Some(StatusCode::INTERNAL_SERVER_ERROR),
                    failure.fallback_content_type(),
                    failure.fallback().clone(),
                );
                Err(failure.into())
            }
        }
    }

    /// Stop the request with an error.
    ///
    /// An [`ApiError`] is used as is. Any other error becomes a `500` with the
    /// error text in `details.err`; outside debug mode those details are only
    /// logged, never sent. The error is logged at error level for `500` and at
    /// warn level otherwise, and is written only if nothing was written yet.
    ///
    /// Calling `abort` again logs the new error but does not write it.
    pub fn abort<E: Into<BoxError>>(&self, err: E) -> Aborted {
        match err.into().downcast::<ApiError>() {
            Ok(err) => self.abort_with(*err, false),
            Err(other) => self.abort_with(ApiError::internal(&other), true),
        }
    }

    /// Log and write `err`. Details of a `wrapped` server error are only sent
    /// in debug mode.
    pub(crate) fn abort_with(&self, err: ApiError, wrapped: bool) -> Aborted {
        let mut err = err.with_default_message();
        let status = err.status_code();
        let details = serde_json::Value::Object(err.details().clone());
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(
                status = status.as_u16(),
                error_code = err.error_code(),
                details = %details,
                "{}",
                err.message()
            );
        } else {
            tracing::warn!(
                status = status.as_u16(),
                error_code = err.error_code(),
                details = %details,
                "{}",
                err.message()
            );
        }
        if wrapped && status.is_server_error() && !self.inner.debug {
            err.clear_details();
        }

        if !self.send_error(&err) {
            tracing::debug!(
                status = status.as_u16(),
                "response already written, abort not sent"
            );
        }
        Aborted(())
    }

    /// Write `err` with the negotiated encoder unless a response was already written.
    pub(crate) fn send_error(&self, err: &ApiError) -> bool {
        if self.is_written() {
            return false;
        }
        match self.inner.encoder.encode_error(err) {
            Ok(body) => self.write(Some(err.status_code()), None, body),
            Err(failure) => self.write(
                Some(StatusCode::INTERNAL_SERVER_ERROR),
                failure.fallback_content_type(),
                failure.fallback().clone(),
            ),
        }
    }

    /// Write a body bypassing the encoder, e.g. a plain text panic report.
    pub(crate) fn send_raw(
        &self,
        status: StatusCode,
        content_type: &'static str,
        body: Bytes,
    ) -> bool {
        self.write(Some(status), Some(content_type), body)
    }

    /// The single write path. Returns `false` when a response was already written.
    fn write(
        &self,
        status: Option<StatusCode>,
        content_type: Option<&'static str>,
        body: Bytes,
    ) -> bool {
        let mut state = self.lock();
        if state.written {
            return false;
        }
        state.written = true;
        if let Some(status) = status {
            state.status = status;
        }
        state.content_type = content_type;
        state.body = body;
        true
    }

    /// Build the HTTP response. Later writes through other clones are dropped.
    pub(crate) fn finish(&self) -> Response {
        let state = {
            let mut state = self.lock();
            std::mem::replace(
                &mut *state,
                State {
                    written: true,
                    ..State::default()
                },
            )
        };

        let mut headers = state.headers;
        match state.content_type {
            Some(content_type) => {
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
            None if !headers.contains_key(header::CONTENT_TYPE) => {
                match HeaderValue::from_str(&self.inner.content_type) {
                    Ok(value) => {
                        headers.insert(header::CONTENT_TYPE, value);
                    }
                    Err(e) => {
                        tracing::warn!(
                            content_type = %self.inner.content_type,
                            error = %e,
                            "invalid content type, header dropped"
                        );
                    }
                }
            }
            None => {}
        }

        let mut response = Response::new(Body::from(state.body));
        *response.status_mut() = state.status;
        *response.headers_mut() = headers;
        response
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("content_type", &self.inner.content_type)
            .field("debug", &self.inner.debug)
            .field("written", &self.is_written())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use restkit_axum_core::{APPLICATION_JSON, CodecError, JsonEncoder, XmlEncoder};
    use serde_json::{Value, json};

    fn json_reply(debug: bool) -> Reply {
        Reply::new(Arc::new(JsonEncoder), APPLICATION_JSON, debug)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct DbError;

    struct Exploding;

    impl Serialize for Exploding {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("boom"))
        }
    }

    #[tokio::test]
    async fn test_encode_writes_value() {
        let reply = json_reply(false);
        reply.set_status(StatusCode::CREATED);
        reply.encode(&json!({"answer": 24})).unwrap();
        assert!(reply.is_written());

        let response = reply.finish();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], APPLICATION_JSON);
        assert_eq!(body_json(response).await, json!({"answer": 24}));
    }

    #[tokio::test]
    async fn test_nothing_written_is_empty_ok() {
        let reply = json_reply(false);
        let response = reply.finish();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], APPLICATION_JSON);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_abort_with_api_error() {
        let reply = json_reply(false);
        let _ = reply.abort(
            ApiError::new(StatusCode::NOT_FOUND)
                .with_error_code(102)
                .with_message("account not found")
                .with_detail("id", "ac_1"),
        );

        let response = reply.finish();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({
                "error_code": 102,
                "status_code": 404,
                "msg": "account not found",
                "details": {"id": "ac_1"}
            })
        );
    }

    #[tokio::test]
    async fn test_abort_with_plain_error_hides_details() {
        let reply = json_reply(false);
        let _ = reply.abort(DbError);

        let response = reply.finish();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"status_code": 500, "msg": "Internal Server Error"})
        );
    }

    #[tokio::test]
    async fn test_abort_with_plain_error_in_debug_keeps_details() {
        let reply = json_reply(true);
        let _ = reply.abort(DbError);

        let response = reply.finish();
        assert_eq!(
            body_json(response).await,
            json!({
                "status_code": 500,
                "msg": "Internal Server Error",
                "details": {"err": "connection refused"}
            })
        );
    }

    #[tokio::test]
    async fn test_abort_with_structured_500_keeps_details() {
        let reply = json_reply(false);
        let _ = reply.abort(ApiError::internal("cache miss storm"));
        let response = reply.finish();
        assert_eq!(
            body_json(response).await["details"],
            json!({"err": "cache miss storm"})
        );
    }

    #[tokio::test]
    async fn test_abort_with_string() {
        let reply = json_reply(true);
        let _ = reply.abort("quota exceeded");
        let response = reply.finish();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await["details"]["err"],
            json!("quota exceeded")
        );
    }

    #[tokio::test]
    async fn test_abort_twice_writes_once() {
        let reply = json_reply(false);
        let _ = reply.abort(ApiError::new(StatusCode::CONFLICT));
        let _ = reply.abort(ApiError::new(StatusCode::BAD_GATEWAY));

        let response = reply.finish();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            body_json(response).await,
            json!({"status_code": 409, "msg": "Conflict"})
        );
    }

    #[tokio::test]
    async fn test_abort_after_encode_does_not_overwrite() {
        let reply = json_reply(false);
        reply.encode(&json!(["a", "b"])).unwrap();
        let _ = reply.abort(ApiError::new(StatusCode::BAD_REQUEST));

        let response = reply.finish();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_encode_twice_is_rejected() {
        let reply = json_reply(false);
        reply.encode(&1).unwrap();
        let second = reply.encode(&2);
        assert!(matches!(second, Err(EncodeFailed::AlreadyWritten)));
        assert_eq!(body_json(reply.finish()).await, json!(1));
    }

    #[tokio::test]
    async fn test_encode_failure_writes_fallback() {
        let reply = json_reply(false);
        let err = reply.encode(&Exploding).unwrap_err();
        assert!(matches!(
            &err,
            EncodeFailed::Encode(failure) if matches!(failure.codec_error(), CodecError::Encode(_))
        ));
        let _aborted: Aborted = err.into();

        let response = reply.finish();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"status_code": 500, "msg": "failed to encode response"})
        );
    }

    #[tokio::test]
    async fn test_xml_abort_has_no_details() {
        let reply = Reply::new(Arc::new(XmlEncoder), "text/xml", false);
        let _ = reply.abort(ApiError::new(StatusCode::NOT_FOUND).with_detail("path", "/x"));

        let response = reply.finish();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/xml");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(
            &bytes[..],
            b"<Error><status_code>404</status_code><msg>Not Found</msg></Error>"
        );
    }

    #[tokio::test]
    async fn test_custom_headers_survive() {
        let reply = json_reply(false);
        reply.insert_header(header::LOCATION, HeaderValue::from_static("/accounts/1"));
        reply.set_status(StatusCode::CREATED);
        reply.encode(&json!({})).unwrap();

        let response = reply.finish();
        assert_eq!(response.headers()[header::LOCATION], "/accounts/1");
    }

    #[test]
    fn test_set_status_after_write_is_ignored() {
        let reply = json_reply(false);
        reply.encode(&0).unwrap();
        reply.set_status(StatusCode::ACCEPTED);
        assert_eq!(reply.status(), StatusCode::OK);
    }
}
