//! Extractor rejections as [`ApiError`]s.

use axum::body::Body;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use restkit_axum_core::{APPLICATION_JSON, ApiError};

use crate::reply::{Aborted, Reply};

/// Rejection bodies larger than this are cut off before they land in `details.err`.
const REJECTION_BODY_LIMIT: usize = 64 * 1024;

/// Rejection of the extractors in this crate.
///
/// As a standalone response it renders the error as compact JSON. Inside an
/// endpoint the original [`ApiError`] is recovered from the response
/// extensions and written with the negotiated encoder instead.
#[derive(Debug, Clone)]
pub struct ApiRejection(pub ApiError);

impl ApiRejection {
    pub fn into_inner(self) -> ApiError {
        self.0
    }
}

impl From<ApiError> for ApiRejection {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiRejection {
    fn into_response(self) -> Response {
        let err = self.0.with_default_message();
        let body = serde_json::to_vec(&err).unwrap_or_default();

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = err.status_code();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(APPLICATION_JSON),
        );
        response.extensions_mut().insert(err);
        response
    }
}

/// Abort `reply` with the error carried by an extractor rejection.
///
/// Rejections from this crate carry their [`ApiError`]; any other rejection
/// keeps its status and its body text becomes `details.err`. For server
/// errors that text is only sent in debug mode.
pub(crate) async fn abort_with_rejection(reply: &Reply, response: Response) -> Aborted {
    if let Some(err) = response.extensions().get::<ApiError>() {
        return reply.abort(err.clone());
    }

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), REJECTION_BODY_LIMIT)
        .await
        .unwrap_or_default();
    let text = String::from_utf8_lossy(&body);

    let mut err = ApiError::new(status);
    if !text.is_empty() {
        err = err.with_detail("err", text.into_owned());
    }
    reply.abort_with(err, true)
}
