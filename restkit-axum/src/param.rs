//! The request parameter extractor.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::{FromRequest, Request};
use axum::http::header;
use bytes::Bytes;
use restkit_axum_core::{
    ApiError, Codecs, DecodeSource, FormDecoder, decode_as, negotiate_decoder,
};
use serde::de::DeserializeOwned;

use crate::rejection::ApiRejection;

static WARNED_MISSING_ENDPOINT: AtomicBool = AtomicBool::new(false);

/// Codecs of the endpoint serving the request, stored in request extensions.
#[derive(Clone, Debug)]
pub(crate) struct EndpointCodecs(pub(crate) Codecs);

fn codecs_or_default(req: &Request) -> Codecs {
    if let Some(EndpointCodecs(codecs)) = req.extensions().get::<EndpointCodecs>() {
        return codecs.clone();
    }

    if !WARNED_MISSING_ENDPOINT.swap(true, Ordering::Relaxed) {
        tracing::warn!(
            target: "restkit_axum",
            "Param extracted outside an Endpoint. Using the default decoders."
        );
    }
    Codecs::default()
}

/// Decoded request parameter.
///
/// GET, DELETE and the other body-less methods read `T` from the URL query
/// string. POST, PATCH and PUT read it from the body with the decoder
/// registered for the request's `Content-Type`.
///
/// Rejections:
/// - `415` for a non UTF-8 charset or an unregistered media type
/// - `400` with `details.err` when the input does not decode into `T`
/// - the status of the body read error (e.g. `413`) when the body cannot be read
///
/// ```ignore
/// #[derive(Deserialize)]
/// struct Factorial { n: u64 }
///
/// async fn factorial(reply: Reply, Param(q): Param<Factorial>) -> Outcome {
///     reply.encode(&(1..=q.n).product::<u64>())?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Param<T>(pub T);

impl<T> Param<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<S, T> FromRequest<S> for Param<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let codecs = codecs_or_default(&req);
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        match negotiate_decoder(req.method(), content_type, codecs.decoders())? {
            DecodeSource::Query => {
                let query = req.uri().query().unwrap_or_default();
                decode_as::<T>(&FormDecoder, query.as_bytes())
                    .map(Param)
                    .map_err(|e| ApiError::decode_failure(e).into())
            }
            DecodeSource::Body(decoder) => {
                let body = Bytes::from_request(req, state).await.map_err(|rejection| {
                    ApiError::new(rejection.status()).with_detail("err", rejection.body_text())
                })?;
                decode_as::<T>(decoder, &body)
                    .map(Param)
                    .map_err(|e| ApiError::decode_failure(e).into())
            }
        }
    }
}
