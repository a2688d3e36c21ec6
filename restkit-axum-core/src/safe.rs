//! Encoder wrapper that never leaves a response without a body.

use std::sync::Arc;

use bytes::Bytes;

use crate::codec::{CodecError, Encoder};
use crate::error::ApiError;
use crate::registry::APPLICATION_JSON;

/// Written when even the fallback error payload cannot be encoded.
const FALLBACK_JSON: &[u8] = br#"{"status_code":500,"msg":"failed to encode response"}"#;

/// Wraps an [`Encoder`] so that a serialization failure produces an error
/// payload instead of a missing or truncated body.
///
/// When encoding fails the failure is logged and a `500 failed to encode
/// response` error is encoded with the same encoder. If that fails as well,
/// a fixed compact JSON payload is used and the content type switches to
/// `application/json`. The original failure is always returned to the caller.
#[derive(Clone)]
pub struct SafeEncoder {
    inner: Arc<dyn Encoder>,
}

/// A failed encode together with the body to send instead.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode response: {source}")]
pub struct EncodeFailure {
    fallback: Bytes,
    fallback_content_type: Option<&'static str>,
    source: CodecError,
}

impl EncodeFailure {
    /// Body to write in place of the value that failed to encode.
    pub fn fallback(&self) -> &Bytes {
        &self.fallback
    }

    /// Content type of the fallback when it differs from the negotiated one.
    pub fn fallback_content_type(&self) -> Option<&'static str> {
        self.fallback_content_type
    }

    /// The original encode error.
    pub fn codec_error(&self) -> &CodecError {
        &self.source
    }
}

impl SafeEncoder {
    pub fn new(inner: Arc<dyn Encoder>) -> Self {
        Self { inner }
    }

    /// Encode a response value.
    pub fn encode(&self, value: &dyn erased_serde::Serialize) -> Result<Bytes, EncodeFailure> {
        self.inner
            .encode(value)
            .map(Bytes::from)
            .map_err(|err| self.fallback(err))
    }

    /// Encode an error payload.
    pub fn encode_error(&self, err: &ApiError) -> Result<Bytes, EncodeFailure> {
        self.inner
            .encode_error(err)
            .map(Bytes::from)
            .map_err(|e| self.fallback(e))
    }

    fn fallback(&self, source: CodecError) -> EncodeFailure {
        tracing::error!(error = %source, "failed to encode response");

        match self.inner.encode_error(&ApiError::encode_failure()) {
            Ok(body) => EncodeFailure {
                fallback: Bytes::from(body),
                fallback_content_type: None,
                source,
            },
            Err(second) => {
                tracing::error!(error = %second, "failed to encode fallback error, sending JSON");
                EncodeFailure {
                    fallback: Bytes::from_static(FALLBACK_JSON),
                    fallback_content_type: Some(APPLICATION_JSON),
                    source,
                }
            }
        }
    }
}

impl std::fmt::Debug for SafeEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeEncoder").finish_non_exhaustive()
    }
}
