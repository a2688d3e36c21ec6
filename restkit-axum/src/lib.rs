//! # restkit-axum
//!
//! REST endpoints for [Axum](https://github.com/tokio-rs/axum) with content
//! negotiation, structured errors and panic recovery.
//!
//! Handlers are plain `async fn`s taking a [`Reply`] and any axum extractors:
//!
//! - **Negotiation:** the response encoder is picked from `Accept` (JSON,
//!   pretty JSON, XML by default); the request parameter is decoded from the
//!   query string or from the body according to `Content-Type`.
//! - **Errors:** [`Reply::abort`] writes an [`ApiError`] at most once and logs it;
//!   non-structured errors become `500`s whose details stay in the logs.
//! - **Recovery:** a panicking handler produces a `500` and the server keeps going.
//! - **Logging:** every request runs in a `tracing` span with a request id and
//!   logs `start` and `end` with status and duration.
//!
//! ## Modules
//!
//! - [`api`]: [`Api`], a router builder with negotiated `404`/`405` fallbacks
//! - [`endpoint`]: [`Endpoint`], the axum [`Handler`](axum::handler::Handler) wrapper
//! - [`reply`]: [`Reply`], the per-request response and abort controller
//! - [`param`]: [`Param`], the negotiated parameter extractor
//! - [`rejection`]: [`ApiRejection`]
//! - [`logging`]: [`RequestId`]

pub mod api;
pub mod endpoint;
pub mod logging;
pub mod param;
mod pipeline;
mod recover;
pub mod rejection;
pub mod reply;

pub use api::Api;
pub use endpoint::{Endpoint, EndpointConfig, endpoint};
pub use logging::{REQUEST_ID_HEADER, RequestId};
pub use param::Param;
pub use rejection::ApiRejection;
pub use reply::{Aborted, EncodeFailed, Outcome, Reply};

pub use restkit_axum_core;
pub use restkit_axum_core::{ApiError, Codecs, ContentEncoder, Decoder, DecoderMap, Encoder};

pub use serde;

pub mod prelude {
    //! The types most handlers need.
    pub use crate::api::Api;
    pub use crate::endpoint::{Endpoint, endpoint};
    pub use crate::param::Param;
    pub use crate::reply::{Outcome, Reply};
    pub use restkit_axum_core::ApiError;
}
