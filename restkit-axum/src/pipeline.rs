//! Request pipeline of an endpoint.
//!
//! Every request runs through the same stages, outermost first:
//!
//! 1. logging: request span, `start` and `end` events
//! 2. recovery: panics in any later stage become a `500`
//! 3. encoder negotiation from `Accept` (`406` skips the handler)
//! 4. [`Reply`] and decoder installation
//! 5. parameter decoding and the handler itself
//!
//! Only one response is ever produced; see [`Reply`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::extract::Request;
use axum::http::header;
use axum::response::Response;
use futures::FutureExt;
use restkit_axum_core::{APPLICATION_JSON, JsonEncoder, negotiate_encoder};
use tracing::Instrument;

use crate::endpoint::EndpointConfig;
use crate::logging::{REQUEST_ID_HEADER, RequestId, request_span};
use crate::param::EndpointCodecs;
use crate::recover::{install_panic_hook, recover};
use crate::reply::{Outcome, Reply};

/// Serve one request. `invoke` decodes the handler arguments and runs the handler.
pub(crate) async fn serve<I, Fut>(
    mut req: Request,
    config: &EndpointConfig,
    invoke: I,
) -> Response
where
    I: FnOnce(Reply, Request) -> Fut,
    Fut: Future<Output = Outcome>,
{
    let id = RequestId::from_request(&req);
    let span = request_span(&req, &id);
    let header_value = id.header_value();
    req.extensions_mut().insert(id);

    async move {
        let start = Instant::now();
        tracing::info!("start");

        install_panic_hook();
        let installed = OnceLock::new();
        let stages = AssertUnwindSafe(run(req, config, invoke, &installed))
            .catch_unwind()
            .await;
        let mut response = match stages {
            Ok(response) => response,
            Err(panic) => recover(panic, installed.get(), config.is_debug()),
        };

        if let Some(value) = header_value {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        tracing::info!(
            status = response.status().as_u16(),
            dur = ?start.elapsed(),
            "end"
        );
        response
    }
    .instrument(span)
    .await
}

async fn run<I, Fut>(
    mut req: Request,
    config: &EndpointConfig,
    invoke: I,
    installed: &OnceLock<Reply>,
) -> Response
where
    I: FnOnce(Reply, Request) -> Fut,
    Fut: Future<Output = Outcome>,
{
    let accept = req
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let reply = match negotiate_encoder(accept, config.codecs().encoders()) {
        Ok(negotiated) => Reply::new(
            negotiated.encoder.encoder().clone(),
            negotiated.content_type(),
            config.is_debug(),
        ),
        Err(err) => {
            let reply = Reply::new(Arc::new(JsonEncoder), APPLICATION_JSON, config.is_debug());
            let _ = reply.abort(err);
            return reply.finish();
        }
    };
    tracing::debug!(content_type = reply.content_type(), "negotiated encoder");

    let _ = installed.set(reply.clone());
    req.extensions_mut()
        .insert(EndpointCodecs(config.codecs().clone()));

    // Aborts have already written their response.
    let _ = invoke(reply.clone(), req).await;
    reply.finish()
}
