//! Endpoint: an async handler wrapped in the request pipeline.
//!
//! An endpoint handler takes a [`Reply`] followed by up to sixteen axum
//! extractors and returns an [`Outcome`]. Every extractor but the last must
//! implement [`FromRequestParts`]; the last one may consume the body, usually
//! a [`Param`](crate::Param).
//!
//! ```ignore
//! async fn transfer(reply: Reply, Path(id): Path<String>, Param(t): Param<Transfer>) -> Outcome {
//!     let receipt = bank::transfer(&id, t).map_err(|e| reply.abort(e))?;
//!     reply.encode(&receipt)?;
//!     Ok(())
//! }
//!
//! let router = Router::new().route("/accounts/{id}/transfers", post(Endpoint::new(transfer)));
//! ```
//!
//! Extractor rejections abort the request like any other error: crate
//! rejections keep their structured error, foreign ones keep their status and
//! report their body text in `details.err`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::handler::Handler;
use axum::response::{IntoResponse, Response};
use restkit_axum_core::{Codecs, ContentEncoder, DecoderMap};

use crate::pipeline;
use crate::rejection::abort_with_rejection;
use crate::reply::{Outcome, Reply};

/// Codecs and flags shared by the requests of an endpoint.
#[derive(Clone, Debug, Default)]
pub struct EndpointConfig {
    codecs: Codecs,
    debug: bool,
}

impl EndpointConfig {
    pub fn new(codecs: Codecs, debug: bool) -> Self {
        Self { codecs, debug }
    }

    /// Replace the encoder list; order decides ties and `*/*`.
    pub fn with_encoders(mut self, encoders: Vec<ContentEncoder>) -> Self {
        self.codecs = self.codecs.with_encoders(encoders);
        self
    }

    /// Replace the decoder map.
    pub fn with_decoders(mut self, decoders: DecoderMap) -> Self {
        self.codecs = self.codecs.with_decoders(decoders);
        self
    }

    /// Debug mode: internal error details and panic reports reach the client.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn codecs(&self) -> &Codecs {
        &self.codecs
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }
}

/// An async handler plus its [`EndpointConfig`], usable as an axum [`Handler`].
pub struct Endpoint<F> {
    handler: F,
    config: Arc<EndpointConfig>,
}

impl<F> Endpoint<F> {
    /// Wrap `handler` with the default codecs, debug off.
    pub fn new(handler: F) -> Self {
        Self::with_config(handler, EndpointConfig::default())
    }

    pub fn with_config(handler: F, config: EndpointConfig) -> Self {
        Self {
            handler,
            config: Arc::new(config),
        }
    }

    pub fn encoders(mut self, encoders: Vec<ContentEncoder>) -> Self {
        self.update(|config| config.with_encoders(encoders));
        self
    }

    pub fn decoders(mut self, decoders: DecoderMap) -> Self {
        self.update(|config| config.with_decoders(decoders));
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.update(|config| config.with_debug(debug));
        self
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    fn update(&mut self, f: impl FnOnce(EndpointConfig) -> EndpointConfig) {
        let config = Arc::make_mut(&mut self.config);
        *config = f(std::mem::take(config));
    }
}

impl<F: Clone> Clone for Endpoint<F> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            config: self.config.clone(),
        }
    }
}

impl<F> std::fmt::Debug for Endpoint<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Shorthand for [`Endpoint::new`].
pub fn endpoint<F>(handler: F) -> Endpoint<F> {
    Endpoint::new(handler)
}

// Handlers that only take the reply.
impl<F, Fut, S> Handler<(), S> for Endpoint<F>
where
    F: Fn(Reply) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
    S: Send + Sync + 'static,
{
    type Future = Pin<Box<dyn Future<Output = Response> + Send>>;

    fn call(self, req: Request, _state: S) -> Self::Future {
        Box::pin(async move {
            let Endpoint { handler, config } = self;
            pipeline::serve(req, &config, move |reply, _req| handler(reply)).await
        })
    }
}

macro_rules! all_extractors {
    ($m:ident) => {
        $m!([], A1);
        $m!([A1], A2);
        $m!([A1, A2], A3);
        $m!([A1, A2, A3], A4);
        $m!([A1, A2, A3, A4], A5);
        $m!([A1, A2, A3, A4, A5], A6);
        $m!([A1, A2, A3, A4, A5, A6], A7);
        $m!([A1, A2, A3, A4, A5, A6, A7], A8);
        $m!([A1, A2, A3, A4, A5, A6, A7, A8], A9);
        $m!([A1, A2, A3, A4, A5, A6, A7, A8, A9], A10);
        $m!([A1, A2, A3, A4, A5, A6, A7, A8, A9, A10], A11);
        $m!([A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11], A12);
        $m!([A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12], A13);
        $m!([A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13], A14);
        $m!([A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13, A14], A15);
        $m!(
            [A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13, A14, A15],
            A16
        );
    };
}

macro_rules! impl_handler_for_endpoint {
    ([$($A:ident),*], $last:ident) => {
        impl<F, Fut, S, M, $($A,)* $last> Handler<(M, $($A,)* $last,), S> for Endpoint<F>
        where
            F: Fn(Reply, $($A,)* $last) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Outcome> + Send + 'static,
            S: Send + Sync + 'static,
            M: 'static,
            $( $A: FromRequestParts<S> + Send + 'static, )*
            $last: FromRequest<S, M> + Send + 'static,
        {
            type Future = Pin<Box<dyn Future<Output = Response> + Send>>;

            #[allow(unused_mut)]
            fn call(self, req: Request, state: S) -> Self::Future {
                Box::pin(async move {
                    let Endpoint { handler, config } = self;
                    pipeline::serve(req, &config, move |reply, req| async move {
                        let (mut parts, body) = req.into_parts();

                        $(
                            let $A = match $A::from_request_parts(&mut parts, &state)
                                .await
                                .map_err(IntoResponse::into_response)
                            {
                                Ok(value) => value,
                                Err(response) => {
                                    return Err(abort_with_rejection(&reply, response).await);
                                }
                            };
                        )*

                        let req = Request::from_parts(parts, body);
                        let $last = match $last::from_request(req, &state)
                            .await
                            .map_err(IntoResponse::into_response)
                        {
                            Ok(value) => value,
                            Err(response) => {
                                return Err(abort_with_rejection(&reply, response).await);
                            }
                        };

                        handler(reply, $($A,)* $last).await
                    })
                    .await
                })
            }
        }
    };
}

#[allow(non_snake_case)]
mod generated_handler_impls {
    use super::*;
    all_extractors!(impl_handler_for_endpoint);
}
