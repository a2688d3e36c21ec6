//! Router builder sharing one [`EndpointConfig`] across routes.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::MatchedPath;
use axum::handler::Handler;
use axum::http::{Method, Uri};
use axum::routing::{self, MethodRouter};
use restkit_axum_core::{ApiError, Codecs, ContentEncoder, DecoderMap};

use crate::endpoint::{Endpoint, EndpointConfig};
use crate::reply::{Outcome, Reply};

/// Builds an axum [`Router`] whose routes and fallbacks share codecs and debug mode.
///
/// Handlers registered through [`get`](Self::get), [`post`](Self::post) and
/// friends are wrapped in an [`Endpoint`] with the API's configuration.
/// Unknown paths answer `404` with `details.path`, known paths with another
/// method answer `405` with `details.method` and `details.allowed`, both
/// negotiated like any other response.
///
/// ```ignore
/// let app = Api::new()
///     .debug(cfg!(debug_assertions))
///     .get("/factorial", factorial)
///     .post("/accounts", create_account)
///     .into_router();
/// ```
#[derive(Debug)]
pub struct Api<S = ()> {
    router: Router<S>,
    config: EndpointConfig,
    allowed: AllowedMethods,
}

/// Methods registered per route path.
type AllowedMethods = BTreeMap<String, Vec<Method>>;

impl<S> Api<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_router(Router::new())
    }

    /// Start from an existing router, e.g. one with layers or nested services.
    pub fn with_router(router: Router<S>) -> Self {
        Self {
            router,
            config: EndpointConfig::default(),
            allowed: AllowedMethods::new(),
        }
    }

    /// Applies to endpoints registered after this call.
    pub fn debug(mut self, debug: bool) -> Self {
        self.config = self.config.with_debug(debug);
        self
    }

    /// Applies to endpoints registered after this call.
    pub fn encoders(mut self, encoders: Vec<ContentEncoder>) -> Self {
        self.config = self.config.with_encoders(encoders);
        self
    }

    /// Applies to endpoints registered after this call.
    pub fn decoders(mut self, decoders: DecoderMap) -> Self {
        self.config = self.config.with_decoders(decoders);
        self
    }

    pub fn codecs(&self) -> &Codecs {
        self.config.codecs()
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Wrap `handler` with the current configuration.
    pub fn endpoint<F>(&self, handler: F) -> Endpoint<F> {
        Endpoint::with_config(handler, self.config.clone())
    }

    /// Register any method router, including ones built from [`Endpoint`]s by hand.
    ///
    /// Methods of routers registered here are not listed in a `405`'s
    /// `details.allowed`.
    pub fn route(mut self, path: &str, method_router: MethodRouter<S>) -> Self {
        self.router = self.router.route(path, method_router);
        self
    }

    pub fn get<F, T>(mut self, path: &str, handler: F) -> Self
    where
        Endpoint<F>: Handler<T, S>,
        T: 'static,
    {
        self.allow(path, &[Method::GET, Method::HEAD]);
        let endpoint = self.endpoint(handler);
        self.route(path, routing::get(endpoint))
    }

    pub fn post<F, T>(mut self, path: &str, handler: F) -> Self
    where
        Endpoint<F>: Handler<T, S>,
        T: 'static,
    {
        self.allow(path, &[Method::POST]);
        let endpoint = self.endpoint(handler);
        self.route(path, routing::post(endpoint))
    }

    pub fn put<F, T>(mut self, path: &str, handler: F) -> Self
    where
        Endpoint<F>: Handler<T, S>,
        T: 'static,
    {
        self.allow(path, &[Method::PUT]);
        let endpoint = self.endpoint(handler);
        self.route(path, routing::put(endpoint))
    }

    pub fn patch<F, T>(mut self, path: &str, handler: F) -> Self
    where
        Endpoint<F>: Handler<T, S>,
        T: 'static,
    {
        self.allow(path, &[Method::PATCH]);
        let endpoint = self.endpoint(handler);
        self.route(path, routing::patch(endpoint))
    }

    pub fn delete<F, T>(mut self, path: &str, handler: F) -> Self
    where
        Endpoint<F>: Handler<T, S>,
        T: 'static,
    {
        self.allow(path, &[Method::DELETE]);
        let endpoint = self.endpoint(handler);
        self.route(path, routing::delete(endpoint))
    }

    pub fn head<F, T>(mut self, path: &str, handler: F) -> Self
    where
        Endpoint<F>: Handler<T, S>,
        T: 'static,
    {
        self.allow(path, &[Method::HEAD]);
        let endpoint = self.endpoint(handler);
        self.route(path, routing::head(endpoint))
    }

    pub fn options<F, T>(mut self, path: &str, handler: F) -> Self
    where
        Endpoint<F>: Handler<T, S>,
        T: 'static,
    {
        self.allow(path, &[Method::OPTIONS]);
        let endpoint = self.endpoint(handler);
        self.route(path, routing::options(endpoint))
    }

    /// Register `handler` for every method.
    pub fn any<F, T>(self, path: &str, handler: F) -> Self
    where
        Endpoint<F>: Handler<T, S>,
        T: 'static,
    {
        let endpoint = self.endpoint(handler);
        self.route(path, routing::any(endpoint))
    }

    /// Finish the router, installing the `404` and `405` endpoints.
    pub fn into_router(self) -> Router<S> {
        let Self {
            router,
            config,
            allowed,
        } = self;
        let allowed = Arc::new(allowed);

        let not_found = Endpoint::with_config(not_found, config.clone());
        let wrong_method = Endpoint::with_config(
            move |reply: Reply, method: Method, path: Option<MatchedPath>| {
                let err = method_not_allowed(&method, path.as_ref(), &allowed);
                async move { Outcome::Err(reply.abort(err)) }
            },
            config,
        );
        router
            .fallback(not_found)
            .method_not_allowed_fallback(wrong_method)
    }

    fn allow(&mut self, path: &str, methods: &[Method]) {
        let registered = self.allowed.entry(path.to_string()).or_default();
        for method in methods {
            if !registered.contains(method) {
                registered.push(method.clone());
            }
        }
    }
}

impl<S> Default for Api<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> From<Api<S>> for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn from(api: Api<S>) -> Self {
        api.into_router()
    }
}

async fn not_found(reply: Reply, uri: Uri) -> Outcome {
    Err(reply.abort(ApiError::not_found(uri.path())))
}

fn method_not_allowed(
    method: &Method,
    path: Option<&MatchedPath>,
    allowed: &AllowedMethods,
) -> ApiError {
    let err = ApiError::method_not_allowed(method.as_str());
    match path.and_then(|path| allowed.get(path.as_str())) {
        Some(methods) => {
            let methods: Vec<&str> = methods.iter().map(Method::as_str).collect();
            err.with_detail("allowed", methods.join(", "))
        }
        None => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Param;
    use axum::body::Body;
    use axum::extract::{Path, Request, State};
    use axum::http::{StatusCode, header};
    use http_body_util::BodyExt;
    use restkit_axum_core::{APPLICATION_JSON, JsonEncoder, TEXT_XML};
    use serde::{Deserialize, Serialize};
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Account {
        id: String,
        name: String,
    }

    #[derive(Debug, Deserialize)]
    struct NewAccount {
        name: String,
    }

    type Store = Arc<Mutex<BTreeMap<String, Account>>>;

    async fn create(
        reply: Reply,
        State(store): State<Store>,
        Param(new): Param<NewAccount>,
    ) -> Outcome {
        let mut store = store.lock().unwrap();
        let id = format!("ac_{}", store.len() + 1);
        let account = Account {
            id: id.clone(),
            name: new.name,
        };
        store.insert(id, account.clone());
        reply.set_status(StatusCode::CREATED);
        reply.encode(&account)?;
        Ok(())
    }

    async fn show(reply: Reply, State(store): State<Store>, Path(id): Path<String>) -> Outcome {
        let account = store.lock().unwrap().get(&id).cloned();
        match account {
            Some(account) => {
                reply.encode(&account)?;
                Ok(())
            }
            None => Err(reply.abort(
                ApiError::new(StatusCode::NOT_FOUND)
                    .with_error_code(102)
                    .with_message("account not found")
                    .with_detail("id", id),
            )),
        }
    }

    fn app() -> Router {
        let store = Store::default();
        Api::new()
            .encoders(vec![
                ContentEncoder::new(APPLICATION_JSON, JsonEncoder),
                ContentEncoder::new(TEXT_XML, restkit_axum_core::XmlEncoder),
            ])
            .post("/accounts", create)
            .get("/accounts/{id}", show)
            .delete("/accounts/{id}", show)
            .into_router()
            .with_state(store)
    }

    async fn send(router: Router, req: Request) -> (StatusCode, Value) {
        let response = router.oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_create_then_show() {
        let router = app();
        let create = axum::http::Request::post("/accounts")
            .header(header::CONTENT_TYPE, APPLICATION_JSON)
            .body(Body::from(r#"{"name":"Ada"}"#))
            .unwrap();
        let (status, body) = send(router.clone(), create).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({"id": "ac_1", "name": "Ada"}));

        let show = axum::http::Request::get("/accounts/ac_1").body(Body::empty()).unwrap();
        let (status, body) = send(router, show).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Ada");
    }

    #[tokio::test]
    async fn test_missing_account_error_shape() {
        let show = axum::http::Request::get("/accounts/ac_404").body(Body::empty()).unwrap();
        let (status, body) = send(app(), show).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({
                "error_code": 102,
                "status_code": 404,
                "msg": "account not found",
                "details": {"id": "ac_404"}
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let req = axum::http::Request::get("/nowhere").body(Body::empty()).unwrap();
        let (status, body) = send(app(), req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["details"]["path"], "/nowhere");
    }

    #[tokio::test]
    async fn test_wrong_method_is_405() {
        let req = axum::http::Request::delete("/accounts").body(Body::empty()).unwrap();
        let (status, body) = send(app(), req).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["details"]["method"], "DELETE");
        assert_eq!(body["details"]["allowed"], "POST");
    }

    #[tokio::test]
    async fn test_405_lists_every_method_of_the_path() {
        let req = axum::http::Request::put("/accounts/ac_1")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            json!({
                "status_code": 405,
                "msg": "Method Not Allowed",
                "details": {"method": "PUT", "allowed": "GET, HEAD, DELETE"}
            })
        );
    }

    #[tokio::test]
    async fn test_fallback_is_negotiated() {
        let req = axum::http::Request::get("/nowhere")
            .header(header::ACCEPT, TEXT_XML)
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONTENT_TYPE], TEXT_XML);
    }

    #[test]
    fn test_settings_apply_to_later_endpoints() {
        let api: Api = Api::new();
        let before = api.endpoint(not_found);
        let api = api.debug(true);
        let after = api.endpoint(not_found);
        assert!(!before.config().is_debug());
        assert!(after.config().is_debug());
    }
}
