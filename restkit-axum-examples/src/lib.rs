//! Demo API served by the `restkit-demo` binary.
//!
//! - `GET /factorial?n=5`
//! - `POST /accounts`, `GET /accounts/{id}`, `DELETE /accounts/{id}`
//! - `GET /panic` to see the recovery path

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use restkit_axum::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::limit::RequestBodyLimitLayer;

const DEFAULT_ADDR: &str = "0.0.0.0:3000";
const BODY_LIMIT: usize = 64 * 1024;

/// Largest `n` whose factorial fits in a `u64`.
const MAX_FACTORIAL: u64 = 20;

/// Listen address from `RESTKIT_ADDR`, defaulting to `0.0.0.0:3000`.
pub fn server_addr() -> anyhow::Result<SocketAddr> {
    let addr = std::env::var("RESTKIT_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.into());
    Ok(addr.parse()?)
}

/// Debug mode from `RESTKIT_DEBUG` (`1` or `true`).
pub fn debug_enabled() -> bool {
    std::env::var("RESTKIT_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
pub struct FactorialQuery {
    pub n: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename = "Factorial")]
pub struct FactorialResult {
    pub n: u64,
    pub result: u64,
}

async fn factorial(reply: Reply, Param(q): Param<FactorialQuery>) -> Outcome {
    if q.n > MAX_FACTORIAL {
        return Err(reply.abort(
            ApiError::new(StatusCode::BAD_REQUEST)
                .with_error_code(1)
                .with_message("n is too large")
                .with_detail("n", q.n)
                .with_detail("max", MAX_FACTORIAL),
        ));
    }

    let result = (1..=q.n).product();
    reply.encode(&FactorialResult { n: q.n, result })?;
    Ok(())
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename = "Account")]
pub struct Account {
    pub id: u64,
    pub name: String,
    pub balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct NewAccount {
    pub name: String,
    #[serde(default)]
    pub balance: i64,
}

#[derive(Clone, Default)]
pub struct Accounts {
    next_id: Arc<AtomicU64>,
    by_id: Arc<RwLock<BTreeMap<u64, Account>>>,
}

async fn create_account(
    reply: Reply,
    State(accounts): State<Accounts>,
    Param(new): Param<NewAccount>,
) -> Outcome {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(reply.abort(
            ApiError::new(StatusCode::UNPROCESSABLE_ENTITY)
                .with_error_code(101)
                .with_message("name must not be empty"),
        ));
    }

    let id = accounts.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    let account = Account {
        id,
        name: name.to_string(),
        balance: new.balance,
    };
    accounts.by_id.write().await.insert(id, account.clone());
    tracing::info!(id, "account created");

    reply.set_status(StatusCode::CREATED);
    reply.encode(&account)?;
    Ok(())
}

async fn show_account(
    reply: Reply,
    State(accounts): State<Accounts>,
    Path(id): Path<u64>,
) -> Outcome {
    let account = accounts.by_id.read().await.get(&id).cloned();
    match account {
        Some(account) => {
            reply.encode(&account)?;
            Ok(())
        }
        None => Err(reply.abort(account_not_found(id))),
    }
}

async fn delete_account(
    reply: Reply,
    State(accounts): State<Accounts>,
    Path(id): Path<u64>,
) -> Outcome {
    if accounts.by_id.write().await.remove(&id).is_none() {
        return Err(reply.abort(account_not_found(id)));
    }
    reply.set_status(StatusCode::NO_CONTENT);
    Ok(())
}

fn account_not_found(id: u64) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND)
        .with_error_code(102)
        .with_message("account not found")
        .with_detail("id", id)
}

async fn crash(_reply: Reply) -> Outcome {
    panic!("demo panic");
}

/// The demo router with fresh in-memory state.
pub fn app(debug: bool) -> Router {
    Api::new()
        .debug(debug)
        .get("/factorial", factorial)
        .post("/accounts", create_account)
        .get("/accounts/{id}", show_account)
        .delete("/accounts/{id}", delete_account)
        .get("/panic", crash)
        .into_router()
        .with_state(Accounts::default())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
}
