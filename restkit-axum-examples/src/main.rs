//! Demo server for restkit-axum.
//!
//! Run with: cargo run --bin restkit-demo
//!
//! Environment:
//! - `RESTKIT_ADDR`: listen address (default `0.0.0.0:3000`)
//! - `RESTKIT_DEBUG`: `1` or `true` to send panic reports and wrapped error details
//! - `RUST_LOG`: log filter (default `info`)

use restkit_axum_examples::{app, debug_enabled, server_addr};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = server_addr()?;
    let debug_mode = debug_enabled();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, debug_mode, "listening");

    let port = addr.port();
    println!("Try:");
    println!("  curl -H 'Accept: application/json' 'http://localhost:{port}/factorial?n=5'");
    println!("  curl -H 'Accept: text/xml' 'http://localhost:{port}/factorial?n=5'");
    println!(
        "  curl -X POST http://localhost:{port}/accounts \\\n    \
         -H 'Content-Type: application/json' -d '{{\"name\": \"Ada\"}}'"
    );

    axum::serve(listener, app(debug_mode)).await?;
    Ok(())
}
