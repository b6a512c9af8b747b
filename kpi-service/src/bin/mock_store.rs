//! Stand-alone mock reading store for local development against the
//! `mock_rest` source.

use anyhow::Result;
use kpi_service::{config::LogFormat, mock_store::MockStore, observability};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing(LogFormat::Pretty);

    let addr = std::env::var("MOCK_STORE_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "mock store listening");

    axum::serve(listener, MockStore::default().router().into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
