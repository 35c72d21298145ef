//! JSON HTTP API over the query service.
//!
//! - `GET /api/entries/:class?page=N&page_size=M`
//! - `GET /api/feeds`
//! - `GET /health`

mod error;
mod handlers;
mod router;

pub use error::{ApiError, ErrorCode};
pub use handlers::AppState;
pub use router::create_router;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Binds `addr` and serves the API until `shutdown` completes.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
