//! rolecall-web - HTTP surface for rolecall using Axum

pub mod error;
pub mod router;

pub use error::{ApiError, ApiResult};
pub use router::create_router;

use anyhow::Result;
use rolecall_core::MeterService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Run the web server
pub async fn run(service: Arc<MeterService>, addr: SocketAddr) -> Result<()> {
    let router = create_router(service);

    let listener = TcpListener::bind(addr).await?;

    info!("Web server listening on http://{}", addr);
    println!("Web server listening on http://{}", addr);

    axum::serve(listener, router).await?;

    Ok(())
}
