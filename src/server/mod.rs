//! HTTP API over one vector table.

pub mod routes;

use crate::store::BackingStore;
use crate::table::VectorTable;
use std::sync::Arc;
use tracing::info;

/// Shared application state for the HTTP server.
pub struct AppState<S> {
    pub table: VectorTable,
    pub store: S,
}

/// Initialize `table` in `store` and serve it on `addr` until the process
/// is stopped.
pub async fn serve<S>(addr: &str, table: VectorTable, store: S) -> anyhow::Result<()>
where
    S: BackingStore + Send + Sync + 'static,
{
    table.initialize(&store)?;
    let state = Arc::new(AppState { table, store });

    let app = routes::create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
