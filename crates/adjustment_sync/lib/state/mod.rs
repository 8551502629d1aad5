use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::db::DbPool;

/// Shared by the HTTP surface and the sync loop.
pub struct AppState {
    pub pool: DbPool,
    pub shutdown_token: CancellationToken,
    pub registry: RwLock<Registry>,
}

impl AppState {
    pub fn new(pool: DbPool, shutdown_token: CancellationToken) -> Self {
        Self {
            pool,
            shutdown_token,
            registry: RwLock::new(Registry::default()),
        }
    }
}
