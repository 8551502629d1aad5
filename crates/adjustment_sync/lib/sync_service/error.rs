use diesel_async::pooled_connection::deadpool::PoolError;
use thiserror::Error;

use crate::adjustment_store::StoreError;

/// Failures that stop the scheduler loop. Remote failures never surface here; they become
/// cycle outcomes instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    DBPoolError(#[from] PoolError),
}
