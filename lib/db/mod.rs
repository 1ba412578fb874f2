pub mod migrations;
pub mod models;
pub mod schema;

use std::ops::DerefMut;
use std::sync::Arc;

use diesel_async::{
    pg::AsyncPgConnection,
    pooled_connection::{
        deadpool::{BuildError, Object, Pool},
        AsyncDieselConnectionManager,
    },
};
use futures::future::BoxFuture;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::segments::{SegmentConnection, SegmentError};

/// Builds the async Postgres pool handed to [`crate::segments::SegmentService`].
pub async fn build_db_pool(
    db_url: &str,
    max_size: usize,
) -> Result<Pool<AsyncPgConnection>, BuildError> {
    assert!(max_size > 0, "db pool max_size must be > 0");

    let pool_config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(db_url);
    let pool = Pool::builder(pool_config).max_size(max_size).build()?;

    Ok(pool)
}

/// Hands out one exclusively-owned connection per operation.
///
/// The handle returns the connection to its source when dropped, so it must not outlive the
/// operation that acquired it.
pub trait ConnectionProvider: Send + Sync {
    type Connection: SegmentConnection;
    type Handle: DerefMut<Target = Self::Connection> + Send;

    fn connection(&self) -> BoxFuture<'_, Result<Self::Handle, SegmentError>>;
}

impl ConnectionProvider for Pool<AsyncPgConnection> {
    type Connection = AsyncPgConnection;
    type Handle = Object<AsyncPgConnection>;

    fn connection(&self) -> BoxFuture<'_, Result<Self::Handle, SegmentError>> {
        Box::pin(async move { Ok(self.get().await?) })
    }
}

/// A single connection shared behind an async mutex; callers are serialized.
///
/// Used with the in-memory SQLite harness, where every connection is its own database.
impl<C> ConnectionProvider for Arc<Mutex<C>>
where
    C: SegmentConnection + 'static,
{
    type Connection = C;
    type Handle = OwnedMutexGuard<C>;

    fn connection(&self) -> BoxFuture<'_, Result<Self::Handle, SegmentError>> {
        let shared = Arc::clone(self);
        Box::pin(async move { Ok(shared.lock_owned().await) })
    }
}
