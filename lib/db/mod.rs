
use diesel_async::{
    pg::AsyncPgConnection,
    pooled_connection::{
        deadpool::{BuildError, Pool},
        AsyncDieselConnectionManager,
    },
};

/// Builds the async Postgres pool shared by the store, sink, and server.
pub fn build_db_pool(db_url: &str, max_size: usize) -> Result<Pool<AsyncPgConnection>, BuildError> {
    let pool_config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(db_url);
    Pool::builder(pool_config).max_size(max_size).build()
}
