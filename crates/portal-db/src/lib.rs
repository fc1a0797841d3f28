#[macro_use]
extern crate tracing;

use diesel::Connection;
use diesel_async::{
    async_connection_wrapper::AsyncConnectionWrapper,
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager},
    AsyncPgConnection,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use portal_config::database::Configuration as DatabaseConfig;
use portal_error::{Error, Result};

pub use self::pool::{PgPool, PoolError};

mod error;
mod pool;

pub mod json;
pub mod model;
#[allow(clippy::wildcard_imports)]
pub mod schema;
pub mod snapshot;
pub mod types;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Connect to the database and run any pending migrations
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let conn_str = config.url.clone();
    tokio::task::spawn_blocking(move || {
        let mut migration_conn =
            AsyncConnectionWrapper::<AsyncPgConnection>::establish(conn_str.as_str())?;

        migration_conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(Error::msg)?;

        debug!("database migrations are up to date");

        Ok::<_, Error>(())
    })
    .await
    .map_err(Error::msg)??;

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(config.url.as_str());
    let pool = Pool::builder(manager)
        .max_size(config.max_connections as usize)
        .build()
        .map_err(Error::msg)?;

    Ok(PgPool::from(pool))
}
