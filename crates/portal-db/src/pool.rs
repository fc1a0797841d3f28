use diesel_async::{
    pooled_connection::deadpool::{Object, Pool, PoolError as DeadpoolError},
    scoped_futures::ScopedBoxFuture,
    AsyncConnection, AsyncPgConnection,
};
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError<E> {
    #[error(transparent)]
    Pool(#[from] DeadpoolError),

    #[error("{0}")]
    User(E),
}

#[derive(Clone)]
pub struct PgPool {
    inner: Pool<AsyncPgConnection>,
}

impl PgPool {
    /// Run the code inside a context with a database connection
    pub async fn with_connection<F, Fut, T, E>(&self, func: F) -> Result<T, PoolError<E>>
    where
        F: FnOnce(Object<AsyncPgConnection>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let conn = self.inner.get().await?;
        func(conn).await.map_err(PoolError::User)
    }

    /// Run the code inside a context with a database transaction
    ///
    /// If the closure errors, everything it wrote is rolled back.
    pub async fn with_transaction<'a, R, E, F>(&self, func: F) -> Result<R, PoolError<E>>
    where
        F: for<'r> FnOnce(
                &'r mut Object<AsyncPgConnection>,
            ) -> ScopedBoxFuture<'a, 'r, Result<R, E>>
            + Send
            + 'a,
        E: From<diesel::result::Error> + Send + 'a,
        R: Send + 'a,
    {
        let mut conn = self.inner.get().await?;
        conn.transaction(func).await.map_err(PoolError::User)
    }
}

impl PoolError<portal_error::Error> {
    /// Collapse into the workspace error type
    ///
    /// Checkout failures become `Other`; user errors keep their error type.
    /// A `From` impl cannot express this since the blanket
    /// report-conversion in `portal-error` already claims the type.
    #[must_use]
    pub fn flatten(self) -> portal_error::Error {
        match self {
            Self::Pool(err) => err.into(),
            Self::User(err) => err,
        }
    }
}

impl From<Pool<AsyncPgConnection>> for PgPool {
    fn from(value: Pool<AsyncPgConnection>) -> Self {
        Self { inner: value }
    }
}
