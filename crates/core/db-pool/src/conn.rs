//! Physical connections and the RAII checkout handle.

use std::{sync::Arc, time::Duration};

use sqlx::{Connection as _, PgConnection, Postgres};
use tokio::sync::OwnedSemaphorePermit;

use crate::{PoolShared, error::Error};

/// A single physical connection to the database.
#[derive(Debug)]
pub(crate) struct PgConn(PgConnection);

impl PgConn {
    /// Opens one connection, bounded by `timeout`.
    #[tracing::instrument(skip_all, err)]
    pub(crate) async fn connect(url: &str, timeout: Duration) -> Result<Self, Error> {
        tokio::time::timeout(timeout, PgConnection::connect(url))
            .await
            .map_err(|_| Error::ConnectTimeout(timeout))?
            .map(Self)
            .map_err(Error::Connect)
    }

    /// Terminates the connection, notifying the server.
    ///
    /// Dropping a `PgConn` also closes the socket; this variant lets the
    /// server clean up without waiting for a TCP timeout.
    pub(crate) async fn close(self) {
        if let Err(err) = self.0.close().await {
            tracing::debug!(error = %err, "error closing database connection");
        }
    }
}

impl std::ops::Deref for PgConn {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for PgConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// A checked-out connection.
///
/// Holds one unit of pool capacity for its lifetime. Dropping the handle
/// returns the connection to the pool's idle set, unless the handle was
/// [invalidated](PoolConn::invalidate) or the pool has shut down, in which
/// case the physical connection is discarded.
///
/// The handle dereferences to [`sqlx::PgConnection`] and implements
/// [`sqlx::Executor`], so it can be passed directly to `sqlx::query(..)`
/// calls.
#[derive(Debug)]
pub struct PoolConn {
    conn: Option<PgConn>,
    shared: Arc<PoolShared>,
    valid: bool,
    // Held, not read: returns capacity to the semaphore on drop.
    _permit: OwnedSemaphorePermit,
}

impl PoolConn {
    pub(crate) fn new(conn: PgConn, shared: Arc<PoolShared>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            conn: Some(conn),
            shared,
            valid: true,
            _permit: permit,
        }
    }

    /// Marks the underlying connection as broken.
    ///
    /// An invalidated connection is closed on drop instead of being handed to
    /// the next caller. The pool reopens a connection lazily when needed.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    fn pg(&mut self) -> &mut PgConnection {
        // `conn` is only `None` after `Drop` has run.
        self.conn.as_mut().expect("connection taken")
    }
}

impl std::ops::Deref for PoolConn {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection taken")
    }
}

impl std::ops::DerefMut for PoolConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.pg()
    }
}

impl Drop for PoolConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn, self.valid);
        }
    }
}

// Implement sqlx::Executor for &mut PoolConn by delegating to the underlying
// PgConnection.
impl<'c> sqlx::Executor<'c> for &'c mut PoolConn {
    type Database = Postgres;

    fn fetch_many<'e, 'q: 'e, E>(
        self,
        query: E,
    ) -> futures::stream::BoxStream<
        'e,
        Result<
            sqlx::Either<
                <Postgres as sqlx::Database>::QueryResult,
                <Postgres as sqlx::Database>::Row,
            >,
            sqlx::Error,
        >,
    >
    where
        'c: 'e,
        E: 'q + sqlx::Execute<'q, Self::Database>,
    {
        self.pg().fetch_many(query)
    }

    fn fetch_optional<'e, 'q: 'e, E>(
        self,
        query: E,
    ) -> futures::future::BoxFuture<
        'e,
        Result<Option<<Postgres as sqlx::Database>::Row>, sqlx::Error>,
    >
    where
        'c: 'e,
        E: 'q + sqlx::Execute<'q, Self::Database>,
    {
        self.pg().fetch_optional(query)
    }

    fn prepare_with<'e, 'q: 'e>(
        self,
        sql: &'q str,
        parameters: &'e [<Postgres as sqlx::Database>::TypeInfo],
    ) -> futures::future::BoxFuture<
        'e,
        Result<<Postgres as sqlx::Database>::Statement<'q>, sqlx::Error>,
    >
    where
        'c: 'e,
    {
        self.pg().prepare_with(sql, parameters)
    }

    fn describe<'e, 'q: 'e>(
        self,
        sql: &'q str,
    ) -> futures::future::BoxFuture<'e, Result<sqlx::Describe<Self::Database>, sqlx::Error>>
    where
        'c: 'e,
    {
        self.pg().describe(sql)
    }
}
