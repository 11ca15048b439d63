//! Transaction wrapper providing RAII semantics with automatic rollback.

use sqlx::Postgres;

use crate::{conn::PoolConn, error::Error};

/// A transaction owning one pool connection for its duration.
///
/// Created by [`DbPool::with_transaction`](crate::DbPool::with_transaction).
/// If neither [`commit`](Transaction::commit) nor
/// [`rollback`](Transaction::rollback) is called before the wrapper is
/// dropped, the connection is discarded instead of being returned to the
/// pool; the server aborts the open transaction when the socket closes.
#[derive(Debug)]
pub struct Transaction {
    conn: Option<PoolConn>,
}

impl Transaction {
    /// Issues `BEGIN` on the given connection.
    pub(crate) async fn begin(mut conn: PoolConn) -> Result<Self, Error> {
        if let Err(err) = sqlx::query("BEGIN").execute(&mut conn).await {
            conn.invalidate();
            return Err(err.into());
        }
        Ok(Self { conn: Some(conn) })
    }

    /// Commits all changes made within this transaction and returns the
    /// connection to the pool.
    pub async fn commit(mut self) -> Result<(), Error> {
        let mut conn = self.conn.take().expect("connection taken");
        if let Err(err) = sqlx::query("COMMIT").execute(&mut conn).await {
            // Transaction state is unknown after a failed COMMIT.
            conn.invalidate();
            return Err(err.into());
        }
        Ok(())
    }

    /// Rolls back all changes made within this transaction.
    ///
    /// Equivalent to dropping the transaction, except the connection survives
    /// and is returned to the pool.
    pub async fn rollback(mut self) -> Result<(), Error> {
        let mut conn = self.conn.take().expect("connection taken");
        if let Err(err) = sqlx::query("ROLLBACK").execute(&mut conn).await {
            conn.invalidate();
            return Err(err.into());
        }
        Ok(())
    }

    fn conn_mut(&mut self) -> &mut PoolConn {
        // `conn` is only `None` after commit/rollback consumed `self`.
        self.conn.as_mut().expect("connection taken")
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            // ROLLBACK cannot be awaited from a sync drop; discarding the
            // connection makes the server abort the open transaction.
            conn.invalidate();
            tracing::debug!("transaction dropped without commit; discarding connection");
        }
    }
}

// Implement sqlx::Executor for &mut Transaction by delegating to the checked
// out connection.
impl<'c> sqlx::Executor<'c> for &'c mut Transaction {
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
        self.conn_mut().fetch_many(query)
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
        self.conn_mut().fetch_optional(query)
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
        self.conn_mut().prepare_with(sql, parameters)
    }

    fn describe<'e, 'q: 'e>(
        self,
        sql: &'q str,
    ) -> futures::future::BoxFuture<'e, Result<sqlx::Describe<Self::Database>, sqlx::Error>>
    where
        'c: 'e,
    {
        self.conn_mut().describe(sql)
    }
}
