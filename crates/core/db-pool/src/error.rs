//! Error types for pool operations

use std::time::Duration;

use crate::config::ConfigError;

/// Errors that can occur when acquiring a connection or executing a statement.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid pool configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Error connecting to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Timed out connecting to database after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Timed out waiting for a free connection after {0:?}")]
    AcquireTimeout(Duration),

    #[error("Pool is shut down")]
    Closed,

    #[error("Error executing database query: {0}")]
    Query(#[from] sqlx::Error),
}

impl Error {
    /// Returns `true` if the error is likely to be a transient connection issue.
    ///
    /// The following errors are considered connection-level:
    /// - [`Error::Connect`] / [`Error::ConnectTimeout`]: the initial connection
    ///   attempt to the database failed or timed out.
    /// - [`Error::AcquireTimeout`]: the pool was saturated for the whole acquire
    ///   window; a later attempt may find free capacity.
    /// - `sqlx::Error::Io`: an I/O error, often a network issue or closed socket.
    /// - `sqlx::Error::Tls`: an error during the TLS handshake.
    ///
    /// [`Error::Closed`] is deliberately *not* connection-level: this pool never
    /// reopens after [`shutdown`](crate::DbPool::shutdown), so retrying cannot
    /// succeed. Statement-level database errors such as constraint violations
    /// are not transient either.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connect(_) | Error::ConnectTimeout(_) | Error::AcquireTimeout(_) => true,
            Error::Query(err) => matches!(err, sqlx::Error::Io(_) | sqlx::Error::Tls(_)),
            _ => false,
        }
    }

    /// Returns `true` if the error is safe to retry.
    ///
    /// This includes connection errors plus the two PostgreSQL error classes
    /// that signal a transaction lost a race and should be re-run:
    /// - **Serialization failure** (`40001`): two transactions conflicted and
    ///   one was aborted. Common with `SELECT FOR UPDATE` and concurrent updates.
    /// - **Deadlock detected** (`40P01`): transactions were waiting on each
    ///   other's locks and one was chosen as the victim.
    ///
    /// Everything else, notably constraint violations, is surfaced immediately:
    /// re-running a statement the database rejected on its merits only repeats
    /// the rejection.
    pub fn is_retryable(&self) -> bool {
        if self.is_connection_error() {
            return true;
        }

        matches!(
            self,
            Error::Query(sqlx::Error::Database(err))
                if err.code().is_some_and(|code| matches!(
                    code.as_ref(),
                    "40001" | // serialization_failure
                    "40P01"   // deadlock_detected
                ))
        )
    }
}
