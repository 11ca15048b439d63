//! Coarse statement classification and dynamic parameter values.

use sqlx::{Postgres, postgres::PgArguments, query::Query};

/// Coarse statement class, used to tag the query-duration metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    TransactionControl,
    Other,
}

impl StatementKind {
    /// Classifies a statement by its leading keyword.
    ///
    /// This is a labelling aid, not a parser: CTEs (`WITH`) are counted as
    /// reads, and anything unrecognized lands in [`StatementKind::Other`].
    pub fn classify(sql: &str) -> Self {
        let keyword = sql
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
            .next()
            .unwrap_or_default();

        if keyword.eq_ignore_ascii_case("select") || keyword.eq_ignore_ascii_case("with") {
            Self::Select
        } else if keyword.eq_ignore_ascii_case("insert") {
            Self::Insert
        } else if keyword.eq_ignore_ascii_case("update") {
            Self::Update
        } else if keyword.eq_ignore_ascii_case("delete") {
            Self::Delete
        } else if ["create", "alter", "drop", "truncate", "grant", "revoke"]
            .iter()
            .any(|kw| keyword.eq_ignore_ascii_case(kw))
        {
            Self::Ddl
        } else if ["begin", "commit", "rollback", "savepoint", "release", "start"]
            .iter()
            .any(|kw| keyword.eq_ignore_ascii_case(kw))
        {
            Self::TransactionControl
        } else {
            Self::Other
        }
    }

    /// Metric label for this class.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Ddl => "ddl",
            Self::TransactionControl => "transaction_control",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dynamically-typed statement parameter.
///
/// [`DbPool::query`](crate::DbPool::query) may execute a statement more than
/// once when it fails transiently, and `sqlx` argument buffers are single-use.
/// Holding parameters as plain values lets the pool re-bind them on every
/// attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl SqlParam {
    /// Binds this parameter to the next placeholder of `query`.
    pub(crate) fn bind_to<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            Self::Text(value) => query.bind(value.clone()),
            Self::Int(value) => query.bind(*value),
            Self::Float(value) => query.bind(*value),
            Self::Bool(value) => query.bind(*value),
            Self::Null => query.bind(Option::<String>::None),
        }
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for SqlParam {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for SqlParam {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
