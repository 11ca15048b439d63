//! Shard keys.

use std::borrow::Cow;

/// The value used to deterministically route one entity instance to its
/// shard.
///
/// Keys are opaque strings or 64-bit integers. A numeric key and its decimal
/// string form are equivalent for hash and lookup routing: both reduce to
/// one canonical form before hashing or map lookup, so `ShardKey::Int(42)`
/// and `ShardKey::from("42")` always land on the same shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShardKey {
    Text(String),
    Int(i64),
}

impl ShardKey {
    /// Canonical string form used by the hash and lookup strategies.
    pub fn canonical(&self) -> Cow<'_, str> {
        match self {
            Self::Text(value) => Cow::Borrowed(value),
            Self::Int(value) => Cow::Owned(value.to_string()),
        }
    }

    /// Numeric value, if the key is an integer or an integer-formatted
    /// string. Required by the range strategy.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Text(value) => value.trim().parse().ok(),
        }
    }
}

impl std::fmt::Display for ShardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Int(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for ShardKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ShardKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for ShardKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for ShardKey {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}
