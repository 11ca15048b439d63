//! Error types for shard configuration and routing.

use crate::key::ShardKey;

/// Rejected shard configuration.
///
/// Every variant is detected eagerly at
/// [`ShardManager::initialize`](crate::ShardManager::initialize), never at
/// first use. Configuration errors are fatal and not retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("entity `{entity}`: shard_count must be at least 1")]
    ZeroShardCount { entity: String },

    #[error("entity `{entity}` is configured more than once")]
    DuplicateEntity { entity: String },

    #[error("entity `{entity}`: range strategy requires at least one range")]
    MissingRanges { entity: String },

    #[error("entity `{entity}`: range [{min}, {max}] has min above max")]
    InvertedRange { entity: String, min: i64, max: i64 },

    #[error(
        "entity `{entity}`: ranges [{first_min}, {first_max}] and [{second_min}, {second_max}] overlap"
    )]
    OverlappingRanges {
        entity: String,
        first_min: i64,
        first_max: i64,
        second_min: i64,
        second_max: i64,
    },

    #[error("entity `{entity}`: lookup strategy requires a non-empty map")]
    EmptyLookup { entity: String },

    #[error("entity `{entity}`: shard index {shard} is outside [0, {shard_count})")]
    ShardOutOfBounds {
        entity: String,
        shard: u32,
        shard_count: u32,
    },

    #[error("entity `{entity}`: shard {shard} has no writable connection")]
    MissingWritableConnection { entity: String, shard: u32 },

    #[error("entity `{entity}`: shard {shard} has more than one writable connection")]
    DuplicateWritableConnection { entity: String, shard: u32 },

    #[error("entity `{entity}`: invalid connection URL: {source}")]
    InvalidConnectionUrl {
        entity: String,
        #[source]
        source: url::ParseError,
    },
}

/// A key that cannot be routed under the configured strategy.
///
/// Fatal per call, never retried: the same key fails the same way until the
/// configuration changes.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("key `{key}` is not numeric; the range strategy requires numeric keys")]
    NonNumericKey { key: ShardKey },

    #[error("key `{key}` falls outside every configured range")]
    KeyOutOfRanges { key: ShardKey },

    #[error("key `{key}` is absent from the lookup map")]
    UnknownKey { key: ShardKey },

    #[error("custom routing function returned shard {shard}, outside [0, {shard_count})")]
    CustomIndexOutOfBounds { shard: u32, shard_count: u32 },
}

/// Errors surfaced by [`ShardManager`](crate::ShardManager) operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no shard configuration registered for entity `{entity}`")]
    UnknownEntity { entity: String },

    #[error("manager is shut down")]
    Closed,

    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Errors that can occur while building a [`ShardManager`](crate::ShardManager).
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Error connecting pool for endpoint `{endpoint}`: {source}")]
    PoolConnect {
        endpoint: String,
        #[source]
        source: db_pool::Error,
    },

    #[error("Error connecting to the shard-mapping cache: {source}")]
    CacheConnect {
        #[source]
        source: redis::RedisError,
    },
}
