//! Per-entity shard configuration and its eager validation.

use std::{collections::BTreeMap, sync::Arc};

use url::Url;

use crate::{error::ConfigError, key::ShardKey};

/// A caller-supplied routing function for the hash strategy.
///
/// When configured, it fully replaces the built-in hash. The returned index
/// is still bounds-checked against `shard_count` at routing time.
pub type RoutingFn = Arc<dyn Fn(&ShardKey) -> u32 + Send + Sync>;

/// How one entity's keys map to shard indexes.
#[derive(Clone)]
pub enum ShardStrategy {
    /// Deterministic key hash reduced modulo `shard_count`, or a custom
    /// routing function when one is supplied.
    Hash { routing_fn: Option<RoutingFn> },
    /// First range containing the (numeric) key wins. Ranges may be
    /// collectively partial; a key outside every range is an error, never a
    /// default shard.
    Range { ranges: Vec<KeyRange> },
    /// Explicit key-to-shard map; absent keys are an error.
    Lookup { map: BTreeMap<String, u32> },
}

impl std::fmt::Debug for ShardStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hash { routing_fn } => f
                .debug_struct("Hash")
                .field("routing_fn", &routing_fn.as_ref().map(|_| "<custom>"))
                .finish(),
            Self::Range { ranges } => f.debug_struct("Range").field("ranges", ranges).finish(),
            Self::Lookup { map } => f.debug_struct("Lookup").field("map", map).finish(),
        }
    }
}

/// An inclusive key range owned by one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub min: i64,
    pub max: i64,
    pub shard: u32,
}

impl KeyRange {
    pub fn contains(&self, value: i64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// One physical endpoint serving one shard of an entity.
#[derive(Debug, Clone)]
pub struct ShardConnection {
    /// Connection URL. Endpoints shared across shards or entities are pooled
    /// once, keyed by this URL.
    pub url: String,
    /// Shard index this endpoint serves.
    pub shard: u32,
    /// Read replicas are preferred by read-only routed access and fan-outs.
    pub read_only: bool,
}

/// Shard configuration for one logical entity type.
///
/// Supplied once at initialization and immutable thereafter; changing a
/// live entity's sharding requires a restart (and a data migration, which is
/// out of scope here).
#[derive(Debug, Clone)]
pub struct EntityShardConfig {
    /// Logical entity name, e.g. `patients`.
    pub entity: String,
    pub strategy: ShardStrategy,
    pub shard_count: u32,
    pub connections: Vec<ShardConnection>,
}

impl EntityShardConfig {
    /// Checks every invariant the router relies on.
    ///
    /// Called eagerly by
    /// [`ShardManager::initialize`](crate::ShardManager::initialize); a
    /// strategy missing its required fields is rejected here, not at first
    /// use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let entity = || self.entity.clone();

        if self.shard_count == 0 {
            return Err(ConfigError::ZeroShardCount { entity: entity() });
        }

        match &self.strategy {
            ShardStrategy::Hash { .. } => {}
            ShardStrategy::Range { ranges } => {
                if ranges.is_empty() {
                    return Err(ConfigError::MissingRanges { entity: entity() });
                }
                for range in ranges {
                    if range.min > range.max {
                        return Err(ConfigError::InvertedRange {
                            entity: entity(),
                            min: range.min,
                            max: range.max,
                        });
                    }
                    self.check_shard_bounds(range.shard)?;
                }
                let mut sorted: Vec<&KeyRange> = ranges.iter().collect();
                sorted.sort_by_key(|range| range.min);
                for pair in sorted.windows(2) {
                    if pair[1].min <= pair[0].max {
                        return Err(ConfigError::OverlappingRanges {
                            entity: entity(),
                            first_min: pair[0].min,
                            first_max: pair[0].max,
                            second_min: pair[1].min,
                            second_max: pair[1].max,
                        });
                    }
                }
            }
            ShardStrategy::Lookup { map } => {
                if map.is_empty() {
                    return Err(ConfigError::EmptyLookup { entity: entity() });
                }
                for shard in map.values() {
                    self.check_shard_bounds(*shard)?;
                }
            }
        }

        // Every shard index needs exactly one writable connection; read
        // replicas are optional.
        let mut writable_per_shard = vec![0_u32; self.shard_count as usize];
        for conn in &self.connections {
            self.check_shard_bounds(conn.shard)?;
            Url::parse(&conn.url).map_err(|source| ConfigError::InvalidConnectionUrl {
                entity: entity(),
                source,
            })?;
            if !conn.read_only {
                writable_per_shard[conn.shard as usize] += 1;
            }
        }
        for (shard, count) in writable_per_shard.iter().enumerate() {
            match count {
                0 => {
                    return Err(ConfigError::MissingWritableConnection {
                        entity: entity(),
                        shard: shard as u32,
                    });
                }
                1 => {}
                _ => {
                    return Err(ConfigError::DuplicateWritableConnection {
                        entity: entity(),
                        shard: shard as u32,
                    });
                }
            }
        }

        Ok(())
    }

    fn check_shard_bounds(&self, shard: u32) -> Result<(), ConfigError> {
        if shard >= self.shard_count {
            return Err(ConfigError::ShardOutOfBounds {
                entity: self.entity.clone(),
                shard,
                shard_count: self.shard_count,
            });
        }
        Ok(())
    }
}
