//! Key-to-shard resolution strategies.

use std::collections::BTreeMap;

use xxhash_rust::xxh3::xxh3_64;

use crate::{
    config::{EntityShardConfig, KeyRange, RoutingFn, ShardStrategy},
    error::RoutingError,
    key::ShardKey,
};

/// Maps an entity's shard keys to shard indexes.
///
/// Built once from a validated [`EntityShardConfig`]; resolution is a pure
/// function of the key, so the same key yields the same index across
/// repeated calls and process restarts with the same configuration.
pub enum ShardResolver {
    Hash {
        shard_count: u32,
        routing_fn: Option<RoutingFn>,
    },
    Range {
        /// Sorted by `min`; validation guarantees the ranges don't overlap.
        ranges: Vec<KeyRange>,
    },
    Lookup {
        map: BTreeMap<String, u32>,
    },
}

impl ShardResolver {
    /// Builds the resolver for a config that already passed
    /// [`EntityShardConfig::validate`].
    pub(crate) fn new(config: &EntityShardConfig) -> Self {
        match &config.strategy {
            ShardStrategy::Hash { routing_fn } => Self::Hash {
                shard_count: config.shard_count,
                routing_fn: routing_fn.clone(),
            },
            ShardStrategy::Range { ranges } => {
                let mut ranges = ranges.clone();
                ranges.sort_by_key(|range| range.min);
                Self::Range { ranges }
            }
            ShardStrategy::Lookup { map } => Self::Lookup { map: map.clone() },
        }
    }

    /// Resolves `key` to a shard index.
    pub fn shard_index(&self, key: &ShardKey) -> Result<u32, RoutingError> {
        match self {
            Self::Hash {
                shard_count,
                routing_fn,
            } => match routing_fn {
                Some(routing_fn) => {
                    let shard = routing_fn(key);
                    if shard >= *shard_count {
                        return Err(RoutingError::CustomIndexOutOfBounds {
                            shard,
                            shard_count: *shard_count,
                        });
                    }
                    Ok(shard)
                }
                // xxh3 of the canonical form keeps Int(42) and "42" together
                // and is stable across processes.
                None => Ok((xxh3_64(key.canonical().as_bytes()) % u64::from(*shard_count)) as u32),
            },
            Self::Range { ranges } => {
                let value = key.as_number().ok_or_else(|| RoutingError::NonNumericKey {
                    key: key.clone(),
                })?;
                ranges
                    .iter()
                    .find(|range| range.contains(value))
                    .map(|range| range.shard)
                    .ok_or_else(|| RoutingError::KeyOutOfRanges { key: key.clone() })
            }
            Self::Lookup { map } => map
                .get(key.canonical().as_ref())
                .copied()
                .ok_or_else(|| RoutingError::UnknownKey { key: key.clone() }),
        }
    }
}
