//! Configuration loading for the hospital data layer.
//!
//! A single TOML file configures the connection pools, the per-entity shard
//! topology, and the optional shard-mapping cache. Values can be overridden
//! through `HMS_CONFIG_`-prefixed environment variables; nested fields use
//! double underscores, e.g. `HMS_CONFIG_POOL__MAX_SIZE` overrides
//! `pool.max_size`.
//!
//! Everything is validated eagerly: a config that loads successfully will
//! not be rejected later by [`ShardManager::initialize`].

use std::{collections::BTreeMap, path::PathBuf};

use db_pool::PoolConfig;
use figment::{
    Figment,
    providers::{Env, Format as _, Toml},
};
pub use monitoring::config::OpenTelemetryConfig;
use monitoring::telemetry::metrics::Meter;
use serde::Deserialize;
use shard_router::{
    EntityShardConfig, InitError, KeyRange, MappingCache, ShardConnection, ShardManager,
    ShardStrategy,
};
use thiserror::Error;

mod redacted;

pub use self::redacted::Redacted;

/// Fully loaded and validated data-layer configuration.
#[derive(Debug, Clone)]
pub struct DataLayerConfig {
    /// Pool tuning applied to every endpoint pool.
    pub pool: PoolConfig,
    /// Shard topology per logical entity.
    pub entities: Vec<EntityShardConfig>,
    /// Optional Redis-backed shard-mapping cache.
    pub cache: Option<CacheConfig>,
    pub opentelemetry: Option<OpenTelemetryConfig>,
    pub config_path: PathBuf,
}

/// Connection details for the shard-mapping cache.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Redis connection URL.
    pub url: Redacted<String>,
    /// Key namespace; the router's default is used when absent.
    pub namespace: Option<String>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error at {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("Config parse error at {0}: {1}")]
    Figment(PathBuf, figment::Error),
    #[error("Invalid pool configuration at {0}: {1}")]
    Pool(PathBuf, db_pool::ConfigError),
    #[error("Invalid shard configuration at {0}: {1}")]
    Shard(PathBuf, shard_router::ConfigError),
    #[error("Error initializing the data layer from {0}: {1}")]
    Init(PathBuf, InitError),
}

impl DataLayerConfig {
    /// Loads configuration from a TOML file with optional environment
    /// variable overrides.
    ///
    /// `env_override` allows env vars prefixed with `HMS_CONFIG_` to
    /// override config values. Nested fields use double underscore
    /// separators, e.g. `HMS_CONFIG_POOL__MAX_SIZE` overrides
    /// `pool.max_size`.
    pub fn load(file: impl Into<PathBuf>, env_override: bool) -> Result<Self, ConfigError> {
        let input_path = file.into();
        let config_path = std::fs::canonicalize(&input_path)
            .map_err(|err| ConfigError::Io(input_path.clone(), err))?;
        let contents = std::fs::read_to_string(&config_path)
            .map_err(|err| ConfigError::Io(config_path.clone(), err))?;
        Self::from_contents(&contents, env_override, config_path)
    }

    fn from_contents(
        contents: &str,
        env_override: bool,
        config_path: PathBuf,
    ) -> Result<Self, ConfigError> {
        let config_file: ConfigFile = {
            let mut config_builder = Figment::new().merge(Toml::string(contents));
            if env_override {
                config_builder = config_builder.merge(Env::prefixed("HMS_CONFIG_").split("__"));
            }
            config_builder
                .extract()
                .map_err(|err| ConfigError::Figment(config_path.clone(), err))?
        };

        config_file
            .pool
            .validate()
            .map_err(|err| ConfigError::Pool(config_path.clone(), err))?;

        let entities: Vec<EntityShardConfig> = config_file
            .entities
            .into_iter()
            .map(EntityFile::into_config)
            .collect();
        for entity in &entities {
            entity
                .validate()
                .map_err(|err| ConfigError::Shard(config_path.clone(), err))?;
        }

        tracing::debug!(
            path = %config_path.display(),
            entities = entities.len(),
            "Loaded data layer configuration"
        );
        Ok(Self {
            pool: config_file.pool,
            entities,
            cache: config_file.cache,
            opentelemetry: config_file.opentelemetry,
            config_path,
        })
    }

    /// Connects the shard-mapping cache named by the config, if any.
    pub async fn mapping_cache(&self) -> Result<Option<MappingCache>, ConfigError> {
        match &self.cache {
            Some(cache) => MappingCache::redis(cache.url.as_ref(), cache.namespace.as_deref())
                .await
                .map(Some)
                .map_err(|source| {
                    ConfigError::Init(self.config_path.clone(), InitError::CacheConnect { source })
                }),
            None => Ok(None),
        }
    }

    /// Connects every configured pool and the cache, and builds the shard
    /// manager.
    pub async fn shard_manager(&self, meter: Option<&Meter>) -> Result<ShardManager, ConfigError> {
        let cache = self.mapping_cache().await?;
        ShardManager::initialize(self.entities.clone(), self.pool.clone(), cache, meter)
            .await
            .map_err(|err| ConfigError::Init(self.config_path.clone(), err))
    }
}

/// The file-facing shape of the configuration.
///
/// Kept separate from the domain types so serde concerns (defaults, field
/// names, the strategy tag) stay out of the router and pool crates.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    pool: PoolConfig,
    #[serde(default)]
    entities: Vec<EntityFile>,
    cache: Option<CacheConfig>,
    opentelemetry: Option<OpenTelemetryConfig>,
}

#[derive(Debug, Deserialize)]
struct EntityFile {
    /// Logical entity name, e.g. `patients`.
    name: String,
    strategy: StrategyName,
    shard_count: u32,
    /// Inclusive key ranges; only meaningful for the `range` strategy.
    #[serde(default)]
    ranges: Vec<RangeFile>,
    /// Explicit key-to-shard map; only meaningful for the `lookup` strategy.
    #[serde(default)]
    lookup: BTreeMap<String, u32>,
    connections: Vec<ConnectionFile>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum StrategyName {
    Hash,
    Range,
    Lookup,
}

#[derive(Debug, Deserialize)]
struct RangeFile {
    min: i64,
    max: i64,
    shard: u32,
}

#[derive(Debug, Deserialize)]
struct ConnectionFile {
    url: Redacted<String>,
    shard: u32,
    #[serde(default)]
    read_only: bool,
}

impl EntityFile {
    fn into_config(self) -> EntityShardConfig {
        let strategy = match self.strategy {
            // Custom routing functions cannot come from a file; callers that
            // need one swap it in on the returned config.
            StrategyName::Hash => ShardStrategy::Hash { routing_fn: None },
            StrategyName::Range => ShardStrategy::Range {
                ranges: self
                    .ranges
                    .into_iter()
                    .map(|range| KeyRange {
                        min: range.min,
                        max: range.max,
                        shard: range.shard,
                    })
                    .collect(),
            },
            StrategyName::Lookup => ShardStrategy::Lookup { map: self.lookup },
        };
        EntityShardConfig {
            entity: self.name,
            strategy,
            shard_count: self.shard_count,
            connections: self
                .connections
                .into_iter()
                .map(|conn| ShardConnection {
                    url: conn.url.into_inner(),
                    shard: conn.shard,
                    read_only: conn.read_only,
                })
                .collect(),
        }
    }
}
