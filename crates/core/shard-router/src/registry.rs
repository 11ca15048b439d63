//! Endpoint identifiers and the pool registry.

use std::collections::HashMap;

use db_pool::DbPool;

/// Index of one physical endpoint in the [`PoolRegistry`].
///
/// Endpoints are identified by this handle everywhere past initialization,
/// so shard tables never carry or compare raw connection strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(usize);

/// Arena of connection pools, one per distinct connection URL.
///
/// Populated once at initialization and read-only afterwards. Endpoints
/// shared by several shards or entities are registered once and pooled once.
pub struct PoolRegistry {
    pools: Vec<DbPool>,
}

impl PoolRegistry {
    pub(crate) fn new(pools: Vec<DbPool>) -> Self {
        Self { pools }
    }

    pub fn get(&self, id: EndpointId) -> &DbPool {
        &self.pools[id.0]
    }

    /// Number of distinct endpoints.
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &DbPool> {
        self.pools.iter()
    }
}

/// Assigns one [`EndpointId`] per distinct URL during initialization.
#[derive(Default)]
pub(crate) struct EndpointInterner {
    by_url: HashMap<String, EndpointId>,
    urls: Vec<String>,
}

impl EndpointInterner {
    pub(crate) fn intern(&mut self, url: &str) -> EndpointId {
        if let Some(id) = self.by_url.get(url) {
            return *id;
        }
        let id = EndpointId(self.urls.len());
        self.by_url.insert(url.to_string(), id);
        self.urls.push(url.to_string());
        id
    }

    pub(crate) fn into_urls(self) -> Vec<String> {
        self.urls
    }
}

/// Endpoints serving one shard index of one entity.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ShardEndpoints {
    pub(crate) writable: EndpointId,
    pub(crate) read_only: Option<EndpointId>,
}

impl ShardEndpoints {
    /// Best endpoint under the read-preference rule: a read replica when one
    /// is registered and preferred, the writable endpoint otherwise.
    pub(crate) fn select(&self, prefer_read_only: bool) -> EndpointId {
        if prefer_read_only {
            self.read_only.unwrap_or(self.writable)
        } else {
            self.writable
        }
    }
}
