//! OpenTelemetry instruments emitted by the shard manager.

use monitoring::telemetry::metrics::{Counter, Histogram, KeyValue, Meter};

/// Instruments shared by every entity the manager routes.
pub struct RouterMetrics {
    cache_hits: Counter,
    cache_misses: Counter,
    routing_errors: Counter,
    fanout_time: Histogram<f64>,
    shard_failures: Counter,
}

impl RouterMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            cache_hits: Counter::new(
                meter,
                "shard_cache_hits",
                "Key-to-shard resolutions served from the mapping cache",
            ),
            cache_misses: Counter::new(
                meter,
                "shard_cache_misses",
                "Key-to-shard resolutions that fell back to the resolver",
            ),
            routing_errors: Counter::new(
                meter,
                "shard_routing_errors",
                "Keys that could not be routed under the configured strategy",
            ),
            fanout_time: Histogram::new_f64(
                meter,
                "shard_fanout_time",
                "Wall time of cross-shard executions",
                "s",
            ),
            shard_failures: Counter::new(
                meter,
                "shard_fanout_failures",
                "Per-shard failures absorbed during cross-shard executions",
            ),
        }
    }

    pub(crate) fn record_cache_hit(&self, entity: &str) {
        self.cache_hits.inc_with_kvs(&[entity_kv(entity)]);
    }

    pub(crate) fn record_cache_miss(&self, entity: &str) {
        self.cache_misses.inc_with_kvs(&[entity_kv(entity)]);
    }

    pub(crate) fn record_routing_error(&self, entity: &str) {
        self.routing_errors.inc_with_kvs(&[entity_kv(entity)]);
    }

    pub(crate) fn record_fanout(&self, entity: &str, seconds: f64) {
        self.fanout_time.record_with_kvs(seconds, &[entity_kv(entity)]);
    }

    pub(crate) fn record_shard_failure(&self, entity: &str, shard: u32) {
        self.shard_failures.inc_with_kvs(&[
            entity_kv(entity),
            KeyValue::new("shard", i64::from(shard)),
        ]);
    }
}

fn entity_kv(entity: &str) -> KeyValue {
    KeyValue::new("entity", entity.to_string())
}
