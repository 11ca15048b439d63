//! OpenTelemetry instruments emitted by the pool.

use monitoring::telemetry::metrics::{Counter, Gauge, Histogram, KeyValue, Meter};

use crate::statement::StatementKind;

/// Instruments for one pool.
///
/// Every instrument is tagged with the pool's endpoint label so several pools
/// can share one meter.
#[derive(Debug)]
pub struct PoolMetrics {
    endpoint: String,
    acquire_time: Histogram<f64>,
    query_time: Histogram<f64>,
    query_failures: Counter,
    health_checks: Counter,
    scale_ups: Counter,
    scale_downs: Counter,
    saturation_warnings: Counter,
    pool_size: Gauge<u64>,
    active_connections: Gauge<u64>,
    waiting_callers: Gauge<u64>,
}

impl PoolMetrics {
    pub fn new(meter: &Meter, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            acquire_time: Histogram::new_f64(
                meter,
                "db_pool_acquire_time",
                "Time spent waiting for a pool connection",
                "s",
            ),
            query_time: Histogram::new_f64(
                meter,
                "db_pool_query_time",
                "Statement execution time, tagged by statement class",
                "s",
            ),
            query_failures: Counter::new(
                meter,
                "db_pool_query_failures",
                "Statements that failed after exhausting their retry budget",
            ),
            health_checks: Counter::new(
                meter,
                "db_pool_health_checks",
                "Health probe runs, tagged by outcome",
            ),
            scale_ups: Counter::new(meter, "db_pool_scale_ups", "Completed scale-up operations"),
            scale_downs: Counter::new(
                meter,
                "db_pool_scale_downs",
                "Completed scale-down operations",
            ),
            saturation_warnings: Counter::new(
                meter,
                "db_pool_saturation_warnings",
                "Monitor ticks with high utilization at max_size",
            ),
            pool_size: Gauge::new_u64(meter, "db_pool_size", "Current pool capacity", "{connection}"),
            active_connections: Gauge::new_u64(
                meter,
                "db_pool_active_connections",
                "Checked-out connections",
                "{connection}",
            ),
            waiting_callers: Gauge::new_u64(
                meter,
                "db_pool_waiting_callers",
                "Callers suspended in acquire",
                "{caller}",
            ),
        }
    }

    fn endpoint_kv(&self) -> KeyValue {
        KeyValue::new("endpoint", self.endpoint.clone())
    }

    pub(crate) fn record_acquire(&self, seconds: f64) {
        self.acquire_time.record_with_kvs(seconds, &[self.endpoint_kv()]);
    }

    pub(crate) fn record_query(&self, kind: StatementKind, seconds: f64) {
        self.query_time.record_with_kvs(
            seconds,
            &[self.endpoint_kv(), KeyValue::new("statement", kind.as_str())],
        );
    }

    pub(crate) fn record_query_failure(&self, kind: StatementKind) {
        self.query_failures.inc_with_kvs(&[
            self.endpoint_kv(),
            KeyValue::new("statement", kind.as_str()),
        ]);
    }

    pub(crate) fn record_health_check(&self, healthy: bool) {
        let outcome = if healthy { "ok" } else { "failed" };
        self.health_checks
            .inc_with_kvs(&[self.endpoint_kv(), KeyValue::new("outcome", outcome)]);
    }

    pub(crate) fn record_scale_up(&self) {
        self.scale_ups.inc_with_kvs(&[self.endpoint_kv()]);
    }

    pub(crate) fn record_scale_down(&self) {
        self.scale_downs.inc_with_kvs(&[self.endpoint_kv()]);
    }

    pub(crate) fn record_saturation(&self) {
        self.saturation_warnings.inc_with_kvs(&[self.endpoint_kv()]);
    }

    pub(crate) fn record_usage(&self, current_size: u32, active: u32, waiting: u32) {
        let kvs = [self.endpoint_kv()];
        self.pool_size.record_with_kvs(current_size.into(), &kvs);
        self.active_connections.record_with_kvs(active.into(), &kvs);
        self.waiting_callers.record_with_kvs(waiting.into(), &kvs);
    }
}
