//! Pool bookkeeping snapshots and the monitor's scaling decision.

use crate::config::PoolConfig;

/// Lifecycle phase of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    /// Serving traffic.
    Active,
    /// Shut down; `acquire` is rejected.
    Closed,
}

/// Point-in-time snapshot of pool bookkeeping.
///
/// Invariants: `min_size <= current_size <= max_size` and
/// `active <= current_size` hold at every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Capacity: the number of callers that can hold a connection at once.
    pub current_size: u32,
    /// Checked-out connections.
    pub active: u32,
    /// Callers suspended in `acquire` waiting for capacity.
    pub waiting: u32,
    /// Lifecycle phase.
    pub phase: PoolPhase,
}

impl PoolStats {
    /// Active connections divided by capacity.
    pub fn utilization(&self) -> f64 {
        if self.current_size == 0 {
            return 0.0;
        }
        f64::from(self.active) / f64::from(self.current_size)
    }
}

/// What the monitor decided to do with the pool on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScaleDecision {
    /// Utilization is high and callers are waiting; grow the pool.
    Up,
    /// Utilization is high but the pool is already at `max_size`; only a
    /// warning can be emitted.
    Saturated,
    /// Utilization is low, the cooldown has elapsed, and there is room above
    /// `min_size`; shrink the pool.
    Down,
    /// Nothing to do.
    Hold,
}

impl ScaleDecision {
    /// Pure decision function evaluated on every monitor tick.
    ///
    /// `cooldown_elapsed` is whether enough time has passed since the last
    /// scale-down (trivially true if the pool has never scaled down).
    pub(crate) fn evaluate(
        stats: &PoolStats,
        config: &PoolConfig,
        cooldown_elapsed: bool,
    ) -> Self {
        let utilization = stats.utilization();

        if utilization >= config.scale_up_threshold && stats.waiting > 0 {
            if stats.current_size >= config.max_size {
                return Self::Saturated;
            }
            return Self::Up;
        }

        if utilization <= config.scale_down_threshold
            && stats.current_size > config.min_size
            && cooldown_elapsed
        {
            return Self::Down;
        }

        Self::Hold
    }
}
