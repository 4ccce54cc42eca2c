use std::time::Duration;

/// Tunables for the recovery coordinator. Every field has a default, so an empty
/// `[recovery]` table is valid.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Upper bound for a submitted recovery request, write included.
    pub operation_timeout_ms: u64,
    /// Per-node bound for a partition states probe.
    pub probe_timeout_ms: u64,
    /// Log lag at which a healthy replica is reported as catching up.
    pub catch_up_threshold: u64,
    /// Concurrent command effects and probe scans per node.
    pub worker_pool_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            operation_timeout_ms: 30_000,
            probe_timeout_ms: 30_000,
            catch_up_threshold: crate::classifier::CATCH_UP_THRESHOLD,
            worker_pool_size: 16,
        }
    }
}

impl RecoveryConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
