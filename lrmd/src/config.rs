//! Tunables for the bridge, with the defaults spec.md states inline in its
//! prose (spec §4.2, §4.6, §4.7, §4.8, §9).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Negative-TTL re-query gate for the reload cache (spec §4.2: "≈9
    /// seconds").
    pub reload_negative_ttl_ms: u64,
    /// Start-delay past which a recurring op's ack is fabricated
    /// immediately rather than waiting for the executor (spec §4.6 step 7:
    /// "5 minutes").
    pub start_delay_ack_threshold_ms: u64,
    /// Minimum DC peer feature-set under which restart-list/digest
    /// attachment is attempted (spec §4.5).
    pub reload_aware_feature_set: String,
    /// Delay before logging a CIB update as slow (spec §4.7 step 3:
    /// "≈60s").
    pub cib_update_warn_after_ms: u64,
    /// Bounded reconnect budget (spec §4.8: "≈30").
    pub max_reconnect_attempts: usize,
    pub reconnect_interval_ms: u64,
    pub system_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            reload_negative_ttl_ms: 9_000,
            start_delay_ack_threshold_ms: 300_000,
            reload_aware_feature_set: "3.0.5".to_string(),
            cib_update_warn_after_ms: 60_000,
            max_reconnect_attempts: 30,
            reconnect_interval_ms: 1_000,
            system_name: "lrmd".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn reload_negative_ttl(&self) -> Duration {
        Duration::from_millis(self.reload_negative_ttl_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn cib_update_warn_after(&self) -> Duration {
        Duration::from_millis(self.cib_update_warn_after_ms)
    }
}
