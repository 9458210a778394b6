use clap::Parser;

use crate::config::BridgeConfig;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub bridge: BridgeArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct BridgeArgs {
    /// Client identity presented to the executor on signon
    #[arg(long, env = "LRMD_SYSTEM_NAME", default_value = "lrmd")]
    pub system_name: String,

    /// Negative-TTL re-query gate for the reload metadata cache (ms)
    #[arg(long, env = "LRMD_RELOAD_NEGATIVE_TTL_MS", default_value_t = 9_000)]
    pub reload_negative_ttl_ms: u64,

    /// Start-delay past which a recurring op's ack is fabricated immediately (ms)
    #[arg(long, env = "LRMD_START_DELAY_ACK_THRESHOLD_MS", default_value_t = 300_000)]
    pub start_delay_ack_threshold_ms: u64,

    /// Minimum DC peer feature-set required for restart-list/digest attachment
    #[arg(long, env = "LRMD_RELOAD_AWARE_FEATURE_SET", default_value = "3.0.5")]
    pub reload_aware_feature_set: String,

    /// Delay before a slow CIB update is logged (ms)
    #[arg(long, env = "LRMD_CIB_UPDATE_WARN_AFTER_MS", default_value_t = 60_000)]
    pub cib_update_warn_after_ms: u64,

    /// Maximum executor reconnect attempts before raising an FSM error
    #[arg(long, env = "LRMD_MAX_RECONNECT_ATTEMPTS", default_value_t = 30)]
    pub max_reconnect_attempts: usize,

    /// Delay between executor reconnect attempts (ms)
    #[arg(long, env = "LRMD_RECONNECT_INTERVAL_MS", default_value_t = 1_000)]
    pub reconnect_interval_ms: u64,
}

impl From<BridgeArgs> for BridgeConfig {
    fn from(args: BridgeArgs) -> Self {
        BridgeConfig {
            reload_negative_ttl_ms: args.reload_negative_ttl_ms,
            start_delay_ack_threshold_ms: args.start_delay_ack_threshold_ms,
            reload_aware_feature_set: args.reload_aware_feature_set,
            cib_update_warn_after_ms: args.cib_update_warn_after_ms,
            max_reconnect_attempts: args.max_reconnect_attempts,
            reconnect_interval_ms: args.reconnect_interval_ms,
            system_name: args.system_name,
        }
    }
}
