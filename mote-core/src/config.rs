//! Protocol timing. All values are milliseconds of the host's monotonic clock.

use serde::Deserialize;

use crate::Millis;

/// Timing constants. Deserializable so hosts can embed it in their own config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Re-send interval for unacknowledged envelopes (default 300).
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: Millis,
    /// Time after which an unacknowledged envelope is abandoned (default 3000).
    #[serde(default = "default_giveup_after")]
    pub giveup_after_ms: Millis,
    /// Lifetime of an incomplete reassembly (default 1000).
    #[serde(default = "default_reassembly_expiry")]
    pub reassembly_expiry_ms: Millis,
    /// How long a delivered envelope id is remembered (default 8000).
    #[serde(default = "default_dedup_window")]
    pub dedup_window_ms: Millis,
    /// Discovery beacon period (default 5000).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: Millis,
    /// Liveness sweep period (default 2500).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: Millis,
    /// Silence after which a peer is evicted (default 10000).
    #[serde(default = "default_stale_after")]
    pub stale_after_ms: Millis,
    /// Period of the reassembly/dedup expiry purge (default 250).
    #[serde(default = "default_housekeeping_interval")]
    pub housekeeping_interval_ms: Millis,
}

fn default_retry_interval() -> Millis {
    300
}
fn default_giveup_after() -> Millis {
    3000
}
fn default_reassembly_expiry() -> Millis {
    1000
}
fn default_dedup_window() -> Millis {
    8000
}
fn default_heartbeat_interval() -> Millis {
    5000
}
fn default_sweep_interval() -> Millis {
    2500
}
fn default_stale_after() -> Millis {
    10_000
}
fn default_housekeeping_interval() -> Millis {
    250
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval(),
            giveup_after_ms: default_giveup_after(),
            reassembly_expiry_ms: default_reassembly_expiry(),
            dedup_window_ms: default_dedup_window(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            sweep_interval_ms: default_sweep_interval(),
            stale_after_ms: default_stale_after(),
            housekeeping_interval_ms: default_housekeeping_interval(),
        }
    }
}
