//! Engine tunables, read from the environment at startup.

use chrono::Duration;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Minimum age of a PENDING order before the sweep advances it.
    pub pending_dwell: Duration,
    /// Minimum time an order sits in PROCESSING before the shipping sweep picks it up.
    pub processing_dwell: Duration,
    /// Cadence of the background order sweeps.
    pub sweep_interval_secs: u64,
    /// Cadence of the background engagement + score recompute.
    pub full_update_interval_secs: u64,
    /// Products written per engagement-recompute chunk.
    pub metrics_chunk_size: usize,
    /// Default limit for low-stock / out-of-stock / similar-product listings.
    pub default_list_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pending_dwell: Duration::minutes(15),
            processing_dwell: Duration::minutes(60),
            sweep_interval_secs: 300,
            full_update_interval_secs: 3600,
            metrics_chunk_size: 100,
            default_list_limit: 20,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            pending_dwell: Duration::seconds(env_i64(
                "PENDING_DWELL_SECS",
                defaults.pending_dwell.num_seconds(),
            )),
            processing_dwell: Duration::seconds(env_i64(
                "PROCESSING_DWELL_SECS",
                defaults.processing_dwell.num_seconds(),
            )),
            sweep_interval_secs: env_i64("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs as i64)
                as u64,
            full_update_interval_secs: env_i64(
                "FULL_UPDATE_INTERVAL_SECS",
                defaults.full_update_interval_secs as i64,
            ) as u64,
            metrics_chunk_size: env_i64(
                "METRICS_CHUNK_SIZE",
                defaults.metrics_chunk_size as i64,
            )
            .max(1) as usize,
            default_list_limit: env_i64("DEFAULT_LIST_LIMIT", defaults.default_list_limit as i64)
                .max(1) as u32,
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
