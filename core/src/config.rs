//! Operator/Manager timers, bundled as constructor parameters rather than
//! read from process-global state (§9, "Global timers").

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables threaded through the [`crate::core::registry::Registry`] and the
/// components it owns. Every duration here has a spec-mandated default; none
/// of them are read from a global or environment variable inside the engine
/// itself - a CLI/config adapter is expected to parse them and build one of
/// these once at startup, the way the teacher's `CliArgs` parses
/// `humantime::Duration` fields off the command line.
///
/// `Config` derives `Deserialize`/`Serialize` with human-readable durations
/// (`"60s"`, `"20s"`, ...) so an external config-file adapter can load one of
/// these directly instead of hand-parsing each field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Config {
    /// Period between a Node's periodic `listPools + listReplicas +
    /// listNexus` syncs (§4.1).
    #[serde(with = "humantime_serde")]
    pub sync_period: Duration,
    /// Period of the Pool Operator's sweeper; nodes whose last sync is older
    /// than `stale_after` are re-synced (§4.5, step 6).
    #[serde(with = "humantime_serde")]
    pub sweep_period: Duration,
    /// Age at which a node's last sync is considered stale by the sweeper.
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,
    /// Per-RPC deadline (§5, "Cancellation and timeouts").
    #[serde(with = "humantime_serde")]
    pub rpc_deadline: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_period: Duration::from_secs(60),
            sweep_period: Duration::from_secs(20),
            stale_after: Duration::from_secs(60),
            rpc_deadline: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_human_readable_durations() {
        let json = r#"{"sync_period":"60s","sweep_period":"20s","stale_after":"1m","rpc_deadline":"10s"}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.sync_period, Duration::from_secs(60));
        assert_eq!(config.stale_after, Duration::from_secs(60));
    }
}
