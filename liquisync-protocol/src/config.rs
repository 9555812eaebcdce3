use serde::{Deserialize, Serialize};
use std::time::Duration;

/// System-wide tunables. Everything the state machines parameterize on lives
/// here so deployments can override a single serialized document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemConfig {
    // Pools
    /// Default pool fee in basis points applied when seeding a pool.
    pub fee_bps: u16,
    /// A swap may never leave a pool reserve below this floor.
    pub min_reserve: u128,

    // Routing
    /// Maximum number of hops a route may take. Small by design so that
    /// exhaustive path enumeration stays cheap.
    pub max_hops: usize,

    // Session layer
    /// How long the router waits for a settlement acknowledgment before
    /// resending the request.
    #[serde(with = "humantime_serde")]
    pub vsl_ack_timeout: Duration,
    /// How long the router waits for an escrow receipt before resending the
    /// release/refund instruction.
    #[serde(with = "humantime_serde")]
    pub instruction_timeout: Duration,
    /// Resends of the swap request after the first ack timeout. The request
    /// is resent this many times, then the transaction moves to refund.
    pub max_ack_retries: u8,
    /// Resends of a release/refund instruction before the transaction is
    /// frozen for manual intervention.
    pub max_instruction_retries: u8,
    /// Cadence of the router's timeout scan.
    #[serde(with = "humantime_serde")]
    pub router_tick_interval: Duration,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            fee_bps: 30,
            min_reserve: 1,
            max_hops: 3,
            vsl_ack_timeout: Duration::from_secs(10),
            instruction_timeout: Duration::from_secs(10),
            max_ack_retries: 1,
            max_instruction_retries: 3,
            router_tick_interval: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = SystemConfig::default();
        assert_eq!(config.fee_bps, 30);
        assert_eq!(config.min_reserve, 1);
        assert_eq!(config.max_hops, 3);
        assert_eq!(config.max_ack_retries, 1);
        assert_eq!(config.max_instruction_retries, 3);
        assert_eq!(config.vsl_ack_timeout, Duration::from_secs(10));
    }

    #[test]
    fn config_serde_round_trip_with_human_durations() {
        let config = SystemConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        // Durations serialize in human-readable form.
        assert!(json.contains("\"vsl_ack_timeout\":\"10s\""), "{json}");
        let back: SystemConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.instruction_timeout, config.instruction_timeout);
        assert_eq!(back.fee_bps, config.fee_bps);
    }
}
