use crate::config::SystemConfig;

/// Knobs for the in-process simulation: transport behavior and genesis
/// provisioning, on top of the protocol's own `SystemConfig`.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Chain ids to instantiate, numbered 1..=num_chains.
    pub num_chains: u64,
    /// Transport delay range applied per delivery.
    pub relayer_min_delay_ms: u64,
    pub relayer_max_delay_ms: u64,
    /// Probability a delivery is lost entirely.
    pub relayer_drop_rate: f64,
    /// Probability a delivery happens twice (at-least-once made concrete).
    pub relayer_duplicate_rate: f64,
    /// Cadence of the delivery queue scan.
    pub relayer_tick_interval_ms: u64,
    /// Seed for the transport RNG; `None` draws from entropy.
    pub seed: Option<u64>,
    pub system: SystemConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            num_chains: 2,
            relayer_min_delay_ms: 1,
            relayer_max_delay_ms: 5,
            relayer_drop_rate: 0.0,
            relayer_duplicate_rate: 0.0,
            relayer_tick_interval_ms: 1,
            seed: None,
            system: SystemConfig::default(),
        }
    }
}
