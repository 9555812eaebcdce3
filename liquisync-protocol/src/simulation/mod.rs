// In-process simulation of the whole protocol: N chain factories, the
// settlement engine and the router, wired through the emulated relayer.

pub mod config;
pub mod relayer;

pub use config::SimulationConfig;
pub use relayer::EmulatedRelayer;

use crate::crypto::generate_keypair;
use crate::cross_chain::Router;
use crate::data_structures::{ChainId, TokenId, VAULT_ADDRESS};
use crate::error::SwapError;
use crate::metrics::{metrics_channel, MetricsCollector, MetricsReceiver};
use crate::network::{Endpoint, NetworkMessage, RelayerInterface};
use crate::onchain::ChainFactory;
use crate::storage::InMemoryStore;
use crate::vsl::SettlementEngine;
use futures::future::join_all;
use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};

const ENDPOINT_CHANNEL_CAPACITY: usize = 64;

/// Owns every spawned component task plus the channels between them.
pub struct SimulationRuntime {
    pub relayer: Arc<EmulatedRelayer>,
    pub router: Arc<Router>,
    pub engine: Arc<SettlementEngine>,
    chains: HashMap<ChainId, Arc<ChainFactory>>,
    metrics_rx: MetricsReceiver,
    collector: MetricsCollector,
    handles: Vec<tokio::task::JoinHandle<()>>,
    tick: Duration,
}

impl SimulationRuntime {
    /// Build and start every component described by the config.
    pub async fn start(config: SimulationConfig) -> Self {
        let config = Arc::new(config);
        let relayer = EmulatedRelayer::new(Arc::clone(&config));
        let (metrics_tx, metrics_rx) = metrics_channel();
        let mut handles = Vec::new();

        let engine = Arc::new(SettlementEngine::new(
            config.system.clone(),
            generate_keypair(),
            Arc::clone(&relayer) as Arc<dyn RelayerInterface>,
            Arc::new(InMemoryStore::new()),
            Some(metrics_tx.clone()),
        ));
        let (tx, rx) = mpsc::channel::<NetworkMessage>(ENDPOINT_CHANNEL_CAPACITY);
        relayer.register_endpoint(Endpoint::Settlement, tx).await;
        handles.push(tokio::spawn(Arc::clone(&engine).run(rx)));

        let router = Arc::new(Router::new(
            config.system.clone(),
            Arc::clone(&relayer) as Arc<dyn RelayerInterface>,
            engine.public_key(),
            Arc::new(InMemoryStore::new()),
            Some(metrics_tx),
        ));
        let (tx, rx) = mpsc::channel::<NetworkMessage>(ENDPOINT_CHANNEL_CAPACITY);
        relayer.register_endpoint(Endpoint::Router, tx).await;
        handles.push(tokio::spawn(Arc::clone(&router).run(rx)));

        let mut chains = HashMap::new();
        for chain_id in 1..=config.num_chains {
            let factory = Arc::new(ChainFactory::new(
                chain_id,
                Arc::clone(&relayer) as Arc<dyn RelayerInterface>,
            ));
            let (tx, rx) = mpsc::channel::<NetworkMessage>(ENDPOINT_CHANNEL_CAPACITY);
            relayer.register_endpoint(Endpoint::Chain(chain_id), tx).await;
            handles.push(tokio::spawn(Arc::clone(&factory).run(rx)));
            chains.insert(chain_id, factory);
        }
        info!("[Simulation] Started {} chains + settlement + router", config.num_chains);

        SimulationRuntime {
            relayer,
            router,
            engine,
            chains,
            metrics_rx,
            collector: MetricsCollector::new(),
            handles,
            tick: Duration::from_millis(config.relayer_tick_interval_ms.max(1)),
        }
    }

    pub fn chain(&self, chain_id: ChainId) -> Arc<ChainFactory> {
        Arc::clone(self.chains.get(&chain_id).expect("chain not provisioned"))
    }

    /// Mint user funds on a chain.
    pub fn fund_user(&self, chain_id: ChainId, address: &str, token: &TokenId, amount: u128) {
        self.chain(chain_id).fund(address, token, amount);
    }

    /// Provision payout float on a chain's vault and mirror it in the
    /// settlement ledger, keeping both sides of the conservation invariant
    /// seeded identically.
    pub fn seed_vault(&self, chain_id: ChainId, token: &TokenId, amount: u128) -> Result<(), SwapError> {
        self.chain(chain_id).fund(VAULT_ADDRESS, token, amount);
        self.engine.seed_vault(chain_id, token.clone(), amount)
    }

    pub fn seed_pool(&self, x: &TokenId, y: &TokenId, reserve_x: u128, reserve_y: u128) -> Result<(), SwapError> {
        self.engine.seed_pool(x.clone(), y.clone(), reserve_x, reserve_y)
    }

    /// Wait until the router has a record for `request_id`. Useful right
    /// after a submission, before `quiesce` could mistake not-yet-arrived
    /// traffic for idleness.
    pub async fn wait_until_tracked(
        &self,
        request_id: &crate::data_structures::RequestId,
        max_wait: Duration,
    ) -> bool {
        let deadline = Instant::now() + max_wait;
        while self.router.status(request_id).is_none() {
            if Instant::now() >= deadline {
                return false;
            }
            sleep(self.tick).await;
        }
        true
    }

    /// Wait until no transaction needs router attention and the transport
    /// queue has drained, then one extra grace tick so late duplicates are
    /// absorbed. Returns false on timeout.
    pub async fn quiesce(&self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            let idle = !self.router.has_active() && self.relayer.queued().await == 0;
            if idle {
                sleep(self.tick * 4).await;
                if !self.router.has_active() && self.relayer.queued().await == 0 {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(self.tick * 2).await;
        }
    }

    /// Counters over everything emitted so far.
    pub fn metrics(&mut self) -> MetricsCollector {
        self.collector.drain(&mut self.metrics_rx);
        self.collector.clone()
    }

    /// Stop every component task.
    pub async fn shutdown(mut self) {
        let summary = self.metrics().summary();
        info!("[Simulation] Shutting down; {summary}");
        self.relayer.shutdown();
        for handle in &self.handles {
            handle.abort();
        }
        let _ = join_all(self.handles).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onchain::SwapParams;

    fn token(s: &str) -> TokenId {
        TokenId::new(s)
    }

    #[tokio::test]
    async fn runtime_starts_seeds_and_shuts_down() {
        let runtime = SimulationRuntime::start(SimulationConfig {
            seed: Some(11),
            ..Default::default()
        })
        .await;
        runtime.seed_pool(&token("X"), &token("Y"), 1_000_000, 1_000_000).unwrap();
        runtime.seed_vault(2, &token("Y"), 500_000).unwrap();
        runtime.fund_user(1, "alice", &token("X"), 50_000);
        assert_eq!(runtime.chain(1).balance("alice", &token("X")), 50_000);
        assert_eq!(runtime.chain(2).vault_balance(&token("Y")), 500_000);
        assert!(runtime.quiesce(Duration::from_secs(1)).await);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn single_swap_settles_through_the_runtime() {
        let mut runtime = SimulationRuntime::start(SimulationConfig {
            seed: Some(11),
            ..Default::default()
        })
        .await;
        runtime.seed_pool(&token("X"), &token("Y"), 1_000_000, 1_000_000).unwrap();
        runtime.seed_vault(2, &token("Y"), 500_000).unwrap();
        runtime.fund_user(1, "alice", &token("X"), 50_000);

        let id = runtime
            .chain(1)
            .submit_swap(
                "alice",
                SwapParams {
                    source_token: token("X"),
                    amount_in: 10_000,
                    dest_chain: 2,
                    dest_token: token("Y"),
                    min_amount_out: 9_000,
                    recipient: "bob".to_string(),
                    request_id: None,
                },
            )
            .await
            .unwrap();

        assert!(runtime.wait_until_tracked(&id, Duration::from_secs(5)).await);
        assert!(runtime.quiesce(Duration::from_secs(5)).await);
        let status = runtime.router.status(&id).unwrap();
        assert_eq!(status.phase, crate::cross_chain::TxPhase::Settled);
        assert_eq!(status.amount_out, Some(9_871));
        assert_eq!(runtime.chain(2).balance("bob", &token("Y")), 9_871);
        assert_eq!(runtime.metrics().settled, 1);
        runtime.shutdown().await;
    }
}
