// The settlement engine: executes swap requests against the virtual pools
// and ledger, and answers every request with a signed acknowledgment.

use crate::config::SystemConfig;
use crate::crypto::{sign, PublicKey, SecretKey};
use crate::data_structures::{BalanceKey, ChainId, RequestId, SwapRequest, TokenId};
use crate::error::SwapError;
use crate::metrics::{MetricEvent, MetricsSender};
use crate::network::{
    ack_digest, Endpoint, NetworkMessage, Packet, RelayerInterface, SwapAckPacket, SwapOutcomePayload,
};
use crate::storage::KeyValueStore;
use crate::vsl::ledger::BalanceLedger;
use crate::vsl::pool::{Pool, PoolRegistry};
use crate::vsl::route::find_route;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const ACK_KEY_PREFIX: &str = "ack/";

/// Owns the pool registry and the virtual balance ledger, as the single
/// logical writer for both. Requests arrive over the relayer at least once;
/// completed outcomes are cached (and persisted), so replays return the
/// original acknowledgment instead of executing twice.
pub struct SettlementEngine {
    config: SystemConfig,
    registry: PoolRegistry,
    ledger: BalanceLedger,
    signing_key: SecretKey,
    completed: Mutex<HashMap<RequestId, SwapOutcomePayload>>,
    store: Arc<dyn KeyValueStore>,
    relayer: Arc<dyn RelayerInterface>,
    metrics: Option<MetricsSender>,
}

impl SettlementEngine {
    pub fn new(
        config: SystemConfig,
        signing_key: SecretKey,
        relayer: Arc<dyn RelayerInterface>,
        store: Arc<dyn KeyValueStore>,
        metrics: Option<MetricsSender>,
    ) -> Self {
        // Reload completed outcomes so a restarted engine stays idempotent.
        let mut completed = HashMap::new();
        for key in store.keys_with_prefix(ACK_KEY_PREFIX) {
            if let Some(bytes) = store.get(&key) {
                match bincode::serde::decode_from_slice::<(RequestId, SwapOutcomePayload), _>(
                    &bytes,
                    bincode::config::standard(),
                ) {
                    Ok(((request_id, outcome), _)) => {
                        completed.insert(request_id, outcome);
                    }
                    Err(e) => warn!("[Settlement] Dropping unreadable ack record {key}: {e}"),
                }
            }
        }
        if !completed.is_empty() {
            info!("[Settlement] Restored {} completed outcomes", completed.len());
        }
        let registry = PoolRegistry::new(config.min_reserve);
        SettlementEngine {
            config,
            registry,
            ledger: BalanceLedger::new(),
            signing_key,
            completed: Mutex::new(completed),
            store,
            relayer,
            metrics,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.signing_key.verifying_key()
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    /// Register a pool at the configured fee rate. Genesis provisioning.
    pub fn seed_pool(&self, x: TokenId, y: TokenId, reserve_x: u128, reserve_y: u128) -> Result<(), SwapError> {
        self.registry.add_pool(Pool::new(x, y, reserve_x, reserve_y, self.config.fee_bps))
    }

    /// Credit a chain's vault entry, mirroring escrow float provisioned on
    /// that chain. Genesis provisioning.
    pub fn seed_vault(&self, chain: ChainId, token: TokenId, amount: u128) -> Result<(), SwapError> {
        self.ledger.credit(&BalanceKey::vault(chain, token), amount)
    }

    /// Execute (or replay) a swap request and return the outcome payload.
    pub fn execute(&self, request: &SwapRequest) -> SwapOutcomePayload {
        if let Some(previous) = self.completed.lock().unwrap().get(&request.request_id) {
            info!("[Settlement] Replayed request {:?}, returning original outcome", request.request_id);
            return previous.clone();
        }

        let outcome = match self.execute_inner(request) {
            Ok((amount_out, route)) => SwapOutcomePayload::Success { amount_out, route },
            Err(reason) => {
                info!("[Settlement] Request {:?} failed: {}", request.request_id, reason);
                SwapOutcomePayload::Failure { reason }
            }
        };

        self.completed.lock().unwrap().insert(request.request_id, outcome.clone());
        self.persist_outcome(request.request_id, &outcome);
        outcome
    }

    fn execute_inner(&self, request: &SwapRequest) -> Result<(u128, Vec<TokenId>), SwapError> {
        if request.amount_in == 0 {
            return Err(SwapError::InvalidAmount);
        }

        let snapshot = self.registry.snapshot();
        let plan = find_route(
            &snapshot,
            &request.source_token,
            &request.dest_token,
            request.amount_in,
            request.min_amount_out,
            self.config.max_hops,
            self.config.min_reserve,
        )?;

        // The destination chain can only pay out what its vault backs.
        let dest_vault = BalanceKey::vault(request.dest_chain, request.dest_token.clone());
        if self.ledger.balance(&dest_vault) < plan.amount_out {
            return Err(SwapError::InsufficientBalance(format!(
                "vault@{} {}",
                request.dest_chain, request.dest_token
            )));
        }

        // All-or-nothing across the whole route; the engine's run loop is the
        // only writer, so the planned and executed amounts agree.
        let amount_out = self.registry.execute_route(&plan.tokens, request.amount_in, request.min_amount_out)?;

        let source_vault = BalanceKey::vault(request.source_chain, request.source_token.clone());
        self.ledger.credit(&source_vault, request.amount_in)?;
        self.ledger.debit(&dest_vault, amount_out)?;

        if let Some(metrics) = &self.metrics {
            let pair = format!("{} -> {}", request.source_token, request.dest_token);
            let _ = metrics.send(MetricEvent::PoolSwapApplied {
                pair,
                amount_in: request.amount_in,
                amount_out,
            });
        }
        Ok((amount_out, plan.tokens))
    }

    fn persist_outcome(&self, request_id: RequestId, outcome: &SwapOutcomePayload) {
        match bincode::serde::encode_to_vec(&(request_id, outcome), bincode::config::standard()) {
            Ok(bytes) => self.store.put(&format!("{ACK_KEY_PREFIX}{request_id}"), bytes),
            Err(e) => warn!("[Settlement] Failed to persist outcome for {request_id:?}: {e}"),
        }
    }

    fn signed_ack(&self, request_id: RequestId, outcome: SwapOutcomePayload) -> SwapAckPacket {
        let signature = sign(&ack_digest(&request_id, &outcome), &self.signing_key);
        SwapAckPacket { request_id, outcome, signature }
    }

    /// Run loop: consume routed messages, acknowledge every swap request.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<NetworkMessage>) {
        info!("[Settlement] Run loop started");
        while let Some(msg) = rx.recv().await {
            match msg.packet {
                Packet::SwapRequest(request) => {
                    let request_id = request.request_id;
                    let outcome = self.execute(&request);
                    let ack = self.signed_ack(request_id, outcome);
                    let reply = NetworkMessage {
                        sender: Endpoint::Settlement,
                        receiver: Endpoint::Router,
                        packet: Packet::SwapAck(ack),
                    };
                    if let Err(e) = self.relayer.send(reply).await {
                        // The router's resend covers a lost ack.
                        warn!("[Settlement] Failed to dispatch ack for {request_id:?}: {e}");
                    }
                }
                other => {
                    warn!("[Settlement] Ignoring unexpected packet: {other:?}");
                }
            }
        }
        info!("[Settlement] Run loop stopped");
    }
}
