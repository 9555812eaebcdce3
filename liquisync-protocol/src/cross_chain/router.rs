// The cross-chain session layer: correlates acknowledgments, receipts and
// timeouts to pending transactions and drives escrows to exactly one of the
// two guaranteed terminal outcomes per request.

use crate::config::SystemConfig;
use crate::crypto::{verify, PublicKey};
use crate::cross_chain::types::{PendingRecord, PendingTransaction, TxPhase, TxStatus};
use crate::data_structures::{RequestId, SwapRequest, VAULT_ADDRESS};
use crate::error::SwapError;
use crate::metrics::{MetricEvent, MetricsSender};
use crate::network::{
    ack_digest, Endpoint, EscrowOp, EscrowReceipt, NetworkMessage, Packet, ReceiptStatus,
    RefundInstruction, ReleaseInstruction, RelayerInterface, SwapAckPacket, SwapOutcomePayload,
};
use crate::storage::KeyValueStore;
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;

const PENDING_KEY_PREFIX: &str = "pending/";

/// Owns every Pending Transaction record. Inbound events are validated
/// against current record state rather than assumed arrival order, and a
/// request id already in a terminal state never produces a second economic
/// effect: duplicate acknowledgments and receipts are logged and discarded,
/// and instruction replays are absorbed by the escrows' terminal no-ops.
pub struct Router {
    config: SystemConfig,
    relayer: Arc<dyn RelayerInterface>,
    settlement_key: PublicKey,
    pending: Mutex<HashMap<RequestId, PendingTransaction>>,
    store: Arc<dyn KeyValueStore>,
    metrics: Option<MetricsSender>,
}

impl Router {
    pub fn new(
        config: SystemConfig,
        relayer: Arc<dyn RelayerInterface>,
        settlement_key: PublicKey,
        store: Arc<dyn KeyValueStore>,
        metrics: Option<MetricsSender>,
    ) -> Self {
        Router {
            config,
            relayer,
            settlement_key,
            pending: Mutex::new(HashMap::new()),
            store,
            metrics,
        }
    }

    /// Current view of one transaction: an in-progress phase or a terminal
    /// outcome. Funds are never unaccounted for in either case.
    pub fn status(&self, request_id: &RequestId) -> Option<TxStatus> {
        self.pending.lock().unwrap().get(request_id).map(|tx| TxStatus {
            request_id: *request_id,
            phase: tx.phase,
            amount_out: tx.amount_out,
            failure: tx.failure.clone(),
        })
    }

    /// Whether any transaction still needs router attention.
    pub fn has_active(&self) -> bool {
        self.pending.lock().unwrap().values().any(|tx| {
            !matches!(tx.phase, TxPhase::Refunded | TxPhase::Frozen)
                && !(tx.phase == TxPhase::Settled && tx.collect_confirmed)
        })
    }

    /// Depositor-initiated cancellation. Only possible while the settlement
    /// layer has not answered; afterwards the pool mutation may already be
    /// committed and the transaction must run to its resolved outcome.
    pub async fn cancel(&self, request_id: RequestId) -> Result<(), SwapError> {
        let outbound = {
            let mut pending = self.pending.lock().unwrap();
            let tx = pending.get_mut(&request_id).ok_or_else(|| {
                SwapError::InvalidState(request_id.to_string(), "unknown request".to_string())
            })?;
            if tx.phase != TxPhase::AwaitingVsl {
                return Err(SwapError::InvalidState(
                    request_id.to_string(),
                    format!("cannot cancel in phase {:?}", tx.phase),
                ));
            }
            tx.cancelled = true;
            tx.phase = TxPhase::AwaitingRefund;
            tx.retries = 0;
            tx.deadline = Instant::now() + self.config.instruction_timeout;
            self.persist(tx);
            info!("[Router] Cancelled {request_id:?}, refunding");
            vec![self.refund_instruction(tx)]
        };
        self.dispatch(outbound).await;
        Ok(())
    }

    /// Consume one routed message.
    pub async fn handle_message(&self, msg: NetworkMessage) {
        let outbound = match msg.packet {
            Packet::SwapRequest(request) => self.on_swap_request(request),
            Packet::SwapAck(ack) => self.on_ack(ack),
            Packet::Receipt(receipt) => self.on_receipt(receipt),
            other => {
                warn!("[Router] Ignoring unexpected packet: {other:?}");
                Vec::new()
            }
        };
        self.dispatch(outbound).await;
    }

    /// Timeout scan. Expiry is a resumption event: it resends, escalates to
    /// the refund path, or freezes, but never silently drops a transaction.
    pub async fn check_timeouts(&self) {
        let outbound = self.tick(Instant::now());
        self.dispatch(outbound).await;
    }

    /// Run loop: inbound packets plus the periodic timeout scan.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<NetworkMessage>) {
        info!("[Router] Run loop started");
        let mut interval = tokio::time::interval(self.config.router_tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(msg) => self.handle_message(msg).await,
                    None => break,
                },
                _ = interval.tick() => self.check_timeouts().await,
            }
        }
        info!("[Router] Run loop stopped");
    }

    // --- Inbound handlers (sync; they mutate records and produce outbound
    // messages which the async wrappers dispatch after the lock is dropped).

    fn on_swap_request(&self, request: SwapRequest) -> Vec<NetworkMessage> {
        let request_id = request.request_id;
        let mut pending = self.pending.lock().unwrap();
        if pending.contains_key(&request_id) {
            // At-least-once ingress: the record exists, the first delivery
            // won. The ack-timeout resend covers a lost forward.
            info!("[Router] Duplicate ingress for {request_id:?} discarded");
            return Vec::new();
        }
        let mut tx = PendingTransaction::new(request.clone(), Instant::now() + self.config.vsl_ack_timeout);
        tx.phase = TxPhase::AwaitingVsl;
        self.persist(&tx);
        pending.insert(request_id, tx);
        info!("[Router] Tracking {request_id:?}, forwarding to settlement");
        vec![NetworkMessage {
            sender: Endpoint::Router,
            receiver: Endpoint::Settlement,
            packet: Packet::SwapRequest(request),
        }]
    }

    fn on_ack(&self, ack: SwapAckPacket) -> Vec<NetworkMessage> {
        if !verify(&ack_digest(&ack.request_id, &ack.outcome), &ack.signature, &self.settlement_key) {
            warn!("[Router] Dropping ack with bad signature for {:?}", ack.request_id);
            return Vec::new();
        }
        let mut pending = self.pending.lock().unwrap();
        let tx = match pending.get_mut(&ack.request_id) {
            Some(tx) => tx,
            None => {
                warn!("[Router] Ack for unknown request {:?} discarded", ack.request_id);
                return Vec::new();
            }
        };
        if tx.phase != TxPhase::AwaitingVsl {
            if tx.cancelled && matches!(ack.outcome, SwapOutcomePayload::Success { .. }) {
                // The settlement layer committed a swap the depositor had
                // cancelled: the refund path must not pay out as well.
                error!(
                    "[Router] Success ack for cancelled {:?} in phase {:?}; freezing for manual intervention",
                    ack.request_id, tx.phase
                );
                if !tx.phase.is_terminal() {
                    tx.phase = TxPhase::Frozen;
                    self.persist(tx);
                }
                self.emit(MetricEvent::SwapFrozen { request_id: ack.request_id });
            } else {
                info!(
                    "[Router] Duplicate ack for {:?} in phase {:?} discarded",
                    ack.request_id, tx.phase
                );
            }
            return Vec::new();
        }
        match ack.outcome {
            SwapOutcomePayload::Success { amount_out, route } => {
                tx.phase = TxPhase::AwaitingRelease;
                tx.amount_out = Some(amount_out);
                tx.route = Some(route);
                tx.retries = 0;
                tx.deadline = Instant::now() + self.config.instruction_timeout;
                self.persist(tx);
                info!("[Router] {:?} settled for {amount_out}, instructing release", ack.request_id);
                vec![self.destination_release(tx), self.source_collect(tx)]
            }
            SwapOutcomePayload::Failure { reason } => {
                info!("[Router] {:?} rejected by settlement ({reason}), refunding", ack.request_id);
                tx.failure = Some(reason);
                tx.phase = TxPhase::AwaitingRefund;
                tx.retries = 0;
                tx.deadline = Instant::now() + self.config.instruction_timeout;
                self.persist(tx);
                vec![self.refund_instruction(tx)]
            }
        }
    }

    fn on_receipt(&self, receipt: EscrowReceipt) -> Vec<NetworkMessage> {
        let mut pending = self.pending.lock().unwrap();
        let tx = match pending.get_mut(&receipt.request_id) {
            Some(tx) => tx,
            None => {
                warn!("[Router] Receipt for unknown request {:?} discarded", receipt.request_id);
                return Vec::new();
            }
        };
        match receipt.status {
            ReceiptStatus::Failed(reason) => {
                if tx.phase.is_terminal() {
                    info!("[Router] Late failed receipt for terminal {:?} ignored", receipt.request_id);
                } else {
                    error!(
                        "[Router] Escrow fault on chain {} for {:?}: {reason}; freezing",
                        receipt.chain, receipt.request_id
                    );
                    tx.phase = TxPhase::Frozen;
                    self.persist(tx);
                    self.emit(MetricEvent::SwapFrozen { request_id: receipt.request_id });
                }
            }
            // A terminal-state replay on the chain counts as confirmation.
            ReceiptStatus::Applied | ReceiptStatus::AlreadyTerminal => match receipt.op {
                EscrowOp::Release if tx.phase == TxPhase::AwaitingRelease
                    && receipt.chain == tx.request.dest_chain =>
                {
                    tx.phase = TxPhase::Settled;
                    self.persist(tx);
                    info!("[Router] {:?} settled on chain {}", receipt.request_id, receipt.chain);
                    self.emit(MetricEvent::SwapSettled {
                        request_id: receipt.request_id,
                        amount_out: tx.amount_out.unwrap_or(0),
                    });
                }
                EscrowOp::Release if receipt.chain == tx.request.source_chain => {
                    tx.collect_confirmed = true;
                    self.persist(tx);
                }
                EscrowOp::Refund if tx.phase == TxPhase::AwaitingRefund
                    && receipt.chain == tx.request.source_chain =>
                {
                    tx.phase = TxPhase::Refunded;
                    self.persist(tx);
                    info!("[Router] {:?} refunded on chain {}", receipt.request_id, receipt.chain);
                    self.emit(MetricEvent::SwapRefunded {
                        request_id: receipt.request_id,
                        reason: tx.failure.clone(),
                    });
                }
                op => {
                    info!(
                        "[Router] Stale {op:?} receipt for {:?} in phase {:?} discarded",
                        receipt.request_id, tx.phase
                    );
                }
            },
        }
        Vec::new()
    }

    fn tick(&self, now: Instant) -> Vec<NetworkMessage> {
        let mut outbound = Vec::new();
        let mut pending = self.pending.lock().unwrap();
        for tx in pending.values_mut() {
            if tx.phase == TxPhase::Frozen || tx.phase == TxPhase::Refunded {
                continue;
            }
            if tx.phase == TxPhase::Settled && tx.collect_confirmed {
                continue;
            }
            if now < tx.deadline {
                continue;
            }
            match tx.phase {
                TxPhase::AwaitingVsl => {
                    if tx.retries < self.config.max_ack_retries {
                        tx.retries += 1;
                        tx.deadline = now + self.config.vsl_ack_timeout;
                        info!("[Router] Resending request {:?} (attempt {})", tx.request.request_id, tx.retries);
                        self.emit(MetricEvent::PacketResent { request_id: tx.request.request_id });
                        outbound.push(NetworkMessage {
                            sender: Endpoint::Router,
                            receiver: Endpoint::Settlement,
                            packet: Packet::SwapRequest(tx.request.clone()),
                        });
                    } else {
                        warn!("[Router] No ack for {:?}, escalating to refund", tx.request.request_id);
                        tx.failure = Some(SwapError::Timeout("settlement acknowledgment".to_string()));
                        tx.phase = TxPhase::AwaitingRefund;
                        tx.retries = 0;
                        tx.deadline = now + self.config.instruction_timeout;
                        self.persist(tx);
                        outbound.push(self.refund_instruction(tx));
                    }
                }
                TxPhase::AwaitingRelease | TxPhase::Settled => {
                    if tx.retries < self.config.max_instruction_retries {
                        tx.retries += 1;
                        tx.deadline = now + self.config.instruction_timeout;
                        self.emit(MetricEvent::PacketResent { request_id: tx.request.request_id });
                        if tx.phase == TxPhase::AwaitingRelease {
                            outbound.push(self.destination_release(tx));
                        }
                        if !tx.collect_confirmed {
                            outbound.push(self.source_collect(tx));
                        }
                    } else if tx.phase == TxPhase::AwaitingRelease {
                        error!(
                            "[Router] Release unconfirmed for {:?} after {} retries; freezing",
                            tx.request.request_id, tx.retries
                        );
                        tx.phase = TxPhase::Frozen;
                        self.persist(tx);
                        self.emit(MetricEvent::SwapFrozen { request_id: tx.request.request_id });
                    } else {
                        // Settled, but the source collect never confirmed.
                        // The lock stays safely in escrow; an operator has to
                        // collect it.
                        error!(
                            "[Router] Abandoning source collect for {:?} after {} retries",
                            tx.request.request_id, tx.retries
                        );
                        tx.collect_confirmed = true;
                        self.persist(tx);
                    }
                }
                TxPhase::AwaitingRefund => {
                    if tx.retries < self.config.max_instruction_retries {
                        tx.retries += 1;
                        tx.deadline = now + self.config.instruction_timeout;
                        self.emit(MetricEvent::PacketResent { request_id: tx.request.request_id });
                        outbound.push(self.refund_instruction(tx));
                    } else {
                        error!(
                            "[Router] Refund unconfirmed for {:?} after {} retries; freezing",
                            tx.request.request_id, tx.retries
                        );
                        tx.phase = TxPhase::Frozen;
                        self.persist(tx);
                        self.emit(MetricEvent::SwapFrozen { request_id: tx.request.request_id });
                    }
                }
                _ => {}
            }
        }
        outbound
    }

    // --- Instruction builders.

    fn destination_release(&self, tx: &PendingTransaction) -> NetworkMessage {
        NetworkMessage {
            sender: Endpoint::Router,
            receiver: Endpoint::Chain(tx.request.dest_chain),
            packet: Packet::Release(ReleaseInstruction {
                request_id: tx.request.request_id,
                chain: tx.request.dest_chain,
                token: tx.request.dest_token.clone(),
                recipient: tx.request.recipient.address.clone(),
                amount: tx.amount_out.unwrap_or(0),
            }),
        }
    }

    fn source_collect(&self, tx: &PendingTransaction) -> NetworkMessage {
        NetworkMessage {
            sender: Endpoint::Router,
            receiver: Endpoint::Chain(tx.request.source_chain),
            packet: Packet::Release(ReleaseInstruction {
                request_id: tx.request.request_id,
                chain: tx.request.source_chain,
                token: tx.request.source_token.clone(),
                recipient: VAULT_ADDRESS.to_string(),
                amount: tx.request.amount_in,
            }),
        }
    }

    fn refund_instruction(&self, tx: &PendingTransaction) -> NetworkMessage {
        NetworkMessage {
            sender: Endpoint::Router,
            receiver: Endpoint::Chain(tx.request.source_chain),
            packet: Packet::Refund(RefundInstruction {
                request_id: tx.request.request_id,
                chain: tx.request.source_chain,
                token: tx.request.source_token.clone(),
            }),
        }
    }

    // --- Plumbing.

    async fn dispatch(&self, outbound: Vec<NetworkMessage>) {
        for msg in outbound {
            if let Err(e) = self.relayer.send(msg).await {
                // The next tick resends anything that mattered.
                warn!("[Router] Transport error: {e}");
            }
        }
    }

    fn persist(&self, tx: &PendingTransaction) {
        let record = PendingRecord::from(tx);
        match bincode::serde::encode_to_vec(&record, bincode::config::standard()) {
            Ok(bytes) => self
                .store
                .put(&format!("{PENDING_KEY_PREFIX}{}", tx.request.request_id), bytes),
            Err(e) => warn!("[Router] Failed to persist {:?}: {e}", tx.request.request_id),
        }
    }

    fn emit(&self, event: MetricEvent) {
        if let Some(metrics) = &self.metrics {
            let _ = metrics.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{keypair_from_seed, sign, SecretKey};
    use crate::data_structures::{AccountId, TokenId};
    use crate::storage::InMemoryStore;
    use crate::test_utils::RecordingRelayer;
    use std::time::Duration;

    fn token(s: &str) -> TokenId {
        TokenId::new(s)
    }

    fn request(nonce: u64) -> SwapRequest {
        let source_token = token("X");
        let dest_token = token("Z");
        SwapRequest {
            request_id: RequestId::derive(1, "alice", &source_token, 10_000, 2, &dest_token, "bob", nonce),
            source_chain: 1,
            source_token,
            amount_in: 10_000,
            dest_chain: 2,
            dest_token,
            min_amount_out: 9_000,
            recipient: AccountId { chain_id: 2, address: "bob".to_string() },
        }
    }

    fn signed_ack(key: &SecretKey, request_id: RequestId, outcome: SwapOutcomePayload) -> SwapAckPacket {
        let signature = sign(&ack_digest(&request_id, &outcome), key);
        SwapAckPacket { request_id, outcome, signature }
    }

    fn success(amount_out: u128) -> SwapOutcomePayload {
        SwapOutcomePayload::Success { amount_out, route: vec![token("X"), token("Y"), token("Z")] }
    }

    struct Fixture {
        router: Router,
        relayer: Arc<RecordingRelayer>,
        key: SecretKey,
    }

    fn fixture(config: SystemConfig) -> Fixture {
        let relayer = Arc::new(RecordingRelayer::new());
        let key = keypair_from_seed(3);
        let router = Router::new(
            config,
            relayer.clone(),
            key.verifying_key(),
            Arc::new(InMemoryStore::new()),
            None,
        );
        Fixture { router, relayer, key }
    }

    fn ingress(msg: SwapRequest) -> NetworkMessage {
        NetworkMessage {
            sender: Endpoint::Chain(1),
            receiver: Endpoint::Router,
            packet: Packet::SwapRequest(msg),
        }
    }

    fn receipt_msg(request_id: RequestId, chain: u64, op: EscrowOp, status: ReceiptStatus) -> NetworkMessage {
        NetworkMessage {
            sender: Endpoint::Chain(chain),
            receiver: Endpoint::Router,
            packet: Packet::Receipt(EscrowReceipt { request_id, chain, op, status }),
        }
    }

    fn ack_msg(ack: SwapAckPacket) -> NetworkMessage {
        NetworkMessage { sender: Endpoint::Settlement, receiver: Endpoint::Router, packet: Packet::SwapAck(ack) }
    }

    #[tokio::test]
    async fn success_path_reaches_settled() {
        let f = fixture(SystemConfig::default());
        let req = request(0);
        let id = req.request_id;

        f.router.handle_message(ingress(req.clone())).await;
        assert_eq!(f.router.status(&id).unwrap().phase, TxPhase::AwaitingVsl);
        // Request forwarded to settlement.
        assert!(matches!(
            (&f.relayer.sent()[0].receiver, &f.relayer.sent()[0].packet),
            (Endpoint::Settlement, Packet::SwapRequest(_))
        ));
        f.relayer.clear();

        f.router.handle_message(ack_msg(signed_ack(&f.key, id, success(9_745)))).await;
        assert_eq!(f.router.status(&id).unwrap().phase, TxPhase::AwaitingRelease);
        let sent = f.relayer.sent();
        assert_eq!(sent.len(), 2);
        match &sent[0].packet {
            Packet::Release(rel) => {
                assert_eq!(rel.chain, 2);
                assert_eq!(rel.recipient, "bob");
                assert_eq!(rel.amount, 9_745);
            }
            other => panic!("unexpected packet {other:?}"),
        }
        match &sent[1].packet {
            Packet::Release(rel) => {
                assert_eq!(rel.chain, 1);
                assert_eq!(rel.recipient, VAULT_ADDRESS);
                assert_eq!(rel.amount, 10_000);
            }
            other => panic!("unexpected packet {other:?}"),
        }

        f.router.handle_message(receipt_msg(id, 2, EscrowOp::Release, ReceiptStatus::Applied)).await;
        let status = f.router.status(&id).unwrap();
        assert_eq!(status.phase, TxPhase::Settled);
        assert_eq!(status.amount_out, Some(9_745));
        assert!(f.router.has_active()); // collect still outstanding

        f.router.handle_message(receipt_msg(id, 1, EscrowOp::Release, ReceiptStatus::Applied)).await;
        assert!(!f.router.has_active());
    }

    #[tokio::test]
    async fn failure_ack_escalates_to_refund() {
        let f = fixture(SystemConfig::default());
        let req = request(0);
        let id = req.request_id;
        f.router.handle_message(ingress(req)).await;
        f.relayer.clear();

        let outcome = SwapOutcomePayload::Failure {
            reason: SwapError::SlippageExceeded { best: 9_745, min: 9_800 },
        };
        f.router.handle_message(ack_msg(signed_ack(&f.key, id, outcome))).await;
        assert_eq!(f.router.status(&id).unwrap().phase, TxPhase::AwaitingRefund);
        assert!(matches!(&f.relayer.sent()[0].packet, Packet::Refund(r) if r.chain == 1));

        f.router.handle_message(receipt_msg(id, 1, EscrowOp::Refund, ReceiptStatus::Applied)).await;
        let status = f.router.status(&id).unwrap();
        assert_eq!(status.phase, TxPhase::Refunded);
        assert!(matches!(status.failure, Some(SwapError::SlippageExceeded { .. })));
    }

    #[tokio::test]
    async fn duplicate_acks_and_receipts_are_discarded() {
        let f = fixture(SystemConfig::default());
        let req = request(0);
        let id = req.request_id;
        f.router.handle_message(ingress(req)).await;
        f.router.handle_message(ack_msg(signed_ack(&f.key, id, success(9_745)))).await;
        f.router.handle_message(receipt_msg(id, 2, EscrowOp::Release, ReceiptStatus::Applied)).await;
        f.router.handle_message(receipt_msg(id, 1, EscrowOp::Release, ReceiptStatus::Applied)).await;
        f.relayer.clear();

        // Replay the ack and both receipts.
        f.router.handle_message(ack_msg(signed_ack(&f.key, id, success(9_745)))).await;
        f.router.handle_message(receipt_msg(id, 2, EscrowOp::Release, ReceiptStatus::AlreadyTerminal)).await;
        assert!(f.relayer.sent().is_empty());
        assert_eq!(f.router.status(&id).unwrap().phase, TxPhase::Settled);
    }

    #[tokio::test]
    async fn ack_with_bad_signature_is_dropped() {
        let f = fixture(SystemConfig::default());
        let req = request(0);
        let id = req.request_id;
        f.router.handle_message(ingress(req)).await;
        f.relayer.clear();

        let wrong_key = keypair_from_seed(99);
        f.router.handle_message(ack_msg(signed_ack(&wrong_key, id, success(9_745)))).await;
        assert_eq!(f.router.status(&id).unwrap().phase, TxPhase::AwaitingVsl);
        assert!(f.relayer.sent().is_empty());
    }

    #[tokio::test]
    async fn duplicate_ingress_is_discarded() {
        let f = fixture(SystemConfig::default());
        let req = request(0);
        f.router.handle_message(ingress(req.clone())).await;
        f.router.handle_message(ingress(req)).await;
        assert_eq!(f.relayer.sent().len(), 1);
    }

    #[tokio::test]
    async fn ack_timeout_resends_once_then_refunds() {
        let mut config = SystemConfig::default();
        config.vsl_ack_timeout = Duration::ZERO;
        config.instruction_timeout = Duration::from_secs(60);
        let f = fixture(config);
        let req = request(0);
        let id = req.request_id;
        f.router.handle_message(ingress(req)).await;
        f.relayer.clear();

        // First expiry: resend the request once.
        f.router.check_timeouts().await;
        assert_eq!(f.relayer.sent().len(), 1);
        assert!(matches!(&f.relayer.sent()[0].packet, Packet::SwapRequest(_)));
        assert_eq!(f.router.status(&id).unwrap().phase, TxPhase::AwaitingVsl);
        f.relayer.clear();

        // Second expiry: escalate to refund.
        f.router.check_timeouts().await;
        let status = f.router.status(&id).unwrap();
        assert_eq!(status.phase, TxPhase::AwaitingRefund);
        assert!(matches!(status.failure, Some(SwapError::Timeout(_))));
        assert!(matches!(&f.relayer.sent()[0].packet, Packet::Refund(_)));

        f.router.handle_message(receipt_msg(id, 1, EscrowOp::Refund, ReceiptStatus::Applied)).await;
        assert_eq!(f.router.status(&id).unwrap().phase, TxPhase::Refunded);
    }

    #[tokio::test]
    async fn exhausted_refund_retries_freeze_the_transaction() {
        let mut config = SystemConfig::default();
        config.vsl_ack_timeout = Duration::from_secs(60);
        config.instruction_timeout = Duration::ZERO;
        let f = fixture(config);
        let req = request(0);
        let id = req.request_id;
        f.router.handle_message(ingress(req)).await;
        let failure = SwapOutcomePayload::Failure { reason: SwapError::InvalidAmount };
        f.router.handle_message(ack_msg(signed_ack(&f.key, id, failure))).await;
        f.relayer.clear();

        // max_instruction_retries resends, then freeze.
        for _ in 0..3 {
            f.router.check_timeouts().await;
            assert_eq!(f.router.status(&id).unwrap().phase, TxPhase::AwaitingRefund);
        }
        assert_eq!(f.relayer.sent().len(), 3);
        f.router.check_timeouts().await;
        assert_eq!(f.router.status(&id).unwrap().phase, TxPhase::Frozen);
        assert!(!f.router.has_active());
    }

    #[tokio::test]
    async fn escrow_fault_freezes_the_transaction() {
        let f = fixture(SystemConfig::default());
        let req = request(0);
        let id = req.request_id;
        f.router.handle_message(ingress(req)).await;
        f.router.handle_message(ack_msg(signed_ack(&f.key, id, success(9_745)))).await;

        let fault = ReceiptStatus::Failed(SwapError::InsufficientBalance("vault Z".into()));
        f.router.handle_message(receipt_msg(id, 2, EscrowOp::Release, fault)).await;
        assert_eq!(f.router.status(&id).unwrap().phase, TxPhase::Frozen);
    }

    #[tokio::test]
    async fn cancel_before_ack_triggers_refund() {
        let f = fixture(SystemConfig::default());
        let req = request(0);
        let id = req.request_id;
        f.router.handle_message(ingress(req)).await;
        f.relayer.clear();

        f.router.cancel(id).await.unwrap();
        assert_eq!(f.router.status(&id).unwrap().phase, TxPhase::AwaitingRefund);
        assert!(matches!(&f.relayer.sent()[0].packet, Packet::Refund(_)));

        // A second cancel is invalid.
        assert!(matches!(f.router.cancel(id).await, Err(SwapError::InvalidState(_, _))));

        // A success ack landing after the cancel is a genuine fault.
        f.router.handle_message(ack_msg(signed_ack(&f.key, id, success(9_745)))).await;
        assert_eq!(f.router.status(&id).unwrap().phase, TxPhase::Frozen);
    }

    #[tokio::test]
    async fn unknown_correlations_are_ignored() {
        let f = fixture(SystemConfig::default());
        let id = RequestId([5; 32]);
        f.router.handle_message(ack_msg(signed_ack(&f.key, id, success(1)))).await;
        f.router.handle_message(receipt_msg(id, 1, EscrowOp::Refund, ReceiptStatus::Applied)).await;
        assert!(f.relayer.sent().is_empty());
        assert!(f.router.status(&id).is_none());
    }
}
