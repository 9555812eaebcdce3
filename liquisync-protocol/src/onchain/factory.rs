// Chain-local ingress/egress facade: owns the chain's token balances and
// escrows, accepts user swap submissions, and executes the session layer's
// release/refund instructions, answering each with a receipt.

use crate::data_structures::{AccountId, ChainId, RequestId, SwapRequest, TokenId, VAULT_ADDRESS};
use crate::error::SwapError;
use crate::network::{
    Endpoint, EscrowOp, EscrowReceipt, NetworkMessage, Packet, ReceiptStatus, RefundInstruction,
    ReleaseInstruction, RelayerInterface,
};
use crate::onchain::escrow::{Escrow, EscrowTransition, LockState};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// User-facing swap submission. `request_id` may be supplied by the caller;
/// when absent the factory derives one from the request fields and its
/// submission nonce.
#[derive(Clone, Debug)]
pub struct SwapParams {
    pub source_token: TokenId,
    pub amount_in: u128,
    pub dest_chain: ChainId,
    pub dest_token: TokenId,
    pub min_amount_out: u128,
    pub recipient: String,
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Default)]
struct FactoryState {
    // address -> token -> balance, flattened
    balances: HashMap<(String, TokenId), u128>,
    escrows: HashMap<TokenId, Escrow>,
    nonce: u64,
}

impl FactoryState {
    fn credit(&mut self, address: &str, token: &TokenId, amount: u128) {
        let entry = self.balances.entry((address.to_string(), token.clone())).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    fn debit(&mut self, address: &str, token: &TokenId, amount: u128) -> Result<(), SwapError> {
        let entry = self.balances.entry((address.to_string(), token.clone())).or_insert(0);
        if *entry < amount {
            return Err(SwapError::InsufficientBalance(format!("{address} {token}")));
        }
        *entry -= amount;
        Ok(())
    }

    fn balance(&self, address: &str, token: &TokenId) -> u128 {
        self.balances.get(&(address.to_string(), token.clone())).copied().unwrap_or(0)
    }
}

/// One factory per chain. All coupling to the rest of the system is by
/// request-id-keyed packets through the relayer; the factory never holds a
/// reference into another component's state.
pub struct ChainFactory {
    pub chain_id: ChainId,
    relayer: Arc<dyn RelayerInterface>,
    inner: Mutex<FactoryState>,
}

impl ChainFactory {
    pub fn new(chain_id: ChainId, relayer: Arc<dyn RelayerInterface>) -> Self {
        ChainFactory { chain_id, relayer, inner: Mutex::new(FactoryState::default()) }
    }

    /// Genesis provisioning: mint `amount` of `token` to `address`. Funding
    /// `VAULT_ADDRESS` provisions the chain's payout float.
    pub fn fund(&self, address: &str, token: &TokenId, amount: u128) {
        self.inner.lock().unwrap().credit(address, token, amount);
    }

    pub fn balance(&self, address: &str, token: &TokenId) -> u128 {
        self.inner.lock().unwrap().balance(address, token)
    }

    pub fn vault_balance(&self, token: &TokenId) -> u128 {
        self.balance(VAULT_ADDRESS, token)
    }

    pub fn lock_state(&self, token: &TokenId, request_id: &RequestId) -> Option<LockState> {
        self.inner.lock().unwrap().escrows.get(token).and_then(|e| e.state(request_id))
    }

    pub fn locked_total(&self, token: &TokenId) -> u128 {
        self.inner.lock().unwrap().escrows.get(token).map(|e| e.locked_total()).unwrap_or(0)
    }

    /// Validate the submission, debit the depositor, create the escrow lock
    /// and dispatch the swap request to the session layer.
    pub async fn submit_swap(&self, depositor: &str, params: SwapParams) -> Result<RequestId, SwapError> {
        if params.amount_in == 0 {
            return Err(SwapError::InvalidAmount);
        }
        let request = {
            let mut st = self.inner.lock().unwrap();
            if st.balance(depositor, &params.source_token) < params.amount_in {
                return Err(SwapError::InsufficientBalance(format!("{depositor} {}", params.source_token)));
            }
            let request_id = match params.request_id {
                Some(id) => id,
                None => {
                    let nonce = st.nonce;
                    st.nonce += 1;
                    RequestId::derive(
                        self.chain_id,
                        depositor,
                        &params.source_token,
                        params.amount_in,
                        params.dest_chain,
                        &params.dest_token,
                        &params.recipient,
                        nonce,
                    )
                }
            };
            let chain_id = self.chain_id;
            let escrow = st
                .escrows
                .entry(params.source_token.clone())
                .or_insert_with(|| Escrow::new(chain_id, params.source_token.clone()));
            escrow.lock(request_id, depositor, params.amount_in)?;
            st.debit(depositor, &params.source_token, params.amount_in)?;
            SwapRequest {
                request_id,
                source_chain: self.chain_id,
                source_token: params.source_token.clone(),
                amount_in: params.amount_in,
                dest_chain: params.dest_chain,
                dest_token: params.dest_token.clone(),
                min_amount_out: params.min_amount_out,
                recipient: AccountId { chain_id: params.dest_chain, address: params.recipient.clone() },
            }
        };

        let request_id = request.request_id;
        let msg = NetworkMessage {
            sender: Endpoint::Chain(self.chain_id),
            receiver: Endpoint::Router,
            packet: Packet::SwapRequest(request),
        };
        if let Err(e) = self.relayer.send(msg).await {
            // The session layer never heard about the lock: unwind it.
            warn!("[Factory {}] Dispatch failed for {request_id:?}, unwinding lock: {e}", self.chain_id);
            let mut st = self.inner.lock().unwrap();
            if let Some(escrow) = st.escrows.get_mut(&params.source_token) {
                if let Ok(EscrowTransition::Applied { depositor, amount }) = escrow.refund(request_id) {
                    st.credit(&depositor, &params.source_token, amount);
                }
            }
            return Err(e);
        }
        info!("[Factory {}] Submitted swap {request_id:?}", self.chain_id);
        Ok(request_id)
    }

    fn apply_release(&self, instruction: &ReleaseInstruction) -> ReceiptStatus {
        let mut st = self.inner.lock().unwrap();
        let st = &mut *st;
        let chain_id = self.chain_id;
        let escrow = st
            .escrows
            .entry(instruction.token.clone())
            .or_insert_with(|| Escrow::new(chain_id, instruction.token.clone()));
        match escrow.release(instruction.request_id) {
            Ok(EscrowTransition::Applied { amount, .. }) => {
                if amount != instruction.amount {
                    warn!(
                        "[Factory {}] Release amount {} differs from locked {} for {:?}; honoring the lock",
                        self.chain_id, instruction.amount, amount, instruction.request_id
                    );
                }
                st.credit(&instruction.recipient, &instruction.token, amount);
                ReceiptStatus::Applied
            }
            Ok(EscrowTransition::AlreadyTerminal) => ReceiptStatus::AlreadyTerminal,
            Err(SwapError::InvalidState(_, _)) => {
                // No lock here: this chain is the destination, paying out of
                // the vault float.
                Self::apply_destination_payout(st, chain_id, instruction)
            }
            Err(e) => ReceiptStatus::Failed(e),
        }
    }

    fn apply_destination_payout(
        st: &mut FactoryState,
        chain_id: ChainId,
        instruction: &ReleaseInstruction,
    ) -> ReceiptStatus {
        if st.balance(VAULT_ADDRESS, &instruction.token) < instruction.amount {
            return ReceiptStatus::Failed(SwapError::InsufficientBalance(format!(
                "{VAULT_ADDRESS} {}",
                instruction.token
            )));
        }
        let escrow = st
            .escrows
            .entry(instruction.token.clone())
            .or_insert_with(|| Escrow::new(chain_id, instruction.token.clone()));
        match escrow.record_settlement(instruction.request_id, &instruction.recipient, instruction.amount) {
            Ok(EscrowTransition::Applied { .. }) => {
                // Checked above; the debit cannot fail.
                let _ = st.debit(VAULT_ADDRESS, &instruction.token, instruction.amount);
                st.credit(&instruction.recipient, &instruction.token, instruction.amount);
                ReceiptStatus::Applied
            }
            Ok(EscrowTransition::AlreadyTerminal) => ReceiptStatus::AlreadyTerminal,
            Err(e) => ReceiptStatus::Failed(e),
        }
    }

    fn apply_refund(&self, instruction: &RefundInstruction) -> ReceiptStatus {
        let mut st = self.inner.lock().unwrap();
        let st = &mut *st;
        let chain_id = self.chain_id;
        let escrow = st
            .escrows
            .entry(instruction.token.clone())
            .or_insert_with(|| Escrow::new(chain_id, instruction.token.clone()));
        match escrow.refund(instruction.request_id) {
            Ok(EscrowTransition::Applied { depositor, amount }) => {
                st.credit(&depositor, &instruction.token, amount);
                ReceiptStatus::Applied
            }
            Ok(EscrowTransition::AlreadyTerminal) => ReceiptStatus::AlreadyTerminal,
            Err(e) => ReceiptStatus::Failed(e),
        }
    }

    /// Apply one instruction and answer the session layer with a receipt.
    pub async fn handle_message(&self, msg: NetworkMessage) {
        let receipt = match &msg.packet {
            Packet::Release(instruction) if instruction.chain == self.chain_id => EscrowReceipt {
                request_id: instruction.request_id,
                chain: self.chain_id,
                op: EscrowOp::Release,
                status: self.apply_release(instruction),
            },
            Packet::Refund(instruction) if instruction.chain == self.chain_id => EscrowReceipt {
                request_id: instruction.request_id,
                chain: self.chain_id,
                op: EscrowOp::Refund,
                status: self.apply_refund(instruction),
            },
            other => {
                warn!("[Factory {}] Ignoring unexpected packet: {other:?}", self.chain_id);
                return;
            }
        };
        if let ReceiptStatus::Failed(reason) = &receipt.status {
            warn!(
                "[Factory {}] {:?} failed for {:?}: {reason}",
                self.chain_id, receipt.op, receipt.request_id
            );
        }
        let reply = NetworkMessage {
            sender: Endpoint::Chain(self.chain_id),
            receiver: Endpoint::Router,
            packet: Packet::Receipt(receipt),
        };
        if let Err(e) = self.relayer.send(reply).await {
            // The router's instruction resend will trigger a fresh receipt.
            warn!("[Factory {}] Failed to dispatch receipt: {e}", self.chain_id);
        }
    }

    /// Run loop: apply every instruction addressed to this chain.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<NetworkMessage>) {
        info!("[Factory {}] Run loop started", self.chain_id);
        while let Some(msg) = rx.recv().await {
            self.handle_message(msg).await;
        }
        info!("[Factory {}] Run loop stopped", self.chain_id);
    }
}
