// Per chain x token escrow: custodies locked funds until the session layer
// resolves each request to a release or a refund.

use crate::data_structures::{ChainId, RequestId, TokenId};
use crate::error::SwapError;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    Locked,
    Released,
    Refunded,
}

impl LockState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LockState::Locked)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowLock {
    pub request_id: RequestId,
    pub depositor: String,
    pub amount: u128,
    pub state: LockState,
}

/// Result of applying a release/refund. `AlreadyTerminal` is the no-op
/// replay case that makes at-least-once instruction delivery safe: the
/// caller must not move funds again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscrowTransition {
    Applied { depositor: String, amount: u128 },
    AlreadyTerminal,
}

/// Lock table for one chain x token. Terminal records are retained, never
/// deleted, so replayed instructions stay no-ops.
#[derive(Debug)]
pub struct Escrow {
    pub chain_id: ChainId,
    pub token: TokenId,
    locks: HashMap<RequestId, EscrowLock>,
}

impl Escrow {
    pub fn new(chain_id: ChainId, token: TokenId) -> Self {
        Escrow { chain_id, token, locks: HashMap::new() }
    }

    /// Create a `Locked` entry. Each request id locks at most once per
    /// chain x token, ever, including after the lock went terminal.
    pub fn lock(&mut self, request_id: RequestId, depositor: &str, amount: u128) -> Result<(), SwapError> {
        if amount == 0 {
            return Err(SwapError::InvalidAmount);
        }
        if self.locks.contains_key(&request_id) {
            return Err(SwapError::DuplicateRequest(request_id.to_string()));
        }
        self.locks.insert(
            request_id,
            EscrowLock { request_id, depositor: depositor.to_string(), amount, state: LockState::Locked },
        );
        Ok(())
    }

    /// `Locked -> Released`: custody moves to the instruction's recipient.
    pub fn release(&mut self, request_id: RequestId) -> Result<EscrowTransition, SwapError> {
        self.transition(request_id, LockState::Released)
    }

    /// `Locked -> Refunded`: custody returns to the original depositor.
    pub fn refund(&mut self, request_id: RequestId) -> Result<EscrowTransition, SwapError> {
        self.transition(request_id, LockState::Refunded)
    }

    fn transition(&mut self, request_id: RequestId, target: LockState) -> Result<EscrowTransition, SwapError> {
        let lock = self.locks.get_mut(&request_id).ok_or_else(|| {
            SwapError::InvalidState(request_id.to_string(), "no lock for request".to_string())
        })?;
        match lock.state {
            LockState::Locked => {
                lock.state = target;
                Ok(EscrowTransition::Applied { depositor: lock.depositor.clone(), amount: lock.amount })
            }
            state => {
                if state != target {
                    // A release replayed against a refunded lock (or the
                    // reverse) means the session layer double-resolved; the
                    // no-op keeps funds safe, the log keeps it visible.
                    warn!(
                        "[Escrow {}:{}] {:?} instruction for lock already {:?}",
                        self.chain_id, self.token, target, state
                    );
                }
                Ok(EscrowTransition::AlreadyTerminal)
            }
        }
    }

    /// Record a destination-side payout for a request that never locked on
    /// this chain: a synthetic terminal `Released` entry, so a replayed
    /// instruction is a no-op.
    pub fn record_settlement(&mut self, request_id: RequestId, recipient: &str, amount: u128) -> Result<EscrowTransition, SwapError> {
        match self.locks.get(&request_id) {
            None => {
                self.locks.insert(
                    request_id,
                    EscrowLock {
                        request_id,
                        depositor: recipient.to_string(),
                        amount,
                        state: LockState::Released,
                    },
                );
                Ok(EscrowTransition::Applied { depositor: recipient.to_string(), amount })
            }
            Some(lock) if lock.state.is_terminal() => Ok(EscrowTransition::AlreadyTerminal),
            Some(_) => Err(SwapError::InvalidState(
                request_id.to_string(),
                "settlement for a request with an active lock".to_string(),
            )),
        }
    }

    pub fn state(&self, request_id: &RequestId) -> Option<LockState> {
        self.locks.get(request_id).map(|l| l.state)
    }

    pub fn lock_record(&self, request_id: &RequestId) -> Option<&EscrowLock> {
        self.locks.get(request_id)
    }

    /// Total amount still held in `Locked` entries.
    pub fn locked_total(&self) -> u128 {
        self.locks
            .values()
            .filter(|l| l.state == LockState::Locked)
            .map(|l| l.amount)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> RequestId {
        RequestId([n; 32])
    }

    fn escrow() -> Escrow {
        Escrow::new(1, TokenId::new("X"))
    }

    #[test]
    fn lock_then_release() {
        let mut escrow = escrow();
        escrow.lock(id(1), "alice", 100).unwrap();
        assert_eq!(escrow.state(&id(1)), Some(LockState::Locked));
        assert_eq!(escrow.locked_total(), 100);

        let transition = escrow.release(id(1)).unwrap();
        assert_eq!(transition, EscrowTransition::Applied { depositor: "alice".into(), amount: 100 });
        assert_eq!(escrow.state(&id(1)), Some(LockState::Released));
        assert_eq!(escrow.locked_total(), 0);
    }

    #[test]
    fn lock_then_refund() {
        let mut escrow = escrow();
        escrow.lock(id(1), "alice", 100).unwrap();
        let transition = escrow.refund(id(1)).unwrap();
        assert_eq!(transition, EscrowTransition::Applied { depositor: "alice".into(), amount: 100 });
        assert_eq!(escrow.state(&id(1)), Some(LockState::Refunded));
    }

    #[test]
    fn duplicate_lock_is_rejected_even_after_terminal() {
        let mut escrow = escrow();
        escrow.lock(id(1), "alice", 100).unwrap();
        assert!(matches!(escrow.lock(id(1), "alice", 100), Err(SwapError::DuplicateRequest(_))));
        escrow.refund(id(1)).unwrap();
        assert!(matches!(escrow.lock(id(1), "alice", 100), Err(SwapError::DuplicateRequest(_))));
    }

    #[test]
    fn zero_amount_lock_is_rejected() {
        let mut escrow = escrow();
        assert_eq!(escrow.lock(id(1), "alice", 0), Err(SwapError::InvalidAmount));
    }

    #[test]
    fn terminal_replays_are_noop_successes() {
        let mut escrow = escrow();
        escrow.lock(id(1), "alice", 100).unwrap();
        escrow.release(id(1)).unwrap();
        // Same-op replay.
        assert_eq!(escrow.release(id(1)).unwrap(), EscrowTransition::AlreadyTerminal);
        // Cross-op replay is also a no-op; never both effects.
        assert_eq!(escrow.refund(id(1)).unwrap(), EscrowTransition::AlreadyTerminal);
        assert_eq!(escrow.state(&id(1)), Some(LockState::Released));
    }

    #[test]
    fn transition_without_lock_is_invalid_state() {
        let mut escrow = escrow();
        assert!(matches!(escrow.refund(id(9)), Err(SwapError::InvalidState(_, _))));
        assert!(matches!(escrow.release(id(9)), Err(SwapError::InvalidState(_, _))));
    }

    #[test]
    fn settlement_records_are_idempotent() {
        let mut escrow = escrow();
        let first = escrow.record_settlement(id(2), "bob", 500).unwrap();
        assert_eq!(first, EscrowTransition::Applied { depositor: "bob".into(), amount: 500 });
        assert_eq!(escrow.state(&id(2)), Some(LockState::Released));
        // Replay is a no-op.
        assert_eq!(escrow.record_settlement(id(2), "bob", 500).unwrap(), EscrowTransition::AlreadyTerminal);
    }

    #[test]
    fn settlement_over_active_lock_is_a_fault() {
        let mut escrow = escrow();
        escrow.lock(id(3), "alice", 100).unwrap();
        assert!(matches!(
            escrow.record_settlement(id(3), "bob", 500),
            Err(SwapError::InvalidState(_, _))
        ));
    }
}
