// Workflow records the router keeps per in-flight swap.

use crate::data_structures::{RequestId, SwapRequest, TokenId};
use crate::error::SwapError;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Lifecycle of one pending transaction. `Settled` and `Refunded` are the
/// two guaranteed terminal outcomes; `Frozen` marks a genuine fault parked
/// for manual intervention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPhase {
    Initiated,
    AwaitingVsl,
    AwaitingRelease,
    AwaitingRefund,
    Settled,
    Refunded,
    Frozen,
}

impl TxPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxPhase::Settled | TxPhase::Refunded)
    }
}

/// Mutable workflow record keyed by request id. Owned exclusively by the
/// router; everything else sees it only through `TxStatus` snapshots.
#[derive(Clone, Debug)]
pub struct PendingTransaction {
    pub request: SwapRequest,
    pub phase: TxPhase,
    pub amount_out: Option<u128>,
    pub route: Option<Vec<TokenId>>,
    pub failure: Option<SwapError>,
    pub retries: u8,
    pub deadline: Instant,
    pub cancelled: bool,
    pub collect_confirmed: bool,
}

impl PendingTransaction {
    pub fn new(request: SwapRequest, deadline: Instant) -> Self {
        PendingTransaction {
            request,
            phase: TxPhase::Initiated,
            amount_out: None,
            route: None,
            failure: None,
            retries: 0,
            deadline,
            cancelled: false,
            collect_confirmed: false,
        }
    }
}

/// Durable snapshot of a pending transaction, written to the store on every
/// phase transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub request: SwapRequest,
    pub phase: TxPhase,
    pub amount_out: Option<u128>,
    pub failure: Option<SwapError>,
    pub retries: u8,
    pub cancelled: bool,
}

impl From<&PendingTransaction> for PendingRecord {
    fn from(tx: &PendingTransaction) -> Self {
        PendingRecord {
            request: tx.request.clone(),
            phase: tx.phase,
            amount_out: tx.amount_out,
            failure: tx.failure.clone(),
            retries: tx.retries,
            cancelled: tx.cancelled,
        }
    }
}

/// Answer to a status query: an in-progress phase or a terminal outcome,
/// never an unaccounted in-between.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatus {
    pub request_id: RequestId,
    pub phase: TxPhase,
    pub amount_out: Option<u128>,
    pub failure: Option<SwapError>,
}
