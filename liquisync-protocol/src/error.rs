use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed error taxonomy for the whole settlement core. Serializable because
/// failure reasons travel inside acknowledgment and receipt packets.
///
/// Computation failures (`InvalidAmount`, `PoolNotFound`,
/// `InsufficientLiquidity`, `SlippageExceeded`, `NoRouteFound`,
/// `InsufficientBalance`) are terminal for a swap and resolve to a refund.
/// `Timeout` and `TransportFailure` are retried a bounded number of times
/// before escalating to the refund path. `InvalidState` is a benign no-op
/// when the target lock is already terminal, and a genuine fault otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum SwapError {
    #[error("swap amount must be non-zero and representable")]
    InvalidAmount,
    #[error("no pool registered for pair {0}")]
    PoolNotFound(String),
    #[error("insufficient liquidity for {0}")]
    InsufficientLiquidity(String),
    #[error("best achievable output {best} is below the minimum {min}")]
    SlippageExceeded { best: u128, min: u128 },
    #[error("no route from {from} to {to}")]
    NoRouteFound { from: String, to: String },
    #[error("insufficient balance for {0}")]
    InsufficientBalance(String),
    #[error("duplicate request {0}")]
    DuplicateRequest(String),
    #[error("invalid state for {0}: {1}")]
    InvalidState(String, String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("transport failure: {0}")]
    TransportFailure(String),
}

impl SwapError {
    /// Whether this failure may be retried by the session layer, as opposed
    /// to being terminal for the swap.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SwapError::Timeout(_) | SwapError::TransportFailure(_))
    }
}
