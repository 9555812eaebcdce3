// Cross-chain session layer: pending-transaction records and the router
// that drives them.

pub mod router;
pub mod types;

pub use router::Router;
pub use types::{PendingRecord, PendingTransaction, TxPhase, TxStatus};
