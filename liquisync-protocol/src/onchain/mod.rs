// Chain-local components: the escrow state machine and the factory facade
// that fronts it.

pub mod escrow;
pub mod factory;

pub use escrow::{Escrow, EscrowLock, EscrowTransition, LockState};
pub use factory::{ChainFactory, SwapParams};
