// Virtual settlement layer: pools, route planning, the balance ledger and
// the engine that drives them.

pub mod ledger;
pub mod pool;
pub mod route;
pub mod settlement;

pub use ledger::BalanceLedger;
pub use pool::{Pool, PoolRegistry};
pub use route::{find_route, RouteQuote};
pub use settlement::SettlementEngine;
