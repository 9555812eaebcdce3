// Constant-product virtual liquidity pools and the partitioned registry.

use crate::data_structures::{PairKey, TokenId};
use crate::error::SwapError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

pub const BPS_DENOMINATOR: u128 = 10_000;

/// One virtual constant-product market for an unordered token pair.
/// Reserves are aligned to the canonical pair order: `reserve_a` backs
/// `pair.first()`, `reserve_b` backs `pair.second()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pool {
    pub pair: PairKey,
    pub reserve_a: u128,
    pub reserve_b: u128,
    pub fee_bps: u16,
}

impl Pool {
    pub fn new(x: TokenId, y: TokenId, reserve_x: u128, reserve_y: u128, fee_bps: u16) -> Self {
        let pair = PairKey::new(x.clone(), y);
        // Align reserves to canonical order.
        let (reserve_a, reserve_b) = if pair.first() == &x {
            (reserve_x, reserve_y)
        } else {
            (reserve_y, reserve_x)
        };
        Pool { pair, reserve_a, reserve_b, fee_bps }
    }

    /// Reserves oriented to the input token: (r_in, r_out).
    fn oriented(&self, token_in: &TokenId) -> Result<(u128, u128), SwapError> {
        if token_in == self.pair.first() {
            Ok((self.reserve_a, self.reserve_b))
        } else if token_in == self.pair.second() {
            Ok((self.reserve_b, self.reserve_a))
        } else {
            Err(SwapError::PoolNotFound(self.pair.to_string()))
        }
    }

    /// Price a swap without mutating reserves.
    ///
    /// Fee deduction and the output division both floor, so truncation is
    /// always in the pool's favor: `out = net * r_out / (r_in + net)` is the
    /// constant-product formula with pool-favoring rounding (identical to
    /// `r_out - ceil(r_in * r_out / (r_in + net))`).
    pub fn quote(&self, token_in: &TokenId, amount_in: u128, min_reserve: u128) -> Result<u128, SwapError> {
        if amount_in == 0 {
            return Err(SwapError::InvalidAmount);
        }
        let (r_in, r_out) = self.oriented(token_in)?;
        let net = amount_in
            .checked_mul(BPS_DENOMINATOR - self.fee_bps as u128)
            .ok_or(SwapError::InvalidAmount)?
            / BPS_DENOMINATOR;
        if net == 0 {
            // The fee floor consumed the whole input.
            return Err(SwapError::InvalidAmount);
        }
        let new_r_in = r_in.checked_add(net).ok_or(SwapError::InvalidAmount)?;
        let out = net.checked_mul(r_out).ok_or(SwapError::InvalidAmount)? / new_r_in;
        if out > r_out.saturating_sub(min_reserve) {
            return Err(SwapError::InsufficientLiquidity(self.pair.to_string()));
        }
        Ok(out)
    }

    /// Commit one swap step: quote, then move reserves. The full pre-fee
    /// input is added to the input reserve, so the fee accrues to the pool
    /// and `reserve_a * reserve_b` never decreases.
    pub fn apply(&mut self, token_in: &TokenId, amount_in: u128, min_reserve: u128) -> Result<u128, SwapError> {
        let out = self.quote(token_in, amount_in, min_reserve)?;
        if token_in == self.pair.first() {
            self.reserve_a = self.reserve_a.checked_add(amount_in).ok_or(SwapError::InvalidAmount)?;
            self.reserve_b -= out;
        } else {
            self.reserve_b = self.reserve_b.checked_add(amount_in).ok_or(SwapError::InvalidAmount)?;
            self.reserve_a -= out;
        }
        Ok(out)
    }

    /// Fee-adjusted marginal price for an infinitesimal input: the derivative
    /// of `quote` at the current reserves. Graph edge weight for route
    /// search ordering; never used in economic computation.
    pub fn marginal_price(&self, token_in: &TokenId) -> f64 {
        match self.oriented(token_in) {
            Ok((r_in, r_out)) if r_in > 0 => {
                let fee_factor = (BPS_DENOMINATOR - self.fee_bps as u128) as f64 / BPS_DENOMINATOR as f64;
                fee_factor * r_out as f64 / r_in as f64
            }
            _ => 0.0,
        }
    }

    /// The invariant product. Test and audit helper.
    pub fn product(&self) -> u128 {
        self.reserve_a.saturating_mul(self.reserve_b)
    }
}

/// Partitioned pool registry: one mutex per pool, so swaps touching disjoint
/// pools never contend. The outer map is only locked to look up handles.
pub struct PoolRegistry {
    pools: RwLock<HashMap<PairKey, Arc<Mutex<Pool>>>>,
    min_reserve: u128,
}

impl PoolRegistry {
    pub fn new(min_reserve: u128) -> Self {
        PoolRegistry { pools: RwLock::new(HashMap::new()), min_reserve }
    }

    pub fn add_pool(&self, pool: Pool) -> Result<(), SwapError> {
        if pool.reserve_a == 0 || pool.reserve_b == 0 {
            return Err(SwapError::InvalidAmount);
        }
        let mut pools = self.pools.write().unwrap();
        if pools.contains_key(&pool.pair) {
            return Err(SwapError::InvalidState(pool.pair.to_string(), "pool already registered".into()));
        }
        pools.insert(pool.pair.clone(), Arc::new(Mutex::new(pool)));
        Ok(())
    }

    pub fn contains(&self, pair: &PairKey) -> bool {
        self.pools.read().unwrap().contains_key(pair)
    }

    /// Clone of one pool's current state.
    pub fn pool(&self, pair: &PairKey) -> Option<Pool> {
        let handle = self.pools.read().unwrap().get(pair).cloned()?;
        let guard = handle.lock().unwrap();
        Some(guard.clone())
    }

    /// Consistent-enough snapshot of every pool for route planning. Each
    /// pool is copied under its own lock; the settlement engine is the only
    /// writer, so planning and execution see identical reserves.
    pub fn snapshot(&self) -> Vec<Pool> {
        let handles: Vec<Arc<Mutex<Pool>>> = self.pools.read().unwrap().values().cloned().collect();
        let mut pools: Vec<Pool> = handles.iter().map(|h| h.lock().unwrap().clone()).collect();
        pools.sort_by(|a, b| a.pair.cmp(&b.pair));
        pools
    }

    /// Price one hop without mutating anything.
    pub fn quote(&self, pair: &PairKey, token_in: &TokenId, amount_in: u128) -> Result<u128, SwapError> {
        let handle = self
            .pools
            .read()
            .unwrap()
            .get(pair)
            .cloned()
            .ok_or_else(|| SwapError::PoolNotFound(pair.to_string()))?;
        let guard = handle.lock().unwrap();
        guard.quote(token_in, amount_in, self.min_reserve)
    }

    /// Execute a whole route atomically. Locks every pool on the route in
    /// canonical pair order, quotes all hops, enforces the slippage bound,
    /// then applies all hops. Either every reserve moves or none does.
    pub fn execute_route(
        &self,
        route: &[TokenId],
        amount_in: u128,
        min_amount_out: u128,
    ) -> Result<u128, SwapError> {
        if route.len() < 2 {
            return Err(SwapError::NoRouteFound {
                from: route.first().map(|t| t.to_string()).unwrap_or_default(),
                to: route.last().map(|t| t.to_string()).unwrap_or_default(),
            });
        }
        let pairs: Vec<PairKey> = route
            .windows(2)
            .map(|w| PairKey::new(w[0].clone(), w[1].clone()))
            .collect();
        let handles: Vec<Arc<Mutex<Pool>>> = {
            let pools = self.pools.read().unwrap();
            pairs
                .iter()
                .map(|p| {
                    pools
                        .get(p)
                        .cloned()
                        .ok_or_else(|| SwapError::PoolNotFound(p.to_string()))
                })
                .collect::<Result<_, _>>()?
        };

        // Simple paths never revisit a pair, so each pool is locked once.
        // Canonical lock order keeps concurrent routes deadlock-free.
        let mut order: Vec<usize> = (0..pairs.len()).collect();
        order.sort_by(|&i, &j| pairs[i].cmp(&pairs[j]));
        let mut guards: Vec<Option<MutexGuard<'_, Pool>>> = Vec::new();
        guards.resize_with(pairs.len(), || None);
        for &i in &order {
            guards[i] = Some(handles[i].lock().unwrap());
        }

        let mut amount = amount_in;
        for (i, guard) in guards.iter().enumerate() {
            amount = guard.as_ref().unwrap().quote(&route[i], amount, self.min_reserve)?;
        }
        if amount < min_amount_out {
            return Err(SwapError::SlippageExceeded { best: amount, min: min_amount_out });
        }

        let mut amount = amount_in;
        for (i, guard) in guards.iter_mut().enumerate() {
            amount = guard.as_mut().unwrap().apply(&route[i], amount, self.min_reserve)?;
        }
        Ok(amount)
    }
}
