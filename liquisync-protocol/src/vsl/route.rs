// Route planning over the pool graph: tokens are nodes, pools are edges.

use crate::data_structures::TokenId;
use crate::error::SwapError;
use crate::vsl::pool::Pool;
use std::collections::{HashMap, HashSet};

/// A planned route: the token sequence (source first, destination last) and
/// the composed output the plan expects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteQuote {
    pub tokens: Vec<TokenId>,
    pub amount_out: u128,
}

impl RouteQuote {
    pub fn hops(&self) -> usize {
        self.tokens.len().saturating_sub(1)
    }
}

struct Search<'a> {
    adjacency: HashMap<&'a TokenId, Vec<(&'a TokenId, &'a Pool)>>,
    token_out: &'a TokenId,
    max_hops: usize,
    min_reserve: u128,
    best: Option<RouteQuote>,
    reached: bool,
}

/// Find the best route from `token_in` to `token_out` for `amount_in`.
///
/// Hop count is small by design, so every simple path up to `max_hops` is
/// enumerated and evaluated by chaining quotes (the input of hop k+1 is the
/// output of hop k). Selection maximizes the composed output; ties break by
/// fewest hops, then by lexicographically smallest token sequence, so the
/// result is reproducible for audit.
pub fn find_route(
    pools: &[Pool],
    token_in: &TokenId,
    token_out: &TokenId,
    amount_in: u128,
    min_amount_out: u128,
    max_hops: usize,
    min_reserve: u128,
) -> Result<RouteQuote, SwapError> {
    if amount_in == 0 {
        return Err(SwapError::InvalidAmount);
    }
    if token_in == token_out || max_hops == 0 {
        return Err(SwapError::NoRouteFound {
            from: token_in.to_string(),
            to: token_out.to_string(),
        });
    }

    let mut adjacency: HashMap<&TokenId, Vec<(&TokenId, &Pool)>> = HashMap::new();
    for pool in pools {
        let (a, b) = (pool.pair.first(), pool.pair.second());
        adjacency.entry(a).or_default().push((b, pool));
        adjacency.entry(b).or_default().push((a, pool));
    }
    // Expand the most favorable edge first (marginal price is the fee-adjusted
    // derivative of the quote, so it reflects actual depth), with the token id
    // as a stable secondary key.
    for (token, neighbors) in adjacency.iter_mut() {
        neighbors.sort_by(|(ta, pa), (tb, pb)| {
            pb.marginal_price(token)
                .partial_cmp(&pa.marginal_price(token))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ta.cmp(tb))
        });
    }

    let mut search = Search {
        adjacency,
        token_out,
        max_hops,
        min_reserve,
        best: None,
        reached: false,
    };
    let mut visited = HashSet::new();
    visited.insert(token_in.clone());
    let mut path = vec![token_in.clone()];
    search.visit(token_in, amount_in, &mut path, &mut visited);

    match search.best {
        Some(best) if best.amount_out >= min_amount_out => Ok(best),
        Some(best) => Err(SwapError::SlippageExceeded { best: best.amount_out, min: min_amount_out }),
        None if search.reached => Err(SwapError::InsufficientLiquidity(format!(
            "{} -> {}",
            token_in, token_out
        ))),
        None => Err(SwapError::NoRouteFound {
            from: token_in.to_string(),
            to: token_out.to_string(),
        }),
    }
}

impl<'a> Search<'a> {
    fn visit(
        &mut self,
        current: &TokenId,
        amount: u128,
        path: &mut Vec<TokenId>,
        visited: &mut HashSet<TokenId>,
    ) {
        if path.len() - 1 >= self.max_hops {
            return;
        }
        let neighbors = match self.adjacency.get(current) {
            Some(n) => n.clone(),
            None => return,
        };
        for (next, pool) in neighbors {
            if visited.contains(next) {
                continue;
            }
            if next == self.token_out {
                self.reached = true;
            }
            let out = match pool.quote(current, amount, self.min_reserve) {
                Ok(out) => out,
                Err(_) => continue, // illiquid or dust hop, path unusable
            };
            path.push(next.clone());
            if next == self.token_out {
                self.consider(path, out);
            } else {
                // A simple path that already hit the destination cannot reach
                // it again, so only interior tokens recurse.
                visited.insert(next.clone());
                self.visit(next, out, path, visited);
                visited.remove(next);
            }
            path.pop();
        }
    }

    fn consider(&mut self, path: &[TokenId], amount_out: u128) {
        let candidate = RouteQuote { tokens: path.to_vec(), amount_out };
        let better = match &self.best {
            None => true,
            Some(best) => {
                (candidate.amount_out, std::cmp::Reverse(candidate.hops()))
                    .cmp(&(best.amount_out, std::cmp::Reverse(best.hops())))
                    .then_with(|| best.tokens.cmp(&candidate.tokens))
                    .is_gt()
            }
        };
        if better {
            self.best = Some(candidate);
        }
    }
}
