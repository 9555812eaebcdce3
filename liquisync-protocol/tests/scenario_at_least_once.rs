// Every packet delivered twice: the transport's at-least-once contract at
// its worst. Terminal outcomes and balances must match the clean run;
// escrow terminal no-ops, settlement outcome caching and router duplicate
// discarding together guarantee at-most-one net economic effect.

use liquisync_protocol::{
    cross_chain::TxPhase,
    data_structures::{BalanceKey, TokenId},
    error::SwapError,
    onchain::{LockState, SwapParams},
    simulation::{SimulationConfig, SimulationRuntime},
};
use std::time::Duration;

const CHAIN_A: u64 = 1;
const CHAIN_B: u64 = 2;

fn token(s: &str) -> TokenId {
    TokenId::new(s)
}

async fn duplicating_runtime(seed: u64) -> SimulationRuntime {
    let runtime = SimulationRuntime::start(SimulationConfig {
        relayer_duplicate_rate: 1.0,
        seed: Some(seed),
        ..Default::default()
    })
    .await;
    runtime.seed_pool(&token("X"), &token("Y"), 1_000_000, 1_000_000).unwrap();
    runtime.seed_pool(&token("Y"), &token("Z"), 1_000_000, 1_000_000).unwrap();
    runtime.seed_vault(CHAIN_B, &token("Z"), 500_000).unwrap();
    runtime.fund_user(CHAIN_A, "alice", &token("X"), 50_000);
    runtime
}

#[tokio::test]
async fn settlement_is_exactly_once_under_duplication() {
    let mut runtime = duplicating_runtime(201).await;

    let id = runtime
        .chain(CHAIN_A)
        .submit_swap(
            "alice",
            SwapParams {
                source_token: token("X"),
                amount_in: 10_000,
                dest_chain: CHAIN_B,
                dest_token: token("Z"),
                min_amount_out: 9_000,
                recipient: "bob".to_string(),
                request_id: None,
            },
        )
        .await
        .unwrap();
    assert!(runtime.wait_until_tracked(&id, Duration::from_secs(5)).await);
    assert!(runtime.quiesce(Duration::from_secs(10)).await, "simulation did not quiesce");

    // Identical to the clean run: one settle, one payout, one collect.
    let status = runtime.router.status(&id).unwrap();
    assert_eq!(status.phase, TxPhase::Settled);
    assert_eq!(status.amount_out, Some(9_745));

    let chain_a = runtime.chain(CHAIN_A);
    let chain_b = runtime.chain(CHAIN_B);
    assert_eq!(chain_a.balance("alice", &token("X")), 40_000);
    assert_eq!(chain_a.vault_balance(&token("X")), 10_000);
    assert_eq!(chain_b.balance("bob", &token("Z")), 9_745);
    assert_eq!(chain_b.vault_balance(&token("Z")), 500_000 - 9_745);
    assert_eq!(chain_a.lock_state(&token("X"), &id), Some(LockState::Released));

    // The pools moved exactly once: both sides of the vault mirror agree.
    for (chain, tok) in [(CHAIN_A, token("X")), (CHAIN_B, token("Z"))] {
        assert_eq!(
            runtime.engine.ledger().balance(&BalanceKey::vault(chain, tok.clone())),
            runtime.chain(chain).vault_balance(&tok),
            "chain {chain} token {tok}"
        );
    }

    let metrics = runtime.metrics();
    assert_eq!(metrics.settled, 1);
    assert_eq!(metrics.refunded, 0);
    assert_eq!(metrics.frozen, 0);
    // The settlement engine executed the route once, however many times the
    // request was delivered.
    assert_eq!(metrics.pool_swaps, 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn refund_is_exactly_once_under_duplication() {
    let mut runtime = duplicating_runtime(202).await;

    let id = runtime
        .chain(CHAIN_A)
        .submit_swap(
            "alice",
            SwapParams {
                source_token: token("X"),
                amount_in: 10_000,
                dest_chain: CHAIN_B,
                dest_token: token("Z"),
                min_amount_out: 9_800, // above the achievable 9_745
                recipient: "bob".to_string(),
                request_id: None,
            },
        )
        .await
        .unwrap();
    assert!(runtime.wait_until_tracked(&id, Duration::from_secs(5)).await);
    assert!(runtime.quiesce(Duration::from_secs(10)).await, "simulation did not quiesce");

    let status = runtime.router.status(&id).unwrap();
    assert_eq!(status.phase, TxPhase::Refunded);
    assert_eq!(status.failure, Some(SwapError::SlippageExceeded { best: 9_745, min: 9_800 }));

    // Refunded exactly once, not once per delivered refund instruction.
    let chain_a = runtime.chain(CHAIN_A);
    assert_eq!(chain_a.balance("alice", &token("X")), 50_000);
    assert_eq!(chain_a.lock_state(&token("X"), &id), Some(LockState::Refunded));
    assert_eq!(chain_a.locked_total(&token("X")), 0);
    assert_eq!(runtime.chain(CHAIN_B).balance("bob", &token("Z")), 0);

    let metrics = runtime.metrics();
    assert_eq!(metrics.refunded, 1);
    assert_eq!(metrics.frozen, 0);

    runtime.shutdown().await;
}

#[tokio::test]
async fn back_to_back_swaps_under_duplication_conserve_totals() {
    let mut runtime = duplicating_runtime(203).await;

    let mut settled_out = 0u128;
    for _ in 0..3 {
        let id = runtime
            .chain(CHAIN_A)
            .submit_swap(
                "alice",
                SwapParams {
                    source_token: token("X"),
                    amount_in: 5_000,
                    dest_chain: CHAIN_B,
                    dest_token: token("Z"),
                    min_amount_out: 1,
                    recipient: "bob".to_string(),
                    request_id: None,
                },
            )
            .await
            .unwrap();
        assert!(runtime.wait_until_tracked(&id, Duration::from_secs(5)).await);
        assert!(runtime.quiesce(Duration::from_secs(10)).await);
        let status = runtime.router.status(&id).unwrap();
        assert_eq!(status.phase, TxPhase::Settled);
        settled_out += status.amount_out.unwrap();
    }

    let chain_a = runtime.chain(CHAIN_A);
    let chain_b = runtime.chain(CHAIN_B);
    assert_eq!(chain_a.balance("alice", &token("X")), 50_000 - 3 * 5_000);
    assert_eq!(chain_a.vault_balance(&token("X")), 3 * 5_000);
    assert_eq!(chain_b.balance("bob", &token("Z")), settled_out);
    assert_eq!(chain_b.vault_balance(&token("Z")), 500_000 - settled_out);

    let metrics = runtime.metrics();
    assert_eq!(metrics.settled, 3);
    assert_eq!(metrics.pool_swaps, 3);
    assert_eq!(metrics.frozen, 0);

    runtime.shutdown().await;
}
