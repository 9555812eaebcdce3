// The authoritative virtual balance map: (chain, account, token) -> amount.

use crate::data_structures::{BalanceKey, TokenId};
use crate::error::SwapError;
use std::collections::HashMap;
use std::sync::Mutex;

/// All balance mutations pass through one mutex, so `transfer` and the
/// settlement bookkeeping are atomic relative to every other mutation.
#[derive(Debug, Default)]
pub struct BalanceLedger {
    balances: Mutex<HashMap<BalanceKey, u128>>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn balance(&self, key: &BalanceKey) -> u128 {
        self.balances.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn credit(&self, key: &BalanceKey, amount: u128) -> Result<(), SwapError> {
        let mut balances = self.balances.lock().unwrap();
        let entry = balances.entry(key.clone()).or_insert(0);
        *entry = entry.checked_add(amount).ok_or(SwapError::InvalidAmount)?;
        Ok(())
    }

    pub fn debit(&self, key: &BalanceKey, amount: u128) -> Result<(), SwapError> {
        let mut balances = self.balances.lock().unwrap();
        let entry = balances.entry(key.clone()).or_insert(0);
        if *entry < amount {
            return Err(SwapError::InsufficientBalance(format!(
                "{}@{} {}",
                key.account.address, key.account.chain_id, key.token
            )));
        }
        *entry -= amount;
        Ok(())
    }

    /// Atomic debit+credit: both apply or neither does.
    pub fn transfer(&self, from: &BalanceKey, to: &BalanceKey, amount: u128) -> Result<(), SwapError> {
        let mut balances = self.balances.lock().unwrap();
        let from_balance = balances.get(from).copied().unwrap_or(0);
        if from_balance < amount {
            return Err(SwapError::InsufficientBalance(format!(
                "{}@{} {}",
                from.account.address, from.account.chain_id, from.token
            )));
        }
        let to_balance = balances.get(to).copied().unwrap_or(0);
        let to_balance = to_balance.checked_add(amount).ok_or(SwapError::InvalidAmount)?;
        balances.insert(from.clone(), from_balance - amount);
        balances.insert(to.clone(), to_balance);
        Ok(())
    }

    /// Sum of every entry holding `token`, across all chains and accounts.
    pub fn total_for_token(&self, token: &TokenId) -> u128 {
        self.balances
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| &k.token == token)
            .map(|(_, v)| v)
            .sum()
    }
}
