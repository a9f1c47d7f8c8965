//! Token ledger abstraction
//!
//! The engine never owns token mechanics; it only asks an external ledger
//! to move balances. Transfers are synchronous and either complete fully or
//! fail without effect, which is what lets entry points order their
//! fallible external calls ahead of dependent state writes.

use crate::crypto::Address;
use parking_lot::RwLock;
use primitive_types::U256;
use std::collections::HashMap;

/// Ledger failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient token balance")]
    InsufficientBalance,

    #[error("token amount overflow")]
    BalanceOverflow,
}

/// ERC-20-shaped balance and transfer primitive external to the core.
pub trait TokenLedger: Send + Sync {
    /// Move `amount` of `token` from `from` to `to`.
    fn transfer(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError>;

    /// Move `amount` of `token` on behalf of `from`. The core is a trusted
    /// operator; allowance bookkeeping stays outside it.
    fn transfer_from(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError>;

    /// Current balance of `who` in `token`.
    fn balance_of(&self, token: Address, who: Address) -> U256;
}

/// In-memory ledger for tests and simulation.
#[derive(Default)]
pub struct InMemoryLedger {
    balances: RwLock<HashMap<(Address, Address), U256>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `who` with `amount` of `token`.
    pub fn mint(&self, token: Address, who: Address, amount: U256) {
        let mut balances = self.balances.write();
        let entry = balances.entry((token, who)).or_insert_with(U256::zero);
        *entry = entry.saturating_add(amount);
    }

    fn do_transfer(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Ok(());
        }

        let mut balances = self.balances.write();
        let from_balance = balances.get(&(token, from)).copied().unwrap_or_default();
        if from_balance < amount {
            return Err(LedgerError::InsufficientBalance);
        }

        let to_balance = balances.get(&(token, to)).copied().unwrap_or_default();
        let new_to = to_balance
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow)?;

        balances.insert((token, from), from_balance - amount);
        balances.insert((token, to), new_to);
        Ok(())
    }
}

impl TokenLedger for InMemoryLedger {
    fn transfer(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        self.do_transfer(token, from, to, amount)
    }

    fn transfer_from(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        self.do_transfer(token, from, to, amount)
    }

    fn balance_of(&self, token: Address, who: Address) -> U256 {
        self.balances
            .read()
            .get(&(token, who))
            .copied()
            .unwrap_or_default()
    }
}
