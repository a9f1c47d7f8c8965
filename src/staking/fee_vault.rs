//! Per-validator deposit-fee escrow
//!
//! Each validator owns one vault bonded to it at construction. Deposit fees
//! accumulate here; the validator's owner drains the full balance on
//! demand through the parent validator.

use crate::crypto::Address;
use crate::ledger::{LedgerError, TokenLedger};
use parking_lot::RwLock;
use primitive_types::U256;
use std::sync::Arc;

/// Fee-vault failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VaultError {
    #[error("caller is not the parent validator")]
    NotValidator,

    #[error("vault token already configured")]
    TokenAlreadySet,

    #[error("no fees to claim")]
    ZeroFee,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Escrow account for one validator's deposit fees.
pub struct FeeVault {
    /// The vault's own ledger address.
    address: Address,
    /// The only caller allowed to configure or drain the vault.
    parent: Address,
    token: RwLock<Option<Address>>,
    ledger: Arc<dyn TokenLedger>,
}

impl FeeVault {
    /// Create a vault bonded to `parent`. The vault address is derived from
    /// the parent so the pairing is reproducible.
    pub fn new(parent: Address, ledger: Arc<dyn TokenLedger>) -> Self {
        Self {
            address: Address::derive(&[b"fee_vault", parent.as_bytes()]),
            parent,
            token: RwLock::new(None),
            ledger,
        }
    }

    /// The vault's ledger address (destination for fee transfers).
    pub fn address(&self) -> Address {
        self.address
    }

    /// Configure the escrowed token. Once, by the parent validator.
    pub fn set_token(&self, caller: Address, token: Address) -> Result<(), VaultError> {
        if caller != self.parent {
            return Err(VaultError::NotValidator);
        }
        let mut slot = self.token.write();
        if slot.is_some() {
            return Err(VaultError::TokenAlreadySet);
        }
        *slot = Some(token);
        Ok(())
    }

    /// Current escrowed balance.
    pub fn balance(&self) -> U256 {
        match *self.token.read() {
            Some(token) => self.ledger.balance_of(token, self.address),
            None => U256::zero(),
        }
    }

    /// Drain the full escrowed balance to `recipient`. Parent-only.
    pub fn claim_fees_for(&self, caller: Address, recipient: Address) -> Result<U256, VaultError> {
        if caller != self.parent {
            return Err(VaultError::NotValidator);
        }

        let token = match *self.token.read() {
            Some(token) => token,
            None => return Err(VaultError::ZeroFee),
        };
        let amount = self.ledger.balance_of(token, self.address);
        if amount.is_zero() {
            return Err(VaultError::ZeroFee);
        }

        self.ledger.transfer(token, self.address, recipient, amount)?;
        Ok(amount)
    }
}
