//! Per-validator staking engine
//!
//! Each validator instance runs the full lock lifecycle: multi-period
//! reward accrual, boost accrual, time-weighted voting power on the master
//! tier, and the purchase-authorization gate for secondary tiers.

pub mod fee_vault;
pub mod state;
pub mod validator;

pub use fee_vault::{FeeVault, VaultError};
pub use state::{
    accrual_window, BoostReward, LockConfig, RewardPeriod, UserInfo, CLAIM_MAX_FEE,
    DEPOSIT_MAX_FEE, MAX_LOCK, MIN_LOCK, MULTIPLIER, PRECISION,
};
pub use validator::{StakingError, Validator, ValidatorParams};

use crate::crypto::Address;
use primitive_types::U256;

/// Capability handle onto the master validator.
///
/// The master is a process-wide singleton: governance reads voting power
/// from it and secondary validators consult and update its purchase
/// registry. Holding a handle instead of the concrete instance keeps the
/// mutual references between master, secondaries, and governance
/// dispatch-only.
pub trait MasterHandle: Send + Sync {
    /// The master validator's address.
    fn address(&self) -> Address;

    /// Time-decayed voting power of `user` right now.
    fn ve_balance(&self, user: Address) -> U256;

    /// Locked principal and auto-max flag of `user`.
    fn amount_and_auto_max(&self, user: Address) -> (U256, bool);

    /// Whether `user` already purchased a validator of `quality`.
    fn has_purchased(&self, user: Address, quality: u8) -> bool;

    /// Cumulative locked principal `user` has spent on purchases.
    fn purchase_costs(&self, user: Address) -> U256;

    /// Record a completed purchase of `quality`. Only factory-registered
    /// validators may call this.
    fn record_purchase(&self, caller: Address, user: Address, quality: u8)
        -> Result<(), StakingError>;

    /// Add `cost` to the user's cumulative purchase spend. Only
    /// factory-registered validators may call this.
    fn add_purchase_cost(&self, caller: Address, user: Address, cost: U256)
        -> Result<(), StakingError>;

    /// Governance-only deposit on behalf of `user` with tokens already at
    /// the master; bypasses the deposit fee and the inbound transfer.
    fn stake_for(&self, caller: Address, user: Address, amount: U256)
        -> Result<(), StakingError>;
}

/// Capability handle onto governance, held by the master validator.
pub trait GovernanceHandle: Send + Sync {
    /// Governance's own address.
    fn address(&self) -> Address;

    /// Zero the user's accumulated vote weight. Only the master validator
    /// may call this; it does so on withdraw and on extending an expired
    /// lock.
    fn reset_votes(&self, caller: Address, user: Address) -> Result<(), StakingError>;
}
