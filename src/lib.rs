//! # Tierstake
//!
//! Core accounting engine of a tiered, time-locked staking protocol with
//! governance-driven reward boosting.
//!
//! ## Core Features
//! - Per-validator staking engine with multi-period accumulator rewards
//! - Time-weighted voting power (veBalance) on the master tier
//! - Auto-renewing max-lock semantics and deterministic fee arithmetic
//! - Governance proposals with veBalance-bounded weighted voting
//! - Proportional boost-reward distribution across the validator fleet
//! - Deterministic validator creation keyed by (quality, owner, id)
//!
//! Token transfers, signature recovery, and the clock are external
//! collaborators behind small traits; given the same operation sequence
//! and clock, the engine produces exact, reproducible balances, rewards,
//! and voting weights.

pub mod clock;
pub mod crypto;
pub mod events;
pub mod factory;
pub mod governance;
pub mod ledger;
pub mod math;
pub mod staking;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::recover::{purchase_digest, Signature, SignatureOracle, StaticOracle};
pub use crypto::{Address, Hash};
pub use events::{Event, EventLog};
pub use factory::{Factory, FactoryConfig, FactoryError};
pub use governance::{Governance, GovernanceConfig, GovernanceError, Proposal, ProposalStatus};
pub use ledger::{InMemoryLedger, LedgerError, TokenLedger};
pub use staking::{
    FeeVault, GovernanceHandle, LockConfig, MasterHandle, RewardPeriod, StakingError, UserInfo,
    Validator, ValidatorParams, VaultError, MAX_LOCK, MIN_LOCK, MULTIPLIER, PRECISION,
};
