//! Staking engine state records and constants
//!
//! The persisted shapes: per-user lock bookkeeping, append-only reward
//! periods, and the boost-period rows fed by governance. Reward math keys
//! off `acc_token_per_share`, a running sum of reward-per-unit-stake scaled
//! by `PRECISION`.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Accumulator scale for `acc_token_per_share`.
pub const PRECISION: u64 = 1_000_000_000_000;

/// Token decimals scale; quality thresholds are stored as whole tokens and
/// multiplied by this at comparison sites.
pub const MULTIPLIER: u64 = 1_000_000_000_000_000_000;

/// Deposit fee cap, basis points (1.00%).
pub const DEPOSIT_MAX_FEE: u64 = 100;

/// Claim fee cap, basis points (5.00%).
pub const CLAIM_MAX_FEE: u64 = 500;

/// Shortest accepted lock duration (7 days).
pub const MIN_LOCK: u64 = 7 * 24 * 60 * 60;

/// Longest accepted lock duration (4 years), also the veBalance horizon.
pub const MAX_LOCK: u64 = 4 * 365 * 24 * 60 * 60;

/// Lock-duration window a validator enforces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LockConfig {
    /// Minimum lock duration in seconds.
    pub min_lock: u64,
    /// Maximum lock duration in seconds; the auto-max horizon.
    pub max_lock: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            min_lock: MIN_LOCK,
            max_lock: MAX_LOCK,
        }
    }
}

/// Per-user lock and reward-debt bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfo {
    /// Staked principal, net of the deposit fee.
    pub amount: U256,
    /// When the current lock was opened.
    pub lock_start_time: u64,
    /// When the current lock expires. With `auto_max` set the effective end
    /// is always `now + max_lock` regardless of this field.
    pub lock_end_time: u64,
    /// Integrated already-counted share across started reward periods.
    pub reward_debt: U256,
    /// Same, for the boost accumulator series.
    pub boost_debt: U256,
    /// Auto-renewing max-lock flag.
    pub auto_max: bool,
}

impl UserInfo {
    /// Whether this record represents a live lock.
    pub fn has_lock(&self) -> bool {
        !self.amount.is_zero() || self.lock_start_time > 0
    }

    /// Serialize to bytes.
    pub fn pack(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// Deserialize from bytes.
    pub fn unpack(data: &[u8]) -> Option<Self> {
        bincode::deserialize(data).ok()
    }
}

/// One admin-scheduled reward window with linear per-second release.
///
/// Periods are append-only and non-overlapping: each new period must start
/// after the previous one ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardPeriod {
    pub start_time: u64,
    pub end_time: u64,
    /// Fixed total released linearly over `[start_time, end_time]`.
    pub total_reward: U256,
    /// Running accumulator, scaled by `PRECISION`.
    pub acc_token_per_share: U256,
    /// High-water mark of accrual inside `[start_time, end_time]`.
    pub last_reward_time: u64,
    /// Cleared once the tail update has closed the period.
    pub is_active: bool,
}

impl RewardPeriod {
    /// Open a new period. Callers validate the window ordering.
    pub fn new(start_time: u64, end_time: u64, total_reward: U256) -> Self {
        Self {
            start_time,
            end_time,
            total_reward,
            acc_token_per_share: U256::zero(),
            last_reward_time: start_time,
            is_active: true,
        }
    }

    /// Per-second release rate, truncating. Dust from the truncation stays
    /// in the validator's balance.
    pub fn reward_rate(&self) -> U256 {
        let span = self.end_time.saturating_sub(self.start_time);
        if span == 0 {
            return U256::zero();
        }
        self.total_reward / U256::from(span)
    }

    /// Whether accrual has begun by `now`.
    pub fn started(&self, now: u64) -> bool {
        now >= self.start_time
    }

    /// Serialize to bytes.
    pub fn pack(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// Deserialize from bytes.
    pub fn unpack(data: &[u8]) -> Option<Self> {
        bincode::deserialize(data).ok()
    }
}

/// Governance-fed boost window; same accrual shape as [`RewardPeriod`],
/// appended by boost distribution instead of admin scheduling.
pub type BoostReward = RewardPeriod;

/// Seconds of accrual between `last` and `now`, clamped to the period end.
pub fn accrual_window(last: u64, now: u64, end: u64) -> u64 {
    if now <= last {
        return 0;
    }
    now.min(end).saturating_sub(last)
}
