//! Per-validator staking engine
//!
//! Handles:
//! - Lock lifecycle (create, increase, extend, auto-max, withdraw)
//! - Multi-period base-reward accrual and boost-reward accrual
//! - Claim with fee split and reward-debt rewrite
//! - Time-weighted voting power on the master tier
//! - Purchase-authorization gate for secondary tiers
//!
//! Every public entry point executes under one write lock over the
//! validator's mutable state, so callers observe operations atomically.
//! The validator never holds its own lock while calling into governance;
//! governance in turn never holds its lock while calling back in, which
//! keeps the cross-component lock order acyclic.

use super::fee_vault::{FeeVault, VaultError};
use super::state::{
    accrual_window, BoostReward, LockConfig, RewardPeriod, UserInfo, CLAIM_MAX_FEE,
    DEPOSIT_MAX_FEE, MULTIPLIER, PRECISION,
};
use super::{GovernanceHandle, MasterHandle};
use crate::crypto::recover::{purchase_digest, Signature, SignatureOracle};
use crate::crypto::Address;
use crate::events::{Event, EventLog};
use crate::factory::{Factory, FactoryError};
use crate::ledger::{LedgerError, TokenLedger};
use crate::math::{bps_of, mul_div};
use crate::clock::Clock;
use parking_lot::RwLock;
use primitive_types::U256;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Master tier label; the single quality with voting power.
pub const MASTER_QUALITY: u8 = 1;

/// Staking engine failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StakingError {
    #[error("caller is not the admin")]
    NotAdmin,

    #[error("caller is not the validator owner")]
    NotOwner,

    #[error("caller is not the pauser")]
    NotPauser,

    #[error("caller is not governance")]
    NotGovernance,

    #[error("not the expected master validator")]
    NotValidator,

    #[error("caller is not a registered validator")]
    NotRegisteredValidator,

    #[error("validator is paused")]
    ContractPaused,

    #[error("amount is zero")]
    ZeroAmount,

    #[error("lock duration out of range")]
    WrongDuration,

    #[error("user already has an active lock")]
    AlreadyLocked,

    #[error("no lock created")]
    NoLockCreated,

    #[error("lock has already expired")]
    LockTimeExceeded,

    #[error("lock has not expired yet")]
    TimeNotUp,

    #[error("auto-max is enabled")]
    AutoMaxTime,

    #[error("auto-max is not enabled")]
    AutoMaxNotEnabled,

    #[error("new lock end exceeds the maximum lock window")]
    GreaterThanMaxTime,

    #[error("value unchanged")]
    TheSameValue,

    #[error("fee exceeds the cap")]
    FeeTooHigh,

    #[error("factory already set")]
    FactoryAlreadySet,

    #[error("reward period must start in the future")]
    StartTimeNotInFuture,

    #[error("reward period must end after it starts")]
    EndTimeBeforeStartTime,

    #[error("reward period must start after the previous one ends")]
    StartTimeNotAsExpected,

    #[error("total reward is zero")]
    InvalidTotalReward,

    #[error("boost window is invalid")]
    WrongBoostTime,

    #[error("boost reward is zero")]
    InvalidBoostReward,

    #[error("purchase authorization expired")]
    SignatureExpired,

    #[error("np points are zero")]
    InsufficientNPPoint,

    #[error("quality mismatch")]
    QualityWrong,

    #[error("validator already claimed")]
    ValidatorIsClaimed,

    #[error("quality already purchased by this user")]
    AlreadyPurchasedThisQuality,

    #[error("locked amount below the purchase threshold")]
    InsufficientLockAmount,

    #[error("signature does not recover to the verifier")]
    VerificationFailed,

    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Factory(#[from] FactoryError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Construction parameters, normally filled in by the factory.
#[derive(Debug, Clone)]
pub struct ValidatorParams {
    pub address: Address,
    pub token: Address,
    pub quality: u8,
    pub id: u64,
    pub quality_count: u64,
    pub chain_id: u64,
    pub admin: Address,
    pub pauser: Address,
    pub owner: Address,
    pub verifier: Address,
    pub deposit_fee: u64,
    pub claim_fee: u64,
    pub lock: LockConfig,
}

/// Mutable engine state, guarded as a unit.
struct ValidatorState {
    owner: Address,
    verifier: Address,
    name: String,
    is_claimed: bool,
    is_paused: bool,
    deposit_fee: u64,
    claim_fee: u64,
    total_staked: U256,
    users: HashMap<Address, UserInfo>,
    reward_periods: Vec<RewardPeriod>,
    boost_rewards: Vec<BoostReward>,
    /// Master-only purchase registry: qualities each user has bought.
    have_purchased: HashMap<Address, HashSet<u8>>,
    /// Master-only: cumulative locked principal spent on purchases.
    purchase_costs: HashMap<Address, U256>,
}

/// One validator instance of the staking fleet.
pub struct Validator {
    address: Address,
    token: Address,
    quality: u8,
    id: u64,
    quality_count: u64,
    chain_id: u64,
    admin: Address,
    pauser: Address,
    lock: LockConfig,
    clock: Arc<dyn Clock>,
    ledger: Arc<dyn TokenLedger>,
    oracle: Arc<dyn SignatureOracle>,
    fee_vault: FeeVault,
    factory: RwLock<Option<Arc<Factory>>>,
    master: RwLock<Option<Arc<dyn MasterHandle>>>,
    governance: RwLock<Option<Arc<dyn GovernanceHandle>>>,
    state: RwLock<ValidatorState>,
    events: EventLog,
}

impl Validator {
    /// Create a validator. Master-tier instances come up claimed; secondary
    /// tiers stay unclaimed until purchased.
    pub fn new(
        params: ValidatorParams,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn TokenLedger>,
        oracle: Arc<dyn SignatureOracle>,
    ) -> Result<Self, StakingError> {
        if params.deposit_fee > DEPOSIT_MAX_FEE || params.claim_fee > CLAIM_MAX_FEE {
            return Err(StakingError::FeeTooHigh);
        }

        let fee_vault = FeeVault::new(params.address, Arc::clone(&ledger));
        fee_vault.set_token(params.address, params.token)?;

        Ok(Self {
            address: params.address,
            token: params.token,
            quality: params.quality,
            id: params.id,
            quality_count: params.quality_count,
            chain_id: params.chain_id,
            admin: params.admin,
            pauser: params.pauser,
            lock: params.lock,
            clock,
            ledger,
            oracle,
            fee_vault,
            factory: RwLock::new(None),
            master: RwLock::new(None),
            governance: RwLock::new(None),
            state: RwLock::new(ValidatorState {
                owner: params.owner,
                verifier: params.verifier,
                name: String::new(),
                is_claimed: params.quality == MASTER_QUALITY,
                is_paused: false,
                deposit_fee: params.deposit_fee,
                claim_fee: params.claim_fee,
                total_staked: U256::zero(),
                users: HashMap::new(),
                reward_periods: Vec::new(),
                boost_rewards: Vec::new(),
                have_purchased: HashMap::new(),
                purchase_costs: HashMap::new(),
            }),
            events: EventLog::new(),
        })
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    /// Bond to the factory. Once.
    pub fn set_factory(&self, factory: Arc<Factory>) -> Result<(), StakingError> {
        let mut slot = self.factory.write();
        if slot.is_some() {
            return Err(StakingError::FactoryAlreadySet);
        }
        *slot = Some(factory);
        Ok(())
    }

    /// Point this validator at the master singleton. Admin-only.
    pub fn set_master_validator(
        &self,
        caller: Address,
        master: Arc<dyn MasterHandle>,
    ) -> Result<(), StakingError> {
        self.ensure_admin(caller)?;
        *self.master.write() = Some(master);
        Ok(())
    }

    /// Wire the governance handle. Admin-only.
    pub fn set_governance(
        &self,
        caller: Address,
        governance: Arc<dyn GovernanceHandle>,
    ) -> Result<(), StakingError> {
        self.ensure_admin(caller)?;
        *self.governance.write() = Some(governance);
        Ok(())
    }

    fn factory(&self) -> Option<Arc<Factory>> {
        self.factory.read().clone()
    }

    fn master(&self) -> Option<Arc<dyn MasterHandle>> {
        self.master.read().clone()
    }

    fn governance(&self) -> Option<Arc<dyn GovernanceHandle>> {
        self.governance.read().clone()
    }

    // ------------------------------------------------------------------
    // User entry points
    // ------------------------------------------------------------------

    /// Open a new lock of `amount` tokens for `duration` seconds.
    pub fn create_lock(
        &self,
        caller: Address,
        amount: U256,
        duration: u64,
    ) -> Result<(), StakingError> {
        let now = self.clock.now();
        let mut state = self.state.write();
        Self::ensure_not_paused(&state)?;

        if amount.is_zero() {
            return Err(StakingError::ZeroAmount);
        }
        if duration < self.lock.min_lock || duration > self.lock.max_lock {
            return Err(StakingError::WrongDuration);
        }
        if state
            .users
            .get(&caller)
            .map(UserInfo::has_lock)
            .unwrap_or(false)
        {
            return Err(StakingError::AlreadyLocked);
        }

        if let Some(factory) = self.factory() {
            factory.add_total_staked_wallet(self.address)?;
        }
        self.deposit_locked(&mut state, caller, caller, amount, duration, false, now)
    }

    /// Add principal to an existing, unexpired lock.
    pub fn increase_amount(&self, caller: Address, amount: U256) -> Result<(), StakingError> {
        let now = self.clock.now();
        let mut state = self.state.write();
        Self::ensure_not_paused(&state)?;

        if amount.is_zero() {
            return Err(StakingError::ZeroAmount);
        }
        let user = state
            .users
            .get(&caller)
            .cloned()
            .ok_or(StakingError::NoLockCreated)?;
        if user.amount.is_zero() {
            return Err(StakingError::NoLockCreated);
        }
        if !user.auto_max && now > user.lock_end_time {
            return Err(StakingError::LockTimeExceeded);
        }

        self.deposit_locked(&mut state, caller, caller, amount, 0, false, now)
    }

    /// Push the lock end further out. The new end counts from the later of
    /// `now` and the current end, and may not exceed `now + max_lock`.
    pub fn extend_duration(&self, caller: Address, duration: u64) -> Result<(), StakingError> {
        let now = self.clock.now();
        let expired;
        {
            let state = self.state.read();
            Self::ensure_not_paused(&state)?;

            if duration == 0 || duration > self.lock.max_lock {
                return Err(StakingError::WrongDuration);
            }
            let user = state
                .users
                .get(&caller)
                .cloned()
                .ok_or(StakingError::NoLockCreated)?;
            if user.amount.is_zero() {
                return Err(StakingError::NoLockCreated);
            }
            if user.auto_max {
                return Err(StakingError::AutoMaxTime);
            }

            let base = user.lock_end_time.max(now);
            let new_end = base.saturating_add(duration);
            if new_end > now.saturating_add(self.lock.max_lock) {
                return Err(StakingError::GreaterThanMaxTime);
            }
            expired = now > user.lock_end_time;
        }

        // Extending a lapsed lock restores voting power from scratch.
        if expired && self.quality == MASTER_QUALITY {
            if let Some(governance) = self.governance() {
                governance.reset_votes(self.address, caller)?;
            }
        }

        let mut state = self.state.write();
        self.deposit_locked(&mut state, caller, caller, U256::zero(), duration, false, now)
    }

    /// Pay out pending base and boost rewards and rewrite the user's debts.
    pub fn claim(&self, caller: Address) -> Result<(), StakingError> {
        let now = self.clock.now();
        let mut state = self.state.write();
        Self::ensure_not_paused(&state)?;

        let has_principal = state
            .users
            .get(&caller)
            .map(|u| !u.amount.is_zero())
            .unwrap_or(false);
        if !has_principal {
            return Err(StakingError::NoLockCreated);
        }

        self.claim_locked(&mut state, caller, now)
    }

    /// Close the lock after expiry: full claim, principal back, record
    /// zeroed, votes reset on the master tier.
    pub fn withdraw(&self, caller: Address) -> Result<(), StakingError> {
        let now = self.clock.now();
        {
            let mut state = self.state.write();
            Self::ensure_not_paused(&state)?;

            let user = state.users.get(&caller).cloned().unwrap_or_default();
            if user.amount.is_zero() {
                return Err(StakingError::ZeroAmount);
            }
            if now < user.lock_end_time {
                return Err(StakingError::TimeNotUp);
            }
            if user.auto_max {
                return Err(StakingError::AutoMaxTime);
            }

            self.claim_locked(&mut state, caller, now)?;

            let amount = user.amount;
            self.ledger
                .transfer(self.token, self.address, caller, amount)?;
            state.total_staked = state
                .total_staked
                .checked_sub(amount)
                .ok_or(StakingError::ArithmeticOverflow)?;
            state.users.remove(&caller);

            if let Some(factory) = self.factory() {
                factory.sub_total_staked_amount(self.address, amount)?;
                factory.sub_total_staked_wallet(self.address)?;
            }

            self.events.emit(Event::Withdraw {
                user: caller,
                amount,
                now,
            });
        }

        if self.quality == MASTER_QUALITY {
            if let Some(governance) = self.governance() {
                governance.reset_votes(self.address, caller)?;
            }
        }
        Ok(())
    }

    /// Arm or disarm the auto-renewing max lock. Either way the lock end
    /// snaps to `now + max_lock`.
    pub fn set_auto_max(&self, caller: Address, flag: bool) -> Result<(), StakingError> {
        let now = self.clock.now();
        let mut state = self.state.write();
        Self::ensure_not_paused(&state)?;

        let max_lock = self.lock.max_lock;
        let user = state
            .users
            .get_mut(&caller)
            .ok_or(StakingError::NoLockCreated)?;
        if user.amount.is_zero() {
            return Err(StakingError::NoLockCreated);
        }
        if user.auto_max == flag {
            return Err(StakingError::TheSameValue);
        }

        user.auto_max = flag;
        user.lock_end_time = now.saturating_add(max_lock);

        self.events.emit(Event::SetAutoMax { user: caller, flag });
        Ok(())
    }

    /// Claim a secondary validator with an authorized purchase signature.
    pub fn purchase_validator(
        &self,
        caller: Address,
        np: U256,
        quality: u8,
        deadline: u64,
        signature: &Signature,
    ) -> Result<(), StakingError> {
        let now = self.clock.now();
        let mut state = self.state.write();
        Self::ensure_not_paused(&state)?;

        if deadline < now {
            return Err(StakingError::SignatureExpired);
        }
        if np.is_zero() {
            return Err(StakingError::InsufficientNPPoint);
        }
        if self.quality == MASTER_QUALITY || quality != self.quality {
            return Err(StakingError::QualityWrong);
        }
        if state.is_claimed {
            return Err(StakingError::ValidatorIsClaimed);
        }

        let master = self.master().ok_or(StakingError::NotValidator)?;
        if master.has_purchased(caller, quality) {
            return Err(StakingError::AlreadyPurchasedThisQuality);
        }
        let (locked, auto_max) = master.amount_and_auto_max(caller);
        if !auto_max {
            return Err(StakingError::AutoMaxNotEnabled);
        }

        let factory = self.factory().ok_or(StakingError::NotRegisteredValidator)?;
        let required = factory
            .min_amount_for_quality(quality)
            .checked_mul(U256::from(MULTIPLIER))
            .ok_or(StakingError::ArithmeticOverflow)?;
        let threshold = required
            .checked_add(master.purchase_costs(caller))
            .ok_or(StakingError::ArithmeticOverflow)?;
        if locked < threshold {
            return Err(StakingError::InsufficientLockAmount);
        }

        let digest = purchase_digest(np, self.address, deadline, self.chain_id, caller, quality);
        let recovered = self
            .oracle
            .recover(&digest, signature)
            .ok_or(StakingError::VerificationFailed)?;
        if recovered != state.verifier {
            return Err(StakingError::VerificationFailed);
        }

        state.is_claimed = true;
        state.owner = caller;
        master.record_purchase(self.address, caller, quality)?;
        master.add_purchase_cost(self.address, caller, required)?;

        debug!(validator = %self.address, user = %caller, quality, "validator purchased");
        self.events.emit(Event::PurchaseValidator {
            user: caller,
            np,
            quality,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Governance entry points
    // ------------------------------------------------------------------

    /// Open a boost accrual window. Governance-only; the boost tokens are
    /// already at this validator when the call arrives.
    pub fn add_boost_reward(
        &self,
        caller: Address,
        start_time: u64,
        end_time: u64,
        total_reward: U256,
    ) -> Result<(), StakingError> {
        let governance = self.governance().ok_or(StakingError::NotGovernance)?;
        if caller != governance.address() {
            return Err(StakingError::NotGovernance);
        }

        let now = self.clock.now();
        if total_reward.is_zero() {
            return Err(StakingError::InvalidBoostReward);
        }
        if start_time >= end_time || start_time < now {
            return Err(StakingError::WrongBoostTime);
        }

        let mut state = self.state.write();
        state
            .boost_rewards
            .push(BoostReward::new(start_time, end_time, total_reward));

        self.events.emit(Event::BoostRewardAdded {
            start: start_time,
            end: end_time,
            total: total_reward,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Admin / owner / pauser surface
    // ------------------------------------------------------------------

    /// Schedule the next reward period. Admin-only; periods are append-only
    /// and strictly ordered.
    pub fn set_reward_period(
        &self,
        caller: Address,
        start_time: u64,
        end_time: u64,
        total_reward: U256,
    ) -> Result<(), StakingError> {
        self.ensure_admin(caller)?;
        let now = self.clock.now();

        if start_time <= now {
            return Err(StakingError::StartTimeNotInFuture);
        }
        if end_time <= start_time {
            return Err(StakingError::EndTimeBeforeStartTime);
        }
        if total_reward.is_zero() {
            return Err(StakingError::InvalidTotalReward);
        }

        let mut state = self.state.write();
        if let Some(last) = state.reward_periods.last() {
            if start_time <= last.end_time {
                return Err(StakingError::StartTimeNotAsExpected);
            }
        }
        state
            .reward_periods
            .push(RewardPeriod::new(start_time, end_time, total_reward));
        drop(state);

        if let Some(factory) = self.factory() {
            factory.add_total_validators(self.address, start_time, end_time, total_reward)?;
        }

        debug!(validator = %self.address, start_time, end_time, "reward period scheduled");
        Ok(())
    }

    /// Replace the purchase verifier. Admin-only.
    pub fn set_verifier(&self, caller: Address, verifier: Address) -> Result<(), StakingError> {
        self.ensure_admin(caller)?;
        self.state.write().verifier = verifier;
        Ok(())
    }

    /// Rename the validator. Admin-only.
    pub fn set_name(&self, caller: Address, name: String) -> Result<(), StakingError> {
        self.ensure_admin(caller)?;
        self.state.write().name = name;
        Ok(())
    }

    /// Toggle the pause flag. Pauser-only.
    pub fn set_pause(&self, caller: Address, paused: bool) -> Result<(), StakingError> {
        if caller != self.pauser {
            return Err(StakingError::NotPauser);
        }
        let mut state = self.state.write();
        if state.is_paused == paused {
            return Err(StakingError::TheSameValue);
        }
        state.is_paused = paused;
        Ok(())
    }

    /// Set the deposit fee in basis points. Owner-only, capped.
    pub fn set_deposit_fee(&self, caller: Address, fee: u64) -> Result<(), StakingError> {
        let mut state = self.state.write();
        if caller != state.owner {
            return Err(StakingError::NotOwner);
        }
        if fee > DEPOSIT_MAX_FEE {
            return Err(StakingError::FeeTooHigh);
        }
        state.deposit_fee = fee;
        Ok(())
    }

    /// Set the claim fee in basis points. Owner-only, capped.
    pub fn set_claim_fee(&self, caller: Address, fee: u64) -> Result<(), StakingError> {
        let mut state = self.state.write();
        if caller != state.owner {
            return Err(StakingError::NotOwner);
        }
        if fee > CLAIM_MAX_FEE {
            return Err(StakingError::FeeTooHigh);
        }
        state.claim_fee = fee;
        Ok(())
    }

    /// Drain the deposit-fee escrow to the owner. Owner-only.
    pub fn claim_fees(&self, caller: Address) -> Result<U256, StakingError> {
        let owner = self.state.read().owner;
        if caller != owner {
            return Err(StakingError::NotOwner);
        }
        let amount = self.fee_vault.claim_fees_for(self.address, owner)?;
        self.events.emit(Event::FeesClaimed {
            recipient: owner,
            amount,
        });
        Ok(amount)
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn token(&self) -> Address {
        self.token
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn quality_count(&self) -> u64 {
        self.quality_count
    }

    pub fn owner(&self) -> Address {
        self.state.read().owner
    }

    pub fn name(&self) -> String {
        self.state.read().name.clone()
    }

    pub fn is_claimed(&self) -> bool {
        self.state.read().is_claimed
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().is_paused
    }

    pub fn deposit_fee(&self) -> u64 {
        self.state.read().deposit_fee
    }

    pub fn claim_fee(&self) -> u64 {
        self.state.read().claim_fee
    }

    pub fn total_staked(&self) -> U256 {
        self.state.read().total_staked
    }

    pub fn fee_vault(&self) -> &FeeVault {
        &self.fee_vault
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// The user's lock record, if any.
    pub fn user_info(&self, user: Address) -> Option<UserInfo> {
        self.state.read().users.get(&user).cloned()
    }

    pub fn reward_period_count(&self) -> usize {
        self.state.read().reward_periods.len()
    }

    pub fn boost_reward_count(&self) -> usize {
        self.state.read().boost_rewards.len()
    }

    /// Snapshot of one reward period.
    pub fn reward_period(&self, index: usize) -> Option<RewardPeriod> {
        self.state.read().reward_periods.get(index).cloned()
    }

    /// Sum of all boost pools ever added.
    pub fn boost_total(&self) -> U256 {
        let state = self.state.read();
        state
            .boost_rewards
            .iter()
            .fold(U256::zero(), |acc, b| acc.saturating_add(b.total_reward))
    }

    /// Locked principal and auto-max flag.
    pub fn amount_and_auto_max(&self, user: Address) -> (U256, bool) {
        self.state
            .read()
            .users
            .get(&user)
            .map(|u| (u.amount, u.auto_max))
            .unwrap_or((U256::zero(), false))
    }

    /// Time-decayed voting power; zero on every non-master tier.
    pub fn ve_balance(&self, user: Address) -> U256 {
        if self.quality != MASTER_QUALITY {
            return U256::zero();
        }
        let now = self.clock.now();
        let state = self.state.read();
        let user = match state.users.get(&user) {
            Some(user) => user,
            None => return U256::zero(),
        };
        if user.amount.is_zero() {
            return U256::zero();
        }

        let effective_end = if user.auto_max {
            now.saturating_add(self.lock.max_lock)
        } else {
            user.lock_end_time
        };
        if now >= effective_end {
            return U256::zero();
        }

        mul_div(
            user.amount,
            U256::from(effective_end - now),
            U256::from(self.lock.max_lock),
        )
        .unwrap_or_default()
    }

    /// Pending base reward, projected to `now` without mutating.
    pub fn get_user_pending_reward(&self, user: Address) -> U256 {
        let now = self.clock.now();
        let state = self.state.read();
        let info = match state.users.get(&user) {
            Some(info) => info.clone(),
            None => return U256::zero(),
        };
        Self::projected_pending(
            &state.reward_periods,
            state.total_staked,
            info.amount,
            info.reward_debt,
            now,
        )
    }

    /// Pending boost reward, projected to `now` without mutating.
    pub fn get_user_pending_boost(&self, user: Address) -> U256 {
        let now = self.clock.now();
        let state = self.state.read();
        let info = match state.users.get(&user) {
            Some(info) => info.clone(),
            None => return U256::zero(),
        };
        Self::projected_pending(
            &state.boost_rewards,
            state.total_staked,
            info.amount,
            info.boost_debt,
            now,
        )
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_admin(&self, caller: Address) -> Result<(), StakingError> {
        if caller != self.admin {
            return Err(StakingError::NotAdmin);
        }
        Ok(())
    }

    fn ensure_not_paused(state: &ValidatorState) -> Result<(), StakingError> {
        if state.is_paused {
            return Err(StakingError::ContractPaused);
        }
        Ok(())
    }

    /// Walk the period table: accrue each started, still-open period up to
    /// `now` and close the ones whose end has passed.
    fn update_periods(
        periods: &mut [RewardPeriod],
        total_staked: U256,
        now: u64,
    ) -> Result<(), StakingError> {
        for period in periods.iter_mut() {
            if period.last_reward_time >= now || !period.is_active {
                continue;
            }

            if !total_staked.is_zero() {
                let window = accrual_window(period.last_reward_time, now, period.end_time);
                if window > 0 {
                    let released = period
                        .reward_rate()
                        .checked_mul(U256::from(window))
                        .ok_or(StakingError::ArithmeticOverflow)?;
                    let delta = mul_div(released, U256::from(PRECISION), total_staked)
                        .ok_or(StakingError::ArithmeticOverflow)?;
                    period.acc_token_per_share = period
                        .acc_token_per_share
                        .checked_add(delta)
                        .ok_or(StakingError::ArithmeticOverflow)?;
                }
            }

            if now >= period.end_time {
                period.is_active = false;
                period.last_reward_time = period.end_time;
            } else {
                period.last_reward_time = now;
            }
        }
        Ok(())
    }

    /// `Σ amount * acc_i / PRECISION` over the periods that have started.
    fn integrated_share(
        periods: &[RewardPeriod],
        amount: U256,
        now: u64,
    ) -> Result<U256, StakingError> {
        let mut sum = U256::zero();
        for period in periods {
            if !period.started(now) {
                continue;
            }
            let term = mul_div(amount, period.acc_token_per_share, U256::from(PRECISION))
                .ok_or(StakingError::ArithmeticOverflow)?;
            sum = sum
                .checked_add(term)
                .ok_or(StakingError::ArithmeticOverflow)?;
        }
        Ok(sum)
    }

    /// View-side pending: simulates the accrual walk without writing. Stops
    /// at the first period it cannot accrue (empty pool), falling back to
    /// the materialized accumulators.
    fn projected_pending(
        periods: &[RewardPeriod],
        total_staked: U256,
        amount: U256,
        debt: U256,
        now: u64,
    ) -> U256 {
        let mut sum = U256::zero();
        for period in periods {
            if !period.started(now) {
                continue;
            }
            let mut acc = period.acc_token_per_share;
            if period.is_active && period.last_reward_time < now {
                if total_staked.is_zero() {
                    break;
                }
                let window = accrual_window(period.last_reward_time, now, period.end_time);
                let released = period.reward_rate().saturating_mul(U256::from(window));
                let delta =
                    mul_div(released, U256::from(PRECISION), total_staked).unwrap_or_default();
                acc = acc.saturating_add(delta);
            }
            let term = mul_div(amount, acc, U256::from(PRECISION)).unwrap_or_default();
            sum = sum.saturating_add(term);
        }
        sum.saturating_sub(debt)
    }

    /// Full claim under the held lock: accrue, pay base (minus claim fee)
    /// and boost, then rewrite both debts.
    fn claim_locked(
        &self,
        state: &mut ValidatorState,
        user_addr: Address,
        now: u64,
    ) -> Result<(), StakingError> {
        Self::update_periods(&mut state.reward_periods, state.total_staked, now)?;
        Self::update_periods(&mut state.boost_rewards, state.total_staked, now)?;

        let user = state
            .users
            .get(&user_addr)
            .cloned()
            .ok_or(StakingError::NoLockCreated)?;

        let integrated = Self::integrated_share(&state.reward_periods, user.amount, now)?;
        let pending = integrated
            .checked_sub(user.reward_debt)
            .ok_or(StakingError::ArithmeticOverflow)?;
        if !pending.is_zero() {
            let fee = bps_of(pending, state.claim_fee).ok_or(StakingError::ArithmeticOverflow)?;
            let net = pending
                .checked_sub(fee)
                .ok_or(StakingError::ArithmeticOverflow)?;
            if !net.is_zero() {
                self.ledger
                    .transfer(self.token, self.address, user_addr, net)?;
            }
            if !fee.is_zero() {
                self.ledger
                    .transfer(self.token, self.address, state.owner, fee)?;
            }
            self.events.emit(Event::Claim {
                user: user_addr,
                net,
                fee,
            });
        }

        let boost_integrated = Self::integrated_share(&state.boost_rewards, user.amount, now)?;
        let boost_pending = boost_integrated
            .checked_sub(user.boost_debt)
            .ok_or(StakingError::ArithmeticOverflow)?;
        if !boost_pending.is_zero() {
            self.ledger
                .transfer(self.token, self.address, user_addr, boost_pending)?;
            self.events.emit(Event::BoostRewardClaimed {
                user: user_addr,
                amount: boost_pending,
            });
        }

        let entry = state
            .users
            .get_mut(&user_addr)
            .ok_or(StakingError::NoLockCreated)?;
        entry.reward_debt = integrated;
        entry.boost_debt = boost_integrated;
        Ok(())
    }

    /// The single mutation path behind create/increase/extend/stake_for.
    ///
    /// `from_boost` marks principal that is already sitting at this
    /// validator: the fee and the inbound transfer are both skipped.
    #[allow(clippy::too_many_arguments)]
    fn deposit_locked(
        &self,
        state: &mut ValidatorState,
        payer: Address,
        user_addr: Address,
        amount: U256,
        duration: u64,
        from_boost: bool,
        now: u64,
    ) -> Result<(), StakingError> {
        Self::update_periods(&mut state.reward_periods, state.total_staked, now)?;
        Self::update_periods(&mut state.boost_rewards, state.total_staked, now)?;

        let mut net = amount;
        if !amount.is_zero() {
            if !from_boost {
                let fee =
                    bps_of(amount, state.deposit_fee).ok_or(StakingError::ArithmeticOverflow)?;
                net = amount
                    .checked_sub(fee)
                    .ok_or(StakingError::ArithmeticOverflow)?;
                if net.is_zero() {
                    return Err(StakingError::ZeroAmount);
                }
                self.ledger
                    .transfer_from(self.token, payer, self.address, net)?;
                if !fee.is_zero() {
                    self.ledger
                        .transfer_from(self.token, payer, self.fee_vault.address(), fee)?;
                }
            }

            // Flush stale debt before the principal changes.
            let has_principal = state
                .users
                .get(&user_addr)
                .map(|u| !u.amount.is_zero())
                .unwrap_or(false);
            if has_principal {
                self.claim_locked(state, user_addr, now)?;
            }

            state.total_staked = state
                .total_staked
                .checked_add(net)
                .ok_or(StakingError::ArithmeticOverflow)?;
            let new_amount;
            {
                let user = state.users.entry(user_addr).or_default();
                user.amount = user
                    .amount
                    .checked_add(net)
                    .ok_or(StakingError::ArithmeticOverflow)?;
                new_amount = user.amount;
            }
            let reward_debt = Self::integrated_share(&state.reward_periods, new_amount, now)?;
            let boost_debt = Self::integrated_share(&state.boost_rewards, new_amount, now)?;
            {
                let user = state.users.entry(user_addr).or_default();
                user.reward_debt = reward_debt;
                user.boost_debt = boost_debt;
            }

            if let Some(factory) = self.factory() {
                factory.add_total_staked_amount(self.address, net)?;
            }
        }

        let user = state.users.entry(user_addr).or_default();
        if duration > 0 {
            if !amount.is_zero() {
                user.lock_start_time = now;
                user.lock_end_time = now.saturating_add(duration);
            } else {
                let base = user.lock_end_time.max(now);
                user.lock_end_time = base.saturating_add(duration);
            }
        }

        self.events.emit(Event::Deposit {
            user: user_addr,
            amount: net,
            lock_start: user.lock_start_time,
            duration,
            lock_end: user.lock_end_time,
            now,
        });
        Ok(())
    }
}

impl MasterHandle for Validator {
    fn address(&self) -> Address {
        self.address
    }

    fn ve_balance(&self, user: Address) -> U256 {
        Validator::ve_balance(self, user)
    }

    fn amount_and_auto_max(&self, user: Address) -> (U256, bool) {
        Validator::amount_and_auto_max(self, user)
    }

    fn has_purchased(&self, user: Address, quality: u8) -> bool {
        self.state
            .read()
            .have_purchased
            .get(&user)
            .map(|set| set.contains(&quality))
            .unwrap_or(false)
    }

    fn purchase_costs(&self, user: Address) -> U256 {
        self.state
            .read()
            .purchase_costs
            .get(&user)
            .copied()
            .unwrap_or_default()
    }

    fn record_purchase(
        &self,
        caller: Address,
        user: Address,
        quality: u8,
    ) -> Result<(), StakingError> {
        self.ensure_registered_caller(caller)?;
        self.state
            .write()
            .have_purchased
            .entry(user)
            .or_default()
            .insert(quality);
        Ok(())
    }

    fn add_purchase_cost(
        &self,
        caller: Address,
        user: Address,
        cost: U256,
    ) -> Result<(), StakingError> {
        self.ensure_registered_caller(caller)?;
        let mut state = self.state.write();
        let entry = state.purchase_costs.entry(user).or_default();
        *entry = entry
            .checked_add(cost)
            .ok_or(StakingError::ArithmeticOverflow)?;
        Ok(())
    }

    fn stake_for(
        &self,
        caller: Address,
        user: Address,
        amount: U256,
    ) -> Result<(), StakingError> {
        let governance = self.governance().ok_or(StakingError::NotGovernance)?;
        if caller != governance.address() {
            return Err(StakingError::NotGovernance);
        }
        if self.quality != MASTER_QUALITY {
            return Err(StakingError::NotValidator);
        }
        if amount.is_zero() {
            return Err(StakingError::ZeroAmount);
        }

        let now = self.clock.now();
        let mut state = self.state.write();
        self.deposit_locked(&mut state, user, user, amount, 0, true, now)
    }
}

impl Validator {
    fn ensure_registered_caller(&self, caller: Address) -> Result<(), StakingError> {
        let registered = self
            .factory()
            .map(|f| f.is_registered(caller))
            .unwrap_or(false);
        if !registered {
            return Err(StakingError::NotRegisteredValidator);
        }
        Ok(())
    }
}
