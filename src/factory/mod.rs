//! Validator fleet registry
//!
//! Creates validator instances deterministically keyed by (quality, owner,
//! sequential id), tracks fleet-wide aggregates (staked amount, staked
//! wallets, scheduled reward periods), and serves the quality-indexed entry
//! thresholds that gate secondary-validator purchases.

use crate::clock::Clock;
use crate::crypto::recover::SignatureOracle;
use crate::crypto::Address;
use crate::events::{Event, EventLog};
use crate::ledger::TokenLedger;
use crate::staking::state::LockConfig;
use crate::staking::validator::MASTER_QUALITY;
use crate::staking::{MasterHandle, Validator, ValidatorParams};
use parking_lot::RwLock;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::info;

/// Lowest purchasable tier.
pub const MIN_QUALITY: u8 = 1;

/// Highest tier.
pub const MAX_QUALITY: u8 = 7;

/// Registry failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FactoryError {
    #[error("caller is not the admin")]
    NotAdmin,

    #[error("caller is not a registered validator")]
    NotRegisteredValidator,

    #[error("validator rejected registry wiring")]
    NotValidValidator,

    #[error("quality out of range")]
    QualityWrong,

    #[error("zero address")]
    ZeroAddress,

    #[error("aggregate staked amount underflow")]
    NotEnoughAmount,

    #[error("aggregate wallet count underflow")]
    NotEnoughWallet,

    #[error("reward period must end after it starts")]
    InvalidTimePeriod,

    #[error("page start beyond the validator list")]
    PageOutOfBounds,

    #[error("arithmetic overflow")]
    ArithmeticOverflow,
}

/// Registry construction parameters.
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    pub admin: Address,
    pub pauser: Address,
    pub chain_id: u64,
    pub lock: LockConfig,
}

/// Fleet-wide reward-period row, recorded when any validator schedules a
/// period. Aggregate reporting only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalRewardPeriod {
    pub start_time: u64,
    pub end_time: u64,
    pub total_reward: U256,
}

/// Per-validator row of the pagination query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorStats {
    pub validator: Address,
    pub quality: u8,
    pub id: u64,
    pub owner: Address,
    pub is_claimed: bool,
    pub name: String,
    pub total_staked: U256,
    pub reward_period_count: u64,
}

/// Boost summary row, aligned with [`ValidatorStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostStats {
    pub boost_period_count: u64,
    pub total_boost_reward: U256,
}

/// Caller-specific row, aligned with [`ValidatorStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    pub amount: U256,
    pub lock_start_time: u64,
    pub lock_end_time: u64,
    pub auto_max: bool,
    pub pending_reward: U256,
    pub pending_boost: U256,
}

struct FactoryState {
    all_validators: Vec<Arc<Validator>>,
    registered: HashSet<Address>,
    node_counts: HashMap<u8, u64>,
    master: Option<Arc<Validator>>,
    min_amount_for_quality: HashMap<u8, U256>,
    total_staked_amount: U256,
    total_staked_wallet: u64,
    global_periods: Vec<GlobalRewardPeriod>,
}

/// The fleet registry.
pub struct Factory {
    config: FactoryConfig,
    clock: Arc<dyn Clock>,
    ledger: Arc<dyn TokenLedger>,
    oracle: Arc<dyn SignatureOracle>,
    /// Self-reference handed to created validators.
    me: Weak<Factory>,
    state: RwLock<FactoryState>,
    events: EventLog,
}

impl Factory {
    pub fn new(
        config: FactoryConfig,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn TokenLedger>,
        oracle: Arc<dyn SignatureOracle>,
    ) -> Arc<Self> {
        // Entry thresholds in whole tokens; tier 2 has no threshold.
        let mut min_amount_for_quality = HashMap::new();
        min_amount_for_quality.insert(3, U256::from(400u64));
        min_amount_for_quality.insert(4, U256::from(1_000u64));
        min_amount_for_quality.insert(5, U256::from(3_000u64));
        min_amount_for_quality.insert(6, U256::from(5_000u64));
        min_amount_for_quality.insert(7, U256::from(10_000u64));

        Arc::new_cyclic(|me| Self {
            config,
            clock,
            ledger,
            oracle,
            me: me.clone(),
            state: RwLock::new(FactoryState {
                all_validators: Vec::new(),
                registered: HashSet::new(),
                node_counts: HashMap::new(),
                master: None,
                min_amount_for_quality,
                total_staked_amount: U256::zero(),
                total_staked_wallet: 0,
                global_periods: Vec::new(),
            }),
            events: EventLog::new(),
        })
    }

    fn ensure_admin(&self, caller: Address) -> Result<(), FactoryError> {
        if caller != self.config.admin {
            return Err(FactoryError::NotAdmin);
        }
        Ok(())
    }

    fn ensure_registered(&self, caller: Address) -> Result<(), FactoryError> {
        if !self.state.read().registered.contains(&caller) {
            return Err(FactoryError::NotRegisteredValidator);
        }
        Ok(())
    }

    /// Create and register a validator. Admin-only. The instance address is
    /// derived from (quality, owner, id) so recreation of the same slot is
    /// reproducible.
    pub fn create_validator(
        &self,
        caller: Address,
        token: Address,
        owner: Address,
        quality: u8,
        verifier: Address,
    ) -> Result<Arc<Validator>, FactoryError> {
        self.ensure_admin(caller)?;
        if !(MIN_QUALITY..=MAX_QUALITY).contains(&quality) {
            return Err(FactoryError::QualityWrong);
        }
        if token.is_zero() || owner.is_zero() || verifier.is_zero() {
            return Err(FactoryError::ZeroAddress);
        }

        let (id, quality_count, master) = {
            let state = self.state.read();
            let id = state.all_validators.len() as u64;
            let count = state.node_counts.get(&quality).copied().unwrap_or(0) + 1;
            (id, count, state.master.clone())
        };

        let address = Address::derive(&[
            b"validator",
            &[quality],
            owner.as_bytes(),
            &id.to_be_bytes(),
        ]);

        let validator = Arc::new(
            Validator::new(
                ValidatorParams {
                    address,
                    token,
                    quality,
                    id,
                    quality_count,
                    chain_id: self.config.chain_id,
                    admin: self.config.admin,
                    pauser: self.config.pauser,
                    owner,
                    verifier,
                    deposit_fee: 0,
                    claim_fee: 0,
                    lock: self.config.lock,
                },
                Arc::clone(&self.clock),
                Arc::clone(&self.ledger),
                Arc::clone(&self.oracle),
            )
            .map_err(|_| FactoryError::NotValidValidator)?,
        );
        let me = self.me.upgrade().ok_or(FactoryError::NotValidValidator)?;
        validator
            .set_factory(me)
            .map_err(|_| FactoryError::NotValidValidator)?;

        // A registered master is handed to every new secondary so the
        // purchase gate can consult it.
        if quality != MASTER_QUALITY {
            if let Some(master) = master {
                let handle: Arc<dyn MasterHandle> = master;
                validator
                    .set_master_validator(self.config.admin, handle)
                    .map_err(|_| FactoryError::NotValidValidator)?;
            }
        }

        let new_length = {
            let mut state = self.state.write();
            state.all_validators.push(Arc::clone(&validator));
            state.registered.insert(address);
            state.node_counts.insert(quality, quality_count);
            state.all_validators.len() as u64
        };

        info!(%owner, validator = %address, quality, id, "validator created");
        self.events.emit(Event::ValidatorCreated {
            owner,
            validator: address,
            new_length,
        });
        Ok(validator)
    }

    /// Designate the master singleton and wire it into every secondary.
    /// Admin-only.
    pub fn register_master(
        &self,
        caller: Address,
        master: Arc<Validator>,
    ) -> Result<(), FactoryError> {
        self.ensure_admin(caller)?;
        if master.quality() != MASTER_QUALITY {
            return Err(FactoryError::QualityWrong);
        }

        let secondaries: Vec<Arc<Validator>> = {
            let mut state = self.state.write();
            state.master = Some(Arc::clone(&master));
            state
                .all_validators
                .iter()
                .filter(|v| v.quality() != MASTER_QUALITY)
                .cloned()
                .collect()
        };

        let handle: Arc<dyn MasterHandle> = master;
        for secondary in secondaries {
            secondary
                .set_master_validator(self.config.admin, Arc::clone(&handle))
                .map_err(|_| FactoryError::NotValidValidator)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Aggregate counters (registered validators only)
    // ------------------------------------------------------------------

    pub fn add_total_staked_amount(
        &self,
        caller: Address,
        amount: U256,
    ) -> Result<(), FactoryError> {
        self.ensure_registered(caller)?;
        let mut state = self.state.write();
        state.total_staked_amount = state
            .total_staked_amount
            .checked_add(amount)
            .ok_or(FactoryError::ArithmeticOverflow)?;
        Ok(())
    }

    pub fn sub_total_staked_amount(
        &self,
        caller: Address,
        amount: U256,
    ) -> Result<(), FactoryError> {
        self.ensure_registered(caller)?;
        let mut state = self.state.write();
        state.total_staked_amount = state
            .total_staked_amount
            .checked_sub(amount)
            .ok_or(FactoryError::NotEnoughAmount)?;
        Ok(())
    }

    pub fn add_total_staked_wallet(&self, caller: Address) -> Result<(), FactoryError> {
        self.ensure_registered(caller)?;
        let mut state = self.state.write();
        state.total_staked_wallet = state
            .total_staked_wallet
            .checked_add(1)
            .ok_or(FactoryError::ArithmeticOverflow)?;
        Ok(())
    }

    pub fn sub_total_staked_wallet(&self, caller: Address) -> Result<(), FactoryError> {
        self.ensure_registered(caller)?;
        let mut state = self.state.write();
        state.total_staked_wallet = state
            .total_staked_wallet
            .checked_sub(1)
            .ok_or(FactoryError::NotEnoughWallet)?;
        Ok(())
    }

    /// Record a fleet-wide reward-period row. Called by a registered
    /// validator when its admin schedules a period.
    pub fn add_total_validators(
        &self,
        caller: Address,
        start_time: u64,
        end_time: u64,
        total_reward: U256,
    ) -> Result<(), FactoryError> {
        self.ensure_registered(caller)?;
        if end_time <= start_time {
            return Err(FactoryError::InvalidTimePeriod);
        }
        self.state.write().global_periods.push(GlobalRewardPeriod {
            start_time,
            end_time,
            total_reward,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Thresholds
    // ------------------------------------------------------------------

    /// Minimum locked amount (whole tokens) required to purchase `quality`.
    pub fn min_amount_for_quality(&self, quality: u8) -> U256 {
        self.state
            .read()
            .min_amount_for_quality
            .get(&quality)
            .copied()
            .unwrap_or_default()
    }

    /// Rewrite one entry of the threshold table. Admin-only; the master
    /// tier is not purchasable and has no threshold.
    pub fn set_min_amount_for_quality(
        &self,
        caller: Address,
        quality: u8,
        amount: U256,
    ) -> Result<(), FactoryError> {
        self.ensure_admin(caller)?;
        if quality <= MASTER_QUALITY || quality > MAX_QUALITY {
            return Err(FactoryError::QualityWrong);
        }
        self.state
            .write()
            .min_amount_for_quality
            .insert(quality, amount);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    pub fn is_registered(&self, validator: Address) -> bool {
        self.state.read().registered.contains(&validator)
    }

    /// Snapshot of every validator, creation order.
    pub fn get_validators(&self) -> Vec<Arc<Validator>> {
        self.state.read().all_validators.clone()
    }

    pub fn get_validator(&self, address: Address) -> Option<Arc<Validator>> {
        self.state
            .read()
            .all_validators
            .iter()
            .find(|v| v.address() == address)
            .cloned()
    }

    pub fn master(&self) -> Option<Arc<Validator>> {
        self.state.read().master.clone()
    }

    pub fn validator_count(&self) -> u64 {
        self.state.read().all_validators.len() as u64
    }

    pub fn node_count(&self, quality: u8) -> u64 {
        self.state
            .read()
            .node_counts
            .get(&quality)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_staked_amount(&self) -> U256 {
        self.state.read().total_staked_amount
    }

    pub fn total_staked_wallet(&self) -> u64 {
        self.state.read().total_staked_wallet
    }

    pub fn global_periods(&self) -> Vec<GlobalRewardPeriod> {
        self.state.read().global_periods.clone()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// One page of per-validator, per-boost, and per-user rows, aligned by
    /// index.
    pub fn get_all_validator_data(
        &self,
        user: Address,
        page_index: u64,
        page_size: u64,
    ) -> Result<(Vec<ValidatorStats>, Vec<BoostStats>, Vec<UserStats>), FactoryError> {
        let validators = self.get_validators();
        let total = validators.len() as u64;
        let start = page_index
            .checked_mul(page_size)
            .ok_or(FactoryError::ArithmeticOverflow)?;
        if page_size == 0 || start >= total {
            return Err(FactoryError::PageOutOfBounds);
        }
        let end = (start + page_size).min(total);

        let mut validator_stats = Vec::with_capacity((end - start) as usize);
        let mut boost_stats = Vec::with_capacity((end - start) as usize);
        let mut user_stats = Vec::with_capacity((end - start) as usize);

        for validator in &validators[start as usize..end as usize] {
            validator_stats.push(ValidatorStats {
                validator: validator.address(),
                quality: validator.quality(),
                id: validator.id(),
                owner: validator.owner(),
                is_claimed: validator.is_claimed(),
                name: validator.name(),
                total_staked: validator.total_staked(),
                reward_period_count: validator.reward_period_count() as u64,
            });
            boost_stats.push(BoostStats {
                boost_period_count: validator.boost_reward_count() as u64,
                total_boost_reward: validator.boost_total(),
            });
            let info = validator.user_info(user).unwrap_or_default();
            user_stats.push(UserStats {
                amount: info.amount,
                lock_start_time: info.lock_start_time,
                lock_end_time: info.lock_end_time,
                auto_max: info.auto_max,
                pending_reward: validator.get_user_pending_reward(user),
                pending_boost: validator.get_user_pending_boost(user),
            });
        }

        Ok((validator_stats, boost_stats, user_stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::recover::{purchase_digest, StaticOracle};
    use crate::ledger::InMemoryLedger;
    use crate::staking::{StakingError, MIN_LOCK, MULTIPLIER};

    fn addr(tag: u8) -> Address {
        Address::derive(&[b"factory-test", &[tag]])
    }

    const ADMIN: u8 = 100;
    const PAUSER: u8 = 101;
    const OWNER: u8 = 102;
    const VERIFIER: u8 = 103;
    const TOKEN: u8 = 104;

    struct Env {
        clock: Arc<ManualClock>,
        ledger: Arc<InMemoryLedger>,
        factory: Arc<Factory>,
        token: Address,
    }

    fn build(now: u64) -> Env {
        let clock = Arc::new(ManualClock::new(now));
        let ledger = Arc::new(InMemoryLedger::new());
        let factory = Factory::new(
            FactoryConfig {
                admin: addr(ADMIN),
                pauser: addr(PAUSER),
                chain_id: 1,
                lock: LockConfig::default(),
            },
            clock.clone(),
            ledger.clone(),
            Arc::new(StaticOracle),
        );
        Env {
            clock,
            ledger,
            factory,
            token: addr(TOKEN),
        }
    }

    fn tokens(n: u64) -> U256 {
        U256::from(n) * U256::from(MULTIPLIER)
    }

    fn create(env: &Env, quality: u8) -> Arc<Validator> {
        env.factory
            .create_validator(addr(ADMIN), env.token, addr(OWNER), quality, addr(VERIFIER))
            .unwrap()
    }

    #[test]
    fn test_create_validator_gates() {
        let env = build(1000);
        assert!(matches!(
            env.factory
                .create_validator(addr(1), env.token, addr(OWNER), 1, addr(VERIFIER)),
            Err(FactoryError::NotAdmin)
        ));
        assert!(matches!(
            env.factory
                .create_validator(addr(ADMIN), env.token, addr(OWNER), 0, addr(VERIFIER)),
            Err(FactoryError::QualityWrong)
        ));
        assert!(matches!(
            env.factory
                .create_validator(addr(ADMIN), env.token, addr(OWNER), 8, addr(VERIFIER)),
            Err(FactoryError::QualityWrong)
        ));
        assert!(matches!(
            env.factory
                .create_validator(addr(ADMIN), env.token, Address::zero(), 1, addr(VERIFIER)),
            Err(FactoryError::ZeroAddress)
        ));
    }

    #[test]
    fn test_create_validator_sequences_ids() {
        let env = build(1000);
        let v0 = create(&env, 1);
        let v1 = create(&env, 3);
        let v2 = create(&env, 3);

        assert_eq!(v0.id(), 0);
        assert_eq!(v1.id(), 1);
        assert_eq!(v2.id(), 2);
        assert_eq!(v1.quality_count(), 1);
        assert_eq!(v2.quality_count(), 2);
        assert_eq!(env.factory.validator_count(), 3);
        assert_eq!(env.factory.node_count(3), 2);

        // Master tier is claimed out of the box, secondaries are not
        assert!(v0.is_claimed());
        assert!(!v1.is_claimed());

        // Deterministic identity by (quality, owner, id)
        assert_ne!(v1.address(), v2.address());
        assert!(env.factory.is_registered(v1.address()));
        assert_eq!(
            env.factory.get_validator(v1.address()).unwrap().address(),
            v1.address()
        );

        let events = env.factory.events().snapshot();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::ValidatorCreated { new_length: 1, .. }
        )));
    }

    #[test]
    fn test_counters_track_locks() {
        let env = build(1000);
        let v = create(&env, 1);
        let user = addr(1);
        env.ledger.mint(env.token, user, tokens(100));

        v.create_lock(user, tokens(100), MIN_LOCK).unwrap();
        assert_eq!(env.factory.total_staked_amount(), tokens(100));
        assert_eq!(env.factory.total_staked_wallet(), 1);

        env.clock.advance(MIN_LOCK + 1);
        v.withdraw(user).unwrap();
        assert_eq!(env.factory.total_staked_amount(), U256::zero());
        assert_eq!(env.factory.total_staked_wallet(), 0);
    }

    #[test]
    fn test_counters_reject_unregistered_callers() {
        let env = build(1000);
        assert!(matches!(
            env.factory.add_total_staked_amount(addr(1), tokens(1)),
            Err(FactoryError::NotRegisteredValidator)
        ));
        assert!(matches!(
            env.factory.add_total_staked_wallet(addr(1)),
            Err(FactoryError::NotRegisteredValidator)
        ));
    }

    #[test]
    fn test_counter_underflow() {
        let env = build(1000);
        let v = create(&env, 1);

        assert!(matches!(
            env.factory.sub_total_staked_amount(v.address(), tokens(1)),
            Err(FactoryError::NotEnoughAmount)
        ));
        assert!(matches!(
            env.factory.sub_total_staked_wallet(v.address()),
            Err(FactoryError::NotEnoughWallet)
        ));
    }

    #[test]
    fn test_global_periods_follow_scheduling() {
        let env = build(1000);
        let v = create(&env, 1);

        v.set_reward_period(addr(ADMIN), 2000, 3000, tokens(10))
            .unwrap();
        let rows = env.factory.global_periods();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start_time, 2000);
        assert_eq!(rows[0].total_reward, tokens(10));

        assert!(matches!(
            env.factory
                .add_total_validators(v.address(), 3000, 3000, tokens(1)),
            Err(FactoryError::InvalidTimePeriod)
        ));
    }

    #[test]
    fn test_min_amount_table() {
        let env = build(1000);
        assert_eq!(env.factory.min_amount_for_quality(2), U256::zero());
        assert_eq!(env.factory.min_amount_for_quality(3), U256::from(400u64));
        assert_eq!(env.factory.min_amount_for_quality(7), U256::from(10_000u64));

        env.factory
            .set_min_amount_for_quality(addr(ADMIN), 3, U256::from(500u64))
            .unwrap();
        assert_eq!(env.factory.min_amount_for_quality(3), U256::from(500u64));

        assert!(matches!(
            env.factory
                .set_min_amount_for_quality(addr(ADMIN), 1, U256::from(1u64)),
            Err(FactoryError::QualityWrong)
        ));
        assert!(matches!(
            env.factory
                .set_min_amount_for_quality(addr(1), 3, U256::from(1u64)),
            Err(FactoryError::NotAdmin)
        ));
    }

    #[test]
    fn test_pagination() {
        let env = build(1000);
        for quality in [1u8, 3, 3, 4, 5] {
            create(&env, quality);
        }

        let (stats, boosts, users) = env
            .factory
            .get_all_validator_data(addr(1), 0, 2)
            .unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(boosts.len(), 2);
        assert_eq!(users.len(), 2);
        assert_eq!(stats[0].quality, 1);
        assert_eq!(stats[1].quality, 3);

        // Last, partial page
        let (stats, _, _) = env
            .factory
            .get_all_validator_data(addr(1), 2, 2)
            .unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].quality, 5);

        assert!(matches!(
            env.factory.get_all_validator_data(addr(1), 3, 2),
            Err(FactoryError::PageOutOfBounds)
        ));
        assert!(matches!(
            env.factory.get_all_validator_data(addr(1), 0, 0),
            Err(FactoryError::PageOutOfBounds)
        ));
    }

    // ------------------------------------------------------------------
    // Purchase flow across master and secondary
    // ------------------------------------------------------------------

    fn purchase_env() -> (Env, Arc<Validator>, Arc<Validator>) {
        let env = build(1000);
        let master = create(&env, 1);
        env.factory
            .register_master(addr(ADMIN), Arc::clone(&master))
            .unwrap();
        let secondary = create(&env, 3);
        (env, master, secondary)
    }

    fn sign_purchase(
        secondary: &Validator,
        user: Address,
        np: U256,
        deadline: u64,
        quality: u8,
    ) -> crate::crypto::recover::Signature {
        let digest = purchase_digest(np, secondary.address(), deadline, 1, user, quality);
        StaticOracle::sign_as(addr(VERIFIER), &digest)
    }

    #[test]
    fn test_purchase_requires_exact_threshold() {
        let (env, master, secondary) = purchase_env();
        let user = addr(1);
        // 400 whole tokens required for quality 3; start one unit short
        let required = tokens(400);
        env.ledger.mint(env.token, user, required);

        master
            .create_lock(user, required - U256::from(1u64), MIN_LOCK)
            .unwrap();
        master.set_auto_max(user, true).unwrap();

        let sig = sign_purchase(&secondary, user, U256::from(5u64), 2000, 3);
        let result = secondary.purchase_validator(user, U256::from(5u64), 3, 2000, &sig);
        assert!(matches!(result, Err(StakingError::InsufficientLockAmount)));

        master.increase_amount(user, U256::from(1u64)).unwrap();
        secondary
            .purchase_validator(user, U256::from(5u64), 3, 2000, &sig)
            .unwrap();

        assert!(secondary.is_claimed());
        assert_eq!(secondary.owner(), user);
        assert!(MasterHandle::has_purchased(master.as_ref(), user, 3));
        assert_eq!(MasterHandle::purchase_costs(master.as_ref(), user), required);
    }

    #[test]
    fn test_purchase_rejections() {
        let (env, master, secondary) = purchase_env();
        let user = addr(1);
        env.ledger.mint(env.token, user, tokens(400));
        master.create_lock(user, tokens(400), MIN_LOCK).unwrap();

        let sig = sign_purchase(&secondary, user, U256::from(5u64), 2000, 3);

        // Expired deadline
        assert!(matches!(
            secondary.purchase_validator(user, U256::from(5u64), 3, 999, &sig),
            Err(StakingError::SignatureExpired)
        ));
        // Zero np points
        assert!(matches!(
            secondary.purchase_validator(user, U256::zero(), 3, 2000, &sig),
            Err(StakingError::InsufficientNPPoint)
        ));
        // Quality mismatch
        assert!(matches!(
            secondary.purchase_validator(user, U256::from(5u64), 4, 2000, &sig),
            Err(StakingError::QualityWrong)
        ));
        // Auto-max not armed yet
        assert!(matches!(
            secondary.purchase_validator(user, U256::from(5u64), 3, 2000, &sig),
            Err(StakingError::AutoMaxNotEnabled)
        ));

        master.set_auto_max(user, true).unwrap();

        // A signature from someone other than the verifier fails
        let digest = purchase_digest(U256::from(5u64), secondary.address(), 2000, 1, user, 3);
        let bad_sig = StaticOracle::sign_as(addr(7), &digest);
        assert!(matches!(
            secondary.purchase_validator(user, U256::from(5u64), 3, 2000, &bad_sig),
            Err(StakingError::VerificationFailed)
        ));

        secondary
            .purchase_validator(user, U256::from(5u64), 3, 2000, &sig)
            .unwrap();

        // Already claimed
        assert!(matches!(
            secondary.purchase_validator(user, U256::from(5u64), 3, 2000, &sig),
            Err(StakingError::ValidatorIsClaimed)
        ));

        // Same (user, quality) on a fresh quality-3 validator
        let another = create(&env, 3);
        let sig2 = sign_purchase(&another, user, U256::from(5u64), 2000, 3);
        assert!(matches!(
            another.purchase_validator(user, U256::from(5u64), 3, 2000, &sig2),
            Err(StakingError::AlreadyPurchasedThisQuality)
        ));
    }

    #[test]
    fn test_purchase_costs_stack_across_qualities() {
        let (env, master, secondary3) = purchase_env();
        let secondary4 = create(&env, 4);
        let user = addr(1);

        // Enough for quality 3 (400) plus quality 4 (1000)
        env.ledger.mint(env.token, user, tokens(1400));
        master.create_lock(user, tokens(1400), MIN_LOCK).unwrap();
        master.set_auto_max(user, true).unwrap();

        let sig3 = sign_purchase(&secondary3, user, U256::from(5u64), 2000, 3);
        secondary3
            .purchase_validator(user, U256::from(5u64), 3, 2000, &sig3)
            .unwrap();

        // Quality 4 now needs 1000 on top of the 400 already spent
        let sig4 = sign_purchase(&secondary4, user, U256::from(5u64), 2000, 4);
        secondary4
            .purchase_validator(user, U256::from(5u64), 4, 2000, &sig4)
            .unwrap();
        assert_eq!(
            MasterHandle::purchase_costs(master.as_ref(), user),
            tokens(1400)
        );
    }
}
