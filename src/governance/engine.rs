//! Governance engine
//!
//! Proposal lifecycle, vote accounting bounded by live voting power, vote
//! rewards with claim-and-restake, and proportional boost distribution
//! across the claimed validator fleet.
//!
//! Lock discipline: governance never holds its own state lock while calling
//! into a validator or the ledger. The master validator calls back in
//! (vote resets) only after releasing its own lock, so the cross-component
//! order stays acyclic.

use super::proposal::{Proposal, ProposalKind, ProposalStatus};
use crate::clock::Clock;
use crate::crypto::Address;
use crate::events::{Event, EventLog};
use crate::factory::Factory;
use crate::ledger::{LedgerError, TokenLedger};
use crate::math::mul_div;
use crate::staking::{GovernanceHandle, MasterHandle, StakingError};
use parking_lot::RwLock;
use primitive_types::U256;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Highest weight a single vote may carry, in percent.
pub const MAX_VOTE_WEIGHT: u64 = 100;

/// Governance failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GovernanceError {
    #[error("caller is not the admin")]
    NotAdmin,

    #[error("not the expected master validator")]
    NotValidator,

    #[error("validator not found in the registry")]
    NotValidValidator,

    #[error("no such proposal")]
    NoSuchProposal,

    #[error("proposal window is invalid")]
    WrongTime,

    #[error("boost window is invalid")]
    WrongBoostTime,

    #[error("amount is zero")]
    ZeroAmount,

    #[error("vote weight out of range")]
    InvalidWeight,

    #[error("voting window is not open")]
    VotingNotOpen,

    #[error("proposal is in the wrong status")]
    WrongStatus,

    #[error("no such vote option")]
    NoSuchOption,

    #[error("user already voted on this proposal")]
    UserIsVoted,

    #[error("user did not vote on this proposal")]
    UserIsNotVoted,

    #[error("no voting power")]
    ZeroVeBalance,

    #[error("votes exceed available voting power")]
    ExceedsAvailableWeight,

    #[error("reward already claimed")]
    RewardAlreadyClaimed,

    #[error("vote reward is zero")]
    RewardIsZero,

    #[error("voting has not ended yet")]
    TimeIsNotUp,

    #[error("outside the boost distribution window")]
    RewardDistributionNotAllowed,

    #[error("proposal received no votes")]
    NoVotes,

    #[error("proposal has staked votes")]
    ProposalHasStakedVotes,

    #[error("bank cannot cover the distribution")]
    NotEnoughRewardToken,

    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Staking(#[from] StakingError),
}

/// Governance construction parameters.
#[derive(Debug, Clone)]
pub struct GovernanceConfig {
    pub admin: Address,
    /// Source account for vote rewards and boost pools.
    pub bank: Address,
    pub token: Address,
}

struct GovernanceState {
    next_proposal_id: u64,
    proposals: BTreeMap<u64, Proposal>,
    /// (proposal, user, choice) -> stake weight.
    user_votes: HashMap<(u64, Address, u64), U256>,
    /// (proposal, choice) -> accumulated stake weight.
    option_votes: HashMap<(u64, u64), U256>,
    /// Running total per user across proposals; reset by the master.
    user_total_votes: HashMap<Address, U256>,
    proposal_total_votes: HashMap<u64, U256>,
    proposal_user_total_votes: HashMap<(u64, Address), U256>,
    voted: HashSet<(u64, Address)>,
    vote_rewards: HashMap<u64, U256>,
    reward_claimed: HashSet<(u64, Address)>,
}

/// The voting and boost-distribution engine.
pub struct Governance {
    address: Address,
    config: GovernanceConfig,
    clock: Arc<dyn Clock>,
    ledger: Arc<dyn TokenLedger>,
    factory: Arc<Factory>,
    master: RwLock<Option<Arc<dyn MasterHandle>>>,
    state: RwLock<GovernanceState>,
    events: EventLog,
}

impl Governance {
    pub fn new(
        config: GovernanceConfig,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn TokenLedger>,
        factory: Arc<Factory>,
    ) -> Self {
        Self {
            address: Address::derive(&[b"governance", config.bank.as_bytes()]),
            config,
            clock,
            ledger,
            factory,
            master: RwLock::new(None),
            state: RwLock::new(GovernanceState {
                next_proposal_id: 1,
                proposals: BTreeMap::new(),
                user_votes: HashMap::new(),
                option_votes: HashMap::new(),
                user_total_votes: HashMap::new(),
                proposal_total_votes: HashMap::new(),
                proposal_user_total_votes: HashMap::new(),
                voted: HashSet::new(),
                vote_rewards: HashMap::new(),
                reward_claimed: HashSet::new(),
            }),
            events: EventLog::new(),
        }
    }

    fn ensure_admin(&self, caller: Address) -> Result<(), GovernanceError> {
        if caller != self.config.admin {
            return Err(GovernanceError::NotAdmin);
        }
        Ok(())
    }

    fn master_handle(&self) -> Option<Arc<dyn MasterHandle>> {
        self.master.read().clone()
    }

    /// Wire the master singleton. Admin-only.
    pub fn set_master_validator(
        &self,
        caller: Address,
        master: Arc<dyn MasterHandle>,
    ) -> Result<(), GovernanceError> {
        self.ensure_admin(caller)?;
        *self.master.write() = Some(master);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Proposal lifecycle
    // ------------------------------------------------------------------

    /// Open a regular proposal. Admin-only.
    pub fn create_proposal(
        &self,
        caller: Address,
        start_time: u64,
        end_time: u64,
        metadata_uri: String,
        total_choices: u64,
    ) -> Result<u64, GovernanceError> {
        self.ensure_admin(caller)?;
        let now = self.clock.now();
        if start_time >= end_time || now > start_time {
            return Err(GovernanceError::WrongTime);
        }

        let id = self.insert_proposal(Proposal {
            id: 0,
            start_time,
            end_time,
            metadata_uri,
            status: ProposalStatus::Pending,
            kind: ProposalKind::Regular { total_choices },
        });

        debug!(id, start_time, end_time, "proposal created");
        self.events.emit(Event::ProposalCreated {
            id,
            start_time,
            end_time,
        });
        Ok(id)
    }

    /// Open a boost proposal, snapshotting the claimed fleet. Admin-only.
    #[allow(clippy::too_many_arguments)]
    pub fn create_boost_proposal(
        &self,
        caller: Address,
        start_time: u64,
        end_time: u64,
        metadata_uri: String,
        boost_reward: U256,
        boost_start_time: u64,
        boost_end_time: u64,
    ) -> Result<u64, GovernanceError> {
        self.ensure_admin(caller)?;
        let now = self.clock.now();
        if start_time >= end_time || now > start_time {
            return Err(GovernanceError::WrongTime);
        }
        if end_time >= boost_start_time || boost_start_time >= boost_end_time {
            return Err(GovernanceError::WrongBoostTime);
        }
        if boost_reward.is_zero() {
            return Err(GovernanceError::ZeroAmount);
        }

        // Only validators that are already claimed can receive a share.
        let validators: Vec<Address> = self
            .factory
            .get_validators()
            .iter()
            .filter(|v| v.is_claimed())
            .map(|v| v.address())
            .collect();

        let id = self.insert_proposal(Proposal {
            id: 0,
            start_time,
            end_time,
            metadata_uri,
            status: ProposalStatus::Pending,
            kind: ProposalKind::Boost {
                boost_reward,
                boost_start_time,
                boost_end_time,
                validators,
            },
        });

        debug!(id, start_time, end_time, "boost proposal created");
        self.events.emit(Event::BoostProposalCreated {
            id,
            start_time,
            end_time,
            boost_reward,
        });
        Ok(id)
    }

    fn insert_proposal(&self, mut proposal: Proposal) -> u64 {
        let mut state = self.state.write();
        let id = state.next_proposal_id;
        state.next_proposal_id += 1;
        proposal.id = id;
        state.proposals.insert(id, proposal);
        id
    }

    /// Cancel a pending, vote-free proposal. Admin-only.
    pub fn cancel_proposal(&self, caller: Address, id: u64) -> Result<(), GovernanceError> {
        self.ensure_admin(caller)?;
        let mut state = self.state.write();

        let total_votes = state
            .proposal_total_votes
            .get(&id)
            .copied()
            .unwrap_or_default();
        let proposal = state
            .proposals
            .get_mut(&id)
            .ok_or(GovernanceError::NoSuchProposal)?;
        if proposal.status != ProposalStatus::Pending {
            return Err(GovernanceError::WrongStatus);
        }
        if !total_votes.is_zero() {
            return Err(GovernanceError::ProposalHasStakedVotes);
        }

        proposal.status = ProposalStatus::Cancelled;
        let event = if proposal.is_boost() {
            Event::BoostProposalCancelled { id }
        } else {
            Event::ProposalCancelled { id }
        };
        drop(state);
        self.events.emit(event);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Voting
    // ------------------------------------------------------------------

    /// Cast a vote of `weight` percent of the caller's unallocated voting
    /// power on `choice`.
    pub fn vote(
        &self,
        caller: Address,
        id: u64,
        choice: u64,
        weight: u64,
    ) -> Result<(), GovernanceError> {
        if weight == 0 || weight > MAX_VOTE_WEIGHT {
            return Err(GovernanceError::InvalidWeight);
        }

        let now = self.clock.now();
        // Voting power is read before taking the state lock; the master
        // never calls back into governance while serving it.
        let ve = self
            .master_handle()
            .map(|m| m.ve_balance(caller))
            .unwrap_or_default();

        let mut state = self.state.write();
        let proposal = state
            .proposals
            .get(&id)
            .ok_or(GovernanceError::NoSuchProposal)?;

        if state.voted.contains(&(id, caller)) {
            return Err(GovernanceError::UserIsVoted);
        }
        if !proposal.voting_open(now) {
            return Err(GovernanceError::VotingNotOpen);
        }
        if proposal.status != ProposalStatus::Pending {
            return Err(GovernanceError::WrongStatus);
        }
        if !proposal.valid_choice(choice) {
            return Err(GovernanceError::NoSuchOption);
        }
        if ve.is_zero() {
            return Err(GovernanceError::ZeroVeBalance);
        }

        let allocated = state
            .user_total_votes
            .get(&caller)
            .copied()
            .unwrap_or_default();
        if allocated > ve {
            return Err(GovernanceError::ExceedsAvailableWeight);
        }

        let stake_weight = mul_div(
            ve - allocated,
            U256::from(weight),
            U256::from(MAX_VOTE_WEIGHT),
        )
        .ok_or(GovernanceError::ArithmeticOverflow)?;

        state.user_votes.insert((id, caller, choice), stake_weight);
        let option = state.option_votes.entry((id, choice)).or_default();
        *option = option
            .checked_add(stake_weight)
            .ok_or(GovernanceError::ArithmeticOverflow)?;
        let user_total = state.user_total_votes.entry(caller).or_default();
        *user_total = user_total
            .checked_add(stake_weight)
            .ok_or(GovernanceError::ArithmeticOverflow)?;
        let proposal_total = state.proposal_total_votes.entry(id).or_default();
        *proposal_total = proposal_total
            .checked_add(stake_weight)
            .ok_or(GovernanceError::ArithmeticOverflow)?;
        state
            .proposal_user_total_votes
            .insert((id, caller), stake_weight);
        state.voted.insert((id, caller));
        drop(state);

        self.events.emit(Event::Voted {
            user: caller,
            id,
            choice,
            stake_weight,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Vote rewards
    // ------------------------------------------------------------------

    /// Fund a proposal's vote-reward pool. Admin-only.
    pub fn set_vote_reward(
        &self,
        caller: Address,
        id: u64,
        amount: U256,
    ) -> Result<(), GovernanceError> {
        self.ensure_admin(caller)?;
        if amount.is_zero() {
            return Err(GovernanceError::ZeroAmount);
        }
        let mut state = self.state.write();
        if !state.proposals.contains_key(&id) {
            return Err(GovernanceError::NoSuchProposal);
        }
        state.vote_rewards.insert(id, amount);
        Ok(())
    }

    /// Close voting on a reward-carrying proposal. Admin-only; pay-out is
    /// pull-based through [`Governance::claim_and_lock`].
    pub fn execute_vote_reward_proposal(
        &self,
        caller: Address,
        id: u64,
    ) -> Result<(), GovernanceError> {
        self.ensure_admin(caller)?;
        let now = self.clock.now();
        let mut state = self.state.write();

        let reward = state.vote_rewards.get(&id).copied().unwrap_or_default();
        let proposal = state
            .proposals
            .get_mut(&id)
            .ok_or(GovernanceError::NoSuchProposal)?;
        if now <= proposal.end_time {
            return Err(GovernanceError::TimeIsNotUp);
        }
        if proposal.status != ProposalStatus::Pending {
            return Err(GovernanceError::WrongStatus);
        }
        if reward.is_zero() {
            return Err(GovernanceError::RewardIsZero);
        }

        proposal.status = ProposalStatus::Executed;
        drop(state);

        info!(id, "vote reward proposal executed");
        self.events.emit(Event::RewardDistributionExecuted { id });
        Ok(())
    }

    /// Claim the caller's share of an executed proposal's reward pool and
    /// restake it into the master validator.
    pub fn claim_and_lock(&self, caller: Address, id: u64) -> Result<U256, GovernanceError> {
        let reward = {
            let state = self.state.read();
            let proposal = state
                .proposals
                .get(&id)
                .ok_or(GovernanceError::NoSuchProposal)?;
            if proposal.status != ProposalStatus::Executed {
                return Err(GovernanceError::WrongStatus);
            }
            if !state.voted.contains(&(id, caller)) {
                return Err(GovernanceError::UserIsNotVoted);
            }
            if state.reward_claimed.contains(&(id, caller)) {
                return Err(GovernanceError::RewardAlreadyClaimed);
            }

            let user_votes = state
                .proposal_user_total_votes
                .get(&(id, caller))
                .copied()
                .unwrap_or_default();
            let total_votes = state
                .proposal_total_votes
                .get(&id)
                .copied()
                .unwrap_or_default();
            let pool = state.vote_rewards.get(&id).copied().unwrap_or_default();
            if total_votes.is_zero() {
                U256::zero()
            } else {
                mul_div(user_votes, pool, total_votes)
                    .ok_or(GovernanceError::ArithmeticOverflow)?
            }
        };
        if reward.is_zero() {
            return Err(GovernanceError::ZeroAmount);
        }

        let master = self.master_handle().ok_or(GovernanceError::NotValidator)?;
        self.ledger
            .transfer_from(self.config.token, self.config.bank, master.address(), reward)?;
        master.stake_for(self.address, caller, reward)?;

        self.state.write().reward_claimed.insert((id, caller));
        self.events.emit(Event::RewardsClaimedAndLocked {
            id,
            user: caller,
            reward,
        });
        Ok(reward)
    }

    // ------------------------------------------------------------------
    // Boost distribution
    // ------------------------------------------------------------------

    /// Distribute a boost proposal's pool across its snapshot validators in
    /// proportion to their vote share, opening a boost period on each.
    /// Admin-only; allowed between the voting end and the boost start.
    pub fn add_boost_reward(&self, caller: Address, id: u64) -> Result<(), GovernanceError> {
        self.ensure_admin(caller)?;
        let now = self.clock.now();

        let (boost_reward, boost_start, boost_end, validators, votes) = {
            let state = self.state.read();
            let proposal = state
                .proposals
                .get(&id)
                .ok_or(GovernanceError::NoSuchProposal)?;
            if proposal.status != ProposalStatus::Pending {
                return Err(GovernanceError::WrongStatus);
            }
            let (boost_reward, boost_start, boost_end, validators) = match &proposal.kind {
                ProposalKind::Boost {
                    boost_reward,
                    boost_start_time,
                    boost_end_time,
                    validators,
                } => (
                    *boost_reward,
                    *boost_start_time,
                    *boost_end_time,
                    validators.clone(),
                ),
                ProposalKind::Regular { .. } => return Err(GovernanceError::WrongStatus),
            };
            if now < proposal.end_time || now > boost_start {
                return Err(GovernanceError::RewardDistributionNotAllowed);
            }
            let votes: Vec<U256> = (0..validators.len() as u64)
                .map(|choice| {
                    state
                        .option_votes
                        .get(&(id, choice))
                        .copied()
                        .unwrap_or_default()
                })
                .collect();
            (boost_reward, boost_start, boost_end, validators, votes)
        };

        let total_votes = votes
            .iter()
            .try_fold(U256::zero(), |acc, v| acc.checked_add(*v))
            .ok_or(GovernanceError::ArithmeticOverflow)?;
        if total_votes.is_zero() {
            return Err(GovernanceError::NoVotes);
        }

        let mut shares = Vec::new();
        let mut distributed = U256::zero();
        for (validator, votes) in validators.iter().zip(votes.iter()) {
            let share = mul_div(*votes, boost_reward, total_votes)
                .ok_or(GovernanceError::ArithmeticOverflow)?;
            if !share.is_zero() {
                shares.push((*validator, share));
                distributed = distributed
                    .checked_add(share)
                    .ok_or(GovernanceError::ArithmeticOverflow)?;
            }
        }

        // The whole distribution either moves or nothing does.
        if self.ledger.balance_of(self.config.token, self.config.bank) < distributed {
            return Err(GovernanceError::NotEnoughRewardToken);
        }

        for (address, share) in &shares {
            let validator = self
                .factory
                .get_validator(*address)
                .ok_or(GovernanceError::NotValidValidator)?;
            self.ledger
                .transfer_from(self.config.token, self.config.bank, *address, *share)?;
            validator.add_boost_reward(self.address, boost_start, boost_end, *share)?;
            self.events.emit(Event::BoostRewardTransferred {
                id,
                validator: *address,
                share: *share,
            });
        }

        {
            let mut state = self.state.write();
            if let Some(proposal) = state.proposals.get_mut(&id) {
                if let ProposalKind::Boost { boost_reward, .. } = &mut proposal.kind {
                    *boost_reward = U256::zero();
                }
                proposal.status = ProposalStatus::Executed;
            }
        }

        info!(id, total = %distributed, "boost rewards distributed");
        self.events.emit(Event::BoostRewardDistributed {
            id,
            total: distributed,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn proposal(&self, id: u64) -> Option<Proposal> {
        self.state.read().proposals.get(&id).cloned()
    }

    pub fn proposal_count(&self) -> u64 {
        self.state.read().proposals.len() as u64
    }

    pub fn user_total_votes(&self, user: Address) -> U256 {
        self.state
            .read()
            .user_total_votes
            .get(&user)
            .copied()
            .unwrap_or_default()
    }

    pub fn option_votes(&self, id: u64, choice: u64) -> U256 {
        self.state
            .read()
            .option_votes
            .get(&(id, choice))
            .copied()
            .unwrap_or_default()
    }

    pub fn proposal_total_votes(&self, id: u64) -> U256 {
        self.state
            .read()
            .proposal_total_votes
            .get(&id)
            .copied()
            .unwrap_or_default()
    }

    pub fn user_vote(&self, id: u64, user: Address, choice: u64) -> U256 {
        self.state
            .read()
            .user_votes
            .get(&(id, user, choice))
            .copied()
            .unwrap_or_default()
    }

    pub fn has_voted(&self, id: u64, user: Address) -> bool {
        self.state.read().voted.contains(&(id, user))
    }

    pub fn vote_reward(&self, id: u64) -> U256 {
        self.state
            .read()
            .vote_rewards
            .get(&id)
            .copied()
            .unwrap_or_default()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }
}

impl GovernanceHandle for Governance {
    fn address(&self) -> Address {
        self.address
    }

    fn reset_votes(&self, caller: Address, user: Address) -> Result<(), StakingError> {
        let master = self
            .master_handle()
            .map(|m| m.address())
            .unwrap_or_default();
        if caller != master || caller.is_zero() {
            return Err(StakingError::NotValidator);
        }
        self.state.write().user_total_votes.remove(&user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::recover::{purchase_digest, StaticOracle};
    use crate::factory::FactoryConfig;
    use crate::ledger::InMemoryLedger;
    use crate::staking::state::LockConfig;
    use crate::staking::{Validator, MIN_LOCK, MULTIPLIER};

    fn addr(tag: u8) -> Address {
        Address::derive(&[b"governance-test", &[tag]])
    }

    const ADMIN: u8 = 100;
    const PAUSER: u8 = 101;
    const OWNER: u8 = 102;
    const VERIFIER: u8 = 103;
    const TOKEN: u8 = 104;
    const BANK: u8 = 105;

    struct World {
        clock: Arc<ManualClock>,
        ledger: Arc<InMemoryLedger>,
        factory: Arc<Factory>,
        master: Arc<Validator>,
        governance: Arc<Governance>,
        token: Address,
        bank: Address,
    }

    fn world(now: u64) -> World {
        let clock = Arc::new(ManualClock::new(now));
        let ledger = Arc::new(InMemoryLedger::new());
        let token = addr(TOKEN);
        let bank = addr(BANK);

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
        let master = factory
            .create_validator(addr(ADMIN), token, addr(OWNER), 1, addr(VERIFIER))
            .unwrap();
        factory
            .register_master(addr(ADMIN), Arc::clone(&master))
            .unwrap();

        let governance = Arc::new(Governance::new(
            GovernanceConfig {
                admin: addr(ADMIN),
                bank,
                token,
            },
            clock.clone(),
            ledger.clone(),
            Arc::clone(&factory),
        ));
        governance
            .set_master_validator(addr(ADMIN), Arc::clone(&master) as Arc<dyn MasterHandle>)
            .unwrap();
        master
            .set_governance(
                addr(ADMIN),
                Arc::clone(&governance) as Arc<dyn GovernanceHandle>,
            )
            .unwrap();

        World {
            clock,
            ledger,
            factory,
            master,
            governance,
            token,
            bank,
        }
    }

    fn tokens(n: u64) -> U256 {
        U256::from(n) * U256::from(MULTIPLIER)
    }

    /// Lock `amount` in the master with auto-max armed, so veBalance equals
    /// the full principal.
    fn lock_auto_max(w: &World, user: Address, amount: U256) {
        w.ledger.mint(w.token, user, amount);
        w.master.create_lock(user, amount, MIN_LOCK).unwrap();
        w.master.set_auto_max(user, true).unwrap();
    }

    #[test]
    fn test_create_proposal_validations() {
        let w = world(1000);
        let admin = addr(ADMIN);

        assert!(matches!(
            w.governance
                .create_proposal(addr(1), 1100, 1200, String::new(), 2),
            Err(GovernanceError::NotAdmin)
        ));
        assert!(matches!(
            w.governance
                .create_proposal(admin, 1200, 1100, String::new(), 2),
            Err(GovernanceError::WrongTime)
        ));
        assert!(matches!(
            w.governance
                .create_proposal(admin, 900, 1200, String::new(), 2),
            Err(GovernanceError::WrongTime)
        ));

        let first = w
            .governance
            .create_proposal(admin, 1100, 1200, "ipfs://a".into(), 2)
            .unwrap();
        let second = w
            .governance
            .create_proposal(admin, 1100, 1200, "ipfs://b".into(), 2)
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert!(!w.governance.proposal(first).unwrap().is_boost());
    }

    #[test]
    fn test_create_boost_proposal_validations() {
        let w = world(1000);
        let admin = addr(ADMIN);

        assert!(matches!(
            w.governance.create_boost_proposal(
                admin,
                1100,
                1300,
                String::new(),
                tokens(10),
                1300,
                1400
            ),
            Err(GovernanceError::WrongBoostTime)
        ));
        assert!(matches!(
            w.governance.create_boost_proposal(
                admin,
                1100,
                1200,
                String::new(),
                tokens(10),
                1400,
                1300
            ),
            Err(GovernanceError::WrongBoostTime)
        ));
        assert!(matches!(
            w.governance.create_boost_proposal(
                admin,
                1100,
                1200,
                String::new(),
                U256::zero(),
                1300,
                1400
            ),
            Err(GovernanceError::ZeroAmount)
        ));

        let id = w
            .governance
            .create_boost_proposal(admin, 1100, 1200, String::new(), tokens(10), 1300, 1400)
            .unwrap();
        let proposal = w.governance.proposal(id).unwrap();
        assert!(proposal.is_boost());
        // Only the (claimed) master is in the snapshot
        assert_eq!(proposal.choice_count(), 1);
    }

    #[test]
    fn test_vote_weight_bounds_and_window() {
        let w = world(1000);
        let user = addr(1);
        lock_auto_max(&w, user, tokens(100));

        let id = w
            .governance
            .create_proposal(addr(ADMIN), 1100, 1200, String::new(), 2)
            .unwrap();

        assert!(matches!(
            w.governance.vote(user, id, 0, 0),
            Err(GovernanceError::InvalidWeight)
        ));
        assert!(matches!(
            w.governance.vote(user, id, 0, 101),
            Err(GovernanceError::InvalidWeight)
        ));
        assert!(matches!(
            w.governance.vote(user, 99, 0, 50),
            Err(GovernanceError::NoSuchProposal)
        ));

        // Before the window opens
        assert!(matches!(
            w.governance.vote(user, id, 0, 50),
            Err(GovernanceError::VotingNotOpen)
        ));

        // At the exact start
        w.clock.set(1100);
        w.governance.vote(user, id, 0, 50).unwrap();

        // At the exact end another user can still vote
        let late = addr(2);
        lock_auto_max(&w, late, tokens(10));
        w.clock.set(1200);
        w.governance.vote(late, id, 0, 50).unwrap();

        // One past the end
        let too_late = addr(3);
        lock_auto_max(&w, too_late, tokens(10));
        w.clock.set(1201);
        assert!(matches!(
            w.governance.vote(too_late, id, 0, 50),
            Err(GovernanceError::VotingNotOpen)
        ));
    }

    #[test]
    fn test_vote_requires_voting_power() {
        let w = world(1000);
        let id = w
            .governance
            .create_proposal(addr(ADMIN), 1100, 1200, String::new(), 2)
            .unwrap();
        w.clock.set(1100);
        assert!(matches!(
            w.governance.vote(addr(1), id, 0, 50),
            Err(GovernanceError::ZeroVeBalance)
        ));
    }

    #[test]
    fn test_vote_choice_and_double_vote() {
        let w = world(1000);
        let user = addr(1);
        lock_auto_max(&w, user, tokens(100));

        let id = w
            .governance
            .create_proposal(addr(ADMIN), 1100, 1200, String::new(), 2)
            .unwrap();
        w.clock.set(1100);

        assert!(matches!(
            w.governance.vote(user, id, 2, 50),
            Err(GovernanceError::NoSuchOption)
        ));

        w.governance.vote(user, id, 1, 50).unwrap();
        assert!(matches!(
            w.governance.vote(user, id, 0, 10),
            Err(GovernanceError::UserIsVoted)
        ));
    }

    #[test]
    fn test_vote_allocates_unused_power() {
        let w = world(1000);
        let user = addr(1);
        lock_auto_max(&w, user, tokens(100));
        let ve = w.master.ve_balance(user);
        assert_eq!(ve, tokens(100));

        let admin = addr(ADMIN);
        let p1 = w
            .governance
            .create_proposal(admin, 1100, 1200, String::new(), 1)
            .unwrap();
        let p2 = w
            .governance
            .create_proposal(admin, 1100, 1200, String::new(), 1)
            .unwrap();
        w.clock.set(1100);

        // 50% of the full power
        w.governance.vote(user, p1, 0, 50).unwrap();
        assert_eq!(w.governance.user_vote(p1, user, 0), tokens(50));
        assert_eq!(w.governance.user_total_votes(user), tokens(50));

        // 100% of what is left
        w.governance.vote(user, p2, 0, 100).unwrap();
        assert_eq!(w.governance.user_vote(p2, user, 0), tokens(50));
        assert_eq!(w.governance.user_total_votes(user), tokens(100));

        // Allocation never exceeds the live voting power
        assert!(w.governance.user_total_votes(user) <= w.master.ve_balance(user));
    }

    #[test]
    fn test_vote_rejected_when_power_decayed_below_allocation() {
        let w = world(1000);
        let user = addr(1);
        // Plain lock, no auto-max: power decays as the lock ages.
        w.ledger.mint(w.token, user, tokens(100));
        w.master.create_lock(user, tokens(100), MIN_LOCK).unwrap();

        let admin = addr(ADMIN);
        let p1 = w
            .governance
            .create_proposal(admin, 1001, MIN_LOCK + 1000, String::new(), 1)
            .unwrap();
        let p2 = w
            .governance
            .create_proposal(admin, 1001, MIN_LOCK + 1000, String::new(), 1)
            .unwrap();

        w.clock.set(1001);
        w.governance.vote(user, p1, 0, 100).unwrap();
        let allocated = w.governance.user_total_votes(user);
        assert!(!allocated.is_zero());

        // Halfway to expiry the live power is under the allocation
        w.clock.set(1001 + MIN_LOCK / 2);
        assert!(w.master.ve_balance(user) < allocated);
        assert!(matches!(
            w.governance.vote(user, p2, 0, 1),
            Err(GovernanceError::ExceedsAvailableWeight)
        ));
    }

    #[test]
    fn test_cancel_proposal() {
        let w = world(1000);
        let admin = addr(ADMIN);
        let user = addr(1);
        lock_auto_max(&w, user, tokens(10));

        let clean = w
            .governance
            .create_proposal(admin, 1100, 1200, String::new(), 1)
            .unwrap();
        let voted = w
            .governance
            .create_proposal(admin, 1100, 1200, String::new(), 1)
            .unwrap();

        w.clock.set(1100);
        w.governance.vote(user, voted, 0, 50).unwrap();

        assert!(matches!(
            w.governance.cancel_proposal(admin, voted),
            Err(GovernanceError::ProposalHasStakedVotes)
        ));

        w.governance.cancel_proposal(admin, clean).unwrap();
        assert_eq!(
            w.governance.proposal(clean).unwrap().status,
            ProposalStatus::Cancelled
        );
        assert!(matches!(
            w.governance.cancel_proposal(admin, clean),
            Err(GovernanceError::WrongStatus)
        ));
    }

    #[test]
    fn test_vote_reward_execute_and_claim() {
        let w = world(1000);
        let admin = addr(ADMIN);
        let user = addr(1);
        lock_auto_max(&w, user, tokens(100));
        w.ledger.mint(w.token, w.bank, tokens(40));

        let id = w
            .governance
            .create_proposal(admin, 1100, 1200, String::new(), 1)
            .unwrap();
        w.clock.set(1100);
        w.governance.vote(user, id, 0, 100).unwrap();

        assert!(matches!(
            w.governance.set_vote_reward(admin, id, U256::zero()),
            Err(GovernanceError::ZeroAmount)
        ));
        w.governance.set_vote_reward(admin, id, tokens(40)).unwrap();

        // Voting still open
        assert!(matches!(
            w.governance.execute_vote_reward_proposal(admin, id),
            Err(GovernanceError::TimeIsNotUp)
        ));

        w.clock.set(1201);
        w.governance.execute_vote_reward_proposal(admin, id).unwrap();
        assert_eq!(
            w.governance.proposal(id).unwrap().status,
            ProposalStatus::Executed
        );

        // Sole voter takes the whole pool, restaked into the master
        let staked_before = w.master.user_info(user).unwrap().amount;
        let reward = w.governance.claim_and_lock(user, id).unwrap();
        assert_eq!(reward, tokens(40));
        assert_eq!(
            w.master.user_info(user).unwrap().amount,
            staked_before + tokens(40)
        );
        assert_eq!(w.ledger.balance_of(w.token, w.bank), U256::zero());
        assert_eq!(
            w.ledger.balance_of(w.token, w.master.address()),
            tokens(100) + tokens(40)
        );

        assert!(matches!(
            w.governance.claim_and_lock(user, id),
            Err(GovernanceError::RewardAlreadyClaimed)
        ));
        assert!(matches!(
            w.governance.claim_and_lock(addr(2), id),
            Err(GovernanceError::UserIsNotVoted)
        ));
    }

    #[test]
    fn test_execute_without_reward_fails() {
        let w = world(1000);
        let admin = addr(ADMIN);
        let id = w
            .governance
            .create_proposal(admin, 1100, 1200, String::new(), 1)
            .unwrap();
        w.clock.set(1201);
        assert!(matches!(
            w.governance.execute_vote_reward_proposal(admin, id),
            Err(GovernanceError::RewardIsZero)
        ));
    }

    #[test]
    fn test_vote_reset_on_withdraw() {
        let w = world(1000);
        let user = addr(1);
        w.ledger.mint(w.token, user, tokens(100));
        w.master.create_lock(user, tokens(100), MIN_LOCK).unwrap();

        let id = w
            .governance
            .create_proposal(addr(ADMIN), 1100, 1200, String::new(), 1)
            .unwrap();
        w.clock.set(1100);
        w.governance.vote(user, id, 0, 50).unwrap();
        assert!(!w.governance.user_total_votes(user).is_zero());

        w.clock.set(1000 + MIN_LOCK + 1);
        w.master.withdraw(user).unwrap();
        assert_eq!(w.governance.user_total_votes(user), U256::zero());
    }

    #[test]
    fn test_vote_reset_on_extend_after_expiry() {
        let w = world(1000);
        let user = addr(1);
        w.ledger.mint(w.token, user, tokens(100));
        w.master.create_lock(user, tokens(100), MIN_LOCK).unwrap();

        let id = w
            .governance
            .create_proposal(addr(ADMIN), 1100, 1200, String::new(), 1)
            .unwrap();
        w.clock.set(1100);
        w.governance.vote(user, id, 0, 50).unwrap();
        assert!(!w.governance.user_total_votes(user).is_zero());

        // Lock lapses, then the extension resets the stale allocation
        w.clock.set(1000 + MIN_LOCK + 10);
        w.master.extend_duration(user, MIN_LOCK).unwrap();
        assert_eq!(w.governance.user_total_votes(user), U256::zero());
        assert!(!w.master.ve_balance(user).is_zero());
    }

    #[test]
    fn test_reset_votes_gate() {
        let w = world(1000);
        let result = GovernanceHandle::reset_votes(w.governance.as_ref(), addr(9), addr(1));
        assert!(matches!(result, Err(StakingError::NotValidator)));
    }

    // ------------------------------------------------------------------
    // Boost end-to-end
    // ------------------------------------------------------------------

    fn claimed_secondary(w: &World, user: Address) -> Arc<Validator> {
        // Tier 2 has no entry threshold, so a small auto-max lock suffices.
        let secondary = w
            .factory
            .create_validator(addr(ADMIN), w.token, addr(OWNER), 2, addr(VERIFIER))
            .unwrap();
        let deadline = w.clock.now() + 1000;
        let digest = purchase_digest(
            U256::from(1u64),
            secondary.address(),
            deadline,
            1,
            user,
            2,
        );
        let sig = StaticOracle::sign_as(addr(VERIFIER), &digest);
        secondary
            .purchase_validator(user, U256::from(1u64), 2, deadline, &sig)
            .unwrap();
        secondary
            .set_governance(
                addr(ADMIN),
                Arc::clone(&w.governance) as Arc<dyn GovernanceHandle>,
            )
            .unwrap();
        secondary
    }

    #[test]
    fn test_boost_proposal_end_to_end() {
        let w = world(1000);
        let admin = addr(ADMIN);
        let (u1, u2, u3) = (addr(1), addr(2), addr(3));

        // Voting power 600 / 300 / 100, all auto-max
        lock_auto_max(&w, u1, tokens(600));
        lock_auto_max(&w, u2, tokens(300));
        lock_auto_max(&w, u3, tokens(100));

        let v1 = claimed_secondary(&w, u1);
        let v2 = claimed_secondary(&w, u2);
        let v3 = claimed_secondary(&w, u3);

        // Each purchaser also stakes in their own validator so the boost
        // has someone to accrue to.
        for (user, validator) in [(u1, &v1), (u2, &v2), (u3, &v3)] {
            w.ledger.mint(w.token, user, tokens(50));
            validator.create_lock(user, tokens(50), MIN_LOCK).unwrap();
        }

        w.ledger.mint(w.token, w.bank, tokens(10_000));
        let id = w
            .governance
            .create_boost_proposal(
                admin,
                1100,
                1200,
                "ipfs://boost".into(),
                tokens(10_000),
                1300,
                2300,
            )
            .unwrap();
        // Snapshot order: master, v1, v2, v3
        assert_eq!(w.governance.proposal(id).unwrap().choice_count(), 4);

        // Too early to distribute
        assert!(matches!(
            w.governance.add_boost_reward(admin, id),
            Err(GovernanceError::RewardDistributionNotAllowed)
        ));

        w.clock.set(1150);
        w.governance.vote(u1, id, 1, 100).unwrap();
        w.governance.vote(u2, id, 2, 100).unwrap();
        w.governance.vote(u3, id, 3, 100).unwrap();
        assert_eq!(w.governance.option_votes(id, 1), tokens(600));
        assert_eq!(w.governance.option_votes(id, 2), tokens(300));
        assert_eq!(w.governance.option_votes(id, 3), tokens(100));

        w.clock.set(1250);
        w.governance.add_boost_reward(admin, id).unwrap();

        // 60% / 30% / 10% of the pool moved from the bank
        assert_eq!(
            w.ledger.balance_of(w.token, v1.address()),
            tokens(50) + tokens(6_000)
        );
        assert_eq!(
            w.ledger.balance_of(w.token, v2.address()),
            tokens(50) + tokens(3_000)
        );
        assert_eq!(
            w.ledger.balance_of(w.token, v3.address()),
            tokens(50) + tokens(1_000)
        );
        assert_eq!(w.ledger.balance_of(w.token, w.bank), U256::zero());
        assert_eq!(v1.boost_reward_count(), 1);

        let proposal = w.governance.proposal(id).unwrap();
        assert_eq!(proposal.status, ProposalStatus::Executed);
        if let ProposalKind::Boost { boost_reward, .. } = proposal.kind {
            assert_eq!(boost_reward, U256::zero());
        }

        // No second distribution
        assert!(matches!(
            w.governance.add_boost_reward(admin, id),
            Err(GovernanceError::WrongStatus)
        ));

        // After the boost window the sole staker of each validator claims
        // their whole share.
        w.clock.set(2300);
        v1.claim(u1).unwrap();
        v2.claim(u2).unwrap();
        v3.claim(u3).unwrap();

        let claimed = w.ledger.balance_of(w.token, u1)
            + w.ledger.balance_of(w.token, u2)
            + w.ledger.balance_of(w.token, u3);
        assert_eq!(claimed, tokens(10_000));
    }

    #[test]
    fn test_boost_distribution_without_votes() {
        let w = world(1000);
        let admin = addr(ADMIN);
        let id = w
            .governance
            .create_boost_proposal(admin, 1100, 1200, String::new(), tokens(10), 1300, 1400)
            .unwrap();
        w.clock.set(1250);
        assert!(matches!(
            w.governance.add_boost_reward(admin, id),
            Err(GovernanceError::NoVotes)
        ));
    }
}
