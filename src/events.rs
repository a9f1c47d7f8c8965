//! Protocol events
//!
//! Every state-mutating entry point records what happened for off-process
//! indexers and for tests. Each component owns an [`EventLog`]; an aborted
//! operation records nothing because events are pushed only after the
//! operation's fallible steps have completed.

use crate::crypto::Address;
use parking_lot::RwLock;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Everything the protocol announces to the outside world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// A validator instance was registered with the factory.
    ValidatorCreated {
        owner: Address,
        validator: Address,
        new_length: u64,
    },

    /// Principal entered a lock (create, increase, extend, or stake_for).
    Deposit {
        user: Address,
        amount: U256,
        lock_start: u64,
        duration: u64,
        lock_end: u64,
        now: u64,
    },

    /// Base rewards paid out; `fee` went to the validator owner.
    Claim {
        user: Address,
        net: U256,
        fee: U256,
    },

    /// Principal returned after lock expiry.
    Withdraw {
        user: Address,
        amount: U256,
        now: u64,
    },

    /// Auto-renewing max-lock flag toggled.
    SetAutoMax {
        user: Address,
        flag: bool,
    },

    /// A secondary validator was purchased.
    PurchaseValidator {
        user: Address,
        np: U256,
        quality: u8,
    },

    /// Governance opened a boost accumulator on a validator.
    BoostRewardAdded {
        start: u64,
        end: u64,
        total: U256,
    },

    /// Boost rewards paid out to a staker.
    BoostRewardClaimed {
        user: Address,
        amount: U256,
    },

    /// Deposit-fee escrow drained to the validator owner.
    FeesClaimed {
        recipient: Address,
        amount: U256,
    },

    /// A regular proposal was opened.
    ProposalCreated {
        id: u64,
        start_time: u64,
        end_time: u64,
    },

    /// A boost proposal was opened.
    BoostProposalCreated {
        id: u64,
        start_time: u64,
        end_time: u64,
        boost_reward: U256,
    },

    /// A vote was cast.
    Voted {
        user: Address,
        id: u64,
        choice: u64,
        stake_weight: U256,
    },

    /// One validator's share left the bank during boost distribution.
    BoostRewardTransferred {
        id: u64,
        validator: Address,
        share: U256,
    },

    /// A boost proposal finished distributing its pool.
    BoostRewardDistributed {
        id: u64,
        total: U256,
    },

    /// A regular proposal was cancelled.
    ProposalCancelled {
        id: u64,
    },

    /// A boost proposal was cancelled.
    BoostProposalCancelled {
        id: u64,
    },

    /// A vote-reward proposal moved to Executed.
    RewardDistributionExecuted {
        id: u64,
    },

    /// A voter claimed their share and restaked it into the master.
    RewardsClaimedAndLocked {
        id: u64,
        user: Address,
        reward: U256,
    },
}

/// Append-only event buffer owned by a component.
#[derive(Default)]
pub struct EventLog {
    events: RwLock<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event.
    pub fn emit(&self, event: Event) {
        self.events.write().push(event);
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Drain the buffer, returning the recorded events.
    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.write())
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}
