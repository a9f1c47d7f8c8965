//! Proposal records
//!
//! Two flavors share one lifecycle: regular proposals carry an opaque
//! choice count, boost proposals carry a reward pool, a distribution
//! window, and a snapshot of the claimed validator fleet taken at creation.
//! Status is terminal on Executed or Cancelled and never reverts.

use crate::crypto::Address;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Proposal lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    Pending,
    Executed,
    Cancelled,
}

/// What a proposal is about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProposalKind {
    /// Free-form ballot with `total_choices` options.
    Regular { total_choices: u64 },
    /// Boost-reward ballot; choices are the snapshot validators.
    Boost {
        /// Pool distributed at execution; zeroed afterwards so a second
        /// distribution has nothing to move.
        boost_reward: U256,
        boost_start_time: u64,
        boost_end_time: u64,
        /// Claimed validators captured at creation, in fleet order.
        validators: Vec<Address>,
    },
}

/// One governance proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub metadata_uri: String,
    pub status: ProposalStatus,
    pub kind: ProposalKind,
}

impl Proposal {
    /// Whether this is a boost proposal.
    pub fn is_boost(&self) -> bool {
        matches!(self.kind, ProposalKind::Boost { .. })
    }

    /// Whether `now` falls inside the voting window (both ends inclusive).
    pub fn voting_open(&self, now: u64) -> bool {
        now >= self.start_time && now <= self.end_time
    }

    /// Number of valid vote choices.
    pub fn choice_count(&self) -> u64 {
        match &self.kind {
            ProposalKind::Regular { total_choices } => *total_choices,
            ProposalKind::Boost { validators, .. } => validators.len() as u64,
        }
    }

    /// Validate a choice index for this proposal.
    pub fn valid_choice(&self, choice: u64) -> bool {
        match &self.kind {
            ProposalKind::Regular { total_choices } => choice < *total_choices,
            ProposalKind::Boost { validators, .. } => validators
                .get(choice as usize)
                .map(|v| !v.is_zero())
                .unwrap_or(false),
        }
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
