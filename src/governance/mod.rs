//! Governance and boost distribution
//!
//! Proposals, veBalance-bounded voting, vote-reward escrow with
//! claim-and-restake, and proportional boost-pool distribution to the
//! validator fleet.

pub mod engine;
pub mod proposal;

pub use engine::{Governance, GovernanceConfig, GovernanceError, MAX_VOTE_WEIGHT};
pub use proposal::{Proposal, ProposalKind, ProposalStatus};
