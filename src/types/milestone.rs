/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Milestones and their two independent lifecycles.
//!
//! A milestone moves along two axes at once:
//! 1. [`FundingState`]: whether it is currently the campaign's target for incoming contributions.
//! 2. [`ReviewState`]: how far its evidence has progressed through submission and backer voting.
//!
//! ```text
//! Funding:  Inactive ──(previous approved)──▶ Active ──(current_amount == amount)──▶ Funded
//!
//! Review:   Pending ──submit──▶ Submitted ──open voting──▶ Voting ──┬──▶ Approved
//!              │                                                    └──▶ Rejected
//!              └──(deadline passed)──▶ Expired
//! ```

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;

pub use sha2::Sha256 as CryptoHasher;

use super::basic::{Amount, CryptoHash, MilestoneID, SettlementReference, Timestamp, VotingPower};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Milestone {
    pub id: MilestoneID,
    pub title: String,
    pub description: String,
    pub proof_requirements: Option<String>,
    /// The amount this milestone asks for, and the amount released when it is approved.
    pub amount: Amount,
    /// The funds earmarked to this milestone specifically.
    pub current_amount: Amount,
    /// When evidence is due.
    pub deadline: Timestamp,
    pub funding_state: FundingState,
    pub review_state: ReviewState,
    pub evidence: Option<Evidence>,
    pub evidence_digest: Option<CryptoHash>,
    pub submission_note: Option<String>,
    pub submitted_at: Option<Timestamp>,
    /// Set provisionally on submission, and definitively when voting opens.
    pub voting_deadline: Option<Timestamp>,
    pub vote_start_time: Option<Timestamp>,
    pub vote_end_time: Option<Timestamp>,
    /// Sum of the voting power of approving votes.
    pub votes_for: VotingPower,
    /// Sum of the voting power of disapproving votes.
    pub votes_against: VotingPower,
    /// Optional correlation index into the external settlement layer. May be absent or stale; no
    /// internal transition depends on it.
    pub settlement_index: Option<u32>,
    pub release_reference: Option<SettlementReference>,
    pub approved_at: Option<Timestamp>,
    pub rejected_at: Option<Timestamp>,
    pub admin_notes: Option<String>,
}

impl Milestone {
    pub(crate) fn new(id: MilestoneID, plan: NewMilestone, funding_state: FundingState) -> Self {
        Self {
            id,
            title: plan.title,
            description: plan.description,
            proof_requirements: plan.proof_requirements,
            amount: plan.amount,
            current_amount: Amount::zero(),
            deadline: plan.deadline,
            funding_state,
            review_state: ReviewState::Pending,
            evidence: None,
            evidence_digest: None,
            submission_note: None,
            submitted_at: None,
            voting_deadline: None,
            vote_start_time: None,
            vote_end_time: None,
            votes_for: VotingPower::zero(),
            votes_against: VotingPower::zero(),
            settlement_index: plan.settlement_index,
            release_reference: None,
            approved_at: None,
            rejected_at: None,
            admin_notes: None,
        }
    }

    /// How much more this milestone can accept before it is fully funded.
    pub fn remaining(&self) -> Amount {
        self.amount.saturating_sub(self.current_amount)
    }

    pub fn is_fully_funded(&self) -> bool {
        self.current_amount >= self.amount
    }

    /// Whether this milestone can receive contributions. A campaign's active milestone is the lowest-order
    /// milestone for which this is true.
    pub fn accepts_funding(&self) -> bool {
        self.funding_state == FundingState::Active && !self.review_state.is_terminal()
    }

    /// Whether the voting window has closed as of `now`.
    pub fn voting_closed(&self, now: Timestamp) -> bool {
        match self.vote_end_time {
            Some(vote_end_time) => now > vote_end_time,
            None => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum FundingState {
    /// Not yet accepting contributions.
    Inactive,
    /// Accepting contributions.
    Active,
    /// Reached its amount. Evidence can be submitted.
    Funded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ReviewState {
    Pending,
    Submitted,
    Voting,
    Approved,
    Rejected,
    Expired,
}

impl ReviewState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReviewState::Approved | ReviewState::Rejected | ReviewState::Expired)
    }
}

/// Proof submitted by the creator that a milestone has been delivered.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Evidence {
    pub description: String,
    pub files: Vec<String>,
    pub links: Vec<String>,
}

impl Evidence {
    /// The SHA-256 digest of this evidence's description, files, and links.
    pub fn digest(&self) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(self.description.as_bytes());
        for file in &self.files {
            hasher.update(b"\x00f");
            hasher.update(file.as_bytes());
        }
        for link in &self.links {
            hasher.update(b"\x00l");
            hasher.update(link.as_bytes());
        }
        CryptoHash::new(hasher.finalize().into())
    }
}

/// A creator's plan for a single milestone, as passed to `create_milestones`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMilestone {
    pub order: u32,
    pub title: String,
    pub description: String,
    pub amount: Amount,
    pub deadline: Timestamp,
    pub proof_requirements: Option<String>,
    pub settlement_index: Option<u32>,
}

/// A creator's edit of a pending milestone, as passed to `update_milestone`. Fields left `None` are kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MilestoneUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub amount: Option<Amount>,
    pub deadline: Option<Timestamp>,
    pub proof_requirements: Option<String>,
}

impl MilestoneUpdate {
    pub fn is_empty(&self) -> bool {
        self == &MilestoneUpdate::default()
    }
}

impl Milestone {
    /// Apply `update`. A new amount re-decides whether a milestone that is being funded is fully funded.
    pub(crate) fn apply(&mut self, update: MilestoneUpdate) {
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(deadline) = update.deadline {
            self.deadline = deadline;
        }
        if let Some(proof_requirements) = update.proof_requirements {
            self.proof_requirements = Some(proof_requirements);
        }
        if let Some(amount) = update.amount {
            self.amount = amount;
            if self.funding_state != FundingState::Inactive {
                self.funding_state = if self.is_fully_funded() {
                    FundingState::Funded
                } else {
                    FundingState::Active
                };
            }
        }
    }
}
