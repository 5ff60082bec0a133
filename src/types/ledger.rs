/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Append-only records: contributions, votes, and escrow transactions.
//!
//! None of these are modified after they are written.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt::{self, Display, Formatter};

use super::basic::{
    Amount, ContributionID, EscrowTransactionID, MilestoneID, RewardTierID, SettlementReference, Timestamp,
    UserID, VotingPower,
};

/// A backer's contribution to a campaign.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Contribution {
    pub id: ContributionID,
    pub contributor: UserID,
    pub amount: Amount,
    pub reward_tier: Option<RewardTierID>,
    /// Funds at most one contribution across all campaigns.
    pub settlement_reference: SettlementReference,
    pub created_at: Timestamp,
}

/// A backer's vote on a milestone. At most one exists per (milestone, voter) pair.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub milestone: MilestoneID,
    pub voter: UserID,
    pub is_approval: bool,
    pub comment: Option<String>,
    pub voting_power: VotingPower,
    pub created_at: Timestamp,
}

/// An entry in a campaign's escrow ledger.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct EscrowTransaction {
    pub id: EscrowTransactionID,
    pub milestone: Option<MilestoneID>,
    pub kind: EscrowTransactionKind,
    pub amount: Amount,
    pub description: String,
    pub status: TransactionStatus,
    pub executed_by: Executor,
    pub executed_at: Timestamp,
    pub settlement_reference: Option<SettlementReference>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum EscrowTransactionKind {
    Deposit,
    Release,
}

/// Ledger entries are only appended once the funds they describe have moved, so every entry is
/// `Confirmed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum TransactionStatus {
    Confirmed,
}

/// Who caused a state transition or a ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Executor {
    /// A user acting directly, e.g., an admin approving a milestone or a backer contributing.
    User(UserID),
    /// The outcome of a backer vote, finalized as a side effect of a request.
    VotingOutcome,
    /// The periodic release sweep.
    ReleaseScheduler,
}

impl Display for Executor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Executor::User(user) => Display::fmt(user, f),
            Executor::VotingOutcome => f.write_str("voting-outcome"),
            Executor::ReleaseScheduler => f.write_str("release-scheduler"),
        }
    }
}
