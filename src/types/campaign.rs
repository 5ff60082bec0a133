/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The campaign record, as far as the escrow core is concerned.

use borsh::{BorshDeserialize, BorshSerialize};

use super::basic::{Amount, CampaignID, UserID};

/// A crowdfunding campaign's funding and escrow accounting.
///
/// ## Escrow accounting
///
/// Every contribution raises both `current_amount` and `escrow_amount`. Every approved milestone moves
/// its `amount` from `escrow_amount` to `released_amount`. Therefore, at all times:
///
/// `escrow_amount + released_amount == current_amount`.
///
/// ## Counters
///
/// The key-value store that backs the escrow core cannot enumerate keys, so the campaign record keeps
/// the number of milestones, contributions, and escrow transactions it owns. These are only ever
/// incremented, and only inside the same write batch that inserts the counted record.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Campaign {
    pub id: CampaignID,
    pub creator: UserID,
    pub target_amount: Amount,
    pub current_amount: Amount,
    pub escrow_amount: Amount,
    pub released_amount: Amount,
    pub requires_milestones: bool,
    pub status: CampaignStatus,
    pub milestone_count: u32,
    pub contribution_count: u64,
    pub escrow_transaction_count: u64,
}

impl Campaign {
    pub(crate) fn new(id: CampaignID, creator: UserID, target_amount: Amount, requires_milestones: bool) -> Self {
        Self {
            id,
            creator,
            target_amount,
            current_amount: Amount::zero(),
            escrow_amount: Amount::zero(),
            released_amount: Amount::zero(),
            requires_milestones,
            status: CampaignStatus::Active,
            milestone_count: 0,
            contribution_count: 0,
            escrow_transaction_count: 0,
        }
    }

    /// Whether contributions to this campaign must be routed through its active milestone.
    pub fn tracks_milestone_funding(&self) -> bool {
        self.requires_milestones || self.milestone_count > 0
    }

    pub fn is_creator(&self, user: UserID) -> bool {
        self.creator == user
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum CampaignStatus {
    Active,
    /// Every milestone has been approved and released.
    Completed,
}
