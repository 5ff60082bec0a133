/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each escrow variable is stored in the user-provided key-value
//! store.
//!
//! # List of State Variables
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Campaign Count|[`u64`]|The number of campaigns registered so far. Campaign IDs run from 1 to this number.|
//! |Campaigns|[`CampaignID`] -> [`Campaign`](crate::types::campaign::Campaign)|Funding and escrow accounting of every campaign.|
//! |Milestones|[`MilestoneID`] -> [`Milestone`](crate::types::milestone::Milestone)|Every milestone, keyed by campaign and order.|
//! |Contributions|[`CampaignID`] ++ `u64` -> [`Contribution`](crate::types::ledger::Contribution)|A campaign's contributions, in the order they were recorded.|
//! |Contributed Amounts|[`CampaignID`] ++ [`UserID`] -> [`Amount`](crate::types::basic::Amount)|A user's total contribution to a campaign.|
//! |Contributors|[`CampaignID`] -> `Vec<UserID>`|The distinct users that contributed to a campaign.|
//! |Votes|[`MilestoneID`] ++ [`UserID`] -> [`Vote`](crate::types::ledger::Vote)|A user's vote on a milestone. The key itself makes the vote unique.|
//! |Voters|[`MilestoneID`] -> `Vec<UserID>`|The users that voted on a milestone, in the order they voted.|
//! |Escrow Transactions|[`CampaignID`] ++ `u64` -> [`EscrowTransaction`](crate::types::ledger::EscrowTransaction)|A campaign's append-only escrow ledger.|
//! |Settlement References|`bytes` -> [`ContributionID`](crate::types::basic::ContributionID)|The contribution each settlement reference funded.|
//! |Leases|[`LeaseScope`] -> [`Lease`](crate::types::lease::Lease)|Who is currently running a sweep, or writing to a campaign.|
//!
//! # Persistence of state variables
//!
//! Each variable is stored as **Borsh-serialized values**. "Single values" are stored at one-byte,
//! constant keys. Mappings are stored at keys formed by concatenating the variable's one-byte prefix
//! with the little-endian bytes of each identifier.

use crate::types::{
    basic::{CampaignID, MilestoneID, UserID},
    lease::LeaseScope,
};

pub const CAMPAIGN_COUNT: [u8; 1] = [0];
pub const CAMPAIGNS: [u8; 1] = [1];
pub const MILESTONES: [u8; 1] = [2];
pub const CONTRIBUTIONS: [u8; 1] = [3];
pub const CONTRIBUTED_AMOUNTS: [u8; 1] = [4];
pub const CONTRIBUTORS: [u8; 1] = [5];
pub const VOTES: [u8; 1] = [6];
pub const VOTERS: [u8; 1] = [7];
pub const ESCROW_TRANSACTIONS: [u8; 1] = [8];
pub const SETTLEMENT_REFERENCES: [u8; 1] = [9];
pub const LEASES: [u8; 1] = [10];

/// Takes references to two byteslices and returns a vector containing the bytes of the first one, and
/// then the bytes of the second one.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}

pub(crate) fn campaign_bytes(campaign: CampaignID) -> [u8; 8] {
    campaign.int().to_le_bytes()
}

pub(crate) fn milestone_bytes(milestone: MilestoneID) -> Vec<u8> {
    concat(&campaign_bytes(milestone.campaign), &milestone.order.to_le_bytes())
}

pub(crate) fn campaign_user_bytes(campaign: CampaignID, user: UserID) -> Vec<u8> {
    concat(&campaign_bytes(campaign), &user.int().to_le_bytes())
}

pub(crate) fn milestone_user_bytes(milestone: MilestoneID, user: UserID) -> Vec<u8> {
    concat(&milestone_bytes(milestone), &user.int().to_le_bytes())
}

pub(crate) fn campaign_index_bytes(campaign: CampaignID, index: u64) -> Vec<u8> {
    concat(&campaign_bytes(campaign), &index.to_le_bytes())
}

pub(crate) fn lease_key(scope: LeaseScope) -> Vec<u8> {
    match scope {
        LeaseScope::Sweep => concat(&LEASES, &[0]),
        LeaseScope::Campaign(campaign) => concat(&concat(&LEASES, &[1]), &campaign_bytes(campaign)),
    }
}
