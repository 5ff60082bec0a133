/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! General purpose, read-only interface for querying the escrow store.

use crate::types::{
    basic::{Amount, CampaignID, ContributionID, EscrowTransactionID, MilestoneID, SettlementReference, UserID},
    campaign::Campaign,
    lease::{Lease, LeaseScope},
    ledger::{Contribution, EscrowTransaction, Vote},
    milestone::{Milestone, ReviewState},
};

use super::super::{
    invariants,
    pluggables::{KVGet, KVGetError, KVStore, Key},
};

use super::internal::StoreError;

/// A factory for [`EscrowStoreSnapshot`]s.
#[derive(Clone)]
pub struct EscrowStoreCamera<K: KVStore>(K);

impl<K: KVStore> EscrowStoreCamera<K> {
    pub fn new(kv_store: K) -> Self {
        EscrowStoreCamera(kv_store)
    }

    pub fn snapshot(&self) -> EscrowStoreSnapshot<K::Snapshot<'_>> {
        EscrowStoreSnapshot(self.0.snapshot())
    }
}

/// A read-only view into the escrow store.
///
/// A snapshot taken through an [`EscrowStoreCamera`] is guaranteed to stay unchanged.
pub struct EscrowStoreSnapshot<S: KVGet>(pub(super) S);

impl<S: KVGet> EscrowStoreSnapshot<S> {
    pub(crate) fn new(kv_snapshot: S) -> Self {
        EscrowStoreSnapshot(kv_snapshot)
    }

    /* ↓↓↓ Basic state getters ↓↓↓ */

    pub fn campaign_count(&self) -> Result<u64, StoreError> {
        Ok(self.0.campaign_count()?)
    }

    pub fn campaign(&self, campaign: CampaignID) -> Result<Option<Campaign>, StoreError> {
        Ok(self.0.campaign(campaign)?)
    }

    pub fn milestone(&self, milestone: MilestoneID) -> Result<Option<Milestone>, StoreError> {
        Ok(self.0.milestone(milestone)?)
    }

    pub fn contribution(&self, contribution: ContributionID) -> Result<Option<Contribution>, StoreError> {
        Ok(self.0.contribution(contribution)?)
    }

    pub fn contributed_amount(&self, campaign: CampaignID, user: UserID) -> Result<Amount, StoreError> {
        Ok(self.0.contributed_amount(campaign, user)?)
    }

    pub fn contributors(&self, campaign: CampaignID) -> Result<Vec<UserID>, StoreError> {
        Ok(self.0.contributors(campaign)?)
    }

    pub fn settlement_reference_owner(
        &self,
        reference: &SettlementReference,
    ) -> Result<Option<ContributionID>, StoreError> {
        Ok(self.0.settlement_reference_owner(reference)?)
    }

    pub fn vote(&self, milestone: MilestoneID, voter: UserID) -> Result<Option<Vote>, StoreError> {
        Ok(self.0.vote(milestone, voter)?)
    }

    pub fn voters(&self, milestone: MilestoneID) -> Result<Vec<UserID>, StoreError> {
        Ok(self.0.voters(milestone)?)
    }

    /// Get the lease on `scope`, if one is stored. The lease may have expired.
    pub fn lease(&self, scope: LeaseScope) -> Result<Option<Lease>, StoreError> {
        Ok(self.0.lease(scope)?)
    }

    /* ↓↓↓ Extra state getters ↓↓↓ */

    /// Get every milestone of `campaign`, in order.
    pub fn milestones(&self, campaign: &Campaign) -> Result<Vec<Milestone>, StoreError> {
        (1..=campaign.milestone_count)
            .map(|order| {
                let milestone = MilestoneID::new(campaign.id, order);
                self.0.milestone(milestone)?.ok_or_else(|| {
                    StoreError::from(KVGetError::ValueExpectedButNotFound {
                        key: Key::Milestone { milestone },
                    })
                })
            })
            .collect()
    }

    /// Get the milestone of `campaign` that is currently accepting contributions, if any.
    pub fn active_milestone(&self, campaign: &Campaign) -> Result<Option<Milestone>, StoreError> {
        let milestones = self.milestones(campaign)?;
        Ok(invariants::active_milestone(&milestones).cloned())
    }

    /// Get every contribution made to `campaign`, oldest first.
    pub fn contributions(&self, campaign: &Campaign) -> Result<Vec<Contribution>, StoreError> {
        (0..campaign.contribution_count)
            .map(|index| {
                let contribution = ContributionID {
                    campaign: campaign.id,
                    index,
                };
                self.0.contribution(contribution)?.ok_or_else(|| {
                    StoreError::from(KVGetError::ValueExpectedButNotFound {
                        key: Key::Contribution { contribution },
                    })
                })
            })
            .collect()
    }

    /// Get every vote cast on `milestone`, in the order they were cast.
    pub fn votes(&self, milestone: MilestoneID) -> Result<Vec<Vote>, StoreError> {
        self.0
            .voters(milestone)?
            .into_iter()
            .map(|voter| {
                self.0.vote(milestone, voter)?.ok_or_else(|| {
                    StoreError::from(KVGetError::ValueExpectedButNotFound {
                        key: Key::Vote { milestone, voter },
                    })
                })
            })
            .collect()
    }

    /// Get every vote `voter` has cast, on any campaign's milestones, newest first.
    pub fn votes_by(&self, voter: UserID) -> Result<Vec<Vote>, StoreError> {
        let mut votes = Vec::new();
        for campaign in (1..=self.campaign_count()?).map(CampaignID::new) {
            let campaign = match self.campaign(campaign)? {
                Some(campaign) => campaign,
                None => continue,
            };
            for order in 1..=campaign.milestone_count {
                votes.extend(self.vote(MilestoneID::new(campaign.id, order), voter)?);
            }
        }
        votes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(votes)
    }

    /// Get `campaign`'s escrow ledger, oldest entry first.
    pub fn escrow_transactions(&self, campaign: &Campaign) -> Result<Vec<EscrowTransaction>, StoreError> {
        (0..campaign.escrow_transaction_count)
            .map(|index| {
                let transaction = EscrowTransactionID {
                    campaign: campaign.id,
                    index,
                };
                self.0.escrow_transaction(transaction)?.ok_or_else(|| {
                    StoreError::from(KVGetError::ValueExpectedButNotFound {
                        key: Key::EscrowTransaction { transaction },
                    })
                })
            })
            .collect()
    }

    /// Summarize the review progress of `campaign`'s milestones.
    pub fn milestone_stats(&self, campaign: &Campaign) -> Result<MilestoneStats, StoreError> {
        let mut stats = MilestoneStats::default();
        for milestone in self.milestones(campaign)? {
            stats.total += 1;
            match milestone.review_state {
                ReviewState::Pending => stats.pending += 1,
                ReviewState::Submitted => stats.submitted += 1,
                ReviewState::Voting => stats.voting += 1,
                ReviewState::Approved => {
                    stats.approved += 1;
                    stats.approved_amount += milestone.amount;
                }
                ReviewState::Rejected => stats.rejected += 1,
                ReviewState::Expired => stats.expired += 1,
            }
        }
        Ok(stats)
    }

    /// Summarize the contributions made to `campaign`.
    pub fn contribution_stats(&self, campaign: &Campaign) -> Result<ContributionStats, StoreError> {
        let contributions = self.contributions(campaign)?;
        let total_amount: Amount = contributions.iter().map(|contribution| contribution.amount).sum();
        let count = contributions.len() as u64;
        let average_amount = if count == 0 {
            Amount::zero()
        } else {
            Amount::new(total_amount.int() / count)
        };
        Ok(ContributionStats {
            total_amount,
            count,
            average_amount,
            unique_backers: self.0.contributors(campaign.id)?.len() as u64,
        })
    }
}

/// Counts of a campaign's milestones by review state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MilestoneStats {
    pub total: u32,
    pub pending: u32,
    pub submitted: u32,
    pub voting: u32,
    pub approved: u32,
    pub rejected: u32,
    pub expired: u32,
    /// Sum of the amounts of approved milestones, i.e., how much has been released.
    pub approved_amount: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContributionStats {
    pub total_amount: Amount,
    pub count: u64,
    /// Rounded down to whole currency units.
    pub average_amount: Amount,
    pub unique_backers: u64,
}
