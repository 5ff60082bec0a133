/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Contributions, and how they fund milestones.

use crate::{
    collaborators::Identity,
    engine::{authenticated, load_campaign, MilestoneEngine},
    error::{EscrowError, ValidationError},
    escrow_store::{
        accessors::internal::{EscrowWriteBatch, StoreError},
        invariants,
        pluggables::KVStore,
    },
    events::{ContributeEvent, Event},
    types::{
        basic::{Amount, CampaignID, ContributionID, EscrowTransactionID, RewardTierID, SettlementReference},
        ledger::{Contribution, EscrowTransaction, EscrowTransactionKind, Executor, TransactionStatus},
        milestone::{FundingState, Milestone},
    },
};

/// A backer's request to contribute to a campaign.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContributionRequest {
    pub amount: Amount,
    pub reward_tier: Option<RewardTierID>,
    /// The settlement layer's reference for the payment that funds this contribution. Each reference
    /// can fund at most one contribution.
    pub settlement_reference: SettlementReference,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContributionReceipt {
    pub contribution: Contribution,
    /// The milestone the contribution was credited to, as it is after the contribution.
    pub milestone: Option<Milestone>,
}

impl<K: KVStore> MilestoneEngine<K> {
    /// Record a contribution from `caller` to `campaign`.
    ///
    /// If the campaign tracks milestone funding, the contribution is credited to its active milestone,
    /// and must fit in the headroom the milestone has left. The contribution that fills the active
    /// milestone flips it to `Funded`.
    ///
    /// The contribution, the campaign's new totals, the milestone's new total, the `Deposit` ledger
    /// entry, and the settlement reference are all written in one batch. A settlement reference that has
    /// already funded a contribution, to this campaign or any other, is refused.
    pub fn contribute(
        &self,
        caller: Option<&Identity>,
        campaign: CampaignID,
        request: ContributionRequest,
    ) -> Result<ContributionReceipt, EscrowError> {
        let caller = authenticated(caller)?;
        let now = self.now();

        let receipt = self.with_campaign_lock(campaign, |store| {
            let (mut campaign, milestones, contributed, mut contributors) = {
                let reader = store.reader();
                let campaign = load_campaign(&reader, campaign)?;
                let milestones = reader.milestones(&campaign)?;
                let contributed = reader.contributed_amount(campaign.id, caller.user)?;
                let contributors = reader.contributors(campaign.id)?;
                (campaign, milestones, contributed, contributors)
            };
            if campaign.is_creator(caller.user) {
                return Err(EscrowError::forbidden("creators cannot back their own campaign"));
            }

            let credited = invariants::validate_contribution(&campaign, &milestones, request.amount)?;
            if store
                .reader()
                .settlement_reference_owner(&request.settlement_reference)?
                .is_some()
            {
                return Err(duplicate_reference(&request.settlement_reference));
            }
            let mut milestone = credited.and_then(|id| milestones.into_iter().find(|milestone| milestone.id == id));

            let contribution = Contribution {
                id: ContributionID {
                    campaign: campaign.id,
                    index: campaign.contribution_count,
                },
                contributor: caller.user,
                amount: request.amount,
                reward_tier: request.reward_tier,
                settlement_reference: request.settlement_reference.clone(),
                created_at: now,
            };
            let deposit = EscrowTransaction {
                id: EscrowTransactionID {
                    campaign: campaign.id,
                    index: campaign.escrow_transaction_count,
                },
                milestone: milestone.as_ref().map(|milestone| milestone.id),
                kind: EscrowTransactionKind::Deposit,
                amount: request.amount,
                description: format!("Contribution {} held in escrow", contribution.id),
                status: TransactionStatus::Confirmed,
                executed_by: Executor::User(caller.user),
                executed_at: now,
                settlement_reference: Some(request.settlement_reference.clone()),
            };

            campaign.contribution_count += 1;
            campaign.escrow_transaction_count += 1;
            campaign.current_amount = checked_add(campaign.current_amount, request.amount)?;
            campaign.escrow_amount = checked_add(campaign.escrow_amount, request.amount)?;
            let contributed = checked_add(contributed, request.amount)?;
            if !contributors.contains(&caller.user) {
                contributors.push(caller.user);
            }

            if let Some(milestone) = milestone.as_mut() {
                milestone.current_amount = checked_add(milestone.current_amount, request.amount)?;
                if milestone.is_fully_funded() {
                    milestone.funding_state = FundingState::Funded;
                }
            }

            let mut wb = EscrowWriteBatch::new();
            wb.set_contribution(&contribution)?;
            wb.set_escrow_transaction(&deposit)?;
            wb.set_contributed_amount(campaign.id, caller.user, contributed)?;
            wb.set_contributors(campaign.id, &contributors)?;
            wb.set_settlement_reference(&request.settlement_reference, contribution.id)?;
            if let Some(milestone) = &milestone {
                wb.set_milestone(milestone)?;
            }
            wb.set_campaign(&campaign)?;

            // A settlement reference is unique across campaigns, which the campaign's lock does not
            // cover, so the write only goes through if the reference is still unused when it lands.
            wb.expect_unused_settlement_reference(&request.settlement_reference);
            match store.write(wb) {
                Ok(()) => (),
                Err(StoreError::WriteConflict(_))
                    if store
                        .reader()
                        .settlement_reference_owner(&request.settlement_reference)?
                        .is_some() =>
                {
                    return Err(duplicate_reference(&request.settlement_reference))
                }
                Err(err) => return Err(err.into()),
            }

            Ok(ContributionReceipt { contribution, milestone })
        })?;

        self.publish(Event::Contribute(ContributeEvent {
            timestamp: now,
            contribution: receipt.contribution.clone(),
            milestone: receipt.milestone.as_ref().map(|milestone| milestone.id),
            milestone_funded: receipt
                .milestone
                .as_ref()
                .map_or(false, |milestone| milestone.funding_state == FundingState::Funded),
        }));

        Ok(receipt)
    }

    /// Get the milestone of `campaign` that is currently accepting contributions, if any.
    pub fn active_milestone(&self, campaign: CampaignID) -> Result<Option<Milestone>, EscrowError> {
        let camera = self.camera();
        let snapshot = camera.snapshot();
        let campaign = load_campaign(&snapshot, campaign)?;
        Ok(snapshot.active_milestone(&campaign)?)
    }
}

fn duplicate_reference(reference: &SettlementReference) -> EscrowError {
    ValidationError::DuplicateSettlementReference {
        reference: reference.clone(),
    }
    .into()
}

fn checked_add(lhs: Amount, rhs: Amount) -> Result<Amount, ValidationError> {
    lhs.checked_add(rhs).ok_or(ValidationError::AmountOverflow)
}
