/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Campaign registration and the milestone review state machine.
//!
//! ```text
//! Pending ──submit_milestone──▶ Submitted ──open_voting──▶ Voting ──┬──(release)──▶ Approved
//!    │                              │                              └──(reject)───▶ Rejected
//!    │                              └──approve_milestone / reject_milestone (admin override)
//!    ├──update_milestone──▶ Pending
//!    └──(deadline passed, swept)──▶ Expired
//! ```
//!
//! With [`auto_open_voting`](crate::platform::Configuration::auto_open_voting) set, `submit_milestone`
//! goes straight on to `open_voting`.
//!
//! Every transition reads the milestone and its campaign, checks that the transition is legal, and
//! writes the new state in one batch while holding the campaign's lock. Transitions that release funds
//! go through [`release_locked`](MilestoneEngine::release_locked), which only writes `Approved` once
//! the settlement layer has returned a reference, and only if the milestone is still stored exactly as
//! it was read.

use std::thread;

use crate::{
    collaborators::{Identity, Permission, ReleaseRequest, SettlementError},
    engine::{authenticated, load_campaign, load_milestone, MilestoneEngine},
    error::{EscrowError, StateConflict, ValidationError},
    escrow_store::{
        accessors::internal::{EscrowStore, EscrowWriteBatch, StoreError},
        invariants,
        pluggables::KVStore,
    },
    events::{
        ApproveMilestoneEvent, CreateMilestonesEvent, Event, OpenVotingEvent, RegisterCampaignEvent,
        RejectMilestoneEvent, SettlementFailedEvent, SubmitMilestoneEvent, UpdateMilestoneEvent,
    },
    types::{
        basic::{Amount, CampaignID, EscrowTransactionID, MilestoneID, SettlementReference},
        campaign::{Campaign, CampaignStatus},
        ledger::{EscrowTransaction, EscrowTransactionKind, Executor, TransactionStatus},
        milestone::{Evidence, FundingState, Milestone, MilestoneUpdate, NewMilestone, ReviewState},
    },
};

impl<K: KVStore> MilestoneEngine<K> {
    /// Register a new campaign created by `caller`.
    ///
    /// Campaigns are otherwise managed outside the escrow core; this records just enough about one for
    /// milestones and contributions to be attached to it.
    pub fn register_campaign(
        &self,
        caller: Option<&Identity>,
        target_amount: Amount,
    ) -> Result<Campaign, EscrowError> {
        let caller = authenticated(caller)?;
        if target_amount.is_zero() {
            return Err(ValidationError::ZeroTarget.into());
        }

        // The next ID is claimed by a write conditional on the count it was derived from, so two engines
        // sharing the store never hand out the same ID. The loser of a race retries with the new count.
        let mut store = self.store();
        let requires_milestones = target_amount >= self.config.milestone_threshold;
        let campaign = loop {
            let count = store.reader().campaign_count()?;
            let campaign = Campaign::new(CampaignID::new(count + 1), caller.user, target_amount, requires_milestones);

            let mut wb = EscrowWriteBatch::new();
            wb.expect_campaign_count(count)?;
            wb.set_campaign_count(count + 1)?;
            wb.set_campaign(&campaign)?;
            match store.write(wb) {
                Ok(()) => break campaign,
                Err(StoreError::WriteConflict(_)) => {
                    log::debug!("Campaign ID {} was claimed concurrently, retrying", count + 1);
                }
                Err(err) => return Err(err.into()),
            }
        };

        self.publish(Event::RegisterCampaign(RegisterCampaignEvent {
            timestamp: self.now(),
            campaign: campaign.id,
            creator: campaign.creator,
            target_amount,
            requires_milestones: campaign.requires_milestones,
        }));

        Ok(campaign)
    }

    /// Append the milestones described by `plan` to `campaign`. Only the campaign's creator may do this.
    ///
    /// All of the milestones are persisted together or not at all. The returned milestones are sorted by
    /// order.
    pub fn create_milestones(
        &self,
        caller: Option<&Identity>,
        campaign: CampaignID,
        mut plan: Vec<NewMilestone>,
    ) -> Result<Vec<Milestone>, EscrowError> {
        let caller = authenticated(caller)?;

        let created = self.with_campaign_lock(campaign, |store| {
            let (mut campaign, existing) = {
                let reader = store.reader();
                let campaign = load_campaign(&reader, campaign)?;
                let existing = reader.milestones(&campaign)?;
                (campaign, existing)
            };
            if !campaign.is_creator(caller.user) {
                return Err(EscrowError::forbidden("only the campaign creator can create milestones"));
            }
            invariants::validate_milestone_plan(&campaign, &existing, &plan)?;

            plan.sort_by_key(|milestone| milestone.order);
            let created: Vec<Milestone> = plan
                .into_iter()
                .enumerate()
                .map(|(i, milestone)| {
                    let id = MilestoneID::new(campaign.id, milestone.order);
                    Milestone::new(id, milestone, invariants::initial_funding_state(&existing, i == 0))
                })
                .collect();

            campaign.milestone_count += created.len() as u32;
            if campaign.target_amount >= self.config.milestone_threshold {
                campaign.requires_milestones = true;
            }
            campaign.status = CampaignStatus::Active;

            let mut wb = EscrowWriteBatch::new();
            for milestone in &created {
                wb.set_milestone(milestone)?;
            }
            wb.set_campaign(&campaign)?;
            store.write(wb)?;

            Ok(created)
        })?;

        self.publish(Event::CreateMilestones(CreateMilestonesEvent {
            timestamp: self.now(),
            campaign,
            milestones: created.iter().map(|milestone| milestone.id).collect(),
            total_amount: created.iter().map(|milestone| milestone.amount).sum(),
        }));

        Ok(created)
    }

    /// Edit a pending milestone. Only the campaign's creator may do this, and only before evidence is
    /// submitted.
    ///
    /// A new amount must keep the campaign's milestones within its target and cannot be less than the
    /// milestone has already raised. Raising the amount of a funded milestone puts it back to accepting
    /// contributions.
    pub fn update_milestone(
        &self,
        caller: Option<&Identity>,
        milestone: MilestoneID,
        update: MilestoneUpdate,
    ) -> Result<Milestone, EscrowError> {
        let caller = authenticated(caller)?;

        let updated = self.with_campaign_lock(milestone.campaign, |store| {
            let (campaign, mut milestone, milestones) = {
                let reader = store.reader();
                let (campaign, milestone) = load_milestone(&reader, milestone)?;
                let milestones = reader.milestones(&campaign)?;
                (campaign, milestone, milestones)
            };
            if !campaign.is_creator(caller.user) {
                return Err(EscrowError::forbidden("only the campaign creator can update milestones"));
            }
            if milestone.review_state != ReviewState::Pending {
                return Err(unexpected_review_state(&milestone, "update"));
            }
            invariants::validate_milestone_update(&campaign, &milestones, &milestone, &update)?;
            if update.is_empty() {
                return Ok(milestone);
            }

            milestone.apply(update);

            let mut wb = EscrowWriteBatch::new();
            wb.set_milestone(&milestone)?;
            store.write(wb)?;

            Ok(milestone)
        })?;

        self.publish(Event::UpdateMilestone(UpdateMilestoneEvent {
            timestamp: self.now(),
            milestone: updated.id,
            amount: updated.amount,
        }));

        Ok(updated)
    }

    /// Submit `evidence` that `milestone` has been delivered. Only the campaign's creator may do this,
    /// and only once the milestone is fully funded.
    ///
    /// Sets a provisional voting deadline one voting period from now. The deadline becomes definitive
    /// when voting is opened. With [`auto_open_voting`](crate::platform::Configuration::auto_open_voting)
    /// set, voting is opened right away; if that fails, the milestone stays `Submitted` for an admin to
    /// open, and the submission still succeeds.
    pub fn submit_milestone(
        &self,
        caller: Option<&Identity>,
        milestone: MilestoneID,
        evidence: Evidence,
        note: Option<String>,
    ) -> Result<Milestone, EscrowError> {
        let caller = authenticated(caller)?;
        let now = self.now();

        let submitted = self.with_campaign_lock(milestone.campaign, |store| {
            let (campaign, mut milestone) = load_milestone(&store.reader(), milestone)?;
            if !campaign.is_creator(caller.user) {
                return Err(EscrowError::forbidden("only the campaign creator can submit evidence"));
            }
            if milestone.review_state != ReviewState::Pending {
                return Err(unexpected_review_state(&milestone, "submit evidence"));
            }
            if campaign.tracks_milestone_funding() && milestone.funding_state != FundingState::Funded {
                return Err(EscrowError::InvalidState {
                    milestone: milestone.id,
                    conflict: StateConflict::NotFullyFunded {
                        current: milestone.current_amount,
                        required: milestone.amount,
                    },
                });
            }
            if evidence.description.trim().is_empty() {
                return Err(ValidationError::MissingEvidence.into());
            }

            milestone.review_state = ReviewState::Submitted;
            milestone.evidence_digest = Some(evidence.digest());
            milestone.evidence = Some(evidence);
            milestone.submission_note = note;
            milestone.submitted_at = Some(now);
            milestone.voting_deadline = Some(now + self.config.voting_period);

            let mut wb = EscrowWriteBatch::new();
            wb.set_milestone(&milestone)?;
            store.write(wb)?;

            Ok(milestone)
        })?;

        if let Some(evidence_digest) = submitted.evidence_digest {
            self.publish(Event::SubmitMilestone(SubmitMilestoneEvent {
                timestamp: now,
                milestone: submitted.id,
                evidence_digest,
            }));
        }

        if self.config.auto_open_voting {
            match self.start_voting(submitted.id) {
                Ok(opened) => return Ok(opened),
                Err(err) => log::warn!("Could not open voting on {} after submission: {}", submitted.id, err),
            }
        }

        Ok(submitted)
    }

    /// Open the voting window on a submitted milestone. The window closes one voting period from now.
    pub fn open_voting(&self, caller: Option<&Identity>, milestone: MilestoneID) -> Result<Milestone, EscrowError> {
        self.authorize(caller, Permission::OpenVoting)?;
        self.start_voting(milestone)
    }

    /// Move a submitted milestone to `Voting`, without checking who asked.
    pub(crate) fn start_voting(&self, milestone: MilestoneID) -> Result<Milestone, EscrowError> {
        let now = self.now();
        let vote_end_time = now + self.config.voting_period;

        let opened = self.with_campaign_lock(milestone.campaign, |store| {
            let (_, mut milestone) = load_milestone(&store.reader(), milestone)?;
            if milestone.review_state != ReviewState::Submitted {
                return Err(unexpected_review_state(&milestone, "open voting"));
            }

            milestone.review_state = ReviewState::Voting;
            milestone.vote_start_time = Some(now);
            milestone.vote_end_time = Some(vote_end_time);
            milestone.voting_deadline = Some(vote_end_time);

            let mut wb = EscrowWriteBatch::new();
            wb.set_milestone(&milestone)?;
            store.write(wb)?;

            Ok(milestone)
        })?;

        if let Err(err) = self.settlement.open_voting(&opened) {
            log::warn!("Settlement layer was not told that voting opened on {}: {}", opened.id, err);
        }

        self.publish(Event::OpenVoting(OpenVotingEvent {
            timestamp: now,
            milestone: opened.id,
            vote_end_time,
        }));

        Ok(opened)
    }

    /// Approve `milestone` and release its amount to the campaign's creator, bypassing the vote tally.
    pub fn approve_milestone(
        &self,
        caller: Option<&Identity>,
        milestone: MilestoneID,
    ) -> Result<Milestone, EscrowError> {
        let caller = self.authorize(caller, Permission::ApproveMilestone)?;

        self.with_campaign_lock(milestone.campaign, |store| {
            let (campaign, milestone) = load_milestone(&store.reader(), milestone)?;
            if !matches!(milestone.review_state, ReviewState::Submitted | ReviewState::Voting) {
                return Err(unexpected_review_state(&milestone, "approve"));
            }
            let id = milestone.id;
            self.release_locked(store, campaign, milestone, Executor::User(caller.user))?;
            load_milestone(&store.reader(), id).map(|(_, milestone)| milestone)
        })
    }

    /// Reject `milestone`, recording `reason` in its admin notes. No funds move.
    pub fn reject_milestone(
        &self,
        caller: Option<&Identity>,
        milestone: MilestoneID,
        reason: impl Into<String>,
    ) -> Result<Milestone, EscrowError> {
        let caller = self.authorize(caller, Permission::RejectMilestone)?;
        let reason = reason.into();

        self.with_campaign_lock(milestone.campaign, |store| {
            let (_, milestone) = load_milestone(&store.reader(), milestone)?;
            if !matches!(
                milestone.review_state,
                ReviewState::Pending | ReviewState::Submitted | ReviewState::Voting
            ) {
                return Err(unexpected_review_state(&milestone, "reject"));
            }
            self.reject_locked(store, milestone, Executor::User(caller.user), reason)
        })
    }

    /// Move `milestone` to `Rejected`. The caller must hold the campaign's lock and have checked that the
    /// milestone is not in a terminal state.
    pub(crate) fn reject_locked(
        &self,
        store: &mut EscrowStore<K>,
        mut milestone: Milestone,
        executed_by: Executor,
        reason: String,
    ) -> Result<Milestone, EscrowError> {
        let now = self.now();
        milestone.review_state = ReviewState::Rejected;
        milestone.rejected_at = Some(now);
        milestone.admin_notes = Some(reason.clone());
        if milestone.funding_state == FundingState::Active {
            milestone.funding_state = FundingState::Inactive;
        }

        let mut wb = EscrowWriteBatch::new();
        wb.set_milestone(&milestone)?;
        store.write(wb)?;

        self.publish(Event::RejectMilestone(RejectMilestoneEvent {
            timestamp: now,
            milestone: milestone.id,
            executed_by,
            reason,
        }));

        Ok(milestone)
    }

    /// Release `milestone`'s amount from `campaign`'s escrow and approve it.
    ///
    /// The settlement layer is asked to move the funds first, retrying transient failures up to
    /// [`settlement_attempts`](crate::platform::Configuration::settlement_attempts) times. Only if it
    /// succeeds are the approval, the escrow movement, the `Release` ledger entry, and the activation of
    /// the next milestone written, in one batch.
    ///
    /// If every attempt fails transiently, the milestone keeps its review state, a note asking for a
    /// manual release is written into its admin notes, and the error is returned.
    ///
    /// The caller must hold the campaign's lock, and `milestone` must be as it was just read from the
    /// store: the approval is only written if the stored milestone has not changed since.
    pub(crate) fn release_locked(
        &self,
        store: &mut EscrowStore<K>,
        mut campaign: Campaign,
        mut milestone: Milestone,
        executed_by: Executor,
    ) -> Result<SettlementReference, EscrowError> {
        invariants::escrow_covers(&campaign, &milestone).map_err(|conflict| EscrowError::InvalidState {
            milestone: milestone.id,
            conflict,
        })?;
        let as_read = milestone.clone();

        let request = ReleaseRequest {
            milestone: milestone.id,
            settlement_index: milestone.settlement_index,
            amount: milestone.amount,
            recipient: campaign.creator,
            attempt: 1,
        };
        let settlement_reference = match self.settle(request) {
            Ok(settlement_reference) => settlement_reference,
            Err((err, attempts)) => {
                if err.is_transient() {
                    milestone.admin_notes = Some(format!(
                        "Settlement failed after {} attempt(s): {}. REQUIRES MANUAL RELEASE",
                        attempts, err.message
                    ));
                    let mut wb = EscrowWriteBatch::new();
                    wb.set_milestone(&milestone)?;
                    store.write(wb)?;

                    self.publish(Event::SettlementFailed(SettlementFailedEvent {
                        timestamp: self.now(),
                        milestone: milestone.id,
                        attempts,
                        error: err.clone(),
                    }));
                }
                return Err(err.into());
            }
        };

        let now = self.now();
        let next_milestone = store.reader().milestone(milestone.id.next())?;

        milestone.review_state = ReviewState::Approved;
        milestone.approved_at = Some(now);
        milestone.release_reference = Some(settlement_reference.clone());

        campaign.escrow_amount = campaign.escrow_amount.saturating_sub(milestone.amount);
        campaign.released_amount = campaign
            .released_amount
            .checked_add(milestone.amount)
            .ok_or(ValidationError::AmountOverflow)?;

        let release = EscrowTransaction {
            id: EscrowTransactionID {
                campaign: campaign.id,
                index: campaign.escrow_transaction_count,
            },
            milestone: Some(milestone.id),
            kind: EscrowTransactionKind::Release,
            amount: milestone.amount,
            description: format!("Released funds for milestone {}: {}", milestone.id.order, milestone.title),
            status: TransactionStatus::Confirmed,
            executed_by,
            executed_at: now,
            settlement_reference: Some(settlement_reference.clone()),
        };
        campaign.escrow_transaction_count += 1;

        if milestone.id.order >= campaign.milestone_count {
            campaign.status = CampaignStatus::Completed;
        }

        let mut wb = EscrowWriteBatch::new();
        wb.expect_milestone(&as_read)?;
        wb.set_milestone(&milestone)?;
        wb.set_escrow_transaction(&release)?;
        let activated = match next_milestone {
            Some(mut next)
                if next.funding_state == FundingState::Inactive && !next.review_state.is_terminal() =>
            {
                next.funding_state = FundingState::Active;
                wb.set_milestone(&next)?;
                Some(next.id)
            }
            _ => None,
        };
        wb.set_campaign(&campaign)?;
        if let Err(err) = store.write(wb) {
            log::error!(
                "Funds for {} were settled as {} but the approval could not be recorded: {}",
                milestone.id,
                settlement_reference,
                err
            );
            return Err(err.into());
        }

        self.publish(Event::ApproveMilestone(ApproveMilestoneEvent {
            timestamp: now,
            milestone: milestone.id,
            amount: milestone.amount,
            executed_by,
            settlement_reference: settlement_reference.clone(),
            next_milestone: activated,
        }));

        Ok(settlement_reference)
    }

    /// Ask the settlement layer to perform `request`, retrying transient failures with a linear backoff.
    ///
    /// On failure, returns the last error and the number of attempts made.
    fn settle(&self, mut request: ReleaseRequest) -> Result<SettlementReference, (SettlementError, u32)> {
        let max_attempts = self.config.settlement_attempts.max(1);
        loop {
            match self.settlement.release(&request) {
                Ok(settlement_reference) => return Ok(settlement_reference),
                Err(err) if err.is_transient() && request.attempt < max_attempts => {
                    log::warn!(
                        "Release of {} failed on attempt {} of {}: {}",
                        request.milestone,
                        request.attempt,
                        max_attempts,
                        err
                    );
                    thread::sleep(self.config.settlement_retry_backoff * request.attempt);
                    request.attempt += 1;
                }
                Err(err) => return Err((err, request.attempt)),
            }
        }
    }
}

pub(crate) fn unexpected_review_state(milestone: &Milestone, operation: &'static str) -> EscrowError {
    EscrowError::InvalidState {
        milestone: milestone.id,
        conflict: StateConflict::UnexpectedReviewState {
            operation,
            found: milestone.review_state,
        },
    }
}
