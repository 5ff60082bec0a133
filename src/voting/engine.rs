/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Casting votes, finalizing milestones, and reporting on votes in progress.

use std::time::Duration;

use crate::{
    collaborators::{Identity, Permission},
    engine::{authenticated, load_milestone, MilestoneEngine},
    error::{EscrowError, StateConflict},
    escrow_store::{
        accessors::internal::{EscrowStore, EscrowWriteBatch, StoreError},
        pluggables::KVStore,
    },
    events::{Event, VoteEvent},
    milestones::state_machine::unexpected_review_state,
    types::{
        basic::{MilestoneID, Percent, SettlementReference, Timestamp, UserID, VotingPower},
        ledger::{Executor, Vote},
        milestone::{Milestone, ReviewState},
    },
};

use super::tally::{voting_power, Tally, Thresholds, Verdict};

/// A backer's choice on a milestone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ballot {
    pub is_approval: bool,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VoteReceipt {
    pub vote: Vote,
    /// The result of the finalization check that runs right after the vote is recorded. `None` if the
    /// check failed, in which case the vote still stands and the milestone is left to be finalized
    /// later.
    pub outcome: Option<FinalizationOutcome>,
}

/// The result of a finalization check on a milestone.
#[derive(Clone, Debug, PartialEq)]
pub struct FinalizationOutcome {
    pub milestone: MilestoneID,
    /// The milestone's review state after the check. `Voting` means that the check did not finalize it.
    pub status: ReviewState,
    pub released: bool,
    pub rejected: bool,
    pub approval_percentage: f64,
    pub quorum_percentage: f64,
    pub yes_votes: VotingPower,
    pub no_votes: VotingPower,
    pub settlement_reference: Option<SettlementReference>,
}

impl FinalizationOutcome {
    fn of(milestone: &Milestone) -> Self {
        let tally = Tally::of(milestone);
        Self {
            milestone: milestone.id,
            status: milestone.review_state,
            released: milestone.review_state == ReviewState::Approved,
            rejected: matches!(milestone.review_state, ReviewState::Rejected | ReviewState::Expired),
            approval_percentage: tally.approval_percentage(),
            quorum_percentage: tally.quorum_percentage(),
            yes_votes: tally.yes,
            no_votes: tally.no,
            settlement_reference: milestone.release_reference.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VotingStats {
    pub milestone: MilestoneID,
    pub status: ReviewState,
    pub votes_for: VotingPower,
    pub votes_against: VotingPower,
    pub total_votes: u64,
    pub approval_percentage: f64,
    pub quorum_percentage: f64,
    pub approval_threshold: Percent,
    pub quorum_threshold: Percent,
    pub thresholds_met: bool,
    pub vote_start_time: Option<Timestamp>,
    pub vote_end_time: Option<Timestamp>,
    /// Zero once the window has closed. `None` if voting is not open.
    pub time_remaining: Option<Duration>,
    /// The number of distinct backers of the campaign, all of whom may vote.
    pub eligible_voters: u64,
    pub voters: Vec<VoterSummary>,
    /// How the user who asked for the statistics stands, if they are authenticated.
    pub viewer: Option<ViewerStatus>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoterSummary {
    pub voter: UserID,
    pub is_approval: bool,
    pub voting_power: VotingPower,
    pub comment: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewerStatus {
    pub has_voted: bool,
    pub vote: Option<Vote>,
    /// The power the viewer's vote has, or would have if they voted now.
    pub voting_power: VotingPower,
}

impl<K: KVStore> MilestoneEngine<K> {
    /// Record `caller`'s vote on `milestone`, then check whether the milestone can be finalized.
    ///
    /// Only backers of the milestone's campaign may vote, once per milestone, while its voting window
    /// is open. The vote is weighted by everything the backer has contributed to the campaign so far.
    pub fn cast_vote(
        &self,
        caller: Option<&Identity>,
        milestone: MilestoneID,
        ballot: Ballot,
    ) -> Result<VoteReceipt, EscrowError> {
        let caller = authenticated(caller)?;
        let now = self.now();

        self.with_campaign_lock(milestone.campaign, |store| {
            let (mut milestone, contributed, existing_vote, mut voters) = {
                let reader = store.reader();
                let (_, milestone) = load_milestone(&reader, milestone)?;
                let contributed = reader.contributed_amount(milestone.id.campaign, caller.user)?;
                let existing_vote = reader.vote(milestone.id, caller.user)?;
                let voters = reader.voters(milestone.id)?;
                (milestone, contributed, existing_vote, voters)
            };

            if milestone.review_state != ReviewState::Voting {
                return Err(unexpected_review_state(&milestone, "vote"));
            }
            if let Some(closed_at) = milestone.vote_end_time.filter(|_| milestone.voting_closed(now)) {
                return Err(EscrowError::InvalidState {
                    milestone: milestone.id,
                    conflict: StateConflict::VotingClosed { closed_at },
                });
            }
            if let Some(starts_at) = milestone.vote_start_time.filter(|starts_at| now < *starts_at) {
                return Err(EscrowError::InvalidState {
                    milestone: milestone.id,
                    conflict: StateConflict::VotingNotStarted { starts_at },
                });
            }
            if contributed.is_zero() {
                return Err(EscrowError::forbidden("only backers of this campaign can vote"));
            }
            if existing_vote.is_some() {
                return Err(EscrowError::AlreadyVoted {
                    milestone: milestone.id,
                    voter: caller.user,
                });
            }

            let vote = Vote {
                milestone: milestone.id,
                voter: caller.user,
                is_approval: ballot.is_approval,
                comment: ballot.comment,
                voting_power: voting_power(contributed),
                created_at: now,
            };
            if vote.is_approval {
                milestone.votes_for += vote.voting_power;
            } else {
                milestone.votes_against += vote.voting_power;
            }
            voters.push(caller.user);

            let mut wb = EscrowWriteBatch::new();
            wb.expect_no_vote(milestone.id, caller.user);
            wb.set_vote(&vote)?;
            wb.set_voters(milestone.id, &voters)?;
            wb.set_milestone(&milestone)?;
            match store.write(wb) {
                Ok(()) => (),
                Err(StoreError::WriteConflict(_)) if store.reader().vote(milestone.id, caller.user)?.is_some() => {
                    return Err(EscrowError::AlreadyVoted {
                        milestone: milestone.id,
                        voter: caller.user,
                    })
                }
                Err(err) => return Err(err.into()),
            }

            self.publish(Event::Vote(VoteEvent {
                timestamp: now,
                vote: vote.clone(),
            }));

            let outcome = match self.finalize_locked(store, milestone.id, Executor::VotingOutcome) {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    log::warn!("Finalizing {} after a vote failed: {}", milestone.id, err);
                    None
                }
            };

            Ok(VoteReceipt { vote, outcome })
        })
    }

    /// Decide, from the votes cast so far, whether `milestone` should be released, rejected, or kept
    /// open, and act on the decision.
    ///
    /// Calling this on a milestone that has already been approved, rejected, or has expired does not
    /// change anything and returns the stored outcome.
    pub fn check_and_release_milestone(
        &self,
        caller: Option<&Identity>,
        milestone: MilestoneID,
    ) -> Result<FinalizationOutcome, EscrowError> {
        let caller = self.authorize(caller, Permission::FinalizeMilestone)?;
        self.with_campaign_lock(milestone.campaign, |store| {
            self.finalize_locked(store, milestone, Executor::User(caller.user))
        })
    }

    /// The shared body of every finalization path. The caller must hold the campaign's lock.
    ///
    /// Whether every backer has voted is computed against the campaign's backers as read now. That set
    /// cannot grow while a vote is open: the milestone under vote is `Funded`, and a campaign refuses
    /// contributions while its earliest unsettled milestone is funded.
    pub(crate) fn finalize_locked(
        &self,
        store: &mut EscrowStore<K>,
        milestone: MilestoneID,
        executed_by: Executor,
    ) -> Result<FinalizationOutcome, EscrowError> {
        let (campaign, milestone, contributors, voters) = {
            let reader = store.reader();
            let (campaign, milestone) = load_milestone(&reader, milestone)?;
            let contributors = reader.contributors(campaign.id)?;
            let voters = reader.voters(milestone.id)?;
            (campaign, milestone, contributors, voters)
        };

        match milestone.review_state {
            ReviewState::Approved | ReviewState::Rejected | ReviewState::Expired => {
                Ok(FinalizationOutcome::of(&milestone))
            }
            ReviewState::Voting => {
                let tally = Tally::of(&milestone);
                let thresholds = self.thresholds();
                let all_backers_voted =
                    !contributors.is_empty() && contributors.iter().all(|backer| voters.contains(backer));
                let window_closed = milestone.voting_closed(self.now());

                match tally.verdict(thresholds, all_backers_voted, window_closed) {
                    Verdict::Release => {
                        let id = milestone.id;
                        self.release_locked(store, campaign, milestone, executed_by)?;
                        let (_, released) = load_milestone(&store.reader(), id)?;
                        Ok(FinalizationOutcome::of(&released))
                    }
                    Verdict::Reject => {
                        let rejected = self.reject_locked(store, milestone, executed_by, tally.expiry_note(thresholds))?;
                        Ok(FinalizationOutcome::of(&rejected))
                    }
                    Verdict::Pending => Ok(FinalizationOutcome::of(&milestone)),
                }
            }
            ReviewState::Pending | ReviewState::Submitted => Err(unexpected_review_state(&milestone, "finalize")),
        }
    }

    /// Report on the votes cast on `milestone`, from the point of view of `viewer`.
    pub fn voting_stats(
        &self,
        viewer: Option<&Identity>,
        milestone: MilestoneID,
    ) -> Result<VotingStats, EscrowError> {
        let camera = self.camera();
        let snapshot = camera.snapshot();
        let (campaign, milestone) = load_milestone(&snapshot, milestone)?;
        let votes = snapshot.votes(milestone.id)?;
        let eligible_voters = snapshot.contributors(campaign.id)?.len() as u64;
        let viewer = match viewer {
            Some(viewer) => {
                let vote = snapshot.vote(milestone.id, viewer.user)?;
                Some(ViewerStatus {
                    has_voted: vote.is_some(),
                    voting_power: match &vote {
                        Some(vote) => vote.voting_power,
                        None => voting_power(snapshot.contributed_amount(campaign.id, viewer.user)?),
                    },
                    vote,
                })
            }
            None => None,
        };

        let tally = Tally::of(&milestone);
        let thresholds = self.thresholds();
        let time_remaining = match (milestone.review_state, milestone.vote_end_time) {
            (ReviewState::Voting, Some(vote_end_time)) => Some(self.now().until(vote_end_time)),
            _ => None,
        };

        Ok(VotingStats {
            milestone: milestone.id,
            status: milestone.review_state,
            votes_for: tally.yes,
            votes_against: tally.no,
            total_votes: votes.len() as u64,
            approval_percentage: tally.approval_percentage(),
            quorum_percentage: tally.quorum_percentage(),
            approval_threshold: thresholds.approval,
            quorum_threshold: thresholds.quorum,
            thresholds_met: tally.thresholds_met(thresholds),
            vote_start_time: milestone.vote_start_time,
            vote_end_time: milestone.vote_end_time,
            time_remaining,
            eligible_voters,
            voters: votes
                .into_iter()
                .map(|vote| VoterSummary {
                    voter: vote.voter,
                    is_approval: vote.is_approval,
                    voting_power: vote.voting_power,
                    comment: vote.comment,
                    created_at: vote.created_at,
                })
                .collect(),
            viewer,
        })
    }

    pub(crate) fn thresholds(&self) -> Thresholds {
        Thresholds {
            approval: self.config.approval_threshold,
            quorum: self.config.quorum_threshold,
        }
    }
}
