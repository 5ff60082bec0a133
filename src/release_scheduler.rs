/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The periodic sweep that makes sure no milestone waits forever.
//!
//! ## Sweeps
//!
//! A sweep scans every campaign's milestones and acts on two kinds:
//! 1. **Voting milestones whose window has closed** are finalized. A milestone that meets the approval
//!    and quorum thresholds is released; every other one is rejected with a note recording the missed
//!    thresholds. The only case in which a closed vote survives a sweep is a transient settlement
//!    failure, which is retried in the next sweep. A permanent settlement failure rejects the milestone.
//! 2. **Pending milestones whose deadline has passed** without evidence are marked `Expired`, as long as
//!    they had started receiving funds.
//!
//! Each milestone is processed in its own critical section on its campaign's lock, so a sweep never
//! holds up requests to campaigns it is not touching at the moment. A failure on one milestone is
//! logged and recorded in the [`SweepReport`], and the sweep moves on to the next one.
//!
//! ## Single flight
//!
//! At most one sweep runs at a time across every engine that shares the escrow store. A sweep holds the
//! [sweep lease](crate::types::lease::LeaseScope::Sweep) from start to end, renewing it after each
//! milestone. A sweep that is started, whether by the scheduler thread or through
//! [`trigger_sweep`](MilestoneEngine::trigger_sweep), while the lease is held is skipped entirely, not
//! queued. A sweep that finds its lease lost stops where it is and leaves the rest to the next sweep.

use std::{
    sync::{
        mpsc::{Receiver, RecvTimeoutError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    collaborators::{Identity, Permission},
    engine::{load_milestone, MilestoneEngine},
    error::EscrowError,
    escrow_store::{
        accessors::internal::{EscrowStore, EscrowWriteBatch},
        pluggables::KVStore,
    },
    events::{EndSweepEvent, Event, ExpireMilestoneEvent, SkipSweepEvent, StartSweepEvent},
    types::{
        basic::{CampaignID, MilestoneID, Timestamp},
        lease::LeaseScope,
        ledger::Executor,
        milestone::{FundingState, Milestone, ReviewState},
    },
    voting::tally::Tally,
};

/// The admin note written on a pending milestone that the sweep expires.
pub const EXPIRY_NOTE: &str = "Milestone expired - deadline passed without submission";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepResult {
    Completed(SweepReport),
    /// Another sweep, of this engine or of another one sharing the store, was running.
    Skipped,
}

/// What a sweep did to each milestone it acted on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub released: Vec<MilestoneID>,
    pub rejected: Vec<MilestoneID>,
    pub expired: Vec<MilestoneID>,
    /// Milestones whose release failed transiently. They are still `Voting`, and will be retried in the
    /// next sweep.
    pub deferred: Vec<MilestoneID>,
    pub failed: Vec<SweepFailure>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepFailure {
    pub campaign: CampaignID,
    /// `None` if the campaign itself could not be read.
    pub milestone: Option<MilestoneID>,
    pub error: String,
}

/// What the sweep did to one closed vote.
enum ClosedVote {
    Released,
    Rejected,
    Deferred,
    /// The milestone was finalized by someone else since it was scanned.
    Untouched,
}

impl<K: KVStore> MilestoneEngine<K> {
    /// Run a sweep on behalf of `caller`, outside of the schedule.
    pub fn trigger_sweep(&self, caller: Option<&Identity>) -> Result<SweepResult, EscrowError> {
        let caller = self.authorize(caller, Permission::TriggerSweep)?;
        log::info!("Sweep triggered manually by {}", caller.user);
        Ok(self.run_sweep())
    }

    pub(crate) fn run_sweep(&self) -> SweepResult {
        let now = self.now();
        // Holds the sweep lease until the end of this function.
        let mut lease_store = self.store();
        match lease_store.try_acquire_lease(LeaseScope::Sweep, self.instance, now, self.config.lease_duration) {
            Ok(true) => (),
            Ok(false) => {
                log::info!("Skipping sweep, the previous one is still running");
                self.publish(Event::SkipSweep(SkipSweepEvent { timestamp: now }));
                return SweepResult::Skipped;
            }
            Err(err) => {
                log::warn!("Skipping sweep, the sweep lease could not be read: {}", err);
                self.publish(Event::SkipSweep(SkipSweepEvent { timestamp: now }));
                return SweepResult::Skipped;
            }
        }

        self.publish(Event::StartSweep(StartSweepEvent { timestamp: now }));

        let mut report = SweepReport::default();
        let (closed_votes, overdue) = self.scan(now, &mut report);
        log::info!(
            "Sweep found {} closed vote(s) and {} overdue milestone(s)",
            closed_votes.len(),
            overdue.len()
        );

        for milestone in closed_votes {
            if !self.renew_sweep_lease(&mut lease_store) {
                return self.end_sweep(report);
            }
            match self.finalize_closed_vote(milestone) {
                Ok(ClosedVote::Released) => report.released.push(milestone),
                Ok(ClosedVote::Rejected) => report.rejected.push(milestone),
                Ok(ClosedVote::Deferred) => report.deferred.push(milestone),
                Ok(ClosedVote::Untouched) => (),
                Err(err) => {
                    log::warn!("Sweep failed to finalize {}: {}", milestone, err);
                    report.failed.push(SweepFailure {
                        campaign: milestone.campaign,
                        milestone: Some(milestone),
                        error: err.to_string(),
                    });
                }
            }
        }

        for milestone in overdue {
            if !self.renew_sweep_lease(&mut lease_store) {
                return self.end_sweep(report);
            }
            match self.expire_overdue(milestone) {
                Ok(true) => report.expired.push(milestone),
                Ok(false) => (),
                Err(err) => {
                    log::warn!("Sweep failed to expire {}: {}", milestone, err);
                    report.failed.push(SweepFailure {
                        campaign: milestone.campaign,
                        milestone: Some(milestone),
                        error: err.to_string(),
                    });
                }
            }
        }

        self.end_sweep(report)
    }

    fn end_sweep(&self, report: SweepReport) -> SweepResult {
        log::info!(
            "Sweep done: {} released, {} rejected, {} expired, {} deferred, {} failed",
            report.released.len(),
            report.rejected.len(),
            report.expired.len(),
            report.deferred.len(),
            report.failed.len()
        );
        self.publish(Event::EndSweep(EndSweepEvent {
            timestamp: self.now(),
            released: report.released.len() as u32,
            rejected: report.rejected.len() as u32,
            expired: report.expired.len() as u32,
            deferred: report.deferred.len() as u32,
            failed: report.failed.len() as u32,
        }));

        SweepResult::Completed(report)
    }

    /// Push back the expiry of the sweep lease held through `lease_store`. Returns `false` if it was lost.
    fn renew_sweep_lease(&self, lease_store: &mut EscrowStore<K>) -> bool {
        match lease_store.renew_lease(LeaseScope::Sweep, self.now(), self.config.lease_duration) {
            Ok(true) => true,
            Ok(false) => {
                log::warn!("Sweep lease was lost, stopping the sweep early");
                false
            }
            Err(err) => {
                log::warn!("Sweep lease could not be renewed, stopping the sweep early: {}", err);
                false
            }
        }
    }

    /// Find the milestones the sweep should act on, from a snapshot of the escrow store. Every candidate
    /// is checked again under its campaign's lock before it is acted on.
    fn scan(&self, now: Timestamp, report: &mut SweepReport) -> (Vec<MilestoneID>, Vec<MilestoneID>) {
        let camera = self.camera();
        let snapshot = camera.snapshot();
        let mut closed_votes = Vec::new();
        let mut overdue = Vec::new();

        let campaign_count = match snapshot.campaign_count() {
            Ok(campaign_count) => campaign_count,
            Err(err) => {
                log::warn!("Sweep could not count campaigns: {}", err);
                return (closed_votes, overdue);
            }
        };

        for campaign in (1..=campaign_count).map(CampaignID::new) {
            let milestones = snapshot
                .campaign(campaign)
                .and_then(|stored| match stored {
                    Some(stored) => snapshot.milestones(&stored),
                    None => Ok(Vec::new()),
                });
            let milestones = match milestones {
                Ok(milestones) => milestones,
                Err(err) => {
                    log::warn!("Sweep could not read campaign {}: {}", campaign, err);
                    report.failed.push(SweepFailure {
                        campaign,
                        milestone: None,
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            for milestone in milestones {
                if is_closed_vote(&milestone, now) {
                    closed_votes.push(milestone.id);
                } else if is_overdue(&milestone, now) {
                    overdue.push(milestone.id);
                }
            }
        }

        (closed_votes, overdue)
    }

    fn finalize_closed_vote(&self, milestone: MilestoneID) -> Result<ClosedVote, EscrowError> {
        self.with_campaign_lock(milestone.campaign, |store| {
            let (_, current) = load_milestone(&store.reader(), milestone)?;
            if !is_closed_vote(&current, self.now()) {
                return Ok(ClosedVote::Untouched);
            }

            let failure_note = match self.finalize_locked(store, milestone, Executor::ReleaseScheduler) {
                Ok(outcome) if outcome.released => {
                    log::info!("Sweep released {}", milestone);
                    return Ok(ClosedVote::Released);
                }
                Ok(outcome) if outcome.rejected => {
                    log::info!("Sweep rejected {}", milestone);
                    return Ok(ClosedVote::Rejected);
                }
                Ok(_) => Tally::of(&current).expiry_note(self.thresholds()),
                Err(EscrowError::Settlement(err)) if err.is_transient() => {
                    log::warn!("Sweep deferred {}, settlement failed: {}", milestone, err);
                    return Ok(ClosedVote::Deferred);
                }
                Err(EscrowError::Settlement(err)) => format!("Settlement failed permanently: {}", err.message),
                Err(err @ EscrowError::InvalidState { .. }) => format!("Release failed: {}", err),
                Err(err) => return Err(err),
            };

            // A closed vote is never left open, whichever way finalization fell through.
            let (_, current) = load_milestone(&store.reader(), milestone)?;
            log::warn!("Sweep force-rejected {}: {}", milestone, failure_note);
            self.reject_locked(store, current, Executor::ReleaseScheduler, failure_note)?;
            Ok(ClosedVote::Rejected)
        })
    }

    fn expire_overdue(&self, milestone: MilestoneID) -> Result<bool, EscrowError> {
        let expired = self.with_campaign_lock(milestone.campaign, |store| {
            let now = self.now();
            let (_, mut current) = load_milestone(&store.reader(), milestone)?;
            if !is_overdue(&current, now) {
                return Ok(None);
            }

            current.review_state = ReviewState::Expired;
            current.admin_notes = Some(EXPIRY_NOTE.to_string());
            if current.funding_state == FundingState::Active {
                current.funding_state = FundingState::Inactive;
            }

            let mut wb = EscrowWriteBatch::new();
            wb.set_milestone(&current)?;
            store.write(wb)?;
            Ok(Some((now, current.deadline)))
        })?;

        match expired {
            Some((now, deadline)) => {
                log::info!("Sweep expired {}, its deadline was {}", milestone, deadline);
                self.publish(Event::ExpireMilestone(ExpireMilestoneEvent {
                    timestamp: now,
                    milestone,
                    deadline,
                }));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn is_closed_vote(milestone: &Milestone, now: Timestamp) -> bool {
    milestone.review_state == ReviewState::Voting && milestone.voting_closed(now)
}

fn is_overdue(milestone: &Milestone, now: Timestamp) -> bool {
    milestone.review_state == ReviewState::Pending
        && milestone.funding_state != FundingState::Inactive
        && milestone.deadline < now
}

/// Start the thread that runs a sweep every `sweep_interval`, until `shutdown_signal` fires or is
/// dropped.
pub(crate) fn start_release_scheduler<K: KVStore>(
    engine: Arc<MilestoneEngine<K>>,
    sweep_interval: Duration,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.recv_timeout(sweep_interval) {
            Err(RecvTimeoutError::Timeout) => {
                engine.run_sweep();
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
