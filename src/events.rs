/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Notifications that are emitted when significant things happen in the escrow core.
//!
//! An event for a given action indicates that the action has been completed and its effects are
//! persisted. Events are sent to the [event bus](crate::event_bus) thread, which passes them to the
//! handlers registered through [`PlatformSpec`](crate::platform::PlatformSpec), and, if
//! [`log_events`](crate::platform::Configuration::log_events) is set, to the default
//! [loggers](crate::logging).

use std::sync::mpsc::Sender;

use crate::{
    collaborators::SettlementError,
    types::{
        basic::{Amount, CampaignID, CryptoHash, MilestoneID, SettlementReference, Timestamp, UserID},
        ledger::{Contribution, Executor, Vote},
    },
};

pub enum Event {
    // Events that change campaigns.
    RegisterCampaign(RegisterCampaignEvent),
    CreateMilestones(CreateMilestonesEvent),
    UpdateMilestone(UpdateMilestoneEvent),
    Contribute(ContributeEvent),
    // Events that move a milestone through review.
    SubmitMilestone(SubmitMilestoneEvent),
    OpenVoting(OpenVotingEvent),
    Vote(VoteEvent),
    ApproveMilestone(ApproveMilestoneEvent),
    RejectMilestone(RejectMilestoneEvent),
    ExpireMilestone(ExpireMilestoneEvent),
    SettlementFailed(SettlementFailedEvent),
    // Release scheduler events.
    StartSweep(StartSweepEvent),
    EndSweep(EndSweepEvent),
    SkipSweep(SkipSweepEvent),
}

impl Event {
    /// Send `event` to the event bus, if there is one. Events published after the event bus has shut down
    /// are dropped.
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(event);
        }
    }
}

pub struct RegisterCampaignEvent {
    pub timestamp: Timestamp,
    pub campaign: CampaignID,
    pub creator: UserID,
    pub target_amount: Amount,
    pub requires_milestones: bool,
}

pub struct CreateMilestonesEvent {
    pub timestamp: Timestamp,
    pub campaign: CampaignID,
    pub milestones: Vec<MilestoneID>,
    pub total_amount: Amount,
}

pub struct UpdateMilestoneEvent {
    pub timestamp: Timestamp,
    pub milestone: MilestoneID,
    /// The milestone's amount after the update.
    pub amount: Amount,
}

pub struct ContributeEvent {
    pub timestamp: Timestamp,
    pub contribution: Contribution,
    /// The milestone the contribution was credited to, if the campaign tracks milestone funding.
    pub milestone: Option<MilestoneID>,
    /// Whether the contribution made `milestone` fully funded.
    pub milestone_funded: bool,
}

pub struct SubmitMilestoneEvent {
    pub timestamp: Timestamp,
    pub milestone: MilestoneID,
    pub evidence_digest: CryptoHash,
}

pub struct OpenVotingEvent {
    pub timestamp: Timestamp,
    pub milestone: MilestoneID,
    pub vote_end_time: Timestamp,
}

pub struct VoteEvent {
    pub timestamp: Timestamp,
    pub vote: Vote,
}

pub struct ApproveMilestoneEvent {
    pub timestamp: Timestamp,
    pub milestone: MilestoneID,
    pub amount: Amount,
    pub executed_by: Executor,
    pub settlement_reference: SettlementReference,
    /// The milestone that became active for funding as a result, if any.
    pub next_milestone: Option<MilestoneID>,
}

pub struct RejectMilestoneEvent {
    pub timestamp: Timestamp,
    pub milestone: MilestoneID,
    pub executed_by: Executor,
    pub reason: String,
}

pub struct ExpireMilestoneEvent {
    pub timestamp: Timestamp,
    pub milestone: MilestoneID,
    pub deadline: Timestamp,
}

pub struct SettlementFailedEvent {
    pub timestamp: Timestamp,
    pub milestone: MilestoneID,
    pub attempts: u32,
    pub error: SettlementError,
}

pub struct StartSweepEvent {
    pub timestamp: Timestamp,
}

pub struct EndSweepEvent {
    pub timestamp: Timestamp,
    pub released: u32,
    pub rejected: u32,
    pub expired: u32,
    pub deferred: u32,
    pub failed: u32,
}

/// A sweep was requested while another one was still running, and so was skipped.
pub struct SkipSweepEvent {
    pub timestamp: Timestamp,
}
