/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that receives [events](crate::events) and runs the handlers registered for them.
//!
//! Handlers run off the request path, so a slow handler (e.g., the recommendation
//! [refresh signal](crate::collaborators::RefreshSignal)) never delays a contribution or a vote.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{events::*, logging::Logger};

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// How long the event bus waits for an event before checking for the shutdown signal again.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) register_campaign_handlers: Vec<HandlerPtr<RegisterCampaignEvent>>,
    pub(crate) create_milestones_handlers: Vec<HandlerPtr<CreateMilestonesEvent>>,
    pub(crate) update_milestone_handlers: Vec<HandlerPtr<UpdateMilestoneEvent>>,
    pub(crate) contribute_handlers: Vec<HandlerPtr<ContributeEvent>>,
    pub(crate) submit_milestone_handlers: Vec<HandlerPtr<SubmitMilestoneEvent>>,
    pub(crate) open_voting_handlers: Vec<HandlerPtr<OpenVotingEvent>>,
    pub(crate) vote_handlers: Vec<HandlerPtr<VoteEvent>>,
    pub(crate) approve_milestone_handlers: Vec<HandlerPtr<ApproveMilestoneEvent>>,
    pub(crate) reject_milestone_handlers: Vec<HandlerPtr<RejectMilestoneEvent>>,
    pub(crate) expire_milestone_handlers: Vec<HandlerPtr<ExpireMilestoneEvent>>,
    pub(crate) settlement_failed_handlers: Vec<HandlerPtr<SettlementFailedEvent>>,
    pub(crate) start_sweep_handlers: Vec<HandlerPtr<StartSweepEvent>>,
    pub(crate) end_sweep_handlers: Vec<HandlerPtr<EndSweepEvent>>,
    pub(crate) skip_sweep_handlers: Vec<HandlerPtr<SkipSweepEvent>>,
}

impl EventHandlers {
    /// Put the default loggers in front of every list of handlers.
    pub(crate) fn add_loggers(&mut self) {
        self.register_campaign_handlers.insert(0, RegisterCampaignEvent::get_logger());
        self.create_milestones_handlers.insert(0, CreateMilestonesEvent::get_logger());
        self.update_milestone_handlers.insert(0, UpdateMilestoneEvent::get_logger());
        self.contribute_handlers.insert(0, ContributeEvent::get_logger());
        self.submit_milestone_handlers.insert(0, SubmitMilestoneEvent::get_logger());
        self.open_voting_handlers.insert(0, OpenVotingEvent::get_logger());
        self.vote_handlers.insert(0, VoteEvent::get_logger());
        self.approve_milestone_handlers.insert(0, ApproveMilestoneEvent::get_logger());
        self.reject_milestone_handlers.insert(0, RejectMilestoneEvent::get_logger());
        self.expire_milestone_handlers.insert(0, ExpireMilestoneEvent::get_logger());
        self.settlement_failed_handlers.insert(0, SettlementFailedEvent::get_logger());
        self.start_sweep_handlers.insert(0, StartSweepEvent::get_logger());
        self.end_sweep_handlers.insert(0, EndSweepEvent::get_logger());
        self.skip_sweep_handlers.insert(0, SkipSweepEvent::get_logger());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.register_campaign_handlers.is_empty()
            && self.create_milestones_handlers.is_empty()
            && self.update_milestone_handlers.is_empty()
            && self.contribute_handlers.is_empty()
            && self.submit_milestone_handlers.is_empty()
            && self.open_voting_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.approve_milestone_handlers.is_empty()
            && self.reject_milestone_handlers.is_empty()
            && self.expire_milestone_handlers.is_empty()
            && self.settlement_failed_handlers.is_empty()
            && self.start_sweep_handlers.is_empty()
            && self.end_sweep_handlers.is_empty()
            && self.skip_sweep_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::RegisterCampaign(register_campaign_event) => self
                .register_campaign_handlers
                .iter()
                .for_each(|handler| handler(&register_campaign_event)),

            Event::CreateMilestones(create_milestones_event) => self
                .create_milestones_handlers
                .iter()
                .for_each(|handler| handler(&create_milestones_event)),

            Event::UpdateMilestone(update_milestone_event) => self
                .update_milestone_handlers
                .iter()
                .for_each(|handler| handler(&update_milestone_event)),

            Event::Contribute(contribute_event) => self
                .contribute_handlers
                .iter()
                .for_each(|handler| handler(&contribute_event)),

            Event::SubmitMilestone(submit_milestone_event) => self
                .submit_milestone_handlers
                .iter()
                .for_each(|handler| handler(&submit_milestone_event)),

            Event::OpenVoting(open_voting_event) => self
                .open_voting_handlers
                .iter()
                .for_each(|handler| handler(&open_voting_event)),

            Event::Vote(vote_event) => self.vote_handlers.iter().for_each(|handler| handler(&vote_event)),

            Event::ApproveMilestone(approve_milestone_event) => self
                .approve_milestone_handlers
                .iter()
                .for_each(|handler| handler(&approve_milestone_event)),

            Event::RejectMilestone(reject_milestone_event) => self
                .reject_milestone_handlers
                .iter()
                .for_each(|handler| handler(&reject_milestone_event)),

            Event::ExpireMilestone(expire_milestone_event) => self
                .expire_milestone_handlers
                .iter()
                .for_each(|handler| handler(&expire_milestone_event)),

            Event::SettlementFailed(settlement_failed_event) => self
                .settlement_failed_handlers
                .iter()
                .for_each(|handler| handler(&settlement_failed_event)),

            Event::StartSweep(start_sweep_event) => self
                .start_sweep_handlers
                .iter()
                .for_each(|handler| handler(&start_sweep_event)),

            Event::EndSweep(end_sweep_event) => self
                .end_sweep_handlers
                .iter()
                .for_each(|handler| handler(&end_sweep_event)),

            Event::SkipSweep(skip_sweep_event) => self
                .skip_sweep_handlers
                .iter()
                .for_each(|handler| handler(&skip_sweep_event)),
        }
    }
}

/// Start the event bus thread. It runs until it receives the shutdown signal, or until every event
/// publisher has been dropped. Events already queued when the shutdown signal arrives are still handled.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                while let Ok(event) = event_subscriber.try_recv() {
                    event_handlers.fire_handlers(event)
                }
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
