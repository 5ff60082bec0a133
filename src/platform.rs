/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run the escrow platform.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the platform](PlatformSpec) with:
//!   1. `PlatformSpec::builder` to construct a `PlatformSpecBuilder`,
//!   2. The setters of the `PlatformSpecBuilder`, and
//!   3. The `PlatformSpecBuilder::build` method to construct a [`PlatformSpec`],
//! - The function to [start](PlatformSpec::start) a [`Platform`] given its specification,
//! - [The type](Platform) which keeps the platform's background threads alive.
//!
//! ## Starting the platform
//!
//! ```ignore
//! let platform =
//!     PlatformSpec::builder()
//!     .kv_store(kv_store)
//!     .configuration(Configuration::builder().voting_period(Duration::from_secs(3 * 24 * 60 * 60)).build())
//!     .settlement(chain_settlement)
//!     .refresh_signal(recommendations)
//!     .on_approve_milestone(approve_handler)
//!     .build()
//!     .start();
//!
//! let receipt = platform.engine().contribute(Some(&backer), campaign, request)?;
//! ```
//!
//! ### Required setters
//!
//! - `.kv_store(...)`
//!
//! ### Optional setters
//!
//! The optional setters replace the default [collaborators](crate::collaborators) or register
//! user-defined event handlers for events from [crate::events]:
//! - `.configuration(...)`
//! - `.permissions(...)`, `.settlement(...)`, `.clock(...)`, `.refresh_signal(...)`
//! - `.on_register_campaign(...)`, `.on_create_milestones(...)`, `.on_update_milestone(...)`
//! - `.on_contribute(...)`
//! - `.on_submit_milestone(...)`, `.on_open_voting(...)`, `.on_vote(...)`
//! - `.on_approve_milestone(...)`, `.on_reject_milestone(...)`, `.on_expire_milestone(...)`
//! - `.on_settlement_failed(...)`
//! - `.on_start_sweep(...)`, `.on_end_sweep(...)`, `.on_skip_sweep(...)`

use std::{
    sync::{
        mpsc::{self, Sender},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use typed_builder::TypedBuilder;

use crate::{
    collaborators::{
        AdminRolePermissions, Clock, InternalSettlement, PermissionOracle, RefreshSignal, SettlementLayer,
        SystemClock,
    },
    engine::MilestoneEngine,
    escrow_store::{accessors::public::EscrowStoreCamera, pluggables::KVStore},
    event_bus::{start_event_bus, EventHandlers, HandlerPtr},
    events::*,
    release_scheduler::start_release_scheduler,
    types::basic::{Amount, Percent},
};

/// Parameters of the escrow rules and of the background threads.
///
/// Every field has a default, so `Configuration::builder().build()` is a valid configuration.
#[derive(Clone, Debug, TypedBuilder)]
pub struct Configuration {
    #[builder(default = Percent::DEFAULT_THRESHOLD, setter(doc = "Set the share of cast voting power that must approve a milestone for it to be released. Default: 60%."))]
    pub approval_threshold: Percent,
    #[builder(default = Percent::DEFAULT_THRESHOLD, setter(doc = "Set the voting power, as a share of the milestone's amount, that must be cast for a vote to count. Default: 60%."))]
    pub quorum_threshold: Percent,
    #[builder(default = Amount::new(500), setter(doc = "Set the target amount from which a campaign requires milestones. Default: $500."))]
    pub milestone_threshold: Amount,
    #[builder(default = 3, setter(doc = "Set the number of milestones a campaign at or above the milestone threshold needs. Default: 3."))]
    pub minimum_milestones: u32,
    #[builder(default = Duration::from_secs(7 * 24 * 60 * 60), setter(doc = "Set how long backers can vote on a milestone. Default: 7 days."))]
    pub voting_period: Duration,
    #[builder(default = Duration::from_secs(60 * 60), setter(doc = "Set the time between two sweeps of the release scheduler. Default: 1 hour."))]
    pub sweep_interval: Duration,
    #[builder(default = 3, setter(doc = "Set how many times a release is attempted before it is left for manual release. Default: 3."))]
    pub settlement_attempts: u32,
    #[builder(default = Duration::from_secs(2), setter(doc = "Set the wait before the n-th retry of a release, which is n times this value. Default: 2 seconds."))]
    pub settlement_retry_backoff: Duration,
    #[builder(default = false, setter(doc = "Open voting on a milestone as soon as its evidence is submitted, instead of waiting for an admin. Default: false."))]
    pub auto_open_voting: bool,
    #[builder(default = Duration::from_secs(5 * 60), setter(doc = "Set how long a lease taken in the key-value store lasts unless renewed. Must exceed the longest release, retries included. Default: 5 minutes."))]
    pub lease_duration: Duration,
    #[builder(default = Duration::from_secs(30), setter(doc = "Set how long an operation waits for a lease held by another instance before failing as busy. Default: 30 seconds."))]
    pub lease_wait: Duration,
    #[builder(default = true, setter(doc = "Enable logging of events? Default: true."))]
    pub log_events: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration::builder().build()
    }
}

/// Stores all necessary parameters and trait implementations required to run the [`Platform`].
#[derive(TypedBuilder)]
pub struct PlatformSpec<K: KVStore> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of the escrow store's Key-Value store. The argument must implement the [KVStore](crate::escrow_store::pluggables::KVStore) trait. Required."))]
    kv_store: K,
    // Optional parameters
    #[builder(default, setter(doc = "Set the [configuration](Configuration). Optional."))]
    configuration: Configuration,
    #[builder(default = Box::new(AdminRolePermissions) as Box<dyn PermissionOracle>, setter(transform = |permissions: impl PermissionOracle + 'static| Box::new(permissions) as Box<dyn PermissionOracle>,
    doc = "Set the permission oracle that gates admin operations. Default: [AdminRolePermissions]."))]
    permissions: Box<dyn PermissionOracle>,
    #[builder(default = Box::new(InternalSettlement) as Box<dyn SettlementLayer>, setter(transform = |settlement: impl SettlementLayer + 'static| Box::new(settlement) as Box<dyn SettlementLayer>,
    doc = "Set the settlement layer that moves released funds. Default: [InternalSettlement]."))]
    settlement: Box<dyn SettlementLayer>,
    #[builder(default = Box::new(SystemClock) as Box<dyn Clock>, setter(transform = |clock: impl Clock + 'static| Box::new(clock) as Box<dyn Clock>,
    doc = "Set the clock. Default: [SystemClock]."))]
    clock: Box<dyn Clock>,
    #[builder(default, setter(transform = |refresh_signal: impl RefreshSignal + 'static| Some(Box::new(refresh_signal) as Box<dyn RefreshSignal>),
    doc = "Set the signal that is fired, best-effort, after every contribution. Optional."))]
    refresh_signal: Option<Box<dyn RefreshSignal>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RegisterCampaignEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RegisterCampaignEvent>),
    doc = "Register a handler closure to be invoked after a campaign is registered. Optional."))]
    on_register_campaign: Option<HandlerPtr<RegisterCampaignEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CreateMilestonesEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CreateMilestonesEvent>),
    doc = "Register a handler closure to be invoked after milestones are created. Optional."))]
    on_create_milestones: Option<HandlerPtr<CreateMilestonesEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateMilestoneEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateMilestoneEvent>),
    doc = "Register a handler closure to be invoked after a pending milestone is updated. Optional."))]
    on_update_milestone: Option<HandlerPtr<UpdateMilestoneEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ContributeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ContributeEvent>),
    doc = "Register a handler closure to be invoked after a contribution is recorded. Optional."))]
    on_contribute: Option<HandlerPtr<ContributeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SubmitMilestoneEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SubmitMilestoneEvent>),
    doc = "Register a handler closure to be invoked after evidence is submitted for a milestone. Optional."))]
    on_submit_milestone: Option<HandlerPtr<SubmitMilestoneEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&OpenVotingEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<OpenVotingEvent>),
    doc = "Register a handler closure to be invoked after voting opens on a milestone. Optional."))]
    on_open_voting: Option<HandlerPtr<OpenVotingEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VoteEvent>),
    doc = "Register a handler closure to be invoked after a vote is cast. Optional."))]
    on_vote: Option<HandlerPtr<VoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ApproveMilestoneEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ApproveMilestoneEvent>),
    doc = "Register a handler closure to be invoked after a milestone is approved and its funds released. Optional."))]
    on_approve_milestone: Option<HandlerPtr<ApproveMilestoneEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectMilestoneEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectMilestoneEvent>),
    doc = "Register a handler closure to be invoked after a milestone is rejected. Optional."))]
    on_reject_milestone: Option<HandlerPtr<RejectMilestoneEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ExpireMilestoneEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ExpireMilestoneEvent>),
    doc = "Register a handler closure to be invoked after a milestone expires. Optional."))]
    on_expire_milestone: Option<HandlerPtr<ExpireMilestoneEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SettlementFailedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SettlementFailedEvent>),
    doc = "Register a handler closure to be invoked after a release could not be settled. Optional."))]
    on_settlement_failed: Option<HandlerPtr<SettlementFailedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartSweepEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartSweepEvent>),
    doc = "Register a handler closure to be invoked when a sweep starts. Optional."))]
    on_start_sweep: Option<HandlerPtr<StartSweepEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndSweepEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndSweepEvent>),
    doc = "Register a handler closure to be invoked when a sweep ends. Optional."))]
    on_end_sweep: Option<HandlerPtr<EndSweepEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SkipSweepEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SkipSweepEvent>),
    doc = "Register a handler closure to be invoked when a sweep is skipped because another one is running. Optional."))]
    on_skip_sweep: Option<HandlerPtr<SkipSweepEvent>>,
}

impl<K: KVStore> PlatformSpec<K> {
    /// Starts the release scheduler and event bus threads, and returns the handles to them in a
    /// [`Platform`] struct.
    pub fn start(self) -> Platform<K> {
        let log_events = self.configuration.log_events;
        let sweep_interval = self.configuration.sweep_interval;

        let mut event_handlers = EventHandlers::default();
        event_handlers.register_campaign_handlers.extend(self.on_register_campaign);
        event_handlers.create_milestones_handlers.extend(self.on_create_milestones);
        event_handlers.update_milestone_handlers.extend(self.on_update_milestone);
        event_handlers.contribute_handlers.extend(self.on_contribute);
        if let Some(refresh_signal) = self.refresh_signal {
            event_handlers.contribute_handlers.push(refresh_handler(refresh_signal));
        }
        event_handlers.submit_milestone_handlers.extend(self.on_submit_milestone);
        event_handlers.open_voting_handlers.extend(self.on_open_voting);
        event_handlers.vote_handlers.extend(self.on_vote);
        event_handlers.approve_milestone_handlers.extend(self.on_approve_milestone);
        event_handlers.reject_milestone_handlers.extend(self.on_reject_milestone);
        event_handlers.expire_milestone_handlers.extend(self.on_expire_milestone);
        event_handlers.settlement_failed_handlers.extend(self.on_settlement_failed);
        event_handlers.start_sweep_handlers.extend(self.on_start_sweep);
        event_handlers.end_sweep_handlers.extend(self.on_end_sweep);
        event_handlers.skip_sweep_handlers.extend(self.on_skip_sweep);
        if log_events {
            event_handlers.add_loggers();
        }

        let (event_publisher, event_bus, event_bus_shutdown) = if !event_handlers.is_empty() {
            let (event_publisher, event_subscriber) = mpsc::channel();
            let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
            let event_bus = start_event_bus(event_handlers, event_subscriber, event_bus_shutdown_receiver);
            (Some(event_publisher), Some(event_bus), Some(event_bus_shutdown))
        } else {
            (None, None, None)
        };

        let engine = Arc::new(MilestoneEngine::new(
            self.kv_store,
            self.configuration,
            self.permissions,
            self.settlement,
            self.clock,
            event_publisher,
        ));

        let (release_scheduler_shutdown, release_scheduler_shutdown_receiver) = mpsc::channel();
        let release_scheduler =
            start_release_scheduler(engine.clone(), sweep_interval, release_scheduler_shutdown_receiver);

        Platform {
            engine,
            release_scheduler: Some(release_scheduler),
            release_scheduler_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

fn refresh_handler(refresh_signal: Box<dyn RefreshSignal>) -> HandlerPtr<ContributeEvent> {
    Box::new(move |contribute_event: &ContributeEvent| {
        if let Err(err) = refresh_signal.refresh(contribute_event.contribution.contributor) {
            log::debug!(
                "Refresh signal for {} failed, ignoring: {}",
                contribute_event.contribution.contributor,
                err
            );
        }
    })
}

/// A handle to the background threads of the escrow platform. When this value is dropped, all
/// background threads are gracefully shut down.
pub struct Platform<K: KVStore> {
    engine: Arc<MilestoneEngine<K>>,
    release_scheduler: Option<JoinHandle<()>>,
    release_scheduler_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore> Platform<K> {
    /// Get the engine on which every escrow operation is called. The returned `Arc` can be cloned into
    /// request handling threads.
    pub fn engine(&self) -> &Arc<MilestoneEngine<K>> {
        &self.engine
    }

    /// Returns a camera which can be used to peek into the escrow store.
    pub fn escrow_store_camera(&self) -> EscrowStoreCamera<K> {
        self.engine.camera()
    }
}

impl<K: KVStore> Drop for Platform<K> {
    fn drop(&mut self) {
        // The release scheduler publishes events, so it is shut down first.
        let _ = self.release_scheduler_shutdown.send(());
        if let Some(release_scheduler) = self.release_scheduler.take() {
            if release_scheduler.join().is_err() {
                log::error!("Release scheduler thread panicked");
            }
        }

        if let Some(event_bus_shutdown) = self.event_bus_shutdown.take() {
            let _ = event_bus_shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            if event_bus.join().is_err() {
                log::error!("Event bus thread panicked");
            }
        }
    }
}
