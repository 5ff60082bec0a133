/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The engine that every escrow operation runs on.
//!
//! [`MilestoneEngine`] is shared, behind an [`Arc`](std::sync::Arc), between the threads that serve
//! requests and the [release scheduler](crate::release_scheduler) thread. Its operations are defined in
//! separate `impl` blocks, grouped by component:
//! 1. [Campaign registration and the milestone state machine](crate::milestones::state_machine).
//! 2. [Contributions and milestone funding](crate::milestones::funding).
//! 3. [Voting and finalization](crate::voting::engine).
//! 4. [Sweeps](crate::release_scheduler).
//! 5. [Read-only queries](crate::queries).
//!
//! ## Serialization of writes
//!
//! Every mutating operation reads the records it needs, decides on an update, and applies it as a
//! single [write batch](crate::escrow_store::accessors::internal::EscrowWriteBatch). This whole
//! read-modify-write runs while holding `campaign`'s lock, so writes to one campaign never interleave
//! while writes to different campaigns never wait on each other.
//!
//! A campaign's lock has two parts. The in-process part is a mutex that queues the threads of this
//! engine. The shared part is a [lease](crate::types::lease) in the escrow store, which excludes every
//! other engine sharing the same store, and which fences every write made while it is held. A thread
//! takes the mutex first, then waits for the lease for at most [`Configuration::lease_wait`].
//!
//! Records whose uniqueness spans campaigns, i.e., campaign IDs and settlement references, are
//! written with conditional writes instead of under a lock.

use std::{
    collections::HashMap,
    sync::{mpsc::Sender, Arc, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

use crate::{
    collaborators::{Clock, Identity, Permission, PermissionOracle, SettlementLayer},
    error::{Entity, EscrowError},
    escrow_store::{
        accessors::{
            internal::EscrowStore,
            public::{EscrowStoreCamera, EscrowStoreSnapshot},
        },
        pluggables::{KVGet, KVStore},
    },
    events::Event,
    platform::Configuration,
    types::{
        basic::{CampaignID, MilestoneID, Timestamp},
        campaign::Campaign,
        lease::{InstanceID, LeaseScope},
        milestone::Milestone,
    },
};

pub struct MilestoneEngine<K: KVStore> {
    pub(crate) kv_store: K,
    pub(crate) config: Configuration,
    pub(crate) permissions: Box<dyn PermissionOracle>,
    pub(crate) settlement: Box<dyn SettlementLayer>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) event_publisher: Option<Sender<Event>>,
    pub(crate) campaign_locks: CampaignLocks,
    pub(crate) instance: InstanceID,
}

impl<K: KVStore> MilestoneEngine<K> {
    pub(crate) fn new(
        kv_store: K,
        config: Configuration,
        permissions: Box<dyn PermissionOracle>,
        settlement: Box<dyn SettlementLayer>,
        clock: Box<dyn Clock>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            kv_store,
            config,
            permissions,
            settlement,
            clock,
            event_publisher,
            campaign_locks: CampaignLocks::new(),
            instance: InstanceID::random(),
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// The ID this engine holds leases under.
    pub fn instance(&self) -> InstanceID {
        self.instance
    }

    /// Get a camera that takes consistent, read-only snapshots of the escrow store.
    pub fn camera(&self) -> EscrowStoreCamera<K> {
        self.store().camera()
    }

    pub(crate) fn store(&self) -> EscrowStore<K> {
        EscrowStore::new(self.kv_store.clone())
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(crate) fn publish(&self, event: Event) {
        Event::publish(&self.event_publisher, event)
    }

    /// Run `f` while holding `campaign`'s lock. Every write `f` makes through the store it is given is
    /// fenced by the campaign's lease.
    ///
    /// Returns [`EscrowError::Busy`] if another engine sharing the store holds the lease for longer than
    /// [`Configuration::lease_wait`].
    pub(crate) fn with_campaign_lock<T>(
        &self,
        campaign: CampaignID,
        f: impl FnOnce(&mut EscrowStore<K>) -> Result<T, EscrowError>,
    ) -> Result<T, EscrowError> {
        let lock = self.campaign_locks.get(campaign);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Declared after the guard, so the lease is given up before the mutex is.
        let mut store = self.store();
        self.acquire_lease(&mut store, LeaseScope::Campaign(campaign))?;
        f(&mut store)
    }

    /// Wait for the lease on `scope` and take it through `store`. Polls with exponential backoff, giving
    /// up after [`Configuration::lease_wait`].
    pub(crate) fn acquire_lease(&self, store: &mut EscrowStore<K>, scope: LeaseScope) -> Result<(), EscrowError> {
        let deadline = Instant::now() + self.config.lease_wait;
        let mut backoff = MIN_LEASE_BACKOFF;
        loop {
            if store.try_acquire_lease(scope, self.instance, self.now(), self.config.lease_duration)? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                log::warn!("Timed out waiting for the lease on {}", scope);
                return Err(EscrowError::Busy(scope));
            }
            thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_LEASE_BACKOFF);
        }
    }

    /// Check that the caller is authenticated and holds `permission`.
    pub(crate) fn authorize<'a>(
        &self,
        caller: Option<&'a Identity>,
        permission: Permission,
    ) -> Result<&'a Identity, EscrowError> {
        let caller = authenticated(caller)?;
        if !self.permissions.has_permission(caller, permission) {
            return Err(EscrowError::forbidden(format!("missing permission {:?}", permission)));
        }
        Ok(caller)
    }
}

const MIN_LEASE_BACKOFF: Duration = Duration::from_millis(1);
const MAX_LEASE_BACKOFF: Duration = Duration::from_millis(50);

pub(crate) fn authenticated(caller: Option<&Identity>) -> Result<&Identity, EscrowError> {
    caller.ok_or(EscrowError::Unauthorized)
}

pub(crate) fn load_campaign<S: KVGet>(
    reader: &EscrowStoreSnapshot<S>,
    campaign: CampaignID,
) -> Result<Campaign, EscrowError> {
    reader
        .campaign(campaign)?
        .ok_or(EscrowError::NotFound(Entity::Campaign(campaign)))
}

/// Load `milestone` together with the campaign it belongs to.
pub(crate) fn load_milestone<S: KVGet>(
    reader: &EscrowStoreSnapshot<S>,
    milestone: MilestoneID,
) -> Result<(Campaign, Milestone), EscrowError> {
    let campaign = reader
        .campaign(milestone.campaign)?
        .ok_or(EscrowError::NotFound(Entity::Milestone(milestone)))?;
    let milestone = reader
        .milestone(milestone)?
        .ok_or(EscrowError::NotFound(Entity::Milestone(milestone)))?;
    Ok((campaign, milestone))
}

/// One lock per campaign, created the first time the campaign is written to.
pub(crate) struct CampaignLocks(Mutex<HashMap<CampaignID, Arc<Mutex<()>>>>);

impl CampaignLocks {
    fn new() -> Self {
        CampaignLocks(Mutex::new(HashMap::new()))
    }

    fn get(&self, campaign: CampaignID) -> Arc<Mutex<()>> {
        let mut locks = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(campaign).or_default().clone()
    }
}
