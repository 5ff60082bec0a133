/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Internal read-and-write handle used by the engine to mutate the escrow store.
//!
//! # Atomicity
//!
//! Every operation of the engine that changes more than one variable stages all of its changes in a
//! single [`EscrowWriteBatch`] and applies them with one call to [`EscrowStore::write`]. The
//! [`KVStore`] contract makes that call atomic, so concurrent readers never see, for example, a
//! contribution without the matching increase in its campaign's escrow.
//!
//! # Leases and conditional writes
//!
//! An `EscrowStore` can hold [leases](crate::types::lease). Every batch written through a handle is
//! conditional on each lease the handle holds still being stored exactly as it was taken, so an
//! instance that lost a lease, e.g., because it expired while the instance was stalled, cannot write
//! under it. The leases a handle holds are given up when it is dropped.
//!
//! Write batches can carry conditions of their own, e.g., [`EscrowWriteBatch::expect_no_vote`], for
//! records that must be unique regardless of which lease guards them.

use std::{fmt::Display, time::Duration};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    basic::{Amount, CampaignID, ContributionID, MilestoneID, SettlementReference, Timestamp, UserID},
    campaign::Campaign,
    lease::{InstanceID, Lease, LeaseScope},
    ledger::{Contribution, EscrowTransaction, Vote},
    milestone::Milestone,
};

use super::super::{
    pluggables::{KVGet, KVGetError, KVStore, Key, WriteBatch, WriteConflict},
    variables::{self, concat},
};

use super::public::{EscrowStoreCamera, EscrowStoreSnapshot};

/// Read and write handle into the escrow store.
pub struct EscrowStore<K: KVStore> {
    kv_store: K,
    /// The leases held through this handle, each with the exact bytes that were stored when it was
    /// taken or last renewed.
    leases: Vec<(LeaseScope, Vec<u8>)>,
}

impl<K: KVStore> EscrowStore<K> {
    pub(crate) fn new(kv_store: K) -> Self {
        EscrowStore {
            kv_store,
            leases: Vec::new(),
        }
    }

    /// Read the latest committed values, without taking a snapshot.
    pub(crate) fn reader(&self) -> EscrowStoreSnapshot<&K> {
        EscrowStoreSnapshot::new(&self.kv_store)
    }

    pub(crate) fn camera(&self) -> EscrowStoreCamera<K> {
        EscrowStoreCamera::new(self.kv_store.clone())
    }

    /// Apply `write_batch` atomically, if every lease held through this handle is still held and every
    /// condition staged in the batch holds. Otherwise, write nothing.
    pub(crate) fn write(&mut self, mut write_batch: EscrowWriteBatch<K::WriteBatch>) -> Result<(), StoreError> {
        for (scope, bytes) in &self.leases {
            write_batch.0.expect(&variables::lease_key(*scope), Some(bytes));
        }
        self.kv_store.write(write_batch.0).map_err(StoreError::WriteConflict)
    }

    /* ↓↓↓ Leases ↓↓↓ */

    /// Try once to take the lease on `scope` for `holder`, for `duration` from `now`. Returns whether it
    /// was taken.
    ///
    /// A live lease is never taken over, even if `holder` is the one holding it: two critical sections
    /// of the same instance exclude each other too. An expired lease is taken over.
    pub(crate) fn try_acquire_lease(
        &mut self,
        scope: LeaseScope,
        holder: InstanceID,
        now: Timestamp,
        duration: Duration,
    ) -> Result<bool, StoreError> {
        let key = variables::lease_key(scope);
        let current = self.kv_store.get(&key);
        if let Some(bytes) = &current {
            let lease = deserialize_lease(scope, bytes)?;
            if lease.is_live(now) {
                return Ok(false);
            }
            log::warn!(
                "Taking over the lease on {} from {}, which expired at {}",
                scope,
                lease.holder,
                lease.expires_at
            );
        }

        let lease = Lease {
            scope,
            holder,
            acquired_at: now,
            expires_at: now + duration,
        };
        let bytes = serialize(&lease, || Key::Lease { scope })?;
        let mut wb = K::WriteBatch::new();
        wb.expect(&key, current.as_deref());
        wb.set(&key, &bytes);
        match self.kv_store.write(wb) {
            Ok(()) => {
                self.leases.push((scope, bytes));
                Ok(true)
            }
            // Someone else took it between the read and the write.
            Err(WriteConflict { .. }) => Ok(false),
        }
    }

    /// Push back the expiry of the lease on `scope`, which must be held through this handle, to
    /// `duration` from `now`. Returns `false` if the lease has been lost, in which case it is no longer
    /// held through this handle.
    pub(crate) fn renew_lease(&mut self, scope: LeaseScope, now: Timestamp, duration: Duration) -> Result<bool, StoreError> {
        let position = match self.leases.iter().position(|(held, _)| *held == scope) {
            Some(position) => position,
            None => return Ok(false),
        };
        let key = variables::lease_key(scope);
        let mut lease = deserialize_lease(scope, &self.leases[position].1)?;
        lease.expires_at = now + duration;
        let bytes = serialize(&lease, || Key::Lease { scope })?;

        let mut wb = K::WriteBatch::new();
        wb.expect(&key, Some(&self.leases[position].1));
        wb.set(&key, &bytes);
        match self.kv_store.write(wb) {
            Ok(()) => {
                self.leases[position].1 = bytes;
                Ok(true)
            }
            Err(WriteConflict { .. }) => {
                self.leases.remove(position);
                Ok(false)
            }
        }
    }

    /// Give up every lease held through this handle. A lease that has been taken over in the meantime is
    /// left alone.
    pub(crate) fn release_leases(&mut self) {
        for (scope, bytes) in self.leases.drain(..) {
            let key = variables::lease_key(scope);
            let mut wb = K::WriteBatch::new();
            wb.expect(&key, Some(&bytes));
            wb.delete(&key);
            if self.kv_store.write(wb).is_err() {
                log::warn!("The lease on {} was lost before it was given up", scope);
            }
        }
    }
}

impl<K: KVStore> Drop for EscrowStore<K> {
    fn drop(&mut self) {
        self.release_leases()
    }
}

fn deserialize_lease(scope: LeaseScope, bytes: &[u8]) -> Result<Lease, KVGetError> {
    Lease::try_from_slice(bytes).map_err(|err| KVGetError::DeserializeValueError {
        key: Key::Lease { scope },
        source: err,
    })
}

fn serialize<T: BorshSerialize + ?Sized>(value: &T, key_name: impl FnOnce() -> Key) -> Result<Vec<u8>, KVSetError> {
    value.try_to_vec().map_err(|err| KVSetError::SerializeValueError {
        key: key_name(),
        source: err,
    })
}

#[derive(Debug)]
pub enum StoreError {
    /// Error when trying to get a value from the escrow store's underlying [key value store][KVStore].
    KVGetError(KVGetError),

    /// Error when trying to set a value into the escrow store's underlying key value store.
    KVSetError(KVSetError),

    /// A write was refused because a lease it was made under was lost, or because a condition staged in
    /// its write batch no longer held.
    WriteConflict(WriteConflict),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::KVGetError(err) => Display::fmt(err, f),
            StoreError::KVSetError(err) => Display::fmt(err, f),
            StoreError::WriteConflict(err) => Display::fmt(err, f),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<KVGetError> for StoreError {
    fn from(value: KVGetError) -> Self {
        StoreError::KVGetError(value)
    }
}

impl From<KVSetError> for StoreError {
    fn from(value: KVSetError) -> Self {
        StoreError::KVSetError(value)
    }
}

pub struct EscrowWriteBatch<W: WriteBatch>(pub(super) W);

impl<W: WriteBatch> EscrowWriteBatch<W> {
    pub(crate) fn new() -> EscrowWriteBatch<W> {
        EscrowWriteBatch(W::new())
    }

    fn set_value<T: BorshSerialize + ?Sized>(
        &mut self,
        key: &[u8],
        value: &T,
        key_name: impl FnOnce() -> Key,
    ) -> Result<(), KVSetError> {
        let bytes = serialize(value, key_name)?;
        self.0.set(key, &bytes);
        Ok(())
    }

    /* ↓↓↓ Campaigns ↓↓↓ */

    pub fn set_campaign_count(&mut self, count: u64) -> Result<(), KVSetError> {
        self.set_value(&variables::CAMPAIGN_COUNT, &count, || Key::CampaignCount)
    }

    /// Only write the batch if the campaign count is still `count`.
    pub fn expect_campaign_count(&mut self, count: u64) -> Result<(), KVSetError> {
        // The count is only stored once the first campaign is registered.
        if count == 0 {
            self.0.expect(&variables::CAMPAIGN_COUNT, None);
        } else {
            let bytes = serialize(&count, || Key::CampaignCount)?;
            self.0.expect(&variables::CAMPAIGN_COUNT, Some(&bytes));
        }
        Ok(())
    }

    pub fn set_campaign(&mut self, campaign: &Campaign) -> Result<(), KVSetError> {
        self.set_value(
            &concat(&variables::CAMPAIGNS, &variables::campaign_bytes(campaign.id)),
            campaign,
            || Key::Campaign { campaign: campaign.id },
        )
    }

    /* ↓↓↓ Milestones ↓↓↓ */

    pub fn set_milestone(&mut self, milestone: &Milestone) -> Result<(), KVSetError> {
        self.set_value(
            &concat(&variables::MILESTONES, &variables::milestone_bytes(milestone.id)),
            milestone,
            || Key::Milestone { milestone: milestone.id },
        )
    }

    /// Only write the batch if `milestone` is still stored exactly as given.
    pub fn expect_milestone(&mut self, milestone: &Milestone) -> Result<(), KVSetError> {
        let bytes = serialize(milestone, || Key::Milestone { milestone: milestone.id })?;
        self.0.expect(
            &concat(&variables::MILESTONES, &variables::milestone_bytes(milestone.id)),
            Some(&bytes),
        );
        Ok(())
    }

    /* ↓↓↓ Contributions ↓↓↓ */

    pub fn set_contribution(&mut self, contribution: &Contribution) -> Result<(), KVSetError> {
        self.set_value(
            &concat(
                &variables::CONTRIBUTIONS,
                &variables::campaign_index_bytes(contribution.id.campaign, contribution.id.index),
            ),
            contribution,
            || Key::Contribution {
                contribution: contribution.id,
            },
        )
    }

    pub fn set_contributed_amount(
        &mut self,
        campaign: CampaignID,
        user: UserID,
        amount: Amount,
    ) -> Result<(), KVSetError> {
        self.set_value(
            &concat(&variables::CONTRIBUTED_AMOUNTS, &variables::campaign_user_bytes(campaign, user)),
            &amount,
            || Key::ContributedAmount { campaign, user },
        )
    }

    pub fn set_contributors(&mut self, campaign: CampaignID, contributors: &[UserID]) -> Result<(), KVSetError> {
        self.set_value(
            &concat(&variables::CONTRIBUTORS, &variables::campaign_bytes(campaign)),
            contributors,
            || Key::Contributors { campaign },
        )
    }

    pub fn set_settlement_reference(
        &mut self,
        reference: &SettlementReference,
        contribution: ContributionID,
    ) -> Result<(), KVSetError> {
        self.set_value(
            &concat(&variables::SETTLEMENT_REFERENCES, reference.bytes()),
            &contribution,
            || Key::SettlementReference {
                reference: reference.clone(),
            },
        )
    }

    /// Only write the batch if `reference` has not funded any contribution yet.
    pub fn expect_unused_settlement_reference(&mut self, reference: &SettlementReference) {
        self.0
            .expect(&concat(&variables::SETTLEMENT_REFERENCES, reference.bytes()), None);
    }

    /* ↓↓↓ Votes ↓↓↓ */

    pub fn set_vote(&mut self, vote: &Vote) -> Result<(), KVSetError> {
        self.set_value(
            &concat(&variables::VOTES, &variables::milestone_user_bytes(vote.milestone, vote.voter)),
            vote,
            || Key::Vote {
                milestone: vote.milestone,
                voter: vote.voter,
            },
        )
    }

    /// Only write the batch if `voter` has not voted on `milestone` yet.
    pub fn expect_no_vote(&mut self, milestone: MilestoneID, voter: UserID) {
        self.0.expect(
            &concat(&variables::VOTES, &variables::milestone_user_bytes(milestone, voter)),
            None,
        );
    }

    pub fn set_voters(&mut self, milestone: MilestoneID, voters: &[UserID]) -> Result<(), KVSetError> {
        self.set_value(
            &concat(&variables::VOTERS, &variables::milestone_bytes(milestone)),
            voters,
            || Key::Voters { milestone },
        )
    }

    /* ↓↓↓ Escrow Transactions ↓↓↓ */

    pub fn set_escrow_transaction(&mut self, transaction: &EscrowTransaction) -> Result<(), KVSetError> {
        self.set_value(
            &concat(
                &variables::ESCROW_TRANSACTIONS,
                &variables::campaign_index_bytes(transaction.id.campaign, transaction.id.index),
            ),
            transaction,
            || Key::EscrowTransaction {
                transaction: transaction.id,
            },
        )
    }
}

#[derive(Debug)]
pub enum KVSetError {
    SerializeValueError { key: Key, source: std::io::Error },
}

impl Display for KVSetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KVSetError::SerializeValueError { key, source } => {
                write!(f, "failed to serialize {}: {}", key, source)
            }
        }
    }
}

impl std::error::Error for KVSetError {}
