/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable escrow persistence.

use std::fmt::Display;

use borsh::BorshDeserialize;

use crate::types::{
    basic::{Amount, CampaignID, ContributionID, EscrowTransactionID, MilestoneID, SettlementReference, UserID},
    campaign::Campaign,
    lease::{Lease, LeaseScope},
    ledger::{Contribution, EscrowTransaction, Vote},
    milestone::Milestone,
};

use super::variables::{self, concat};

/// A key-value store with atomic, conditional, batched writes.
///
/// Implementations must be cheap to clone, with every clone referring to the same underlying storage.
/// Several instances of the platform, in one process or in many, may share the same storage.
pub trait KVStore: KVGet + Clone + Send + Sync + 'static {
    type WriteBatch: WriteBatch;
    type Snapshot<'a>: 'a + KVGet;

    /// Apply every operation in `wb` atomically, but only if every condition staged in `wb` with
    /// [`WriteBatch::expect`] holds at the moment of writing. Otherwise, write nothing and return the
    /// first key whose condition did not hold.
    ///
    /// Checking the conditions and applying the operations must be atomic with respect to every other
    /// write to the same storage, including writes through other clones.
    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), WriteConflict>;
    /// Get a read-only view that does not observe writes made after it was taken.
    fn snapshot<'b>(&'b self) -> Self::Snapshot<'_>;
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /* ↓↓↓ Campaigns ↓↓↓ */

    fn campaign_count(&self) -> Result<u64, KVGetError> {
        Ok(get_and_deserialize(self, &variables::CAMPAIGN_COUNT, || Key::CampaignCount)?.unwrap_or(0))
    }

    fn campaign(&self, campaign: CampaignID) -> Result<Option<Campaign>, KVGetError> {
        get_and_deserialize(
            self,
            &concat(&variables::CAMPAIGNS, &variables::campaign_bytes(campaign)),
            || Key::Campaign { campaign },
        )
    }

    /* ↓↓↓ Milestones ↓↓↓ */

    fn milestone(&self, milestone: MilestoneID) -> Result<Option<Milestone>, KVGetError> {
        get_and_deserialize(
            self,
            &concat(&variables::MILESTONES, &variables::milestone_bytes(milestone)),
            || Key::Milestone { milestone },
        )
    }

    /* ↓↓↓ Contributions ↓↓↓ */

    fn contribution(&self, contribution: ContributionID) -> Result<Option<Contribution>, KVGetError> {
        get_and_deserialize(
            self,
            &concat(
                &variables::CONTRIBUTIONS,
                &variables::campaign_index_bytes(contribution.campaign, contribution.index),
            ),
            || Key::Contribution { contribution },
        )
    }

    /// How much `user` has contributed to `campaign` in total. Zero if the user never contributed.
    fn contributed_amount(&self, campaign: CampaignID, user: UserID) -> Result<Amount, KVGetError> {
        Ok(get_and_deserialize(
            self,
            &concat(&variables::CONTRIBUTED_AMOUNTS, &variables::campaign_user_bytes(campaign, user)),
            || Key::ContributedAmount { campaign, user },
        )?
        .unwrap_or_else(Amount::zero))
    }

    /// The distinct users that contributed to `campaign`, in order of their first contribution.
    fn contributors(&self, campaign: CampaignID) -> Result<Vec<UserID>, KVGetError> {
        Ok(get_and_deserialize(
            self,
            &concat(&variables::CONTRIBUTORS, &variables::campaign_bytes(campaign)),
            || Key::Contributors { campaign },
        )?
        .unwrap_or_default())
    }

    /// The contribution that `reference` funded, if any.
    fn settlement_reference_owner(
        &self,
        reference: &SettlementReference,
    ) -> Result<Option<ContributionID>, KVGetError> {
        get_and_deserialize(
            self,
            &concat(&variables::SETTLEMENT_REFERENCES, reference.bytes()),
            || Key::SettlementReference {
                reference: reference.clone(),
            },
        )
    }

    /* ↓↓↓ Votes ↓↓↓ */

    fn vote(&self, milestone: MilestoneID, voter: UserID) -> Result<Option<Vote>, KVGetError> {
        get_and_deserialize(
            self,
            &concat(&variables::VOTES, &variables::milestone_user_bytes(milestone, voter)),
            || Key::Vote { milestone, voter },
        )
    }

    fn voters(&self, milestone: MilestoneID) -> Result<Vec<UserID>, KVGetError> {
        Ok(get_and_deserialize(
            self,
            &concat(&variables::VOTERS, &variables::milestone_bytes(milestone)),
            || Key::Voters { milestone },
        )?
        .unwrap_or_default())
    }

    /* ↓↓↓ Leases ↓↓↓ */

    fn lease(&self, scope: LeaseScope) -> Result<Option<Lease>, KVGetError> {
        get_and_deserialize(self, &variables::lease_key(scope), || Key::Lease { scope })
    }

    /* ↓↓↓ Escrow Transactions ↓↓↓ */

    fn escrow_transaction(
        &self,
        transaction: EscrowTransactionID,
    ) -> Result<Option<EscrowTransaction>, KVGetError> {
        get_and_deserialize(
            self,
            &concat(
                &variables::ESCROW_TRANSACTIONS,
                &variables::campaign_index_bytes(transaction.campaign, transaction.index),
            ),
            || Key::EscrowTransaction { transaction },
        )
    }
}

impl<T: KVGet + ?Sized> KVGet for &T {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        (**self).get(key)
    }
}

/// Get the value at `key` and deserialize it as a `T`. `key_name` names the variable in the error if the
/// value cannot be deserialized.
fn get_and_deserialize<T, G>(kv: &G, key: &[u8], key_name: impl FnOnce() -> Key) -> Result<Option<T>, KVGetError>
where
    T: BorshDeserialize,
    G: KVGet + ?Sized,
{
    match kv.get(key) {
        Some(bytes) => T::deserialize(&mut bytes.as_slice())
            .map(Some)
            .map_err(|err| KVGetError::DeserializeValueError {
                key: key_name(),
                source: err,
            }),
        None => Ok(None),
    }
}

#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
    ValueExpectedButNotFound { key: Key },
}

impl Display for KVGetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KVGetError::DeserializeValueError { key, source } => {
                write!(f, "failed to deserialize {}: {}", key, source)
            }
            KVGetError::ValueExpectedButNotFound { key } => write!(f, "expected {} but found nothing", key),
        }
    }
}

impl std::error::Error for KVGetError {}

/// Names a single state variable. Used to say which variable a [`KVGetError`] or a
/// [`KVSetError`](super::accessors::internal::KVSetError) is about.
#[derive(Debug)]
pub enum Key {
    CampaignCount,
    Campaign { campaign: CampaignID },
    Milestone { milestone: MilestoneID },
    Contribution { contribution: ContributionID },
    ContributedAmount { campaign: CampaignID, user: UserID },
    Contributors { campaign: CampaignID },
    SettlementReference { reference: SettlementReference },
    Vote { milestone: MilestoneID, voter: UserID },
    Voters { milestone: MilestoneID },
    EscrowTransaction { transaction: EscrowTransactionID },
    Lease { scope: LeaseScope },
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self {
            &Key::CampaignCount => write!(f, "Campaign Count"),
            &Key::Campaign { campaign } => write!(f, "Campaign {}", campaign),
            &Key::Milestone { milestone } => write!(f, "Milestone {}", milestone),
            &Key::Contribution { contribution } => write!(f, "Contribution {}", contribution),
            &Key::ContributedAmount { campaign, user } => {
                write!(f, "Contributed Amount of {} to campaign {}", user, campaign)
            }
            &Key::Contributors { campaign } => write!(f, "Contributors of campaign {}", campaign),
            &Key::SettlementReference { reference } => write!(f, "Settlement Reference {}", reference),
            &Key::Vote { milestone, voter } => write!(f, "Vote of {} on milestone {}", voter, milestone),
            &Key::Voters { milestone } => write!(f, "Voters on milestone {}", milestone),
            &Key::EscrowTransaction { transaction } => write!(f, "Escrow Transaction {}", transaction),
            &Key::Lease { scope } => write!(f, "Lease on {}", scope),
        }
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
    /// Make the whole batch conditional on `key` holding exactly `value` when it is written, or on `key`
    /// being absent if `value` is `None`. The condition is checked against the value before any of the
    /// batch's own operations are applied.
    fn expect(&mut self, key: &[u8], value: Option<&[u8]>);
}

/// Returned by [`KVStore::write`] when a condition staged in the write batch did not hold. Nothing was
/// written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteConflict {
    pub key: Vec<u8>,
}

impl Display for WriteConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a concurrent write changed key {:?}", self.key)
    }
}

impl std::error::Error for WriteConflict {}
