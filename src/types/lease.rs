/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Leases: time-bounded locks that live in the key-value store.
//!
//! Several instances of the platform can share one key-value store. In-process locks cannot keep them
//! from interleaving their writes, so every critical section is also guarded by a lease stored next to
//! the records it protects. A lease is taken with a conditional write that only succeeds if no live
//! lease exists, and every write made under it is conditional on it still being held.
//!
//! A lease that its holder never gives up, e.g., because the holder crashed, expires at `expires_at`
//! and can then be taken over by anyone.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use super::basic::{CampaignID, Timestamp};

/// What a lease guards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum LeaseScope {
    /// Running a sweep. Held for the whole sweep, so that at most one sweep runs at a time.
    Sweep,
    /// Every read-modify-write of one campaign's records.
    Campaign(CampaignID),
}

impl Display for LeaseScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LeaseScope::Sweep => f.write_str("sweep"),
            LeaseScope::Campaign(campaign) => write!(f, "campaign {}", campaign),
        }
    }
}

/// Identifies one running instance of the platform. Chosen at random when the platform starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct InstanceID(u128);

impl InstanceID {
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    pub fn random() -> Self {
        Self(rand::random())
    }

    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl Display for InstanceID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", (self.0 >> 96) as u32)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Lease {
    pub scope: LeaseScope,
    pub holder: InstanceID,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
}

impl Lease {
    /// Whether the lease is still in force as of `now`. A live lease cannot be taken, not even by its holder.
    pub fn is_live(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}
