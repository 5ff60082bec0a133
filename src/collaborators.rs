/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for the external systems the escrow core consumes, and their default implementations.
//!
//! |Collaborator|Trait|Default|
//! |---|---|---|
//! |Permission oracle|[`PermissionOracle`]|[`AdminRolePermissions`]|
//! |Settlement layer|[`SettlementLayer`]|[`InternalSettlement`]|
//! |Recommendation refresh|[`RefreshSignal`]|None|
//! |Time|[`Clock`]|[`SystemClock`]|
//!
//! The authentication oracle has no trait: its output is an `Option<&Identity>` that callers pass into
//! every operation, with `None` standing for an unauthenticated request.

use std::{
    fmt::{self, Display, Formatter},
    time::{SystemTime, UNIX_EPOCH},
};

use sha2::Digest;

use crate::types::{
    basic::{Amount, MilestoneID, SettlementReference, Timestamp, UserID},
    milestone::{CryptoHasher, Milestone},
};

/// The identity of an authenticated caller. The escrow core trusts it without re-verifying credentials.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user: UserID,
    pub role: Role,
}

impl Identity {
    pub fn new(user: UserID, role: Role) -> Self {
        Self { user, role }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Creator,
    Admin,
    SuperAdmin,
}

/// Privileged actions, each checked against the [`PermissionOracle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Permission {
    OpenVoting,
    FinalizeMilestone,
    ApproveMilestone,
    RejectMilestone,
    TriggerSweep,
    ViewEscrowLedger,
}

pub trait PermissionOracle: Send + Sync {
    fn has_permission(&self, identity: &Identity, permission: Permission) -> bool;
}

/// Grants every permission to admins and super admins, and none to anyone else.
#[derive(Clone, Copy, Debug, Default)]
pub struct AdminRolePermissions;

impl PermissionOracle for AdminRolePermissions {
    fn has_permission(&self, identity: &Identity, _permission: Permission) -> bool {
        matches!(identity.role, Role::Admin | Role::SuperAdmin)
    }
}

/// What the settlement layer needs to pay a milestone out to its campaign's creator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseRequest {
    pub milestone: MilestoneID,
    /// Correlation index into the settlement layer, if one was ever recorded.
    pub settlement_index: Option<u32>,
    pub amount: Amount,
    pub recipient: UserID,
    /// Starts at 1.
    pub attempt: u32,
}

/// The external ledger that actually moves money.
///
/// The escrow core only records that a release should happen and stores the reference returned by
/// [`release`](Self::release). A milestone is only approved once `release` returns `Ok`.
pub trait SettlementLayer: Send + Sync {
    /// Tell the settlement layer that backers may now vote on `milestone`. Failures are logged and do not
    /// stop voting from opening.
    fn open_voting(&self, milestone: &Milestone) -> Result<(), SettlementError>;

    fn release(&self, request: &ReleaseRequest) -> Result<SettlementReference, SettlementError>;
}

/// A settlement layer that does not talk to any external system. Every release succeeds, and its
/// reference is the SHA-256 digest of the release request.
#[derive(Clone, Copy, Debug, Default)]
pub struct InternalSettlement;

impl SettlementLayer for InternalSettlement {
    fn open_voting(&self, _milestone: &Milestone) -> Result<(), SettlementError> {
        Ok(())
    }

    fn release(&self, request: &ReleaseRequest) -> Result<SettlementReference, SettlementError> {
        let mut hasher = CryptoHasher::new();
        hasher.update(request.milestone.campaign.int().to_le_bytes());
        hasher.update(request.milestone.order.to_le_bytes());
        hasher.update(request.amount.int().to_le_bytes());
        hasher.update(request.recipient.int().to_le_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        let hex: String = digest.iter().map(|byte| format!("{:02x}", byte)).collect();
        Ok(SettlementReference::new(format!("0x{}", hex)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementError {
    pub kind: SettlementErrorKind,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettlementErrorKind {
    /// Retrying later may succeed, e.g., the settlement layer is unreachable.
    Transient,
    /// Retrying will never succeed, e.g., the correlation data is malformed.
    Permanent,
}

impl SettlementError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: SettlementErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: SettlementErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == SettlementErrorKind::Transient
    }
}

impl Display for SettlementError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.kind {
            SettlementErrorKind::Transient => write!(f, "transient: {}", self.message),
            SettlementErrorKind::Permanent => write!(f, "permanent: {}", self.message),
        }
    }
}

impl std::error::Error for SettlementError {}

/// Fire-and-forget notification that a user's contributions changed, e.g., so that a recommendation
/// engine can retrain. Failures are ignored.
pub trait RefreshSignal: Send + Sync {
    fn refresh(&self, user: UserID) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or(0);
        Timestamp::from_secs(secs)
    }
}
