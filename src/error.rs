/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The error type returned by every fallible operation of the escrow core.
//!
//! Errors carry enough detail for the caller to act on them. For example, an over-contribution reports
//! the exact headroom left in the active milestone:
//!
//! ```text
//! this would exceed the milestone goal, max allowed is $40
//! ```

use std::fmt::{self, Display, Formatter};

use crate::collaborators::SettlementError;
use crate::escrow_store::{
    accessors::internal::{KVSetError, StoreError},
    pluggables::KVGetError,
};
use crate::types::{
    basic::{Amount, CampaignID, MilestoneID, SettlementReference, Timestamp, UserID},
    lease::LeaseScope,
    milestone::ReviewState,
};

#[derive(Debug)]
pub enum EscrowError {
    /// The referenced campaign or milestone does not exist.
    NotFound(Entity),
    /// The caller is not authenticated.
    Unauthorized,
    /// The caller is authenticated but is not the campaign creator, not an admin, or not a backer.
    Forbidden { reason: String },
    /// The operation is illegal for the milestone's current state.
    InvalidState {
        milestone: MilestoneID,
        conflict: StateConflict,
    },
    /// The input is structurally invalid.
    Validation(ValidationError),
    /// The voter has already voted on the milestone.
    AlreadyVoted { milestone: MilestoneID, voter: UserID },
    /// The external settlement layer failed to move funds. May be transient.
    Settlement(SettlementError),
    /// The key-value store could not be read from or written into.
    Store(StoreError),
    /// Another instance sharing the key-value store held the lease on `scope` for too long.
    Busy(LeaseScope),
}

impl EscrowError {
    pub(crate) fn forbidden(reason: impl Into<String>) -> Self {
        EscrowError::Forbidden { reason: reason.into() }
    }

    /// Whether retrying the same operation later could succeed without any other change.
    pub fn is_transient(&self) -> bool {
        match self {
            EscrowError::Settlement(err) => err.is_transient(),
            EscrowError::Busy(_) | EscrowError::Store(StoreError::WriteConflict(_)) => true,
            _ => false,
        }
    }
}

impl Display for EscrowError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EscrowError::NotFound(entity) => write!(f, "{} not found", entity),
            EscrowError::Unauthorized => write!(f, "authentication required"),
            EscrowError::Forbidden { reason } => write!(f, "forbidden: {}", reason),
            EscrowError::InvalidState { milestone, conflict } => {
                write!(f, "milestone {}: {}", milestone, conflict)
            }
            EscrowError::Validation(err) => Display::fmt(err, f),
            EscrowError::AlreadyVoted { milestone, voter } => {
                write!(f, "user {} has already voted on milestone {}", voter, milestone)
            }
            EscrowError::Settlement(err) => write!(f, "settlement failed: {}", err),
            EscrowError::Store(err) => write!(f, "store error: {}", err),
            EscrowError::Busy(scope) => write!(f, "the lease on {} is held by another instance", scope),
        }
    }
}

impl std::error::Error for EscrowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EscrowError::Settlement(err) => Some(err),
            EscrowError::Store(err) => Some(err),
            EscrowError::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for EscrowError {
    fn from(value: ValidationError) -> Self {
        EscrowError::Validation(value)
    }
}

impl From<SettlementError> for EscrowError {
    fn from(value: SettlementError) -> Self {
        EscrowError::Settlement(value)
    }
}

impl From<StoreError> for EscrowError {
    fn from(value: StoreError) -> Self {
        EscrowError::Store(value)
    }
}

impl From<KVGetError> for EscrowError {
    fn from(value: KVGetError) -> Self {
        EscrowError::Store(StoreError::from(value))
    }
}

impl From<KVSetError> for EscrowError {
    fn from(value: KVSetError) -> Self {
        EscrowError::Store(StoreError::from(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Campaign(CampaignID),
    Milestone(MilestoneID),
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Campaign(campaign) => write!(f, "campaign {}", campaign),
            Entity::Milestone(milestone) => write!(f, "milestone {}", milestone),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateConflict {
    /// `operation` is not legal while the milestone is in review state `found`.
    UnexpectedReviewState {
        operation: &'static str,
        found: ReviewState,
    },
    /// Evidence cannot be submitted before the milestone is fully funded.
    NotFullyFunded { current: Amount, required: Amount },
    VotingNotStarted { starts_at: Timestamp },
    VotingClosed { closed_at: Timestamp },
    /// The campaign's escrow does not hold enough to release the milestone.
    InsufficientEscrow { available: Amount, required: Amount },
}

impl Display for StateConflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StateConflict::UnexpectedReviewState { operation, found } => {
                write!(f, "cannot {} while the milestone is {:?}", operation, found)
            }
            StateConflict::NotFullyFunded { current, required } => write!(
                f,
                "milestone is not fully funded yet ({} of {})",
                current, required
            ),
            StateConflict::VotingNotStarted { starts_at } => {
                write!(f, "voting has not started yet (starts at {})", starts_at)
            }
            StateConflict::VotingClosed { closed_at } => {
                write!(f, "voting period has ended (closed at {})", closed_at)
            }
            StateConflict::InsufficientEscrow { available, required } => write!(
                f,
                "escrow holds {} but releasing the milestone requires {}",
                available, required
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    ZeroTarget,
    EmptyMilestonePlan,
    MissingTitle { order: u32 },
    ZeroMilestoneAmount { order: u32 },
    /// Milestone orders must run 1, 2, ..., n with no gaps or duplicates.
    NonSequentialOrder { expected: u32, found: u32 },
    MilestonesExceedTarget { total: Amount, target: Amount },
    /// Campaigns at or above the milestone threshold need at least `required` milestones.
    TooFewMilestones { required: u32, found: u32 },
    ZeroContribution,
    DuplicateSettlementReference { reference: SettlementReference },
    NoActiveMilestone { campaign: CampaignID },
    MilestoneFullyFunded { milestone: MilestoneID },
    ExceedsMilestoneGoal { milestone: MilestoneID, remaining: Amount },
    MissingEvidence,
    AmountOverflow,
    /// A milestone's amount cannot be lowered below what it has already raised.
    AmountBelowFunded { order: u32, funded: Amount },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ZeroTarget => write!(f, "campaign target amount must be positive"),
            ValidationError::EmptyMilestonePlan => write!(f, "at least one milestone is required"),
            ValidationError::MissingTitle { order } => write!(f, "milestone {} has no title", order),
            ValidationError::ZeroMilestoneAmount { order } => {
                write!(f, "milestone {} must ask for a positive amount", order)
            }
            ValidationError::NonSequentialOrder { expected, found } => write!(
                f,
                "milestone order must be sequential starting from 1: expected {}, found {}",
                expected, found
            ),
            ValidationError::MilestonesExceedTarget { total, target } => write!(
                f,
                "total milestone amounts ({}) cannot exceed campaign target amount ({})",
                total, target
            ),
            ValidationError::TooFewMilestones { required, found } => write!(
                f,
                "campaigns of this size need at least {} milestones, found {}",
                required, found
            ),
            ValidationError::ZeroContribution => write!(f, "contribution amount must be positive"),
            ValidationError::DuplicateSettlementReference { reference } => {
                write!(f, "transaction {} already recorded", reference)
            }
            ValidationError::NoActiveMilestone { campaign } => write!(
                f,
                "campaign {} has no milestone currently accepting contributions",
                campaign
            ),
            ValidationError::MilestoneFullyFunded { milestone } => write!(
                f,
                "milestone {} is already fully funded and awaiting proof",
                milestone
            ),
            ValidationError::ExceedsMilestoneGoal { remaining, .. } => write!(
                f,
                "this would exceed the milestone goal, max allowed is {}",
                remaining
            ),
            ValidationError::MissingEvidence => write!(f, "evidence must include a description"),
            ValidationError::AmountOverflow => write!(f, "amount overflows"),
            ValidationError::AmountBelowFunded { order, funded } => write!(
                f,
                "milestone {} has already raised {} and cannot ask for less",
                order, funded
            ),
        }
    }
}

impl std::error::Error for ValidationError {}
