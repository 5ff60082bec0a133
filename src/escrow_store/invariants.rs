/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Rules and predicates that keep the escrow store's invariants.
//!
//! # Invariants
//!
//! In the context of this module, invariants are logical properties that are always true about the
//! escrow store:
//! 1. **Amount bound**: the amounts of a campaign's milestones sum to at most its target amount.
//! 2. **Order contiguity**: the orders of a campaign's milestones are exactly `1..=n`.
//! 3. **Single active milestone**: at most one milestone per campaign accepts contributions, and no
//!    milestone ever holds more than its amount.
//! 4. **Escrow conservation**: `escrow_amount + released_amount == current_amount` for every campaign.
//!
//! # Methods
//!
//! The methods in this module are pure. Each one helps the engine make sure that an update is
//! invariant-preserving in one of two ways:
//! 1. By checking **whether** an update may be made at all, e.g., [`validate_milestone_plan`],
//!    [`validate_milestone_update`], and [`validate_contribution`].
//! 2. By determining **what** update should be made, e.g., [`active_milestone`] and
//!    [`initial_funding_state`].

use crate::{
    error::{StateConflict, ValidationError},
    types::{
        basic::{Amount, MilestoneID},
        campaign::Campaign,
        milestone::{FundingState, Milestone, MilestoneUpdate, NewMilestone},
    },
};

/// Check that appending `plan` to `campaign`'s `existing` milestones keeps the amount bound and order
/// contiguity invariants, and that every planned milestone is well-formed.
///
/// `plan` may be given in any order, but once sorted its orders must continue exactly where `existing`
/// leaves off.
pub fn validate_milestone_plan(
    campaign: &Campaign,
    existing: &[Milestone],
    plan: &[NewMilestone],
) -> Result<(), ValidationError> {
    if plan.is_empty() {
        return Err(ValidationError::EmptyMilestonePlan);
    }

    let mut orders: Vec<u32> = plan.iter().map(|milestone| milestone.order).collect();
    orders.sort_unstable();
    for (expected, found) in (existing.len() as u32 + 1..).zip(orders) {
        if found != expected {
            return Err(ValidationError::NonSequentialOrder { expected, found });
        }
    }

    for milestone in plan {
        if milestone.title.trim().is_empty() {
            return Err(ValidationError::MissingTitle { order: milestone.order });
        }
        if milestone.amount.is_zero() {
            return Err(ValidationError::ZeroMilestoneAmount { order: milestone.order });
        }
    }

    let total = existing
        .iter()
        .map(|milestone| milestone.amount)
        .chain(plan.iter().map(|milestone| milestone.amount))
        .try_fold(Amount::zero(), Amount::checked_add)
        .ok_or(ValidationError::AmountOverflow)?;
    if total > campaign.target_amount {
        return Err(ValidationError::MilestonesExceedTarget {
            total,
            target: campaign.target_amount,
        });
    }

    Ok(())
}

/// Check that applying `update` to `milestone`, one of `campaign`'s `milestones`, keeps the amount bound,
/// leaves the milestone well-formed, and does not ask for less than the milestone has already raised.
pub fn validate_milestone_update(
    campaign: &Campaign,
    milestones: &[Milestone],
    milestone: &Milestone,
    update: &MilestoneUpdate,
) -> Result<(), ValidationError> {
    let order = milestone.id.order;
    if update.title.as_ref().map_or(false, |title| title.trim().is_empty()) {
        return Err(ValidationError::MissingTitle { order });
    }

    let amount = match update.amount {
        Some(amount) => amount,
        None => return Ok(()),
    };
    if amount.is_zero() {
        return Err(ValidationError::ZeroMilestoneAmount { order });
    }
    if amount < milestone.current_amount {
        return Err(ValidationError::AmountBelowFunded {
            order,
            funded: milestone.current_amount,
        });
    }

    let total = milestones
        .iter()
        .map(|other| if other.id == milestone.id { amount } else { other.amount })
        .try_fold(Amount::zero(), Amount::checked_add)
        .ok_or(ValidationError::AmountOverflow)?;
    if total > campaign.target_amount {
        return Err(ValidationError::MilestonesExceedTarget {
            total,
            target: campaign.target_amount,
        });
    }

    Ok(())
}

/// The outcome of checking a campaign's milestones against every structural requirement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MilestoneRequirements {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

/// Check `milestones` against the amount bound, order contiguity, and, for campaigns whose target is at
/// least `milestone_threshold`, the minimum milestone count. Unlike [`validate_milestone_plan`], this
/// collects every violation instead of stopping at the first.
pub fn milestone_requirements(
    campaign: &Campaign,
    milestones: &[Milestone],
    milestone_threshold: Amount,
    minimum_milestones: u32,
) -> MilestoneRequirements {
    let mut errors = Vec::new();

    if campaign.target_amount >= milestone_threshold && (milestones.len() as u32) < minimum_milestones {
        errors.push(ValidationError::TooFewMilestones {
            required: minimum_milestones,
            found: milestones.len() as u32,
        });
    }

    let mut orders: Vec<u32> = milestones.iter().map(|milestone| milestone.id.order).collect();
    orders.sort_unstable();
    if let Some((expected, found)) = (1..).zip(orders).find(|(expected, found)| expected != found) {
        errors.push(ValidationError::NonSequentialOrder { expected, found });
    }

    match milestones
        .iter()
        .map(|milestone| milestone.amount)
        .try_fold(Amount::zero(), Amount::checked_add)
    {
        Some(total) if total > campaign.target_amount => errors.push(ValidationError::MilestonesExceedTarget {
            total,
            target: campaign.target_amount,
        }),
        Some(_) => (),
        None => errors.push(ValidationError::AmountOverflow),
    }

    MilestoneRequirements {
        is_valid: errors.is_empty(),
        errors,
    }
}

/// Get the milestone that is currently accepting contributions: the lowest-order milestone that
/// [accepts funding](Milestone::accepts_funding).
pub fn active_milestone(milestones: &[Milestone]) -> Option<&Milestone> {
    milestones
        .iter()
        .filter(|milestone| milestone.accepts_funding())
        .min_by_key(|milestone| milestone.id.order)
}

/// Decide the funding state of a newly created milestone.
///
/// Only the lowest-order milestone of a batch can start out `Active`, and only if every milestone that
/// comes before it has reached a terminal review state. Otherwise funds would flow to two milestones at
/// once.
pub fn initial_funding_state(existing: &[Milestone], first_in_batch: bool) -> FundingState {
    let predecessors_settled = existing
        .iter()
        .all(|milestone| milestone.review_state.is_terminal());
    if first_in_batch && predecessors_settled {
        FundingState::Active
    } else {
        FundingState::Inactive
    }
}

/// Check whether `campaign` can accept a contribution of `amount`, and if it tracks milestone funding,
/// return the milestone the contribution should be credited to.
pub fn validate_contribution(
    campaign: &Campaign,
    milestones: &[Milestone],
    amount: Amount,
) -> Result<Option<MilestoneID>, ValidationError> {
    if amount.is_zero() {
        return Err(ValidationError::ZeroContribution);
    }
    if !campaign.tracks_milestone_funding() {
        return Ok(None);
    }

    let active = match active_milestone(milestones) {
        Some(active) => active,
        None => {
            // Name the milestone that is holding things up if there is one.
            let awaiting_review = milestones.iter().find(|milestone| {
                milestone.funding_state == FundingState::Funded && !milestone.review_state.is_terminal()
            });
            return Err(match awaiting_review {
                Some(milestone) => ValidationError::MilestoneFullyFunded { milestone: milestone.id },
                None => ValidationError::NoActiveMilestone { campaign: campaign.id },
            });
        }
    };

    if active.is_fully_funded() {
        return Err(ValidationError::MilestoneFullyFunded { milestone: active.id });
    }
    let remaining = active.remaining();
    if amount > remaining {
        return Err(ValidationError::ExceedsMilestoneGoal {
            milestone: active.id,
            remaining,
        });
    }

    Ok(Some(active.id))
}

/// Check that `campaign`'s escrow holds enough to release `milestone`.
pub fn escrow_covers(campaign: &Campaign, milestone: &Milestone) -> Result<(), StateConflict> {
    if campaign.escrow_amount < milestone.amount {
        return Err(StateConflict::InsufficientEscrow {
            available: campaign.escrow_amount,
            required: milestone.amount,
        });
    }
    Ok(())
}
