/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the platform's
//! [configuration](crate::platform::Configuration).
//!
//! The escrow core logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how an [ApproveMilestone](crate::events::ApproveMilestoneEvent) is printed:
//!
//! ```text
//! ApproveMilestone, 1701329264, c1-m1, $100, voting-outcome, MHg5ZjJ, c1-m2
//! ```
//!
//! In the snippet:
//! - The third value is the approved milestone.
//! - The fourth value is the amount released.
//! - The fifth value is who caused the approval.
//! - The sixth value is the first seven characters of the Base64 encoding of the settlement reference.
//! - The seventh value is the milestone that became active for funding, or `-` if there is none.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const REGISTER_CAMPAIGN: &str = "RegisterCampaign";
pub const CREATE_MILESTONES: &str = "CreateMilestones";
pub const UPDATE_MILESTONE: &str = "UpdateMilestone";
pub const CONTRIBUTE: &str = "Contribute";

pub const SUBMIT_MILESTONE: &str = "SubmitMilestone";
pub const OPEN_VOTING: &str = "OpenVoting";
pub const VOTE: &str = "Vote";
pub const APPROVE_MILESTONE: &str = "ApproveMilestone";
pub const REJECT_MILESTONE: &str = "RejectMilestone";
pub const EXPIRE_MILESTONE: &str = "ExpireMilestone";
pub const SETTLEMENT_FAILED: &str = "SettlementFailed";

pub const START_SWEEP: &str = "StartSweep";
pub const END_SWEEP: &str = "EndSweep";
pub const SKIP_SWEEP: &str = "SkipSweep";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for RegisterCampaignEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |register_campaign_event: &RegisterCampaignEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                REGISTER_CAMPAIGN,
                register_campaign_event.timestamp,
                register_campaign_event.campaign,
                register_campaign_event.creator,
                register_campaign_event.target_amount,
                register_campaign_event.requires_milestones
            )
        };
        Box::new(logger)
    }
}

impl Logger for CreateMilestonesEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |create_milestones_event: &CreateMilestonesEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                CREATE_MILESTONES,
                create_milestones_event.timestamp,
                create_milestones_event.campaign,
                create_milestones_event.milestones.len(),
                create_milestones_event.total_amount
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateMilestoneEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_milestone_event: &UpdateMilestoneEvent| {
            log::info!(
                "{}, {}, {}, {}",
                UPDATE_MILESTONE,
                update_milestone_event.timestamp,
                update_milestone_event.milestone,
                update_milestone_event.amount
            )
        };
        Box::new(logger)
    }
}

impl Logger for ContributeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |contribute_event: &ContributeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                CONTRIBUTE,
                contribute_event.timestamp,
                contribute_event.contribution.id,
                contribute_event.contribution.contributor,
                contribute_event.contribution.amount,
                first_seven_base64_chars(contribute_event.contribution.settlement_reference.bytes()),
                milestone_or_dash(contribute_event.milestone.map(|milestone| milestone.to_string()))
            )
        };
        Box::new(logger)
    }
}

impl Logger for SubmitMilestoneEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |submit_milestone_event: &SubmitMilestoneEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SUBMIT_MILESTONE,
                submit_milestone_event.timestamp,
                submit_milestone_event.milestone,
                first_seven_base64_chars(&submit_milestone_event.evidence_digest.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for OpenVotingEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |open_voting_event: &OpenVotingEvent| {
            log::info!(
                "{}, {}, {}, {}",
                OPEN_VOTING,
                open_voting_event.timestamp,
                open_voting_event.milestone,
                open_voting_event.vote_end_time
            )
        };
        Box::new(logger)
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |vote_event: &VoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                VOTE,
                vote_event.timestamp,
                vote_event.vote.milestone,
                vote_event.vote.voter,
                vote_event.vote.is_approval,
                vote_event.vote.voting_power
            )
        };
        Box::new(logger)
    }
}

impl Logger for ApproveMilestoneEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |approve_milestone_event: &ApproveMilestoneEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                APPROVE_MILESTONE,
                approve_milestone_event.timestamp,
                approve_milestone_event.milestone,
                approve_milestone_event.amount,
                approve_milestone_event.executed_by,
                first_seven_base64_chars(approve_milestone_event.settlement_reference.bytes()),
                milestone_or_dash(
                    approve_milestone_event
                        .next_milestone
                        .map(|milestone| milestone.to_string())
                )
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectMilestoneEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_milestone_event: &RejectMilestoneEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                REJECT_MILESTONE,
                reject_milestone_event.timestamp,
                reject_milestone_event.milestone,
                reject_milestone_event.executed_by,
                reject_milestone_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for ExpireMilestoneEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |expire_milestone_event: &ExpireMilestoneEvent| {
            log::info!(
                "{}, {}, {}, {}",
                EXPIRE_MILESTONE,
                expire_milestone_event.timestamp,
                expire_milestone_event.milestone,
                expire_milestone_event.deadline
            )
        };
        Box::new(logger)
    }
}

impl Logger for SettlementFailedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |settlement_failed_event: &SettlementFailedEvent| {
            log::warn!(
                "{}, {}, {}, {}, {:?}, {:?}",
                SETTLEMENT_FAILED,
                settlement_failed_event.timestamp,
                settlement_failed_event.milestone,
                settlement_failed_event.attempts,
                settlement_failed_event.error.kind,
                settlement_failed_event.error.message
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartSweepEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_sweep_event: &StartSweepEvent| {
            log::info!("{}, {}", START_SWEEP, start_sweep_event.timestamp)
        };
        Box::new(logger)
    }
}

impl Logger for EndSweepEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |end_sweep_event: &EndSweepEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                END_SWEEP,
                end_sweep_event.timestamp,
                end_sweep_event.released,
                end_sweep_event.rejected,
                end_sweep_event.expired,
                end_sweep_event.deferred,
                end_sweep_event.failed
            )
        };
        Box::new(logger)
    }
}

impl Logger for SkipSweepEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |skip_sweep_event: &SkipSweepEvent| {
            log::info!("{}, {}", SKIP_SWEEP, skip_sweep_event.timestamp)
        };
        Box::new(logger)
    }
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn milestone_or_dash(milestone: Option<String>) -> String {
    milestone.unwrap_or_else(|| String::from("-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviates_long_values_only() {
        assert_eq!(first_seven_base64_chars(b"0x9f2c81aa"), "MHg5ZjJ");
        assert_eq!(first_seven_base64_chars(b"ab"), "YWI");
    }
}
