/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Weighted backer voting on milestones.
//!
//! Backers of a campaign vote on each of its milestones once voting on the milestone opens. Votes are
//! weighted by [voting power](tally::voting_power), and aggregated into a [`Tally`](tally::Tally) that
//! decides, through [`Tally::verdict`](tally::Tally::verdict), whether the milestone is released,
//! rejected, or kept open.
//!
//! Finalization happens in three places, all of which go through the same
//! [`check_and_release_milestone`](crate::engine::MilestoneEngine::check_and_release_milestone) logic:
//! 1. Right after a vote that completes the set of backers.
//! 2. When an admin asks for it.
//! 3. In every [sweep](crate::release_scheduler), for milestones whose window has closed.

pub mod engine;

pub mod tally;
