/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Milestones: how they are created, funded, reviewed, and settled.
//!
//! ## Funding
//!
//! Contributions to a campaign that [tracks milestone funding](crate::types::campaign::Campaign::tracks_milestone_funding)
//! are credited to its active milestone, up to that milestone's amount. The contribution that fills the
//! active milestone flips it to [`Funded`](crate::types::milestone::FundingState::Funded), at which point
//! the creator can submit evidence for it, and the campaign stops accepting contributions until the
//! milestone is approved and the next one becomes active. This is implemented in [`funding`].
//!
//! ## Review
//!
//! Evidence, voting, approval, rejection, and release are implemented in [`state_machine`]. A milestone
//! is approved only once the settlement layer confirms that its funds have moved. If the settlement
//! layer fails, the milestone keeps its review state so that the release can be retried.

pub mod funding;

pub mod state_machine;
