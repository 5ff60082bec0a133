/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Read-only queries on campaigns. Each query reads from a single snapshot of the escrow store, and so
//! sees a consistent state even while requests are being processed.
//!
//! Queries on a single milestone's votes are in [`voting::engine`](crate::voting::engine), and the
//! active milestone query is in [`milestones::funding`](crate::milestones::funding).

use crate::{
    collaborators::{Identity, Permission},
    engine::{authenticated, load_campaign, MilestoneEngine},
    error::EscrowError,
    escrow_store::{
        accessors::public::{ContributionStats, MilestoneStats},
        invariants::{self, MilestoneRequirements},
        pluggables::KVStore,
    },
    types::{
        basic::CampaignID,
        ledger::{EscrowTransaction, Vote},
        milestone::Milestone,
    },
};

impl<K: KVStore> MilestoneEngine<K> {
    /// Check `campaign`'s milestones against every structural requirement, without changing anything.
    ///
    /// Unlike milestone creation, this also checks that campaigns at or above the milestone threshold
    /// have at least the minimum number of milestones.
    pub fn validate_milestone_requirements(&self, campaign: CampaignID) -> Result<MilestoneRequirements, EscrowError> {
        let camera = self.camera();
        let snapshot = camera.snapshot();
        let campaign = load_campaign(&snapshot, campaign)?;
        let milestones = snapshot.milestones(&campaign)?;
        Ok(invariants::milestone_requirements(
            &campaign,
            &milestones,
            self.config.milestone_threshold,
            self.config.minimum_milestones,
        ))
    }

    /// Get every milestone of `campaign`, in order.
    pub fn milestones(&self, campaign: CampaignID) -> Result<Vec<Milestone>, EscrowError> {
        let camera = self.camera();
        let snapshot = camera.snapshot();
        let campaign = load_campaign(&snapshot, campaign)?;
        Ok(snapshot.milestones(&campaign)?)
    }

    pub fn milestone_stats(&self, campaign: CampaignID) -> Result<MilestoneStats, EscrowError> {
        let camera = self.camera();
        let snapshot = camera.snapshot();
        let campaign = load_campaign(&snapshot, campaign)?;
        Ok(snapshot.milestone_stats(&campaign)?)
    }

    pub fn contribution_stats(&self, campaign: CampaignID) -> Result<ContributionStats, EscrowError> {
        let camera = self.camera();
        let snapshot = camera.snapshot();
        let campaign = load_campaign(&snapshot, campaign)?;
        Ok(snapshot.contribution_stats(&campaign)?)
    }

    /// Get every vote the caller has cast, across all campaigns, newest first.
    pub fn user_votes(&self, caller: Option<&Identity>) -> Result<Vec<Vote>, EscrowError> {
        let caller = authenticated(caller)?;
        let camera = self.camera();
        let snapshot = camera.snapshot();
        Ok(snapshot.votes_by(caller.user)?)
    }

    /// Get `campaign`'s escrow ledger, oldest entry first. Only the campaign's creator and holders of
    /// the `ViewEscrowLedger` permission may see it.
    pub fn escrow_ledger(
        &self,
        caller: Option<&Identity>,
        campaign: CampaignID,
    ) -> Result<Vec<EscrowTransaction>, EscrowError> {
        let caller = authenticated(caller)?;
        let camera = self.camera();
        let snapshot = camera.snapshot();
        let campaign = load_campaign(&snapshot, campaign)?;
        if !campaign.is_creator(caller.user) && !self.permissions.has_permission(caller, Permission::ViewEscrowLedger) {
            return Err(EscrowError::forbidden("only the campaign creator or an admin can view the escrow ledger"));
        }
        Ok(snapshot.escrow_transactions(&campaign)?)
    }
}
