/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pure rules for weighing votes and deciding a milestone's fate.
//!
//! ## Voting power
//!
//! A backer's voting power equals the total amount, in whole currency units, that they contributed to
//! the milestone's campaign. It is computed when the vote is cast and stored with the vote.
//!
//! ## Thresholds
//!
//! - **Approval**: `yes / (yes + no)`, the share of cast voting power that approves.
//! - **Quorum**: `(yes + no) / milestone.amount`, the cast voting power as a share of the milestone's
//!   amount. Quorum can exceed 100% because a backer's power counts everything they contributed to the
//!   campaign, not only what was credited to this milestone.
//!
//! Both comparisons are done in integer arithmetic, so a tally that meets a threshold exactly is never
//! misjudged through rounding.

use crate::types::{
    basic::{Amount, Percent, VotingPower},
    milestone::Milestone,
};

/// Derive a backer's voting power from how much they contributed to the campaign.
pub fn voting_power(contributed: Amount) -> VotingPower {
    VotingPower::new(contributed.int())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Thresholds {
    pub approval: Percent,
    pub quorum: Percent,
}

/// What the votes cast so far say should happen to a milestone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Release,
    Reject,
    /// Keep voting.
    Pending,
}

/// The aggregate of the votes cast on a milestone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tally {
    pub yes: VotingPower,
    pub no: VotingPower,
    pub milestone_amount: Amount,
}

impl Tally {
    pub fn of(milestone: &Milestone) -> Self {
        Self {
            yes: milestone.votes_for,
            no: milestone.votes_against,
            milestone_amount: milestone.amount,
        }
    }

    pub fn total(&self) -> VotingPower {
        self.yes + self.no
    }

    fn total_u128(&self) -> u128 {
        self.yes.int() as u128 + self.no.int() as u128
    }

    /// Zero if no votes have been cast.
    pub fn approval_percentage(&self) -> f64 {
        let total = self.total_u128();
        if total == 0 {
            0.0
        } else {
            self.yes.int() as f64 / total as f64 * 100.0
        }
    }

    pub fn quorum_percentage(&self) -> f64 {
        if self.milestone_amount.is_zero() {
            0.0
        } else {
            self.total_u128() as f64 / self.milestone_amount.int() as f64 * 100.0
        }
    }

    pub fn approval_met(&self, threshold: Percent) -> bool {
        let total = self.total_u128();
        total > 0 && self.yes.int() as u128 * 100 >= threshold.int() as u128 * total
    }

    pub fn quorum_met(&self, threshold: Percent) -> bool {
        self.total_u128() * 100 >= threshold.int() as u128 * self.milestone_amount.int() as u128
    }

    pub fn thresholds_met(&self, thresholds: Thresholds) -> bool {
        self.approval_met(thresholds.approval) && self.quorum_met(thresholds.quorum)
    }

    /// Decide the milestone's fate.
    ///
    /// A milestone is released once both thresholds are met and either every current backer of the
    /// campaign has voted or the voting window has closed. Once the window has closed, a milestone that
    /// does not meet both thresholds is rejected.
    pub fn verdict(&self, thresholds: Thresholds, all_backers_voted: bool, window_closed: bool) -> Verdict {
        let met = self.thresholds_met(thresholds);
        if met && (all_backers_voted || window_closed) {
            Verdict::Release
        } else if window_closed {
            Verdict::Reject
        } else {
            Verdict::Pending
        }
    }

    /// The admin note recorded on a milestone rejected because its window closed without meeting the
    /// thresholds.
    pub fn expiry_note(&self, thresholds: Thresholds) -> String {
        format!(
            "Voting expired: {:.1}% approval (need {}), {:.1}% quorum (need {})",
            self.approval_percentage(),
            thresholds.approval,
            self.quorum_percentage(),
            thresholds.quorum
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: Thresholds = Thresholds {
        approval: Percent::DEFAULT_THRESHOLD,
        quorum: Percent::DEFAULT_THRESHOLD,
    };

    fn tally(yes: u64, no: u64, amount: u64) -> Tally {
        Tally {
            yes: VotingPower::new(yes),
            no: VotingPower::new(no),
            milestone_amount: Amount::new(amount),
        }
    }

    #[test]
    fn voting_power_is_dollar_for_dollar() {
        assert_eq!(voting_power(Amount::new(100)), VotingPower::new(100));
        assert_eq!(voting_power(Amount::new(1)), VotingPower::new(1));
    }

    #[test]
    fn sole_backer_approving_releases_early() {
        let tally = tally(100, 0, 100);
        assert_eq!(tally.approval_percentage(), 100.0);
        assert_eq!(tally.quorum_percentage(), 100.0);
        assert_eq!(tally.verdict(CANONICAL, true, false), Verdict::Release);
        assert_eq!(tally.verdict(CANONICAL, false, false), Verdict::Pending);
    }

    #[test]
    fn thresholds_are_inclusive() {
        assert!(tally(60, 40, 100).thresholds_met(CANONICAL));
        assert!(!tally(59, 41, 100).approval_met(CANONICAL.approval));
        assert!(tally(36, 24, 100).quorum_met(CANONICAL.quorum));
        assert!(!tally(35, 24, 100).quorum_met(CANONICAL.quorum));
    }

    #[test]
    fn closed_window_forces_a_decision() {
        assert_eq!(tally(0, 100, 100).verdict(CANONICAL, true, true), Verdict::Reject);
        assert_eq!(tally(0, 0, 100).verdict(CANONICAL, false, true), Verdict::Reject);
        assert_eq!(tally(70, 0, 100).verdict(CANONICAL, false, true), Verdict::Release);
        // Approval met but quorum missed.
        assert_eq!(tally(50, 0, 100).verdict(CANONICAL, false, true), Verdict::Reject);
    }

    #[test]
    fn unanimous_vote_below_quorum_keeps_voting() {
        assert_eq!(tally(30, 0, 100).verdict(CANONICAL, true, false), Verdict::Pending);
    }

    #[test]
    fn no_votes_means_zero_approval() {
        let tally = tally(0, 0, 100);
        assert_eq!(tally.approval_percentage(), 0.0);
        assert!(!tally.approval_met(Percent::new(0).unwrap()));
    }

    #[test]
    fn thresholds_above_one_hundred_percent_are_rejected() {
        assert_eq!(Percent::new(100).map(|percent| percent.int()), Some(100));
        assert_eq!(Percent::new(101), None);
        assert_eq!(Percent::new(150), None);
    }

    #[test]
    fn expiry_note_cites_both_thresholds() {
        assert_eq!(
            tally(0, 100, 100).expiry_note(CANONICAL),
            "Voting expired: 0.0% approval (need 60%), 100.0% quorum (need 60%)"
        );
    }
}
