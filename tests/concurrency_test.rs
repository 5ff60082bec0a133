//! Many request threads on one engine at once: contributions racing for the last of a milestone's
//! headroom, a backer's ballots racing each other, and the finalization paths racing each other.

use std::{
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use log::LevelFilter;
use milestone_escrow::{
    engine::MilestoneEngine,
    error::{EscrowError, ValidationError},
    release_scheduler::SweepResult,
    types::{
        basic::{Amount, CampaignID, MilestoneID},
        ledger::EscrowTransactionKind,
        milestone::{FundingState, ReviewState},
    },
    voting::engine::Ballot,
};

mod common;

use crate::common::{
    fixtures::{admin, backer, contribute, creator, setup_campaign, submit_and_open_voting, TestPlatform},
    logging::setup_logger,
    mem_db::MemDB,
};

const PAST_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60 + 1);

fn approve() -> Ballot {
    Ballot {
        is_approval: true,
        comment: None,
    }
}

/// Run `f(i)` on `n` threads that all start at the same time, and collect what each returned.
fn race<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(n));
    let f = Arc::new(f);
    let racers: Vec<_> = (0..n)
        .map(|i| {
            let barrier = barrier.clone();
            let f = f.clone();
            thread::spawn(move || {
                barrier.wait();
                f(i)
            })
        })
        .collect();
    racers.into_iter().map(|racer| racer.join().unwrap()).collect()
}

fn releases_recorded(engine: &MilestoneEngine<MemDB>, campaign: CampaignID) -> usize {
    engine
        .escrow_ledger(Some(&creator()), campaign)
        .unwrap()
        .iter()
        .filter(|transaction| transaction.kind == EscrowTransactionKind::Release)
        .count()
}

#[test]
fn racing_contributions_fill_milestone_exactly_once_test() {
    setup_logger(LevelFilter::Info);
    let test = TestPlatform::start();
    let engine = test.platform.engine().clone();
    let campaign = setup_campaign(&*engine, 300, &[100, 100, 100], test.now());
    let m1 = MilestoneID::new(campaign, 1);

    // Eight backers try to put $25 each into a $100 milestone.
    let results = {
        let engine = engine.clone();
        race(8, move |i| contribute(&*engine, &backer(i as u64), campaign, 25))
    };

    let receipts: Vec<_> = results.iter().filter_map(|result| result.as_ref().ok()).collect();
    assert_eq!(receipts.len(), 4);
    let flips = receipts
        .iter()
        .filter(|receipt| receipt.milestone.as_ref().unwrap().funding_state == FundingState::Funded)
        .count();
    assert_eq!(flips, 1);
    for result in &results {
        if let Err(err) = result {
            assert!(
                matches!(
                    err,
                    EscrowError::Validation(ValidationError::MilestoneFullyFunded { milestone }) if *milestone == m1
                ),
                "unexpected error: {}",
                err
            );
        }
    }

    let camera = engine.camera();
    let snapshot = camera.snapshot();
    let milestone = snapshot.milestone(m1).unwrap().unwrap();
    assert_eq!(milestone.current_amount, Amount::new(100));
    assert_eq!(milestone.funding_state, FundingState::Funded);
    let stored = snapshot.campaign(campaign).unwrap().unwrap();
    assert_eq!(stored.current_amount, Amount::new(100));
    assert_eq!(stored.escrow_amount, Amount::new(100));
    assert_eq!(stored.contribution_count, 4);
}

#[test]
fn racing_contributions_never_overfill_milestone_test() {
    setup_logger(LevelFilter::Info);
    let test = TestPlatform::start();
    let engine = test.platform.engine().clone();
    let campaign = setup_campaign(&*engine, 300, &[100, 100, 100], test.now());
    let m1 = MilestoneID::new(campaign, 1);

    // $30 fits three times into $100, and the $10 left over fits no fourth.
    let results = {
        let engine = engine.clone();
        race(6, move |i| contribute(&*engine, &backer(i as u64), campaign, 30))
    };

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 3);
    for result in &results {
        match result {
            Ok(receipt) => assert_eq!(receipt.milestone.as_ref().unwrap().funding_state, FundingState::Active),
            Err(EscrowError::Validation(ValidationError::ExceedsMilestoneGoal { milestone, remaining })) => {
                assert_eq!(*milestone, m1);
                assert_eq!(*remaining, Amount::new(10));
            }
            Err(err) => panic!("unexpected error: {}", err),
        }
    }

    let camera = engine.camera();
    let milestone = camera.snapshot().milestone(m1).unwrap().unwrap();
    assert_eq!(milestone.current_amount, Amount::new(90));
    assert!(milestone.current_amount <= milestone.amount);
}

#[test]
fn racing_ballots_from_one_backer_count_once_test() {
    setup_logger(LevelFilter::Info);
    let test = TestPlatform::start();
    let engine = test.platform.engine().clone();
    let campaign = setup_campaign(&*engine, 300, &[100, 100, 100], test.now());
    let m1 = MilestoneID::new(campaign, 1);
    contribute(&*engine, &backer(1), campaign, 40).unwrap();
    contribute(&*engine, &backer(2), campaign, 60).unwrap();
    submit_and_open_voting(&*engine, m1);

    let results = {
        let engine = engine.clone();
        race(2, move |_| engine.cast_vote(Some(&backer(1)), m1, approve()))
    };

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results.iter().any(|result| matches!(
        result,
        Err(EscrowError::AlreadyVoted { milestone, voter }) if *milestone == m1 && *voter == backer(1).user
    )));

    let camera = engine.camera();
    let snapshot = camera.snapshot();
    let milestone = snapshot.milestone(m1).unwrap().unwrap();
    assert_eq!(milestone.votes_for.int(), 40);
    assert_eq!(milestone.votes_against.int(), 0);
    assert_eq!(snapshot.voters(m1).unwrap(), vec![backer(1).user]);
}

#[test]
fn vote_triggered_finalize_racing_sweep_releases_once_test() {
    setup_logger(LevelFilter::Info);
    let test = TestPlatform::start();
    let engine = test.platform.engine().clone();
    let campaign = setup_campaign(&*engine, 300, &[100, 100, 100], test.now());
    let m1 = MilestoneID::new(campaign, 1);
    contribute(&*engine, &backer(1), campaign, 60).unwrap();
    contribute(&*engine, &backer(2), campaign, 40).unwrap();
    submit_and_open_voting(&*engine, m1);
    engine.cast_vote(Some(&backer(1)), m1, approve()).unwrap();

    // The last backer's vote finalizes the milestone, while an admin asks for the same and a sweep
    // runs. Whoever gets the campaign's lock after the vote releases; everyone else finds it settled.
    let results = {
        let engine = engine.clone();
        race(3, move |i| match i {
            0 => engine
                .cast_vote(Some(&backer(2)), m1, approve())
                .map(|receipt| receipt.outcome.map(|outcome| outcome.status)),
            1 => engine
                .check_and_release_milestone(Some(&admin()), m1)
                .map(|outcome| Some(outcome.status)),
            _ => engine.trigger_sweep(Some(&admin())).map(|result| match result {
                SweepResult::Completed(report) => {
                    assert!(report.failed.is_empty());
                    None
                }
                SweepResult::Skipped => None,
            }),
        })
    };
    for result in &results {
        assert!(result.is_ok(), "unexpected error: {}", result.as_ref().unwrap_err());
    }

    let camera = engine.camera();
    let milestone = camera.snapshot().milestone(m1).unwrap().unwrap();
    assert_eq!(milestone.review_state, ReviewState::Approved);
    assert_eq!(test.settlement.releases().len(), 1);
    assert_eq!(releases_recorded(&engine, campaign), 1);
}

#[test]
fn finalize_racing_sweeps_after_window_releases_once_test() {
    setup_logger(LevelFilter::Info);
    let test = TestPlatform::start();
    let engine = test.platform.engine().clone();
    let campaign = setup_campaign(&*engine, 300, &[100, 100, 100], test.now());
    let m1 = MilestoneID::new(campaign, 1);
    contribute(&*engine, &backer(1), campaign, 60).unwrap();
    contribute(&*engine, &backer(2), campaign, 40).unwrap();
    submit_and_open_voting(&*engine, m1);
    engine.cast_vote(Some(&backer(1)), m1, approve()).unwrap();
    test.clock.advance(PAST_WINDOW);

    let results = {
        let engine = engine.clone();
        race(4, move |i| {
            if i % 2 == 0 {
                engine.trigger_sweep(Some(&admin())).map(|_| ())
            } else {
                engine.check_and_release_milestone(Some(&admin()), m1).map(|_| ())
            }
        })
    };
    for result in &results {
        assert!(result.is_ok(), "unexpected error: {}", result.as_ref().unwrap_err());
    }

    let camera = engine.camera();
    let snapshot = camera.snapshot();
    assert_eq!(
        snapshot.milestone(m1).unwrap().unwrap().review_state,
        ReviewState::Approved
    );
    assert_eq!(
        snapshot.milestone(m1.next()).unwrap().unwrap().funding_state,
        FundingState::Active
    );
    assert_eq!(test.settlement.releases().len(), 1);
    assert_eq!(releases_recorded(&engine, campaign), 1);
}
