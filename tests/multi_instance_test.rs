//! Several platforms sharing one key-value store, as several processes sharing one database would.
//! Each platform has its own in-process locks, so only the leases and conditional writes in the store
//! keep them from stepping on each other.

use std::{
    collections::HashSet,
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use log::LevelFilter;
use milestone_escrow::{
    collaborators::Clock,
    engine::MilestoneEngine,
    error::{EscrowError, ValidationError},
    milestones::funding::ContributionRequest,
    platform::Configuration,
    release_scheduler::{SweepReport, SweepResult},
    types::{
        basic::{Amount, CampaignID, MilestoneID, SettlementReference},
        lease::LeaseScope,
        ledger::EscrowTransactionKind,
        milestone::ReviewState,
    },
    voting::engine::Ballot,
};

mod common;

use crate::common::{
    fixtures::{
        admin, backer, contribute, creator, evidence, setup_campaign, start_instance, submit_and_open_voting,
        BlockingSettlement, ManualClock, ScriptedSettlement, GENESIS,
    },
    logging::setup_logger,
    mem_db::MemDB,
};

const PAST_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60 + 1);

/// Instances give up quickly on a lease held by another instance, so that tests do not wait long.
fn impatient_configuration() -> Configuration {
    Configuration::builder()
        .sweep_interval(Duration::from_secs(24 * 60 * 60))
        .settlement_retry_backoff(Duration::ZERO)
        .lease_wait(Duration::from_millis(50))
        .build()
}

fn approve() -> Ballot {
    Ballot {
        is_approval: true,
        comment: None,
    }
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
fn closed_vote_is_released_once_across_instances_test() {
    setup_logger(LevelFilter::Debug);
    let kv_store = MemDB::new();
    let clock = ManualClock::new(GENESIS);
    let (blocking, entered, gate) = BlockingSettlement::new();
    let scripted = ScriptedSettlement::default();
    let first = start_instance(&kv_store, &clock, impatient_configuration(), blocking);
    let second = start_instance(&kv_store, &clock, impatient_configuration(), scripted.clone());
    assert_ne!(first.engine().instance(), second.engine().instance());
    let engine: &MilestoneEngine<MemDB> = first.engine();

    // 1. A closed vote that meets both thresholds, set up through the first instance.
    let campaign = setup_campaign(engine, 300, &[100, 100, 100], clock.now());
    let m1 = MilestoneID::new(campaign, 1);
    contribute(engine, &backer(1), campaign, 60).unwrap();
    contribute(engine, &backer(2), campaign, 40).unwrap();
    submit_and_open_voting(engine, m1);
    engine.cast_vote(Some(&backer(1)), m1, approve()).unwrap();
    clock.advance(PAST_WINDOW);

    // 2. The first instance's sweep gets stuck in the settlement layer.
    let sweeper = {
        let engine = first.engine().clone();
        thread::spawn(move || engine.trigger_sweep(Some(&admin())).unwrap())
    };
    assert_eq!(entered.recv_timeout(Duration::from_secs(5)).unwrap(), m1);

    // 3. The second instance neither sweeps nor finalizes the milestone meanwhile.
    assert_eq!(second.engine().trigger_sweep(Some(&admin())).unwrap(), SweepResult::Skipped);
    match second.engine().check_and_release_milestone(Some(&admin()), m1) {
        Err(err @ EscrowError::Busy(LeaseScope::Campaign(busy))) => {
            assert_eq!(busy, campaign);
            assert!(err.is_transient());
        }
        other => panic!("expected Busy, got {:?}", other.map(|outcome| outcome.status)),
    }

    // 4. Once the first sweep is done, the milestone has been released exactly once.
    gate.send(()).unwrap();
    match sweeper.join().unwrap() {
        SweepResult::Completed(report) => assert_eq!(report.released, vec![m1]),
        SweepResult::Skipped => panic!("the first sweep was skipped"),
    }
    let outcome = second.engine().check_and_release_milestone(Some(&admin()), m1).unwrap();
    assert_eq!(outcome.status, ReviewState::Approved);
    assert_eq!(
        second.engine().trigger_sweep(Some(&admin())).unwrap(),
        SweepResult::Completed(SweepReport::default())
    );
    assert!(scripted.releases().is_empty());
    assert_eq!(releases_recorded(second.engine(), campaign), 1);

    let camera = second.engine().camera();
    let snapshot = camera.snapshot();
    let stored = snapshot.campaign(campaign).unwrap().unwrap();
    assert_eq!(stored.escrow_amount, Amount::zero());
    assert_eq!(stored.released_amount, Amount::new(100));

    // 5. Every lease was given up on the way out.
    assert_eq!(snapshot.lease(LeaseScope::Sweep).unwrap(), None);
    assert_eq!(snapshot.lease(LeaseScope::Campaign(campaign)).unwrap(), None);
}

#[test]
fn stalled_instance_cannot_write_after_losing_its_lease_test() {
    setup_logger(LevelFilter::Debug);
    let kv_store = MemDB::new();
    let clock = ManualClock::new(GENESIS);
    let (blocking, entered, gate) = BlockingSettlement::new();
    let scripted = ScriptedSettlement::default();
    let first = start_instance(&kv_store, &clock, impatient_configuration(), blocking);
    let second = start_instance(&kv_store, &clock, impatient_configuration(), scripted.clone());
    let engine: &MilestoneEngine<MemDB> = first.engine();

    let campaign = setup_campaign(engine, 300, &[100, 100, 100], clock.now());
    let m1 = MilestoneID::new(campaign, 1);
    contribute(engine, &backer(1), campaign, 100).unwrap();
    engine.submit_milestone(Some(&creator()), m1, evidence(), None).unwrap();

    // 1. The first instance stalls while releasing, holding the campaign's lease.
    let stalled = {
        let engine = first.engine().clone();
        thread::spawn(move || engine.approve_milestone(Some(&admin()), m1))
    };
    assert_eq!(entered.recv_timeout(Duration::from_secs(5)).unwrap(), m1);
    let held = second
        .engine()
        .camera()
        .snapshot()
        .lease(LeaseScope::Campaign(campaign))
        .unwrap()
        .unwrap();
    assert_eq!(held.holder, first.engine().instance());
    assert!(held.is_live(clock.now()));

    // 2. After the lease expires, the second instance takes it over and releases the milestone.
    clock.advance(first.engine().configuration().lease_duration + Duration::from_secs(1));
    let approved = second.engine().approve_milestone(Some(&admin()), m1).unwrap();
    assert_eq!(approved.review_state, ReviewState::Approved);
    assert_eq!(scripted.releases().len(), 1);

    // 3. The first instance wakes up, and its approval is refused rather than recorded twice.
    gate.send(()).unwrap();
    let err = stalled.join().unwrap().unwrap_err();
    assert!(matches!(err, EscrowError::Store(_)), "unexpected error: {}", err);
    assert!(err.is_transient());
    assert_eq!(releases_recorded(second.engine(), campaign), 1);

    let camera = second.engine().camera();
    let stored = camera.snapshot().campaign(campaign).unwrap().unwrap();
    assert_eq!(stored.released_amount, Amount::new(100));
    assert_eq!(stored.escrow_transaction_count, 2);
}

#[test]
fn settlement_reference_is_unique_across_instances_test() {
    setup_logger(LevelFilter::Info);
    let kv_store = MemDB::new();
    let clock = ManualClock::new(GENESIS);
    let first = start_instance(&kv_store, &clock, impatient_configuration(), ScriptedSettlement::default());
    let second = start_instance(&kv_store, &clock, impatient_configuration(), ScriptedSettlement::default());
    let engines = [first.engine().clone(), second.engine().clone()];

    // Each instance funds its own campaign, so the campaigns' locks never meet.
    let campaigns = [
        setup_campaign(&*engines[0], 1_000, &[1_000], clock.now()),
        setup_campaign(&*engines[1], 1_000, &[1_000], clock.now()),
    ];

    for round in 0..20 {
        let reference = SettlementReference::new(format!("0xshared{}", round));
        let barrier = Arc::new(Barrier::new(2));
        let contributors: Vec<_> = (0..2)
            .map(|i| {
                let engine = engines[i].clone();
                let campaign = campaigns[i];
                let reference = reference.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    engine.contribute(
                        Some(&backer(i as u64)),
                        campaign,
                        ContributionRequest {
                            amount: Amount::new(1),
                            reward_tier: None,
                            settlement_reference: reference,
                        },
                    )
                })
            })
            .collect();
        let results: Vec<_> = contributors
            .into_iter()
            .map(|contributor| contributor.join().unwrap())
            .collect();

        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1, "round {}", round);
        for result in results {
            if let Err(err) = result {
                assert!(
                    matches!(
                        err,
                        EscrowError::Validation(ValidationError::DuplicateSettlementReference { .. })
                    ),
                    "round {}: unexpected error: {}",
                    round,
                    err
                );
            }
        }
    }

    let camera = engines[0].camera();
    let snapshot = camera.snapshot();
    let recorded: u64 = campaigns
        .iter()
        .map(|campaign| snapshot.campaign(*campaign).unwrap().unwrap().contribution_count)
        .sum();
    assert_eq!(recorded, 20);
}

#[test]
fn campaign_ids_are_unique_across_instances_test() {
    setup_logger(LevelFilter::Info);
    let kv_store = MemDB::new();
    let clock = ManualClock::new(GENESIS);
    let first = start_instance(&kv_store, &clock, impatient_configuration(), ScriptedSettlement::default());
    let second = start_instance(&kv_store, &clock, impatient_configuration(), ScriptedSettlement::default());

    let barrier = Arc::new(Barrier::new(2));
    let registrars: Vec<_> = [first.engine().clone(), second.engine().clone()]
        .into_iter()
        .map(|engine| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                (0..25)
                    .map(|_| engine.register_campaign(Some(&creator()), Amount::new(100)).unwrap().id)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let ids: Vec<CampaignID> = registrars
        .into_iter()
        .flat_map(|registrar| registrar.join().unwrap())
        .collect();
    let unique: HashSet<CampaignID> = ids.iter().copied().collect();
    assert_eq!(unique.len(), 50);
    assert_eq!(unique, (1..=50).map(CampaignID::new).collect::<HashSet<_>>());

    let camera = first.engine().camera();
    assert_eq!(camera.snapshot().campaign_count().unwrap(), 50);
}

#[test]
fn same_backer_voting_through_two_instances_is_counted_once_test() {
    setup_logger(LevelFilter::Info);
    let kv_store = MemDB::new();
    let clock = ManualClock::new(GENESIS);
    let first = start_instance(&kv_store, &clock, Configuration::default(), ScriptedSettlement::default());
    let second = start_instance(&kv_store, &clock, Configuration::default(), ScriptedSettlement::default());
    let engine: &MilestoneEngine<MemDB> = first.engine();

    let campaign = setup_campaign(engine, 300, &[100, 100, 100], clock.now());
    let m1 = MilestoneID::new(campaign, 1);
    contribute(engine, &backer(1), campaign, 30).unwrap();
    contribute(engine, &backer(2), campaign, 70).unwrap();
    submit_and_open_voting(engine, m1);

    let barrier = Arc::new(Barrier::new(2));
    let voters: Vec<_> = [first.engine().clone(), second.engine().clone()]
        .into_iter()
        .map(|engine| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.cast_vote(Some(&backer(1)), m1, approve())
            })
        })
        .collect();
    let results: Vec<_> = voters.into_iter().map(|voter| voter.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|result| matches!(result, Err(EscrowError::AlreadyVoted { .. }))));

    let camera = second.engine().camera();
    let snapshot = camera.snapshot();
    let stored = snapshot.milestone(m1).unwrap().unwrap();
    assert_eq!(stored.votes_for.int(), 30);
    assert_eq!(snapshot.voters(m1).unwrap(), vec![backer(1).user]);
    assert_eq!(stored.review_state, ReviewState::Voting);
}
