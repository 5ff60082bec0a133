use std::{
    thread,
    time::{Duration, Instant},
};

use log::LevelFilter;
use milestone_escrow::{
    collaborators::Clock,
    engine::MilestoneEngine,
    error::{EscrowError, ValidationError},
    milestones::funding::ContributionRequest,
    platform::PlatformSpec,
    types::{
        basic::{Amount, MilestoneID, RewardTierID, SettlementReference},
        ledger::{EscrowTransactionKind, Executor},
        milestone::FundingState,
    },
};

mod common;

use crate::common::{
    fixtures::{
        admin, backer, contribute, creator, setup_campaign, test_configuration, ManualClock, RecordingRefresh,
        TestPlatform, GENESIS,
    },
    logging::setup_logger,
    mem_db::MemDB,
};

#[test]
fn over_contribution_is_rejected_with_headroom_test() {
    setup_logger(LevelFilter::Debug);
    let test = TestPlatform::start();
    let engine = test.engine();
    let campaign = setup_campaign(engine, 300, &[100, 100, 100], test.now());
    let m1 = MilestoneID::new(campaign, 1);

    contribute(engine, &backer(1), campaign, 60).unwrap();
    let before = test.kv_store.dump();

    // 1. $50 does not fit in the $40 left.
    let err = contribute(engine, &backer(2), campaign, 50).unwrap_err();
    match &err {
        EscrowError::Validation(ValidationError::ExceedsMilestoneGoal { milestone, remaining }) => {
            assert_eq!(*milestone, m1);
            assert_eq!(*remaining, Amount::new(40));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(err.to_string(), "this would exceed the milestone goal, max allowed is $40");

    // 2. Nothing was written.
    assert_eq!(test.kv_store.dump(), before);

    // 3. Exactly $40 fits, and fills the milestone.
    let receipt = contribute(engine, &backer(2), campaign, 40).unwrap();
    assert_eq!(receipt.milestone.unwrap().funding_state, FundingState::Funded);

    // 4. A funded milestone takes no more until it is approved.
    let err = contribute(engine, &backer(3), campaign, 1).unwrap_err();
    assert!(matches!(
        err,
        EscrowError::Validation(ValidationError::MilestoneFullyFunded { milestone }) if milestone == m1
    ));
}

#[test]
fn contribution_is_recorded_atomically_test() {
    setup_logger(LevelFilter::Debug);
    let test = TestPlatform::start();
    let engine = test.engine();
    let campaign = setup_campaign(engine, 300, &[100, 100, 100], test.now());

    let receipt = engine
        .contribute(
            Some(&backer(1)),
            campaign,
            ContributionRequest {
                amount: Amount::new(25),
                reward_tier: Some(RewardTierID::new(7)),
                settlement_reference: SettlementReference::new("0xabc"),
            },
        )
        .unwrap();
    assert_eq!(receipt.contribution.contributor, backer(1).user);
    assert_eq!(receipt.contribution.reward_tier, Some(RewardTierID::new(7)));
    assert_eq!(receipt.contribution.created_at, test.now());
    contribute(engine, &backer(1), campaign, 25).unwrap();
    contribute(engine, &backer(2), campaign, 10).unwrap();

    let camera = engine.camera();
    let snapshot = camera.snapshot();
    let stored = snapshot.campaign(campaign).unwrap().unwrap();
    assert_eq!(stored.current_amount, Amount::new(60));
    assert_eq!(stored.escrow_amount, Amount::new(60));
    assert_eq!(stored.contribution_count, 3);
    assert_eq!(
        snapshot.contributed_amount(campaign, backer(1).user).unwrap(),
        Amount::new(50)
    );
    assert_eq!(
        snapshot.contributors(campaign).unwrap(),
        vec![backer(1).user, backer(2).user]
    );
    assert_eq!(
        snapshot
            .settlement_reference_owner(&SettlementReference::new("0xabc"))
            .unwrap(),
        Some(receipt.contribution.id)
    );
    let m1 = snapshot
        .milestone(MilestoneID::new(campaign, 1))
        .unwrap()
        .unwrap();
    assert_eq!(m1.current_amount, Amount::new(60));
    assert_eq!(m1.funding_state, FundingState::Active);
    drop(snapshot);

    let stats = engine.contribution_stats(campaign).unwrap();
    assert_eq!(stats.total_amount, Amount::new(60));
    assert_eq!(stats.count, 3);
    assert_eq!(stats.average_amount, Amount::new(20));
    assert_eq!(stats.unique_backers, 2);

    // Every contribution has a matching deposit in the ledger.
    let ledger = engine.escrow_ledger(Some(&admin()), campaign).unwrap();
    assert_eq!(ledger.len(), 3);
    assert!(ledger
        .iter()
        .all(|transaction| transaction.kind == EscrowTransactionKind::Deposit));
    assert_eq!(ledger[0].executed_by, Executor::User(backer(1).user));
    assert_eq!(ledger[0].settlement_reference, Some(SettlementReference::new("0xabc")));
    assert_eq!(ledger[2].amount, Amount::new(10));
}

#[test]
fn contribution_rejections_test() {
    setup_logger(LevelFilter::Debug);
    let test = TestPlatform::start();
    let engine = test.engine();
    let campaign = setup_campaign(engine, 300, &[100, 100, 100], test.now());
    let other = setup_campaign(engine, 300, &[100, 100, 100], test.now());

    // Not logged in.
    assert!(matches!(
        contribute(engine, &backer(1), campaign, 0),
        Err(EscrowError::Validation(ValidationError::ZeroContribution))
    ));
    assert!(matches!(
        engine.contribute(
            None,
            campaign,
            ContributionRequest {
                amount: Amount::new(10),
                reward_tier: None,
                settlement_reference: SettlementReference::new("0xanon"),
            },
        ),
        Err(EscrowError::Unauthorized)
    ));

    // Creators cannot back their own campaign.
    assert!(matches!(
        contribute(engine, &creator(), campaign, 10),
        Err(EscrowError::Forbidden { .. })
    ));

    // A settlement reference funds at most one contribution, across every campaign.
    let request = ContributionRequest {
        amount: Amount::new(10),
        reward_tier: None,
        settlement_reference: SettlementReference::new("0xfeed"),
    };
    engine
        .contribute(Some(&backer(1)), campaign, request.clone())
        .unwrap();
    assert!(matches!(
        engine.contribute(Some(&backer(2)), other, request.clone()),
        Err(EscrowError::Validation(ValidationError::DuplicateSettlementReference { .. }))
    ));
    assert!(matches!(
        engine.contribute(Some(&backer(1)), campaign, request),
        Err(EscrowError::Validation(ValidationError::DuplicateSettlementReference { .. }))
    ));
    let camera = engine.camera();
    assert_eq!(
        camera.snapshot().campaign(other).unwrap().unwrap().current_amount,
        Amount::zero()
    );
}

#[test]
fn campaigns_without_milestones_test() {
    setup_logger(LevelFilter::Debug);
    let test = TestPlatform::start();
    let engine = test.engine();

    // A small campaign without milestones takes contributions freely.
    let small = engine
        .register_campaign(Some(&creator()), Amount::new(200))
        .unwrap();
    assert!(!small.requires_milestones);
    let receipt = contribute(engine, &backer(1), small.id, 150).unwrap();
    assert_eq!(receipt.milestone, None);
    assert_eq!(engine.active_milestone(small.id).unwrap(), None);

    // A large campaign takes nothing until it has milestones.
    let large = engine
        .register_campaign(Some(&creator()), Amount::new(1_000))
        .unwrap();
    assert!(large.requires_milestones);
    assert!(matches!(
        contribute(engine, &backer(1), large.id, 10),
        Err(EscrowError::Validation(ValidationError::NoActiveMilestone { .. }))
    ));

    assert!(matches!(
        engine.register_campaign(Some(&creator()), Amount::zero()),
        Err(EscrowError::Validation(ValidationError::ZeroTarget))
    ));
}

#[test]
fn escrow_ledger_visibility_test() {
    setup_logger(LevelFilter::Debug);
    let test = TestPlatform::start();
    let engine = test.engine();
    let campaign = setup_campaign(engine, 300, &[100, 100, 100], test.now());
    contribute(engine, &backer(1), campaign, 10).unwrap();

    assert_eq!(engine.escrow_ledger(Some(&creator()), campaign).unwrap().len(), 1);
    assert_eq!(engine.escrow_ledger(Some(&admin()), campaign).unwrap().len(), 1);
    assert!(matches!(
        engine.escrow_ledger(Some(&backer(1)), campaign),
        Err(EscrowError::Forbidden { .. })
    ));
    assert!(matches!(
        engine.escrow_ledger(None, campaign),
        Err(EscrowError::Unauthorized)
    ));
}

#[test]
fn refresh_signal_test() {
    setup_logger(LevelFilter::Debug);

    // 1. The refresh signal is fired for every contributor, off the request path.
    let refresh = RecordingRefresh::default();
    let clock = ManualClock::new(GENESIS);
    let platform = PlatformSpec::builder()
        .kv_store(MemDB::new())
        .configuration(test_configuration())
        .clock(clock.clone())
        .refresh_signal(refresh.clone())
        .build()
        .start();
    let engine: &MilestoneEngine<MemDB> = platform.engine();
    let campaign = setup_campaign(engine, 300, &[100, 100, 100], clock.now());
    contribute(engine, &backer(1), campaign, 10).unwrap();
    contribute(engine, &backer(2), campaign, 10).unwrap();
    wait_until(|| refresh.refreshed().len() == 2);
    assert_eq!(refresh.refreshed(), vec![backer(1).user, backer(2).user]);

    // 2. A failing refresh signal does not fail the contribution.
    let failing = RecordingRefresh::failing();
    let platform = PlatformSpec::builder()
        .kv_store(MemDB::new())
        .configuration(test_configuration())
        .clock(clock.clone())
        .refresh_signal(failing.clone())
        .build()
        .start();
    let engine: &MilestoneEngine<MemDB> = platform.engine();
    let campaign = setup_campaign(engine, 300, &[100, 100, 100], clock.now());
    contribute(engine, &backer(1), campaign, 10).unwrap();
    wait_until(|| failing.refreshed().len() == 1);
}

fn wait_until(condition: impl Fn() -> bool) {
    let started = Instant::now();
    while !condition() {
        assert!(started.elapsed() < Duration::from_secs(5), "timed out");
        thread::sleep(Duration::from_millis(10));
    }
}
