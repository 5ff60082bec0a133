//! Fakes for the collaborators of the escrow core, and helpers that put campaigns into known states.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    time::Duration,
};

use milestone_escrow::{
    collaborators::{Clock, Identity, RefreshSignal, ReleaseRequest, Role, SettlementError, SettlementLayer},
    engine::MilestoneEngine,
    error::EscrowError,
    escrow_store::pluggables::KVStore,
    milestones::funding::{ContributionReceipt, ContributionRequest},
    platform::{Configuration, Platform, PlatformSpec},
    types::{
        basic::{Amount, CampaignID, MilestoneID, SettlementReference, Timestamp, UserID},
        milestone::{Evidence, Milestone, NewMilestone},
    },
};

use super::mem_db::MemDB;

pub(crate) const GENESIS: u64 = 1_700_000_000;
pub(crate) const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// A clock that only moves when told to. Clones share the same time.
#[derive(Clone)]
pub(crate) struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub(crate) fn new(secs: u64) -> Self {
        ManualClock(Arc::new(AtomicU64::new(secs)))
    }

    pub(crate) fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_secs(self.0.load(Ordering::SeqCst))
    }
}

/// A settlement layer that succeeds unless told to fail the next release, and records every request it
/// gets. Clones share the same script and records.
#[derive(Clone, Default)]
pub(crate) struct ScriptedSettlement(Arc<Mutex<SettlementScript>>);

#[derive(Default)]
struct SettlementScript {
    failures: VecDeque<SettlementError>,
    releases: Vec<ReleaseRequest>,
    voting_opened: Vec<MilestoneID>,
    fail_open_voting: bool,
}

impl ScriptedSettlement {
    /// Make the next `times` release attempts fail with `error`.
    pub(crate) fn fail_next(&self, times: usize, error: SettlementError) {
        let mut script = self.0.lock().unwrap();
        for _ in 0..times {
            script.failures.push_back(error.clone());
        }
    }

    pub(crate) fn fail_open_voting(&self) {
        self.0.lock().unwrap().fail_open_voting = true;
    }

    pub(crate) fn releases(&self) -> Vec<ReleaseRequest> {
        self.0.lock().unwrap().releases.clone()
    }

    pub(crate) fn voting_opened(&self) -> Vec<MilestoneID> {
        self.0.lock().unwrap().voting_opened.clone()
    }
}

impl SettlementLayer for ScriptedSettlement {
    fn open_voting(&self, milestone: &Milestone) -> Result<(), SettlementError> {
        let mut script = self.0.lock().unwrap();
        script.voting_opened.push(milestone.id);
        if script.fail_open_voting {
            return Err(SettlementError::transient("contract unreachable"));
        }
        Ok(())
    }

    fn release(&self, request: &ReleaseRequest) -> Result<SettlementReference, SettlementError> {
        let mut script = self.0.lock().unwrap();
        script.releases.push(request.clone());
        match script.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(settled_reference(request.milestone)),
        }
    }
}

pub(crate) fn settled_reference(milestone: MilestoneID) -> SettlementReference {
    SettlementReference::new(format!("0xsettled{}m{}", milestone.campaign.int(), milestone.order))
}

/// A settlement layer whose releases block until the test lets them through.
pub(crate) struct BlockingSettlement {
    entered: Mutex<Sender<MilestoneID>>,
    gate: Mutex<Receiver<()>>,
}

impl BlockingSettlement {
    /// Returns the settlement layer, a receiver that gets every milestone whose release has started, and
    /// a sender that lets one blocked release through per message.
    pub(crate) fn new() -> (BlockingSettlement, Receiver<MilestoneID>, Sender<()>) {
        let (entered, entered_receiver) = mpsc::channel();
        let (gate_opener, gate) = mpsc::channel();
        let settlement = BlockingSettlement {
            entered: Mutex::new(entered),
            gate: Mutex::new(gate),
        };
        (settlement, entered_receiver, gate_opener)
    }
}

impl SettlementLayer for BlockingSettlement {
    fn open_voting(&self, _milestone: &Milestone) -> Result<(), SettlementError> {
        Ok(())
    }

    fn release(&self, request: &ReleaseRequest) -> Result<SettlementReference, SettlementError> {
        let _ = self.entered.lock().unwrap().send(request.milestone);
        self.gate
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| SettlementError::transient("test ended"))?;
        Ok(settled_reference(request.milestone))
    }
}

/// A refresh signal that records every user it is fired for, and optionally fails.
#[derive(Clone, Default)]
pub(crate) struct RecordingRefresh {
    refreshed: Arc<Mutex<Vec<UserID>>>,
    fail: bool,
}

impl RecordingRefresh {
    pub(crate) fn failing() -> Self {
        RecordingRefresh {
            refreshed: Arc::default(),
            fail: true,
        }
    }

    pub(crate) fn refreshed(&self) -> Vec<UserID> {
        self.refreshed.lock().unwrap().clone()
    }
}

impl RefreshSignal for RecordingRefresh {
    fn refresh(&self, user: UserID) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.refreshed.lock().unwrap().push(user);
        if self.fail {
            return Err("recommendation service unavailable".into());
        }
        Ok(())
    }
}

/// The configuration used by most tests: the scheduler never fires on its own during a test, and failed
/// releases are retried without waiting.
pub(crate) fn test_configuration() -> Configuration {
    Configuration::builder()
        .sweep_interval(Duration::from_secs(24 * 60 * 60))
        .settlement_retry_backoff(Duration::ZERO)
        .build()
}

/// A platform on top of a fresh [`MemDB`], with a manual clock and a scripted settlement layer.
pub(crate) struct TestPlatform {
    pub(crate) platform: Platform<MemDB>,
    pub(crate) kv_store: MemDB,
    pub(crate) clock: ManualClock,
    pub(crate) settlement: ScriptedSettlement,
}

impl TestPlatform {
    pub(crate) fn start() -> Self {
        Self::start_with(test_configuration())
    }

    pub(crate) fn start_with(configuration: Configuration) -> Self {
        let kv_store = MemDB::new();
        let clock = ManualClock::new(GENESIS);
        let settlement = ScriptedSettlement::default();
        let platform = start_instance(&kv_store, &clock, configuration, settlement.clone());
        TestPlatform {
            platform,
            kv_store,
            clock,
            settlement,
        }
    }

    pub(crate) fn engine(&self) -> &MilestoneEngine<MemDB> {
        self.platform.engine()
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }
}

/// Start a platform on `kv_store`, as one of possibly several instances sharing it and `clock`.
pub(crate) fn start_instance(
    kv_store: &MemDB,
    clock: &ManualClock,
    configuration: Configuration,
    settlement: impl SettlementLayer + 'static,
) -> Platform<MemDB> {
    PlatformSpec::builder()
        .kv_store(kv_store.clone())
        .configuration(configuration)
        .settlement(settlement)
        .clock(clock.clone())
        .build()
        .start()
}

pub(crate) fn creator() -> Identity {
    Identity::new(UserID::new(1), Role::Creator)
}

pub(crate) fn admin() -> Identity {
    Identity::new(UserID::new(2), Role::Admin)
}

pub(crate) fn backer(n: u64) -> Identity {
    Identity::new(UserID::new(100 + n), Role::User)
}

/// Milestones `1..=amounts.len()` with the given amounts, all due `deadline`.
pub(crate) fn plan(amounts: &[u64], deadline: Timestamp) -> Vec<NewMilestone> {
    amounts
        .iter()
        .enumerate()
        .map(|(i, amount)| NewMilestone {
            order: i as u32 + 1,
            title: format!("Milestone {}", i + 1),
            description: format!("Deliver part {} of the project", i + 1),
            amount: Amount::new(*amount),
            deadline,
            proof_requirements: None,
            settlement_index: Some(i as u32),
        })
        .collect()
}

/// Register a campaign with `target` as its target amount and `amounts` as its milestones, due thirty
/// days from now.
pub(crate) fn setup_campaign<K: KVStore>(
    engine: &MilestoneEngine<K>,
    target: u64,
    amounts: &[u64],
    now: Timestamp,
) -> CampaignID {
    let campaign = engine
        .register_campaign(Some(&creator()), Amount::new(target))
        .unwrap()
        .id;
    engine
        .create_milestones(Some(&creator()), campaign, plan(amounts, now + DAY * 30))
        .unwrap();
    campaign
}

pub(crate) fn contribute<K: KVStore>(
    engine: &MilestoneEngine<K>,
    backer: &Identity,
    campaign: CampaignID,
    amount: u64,
) -> Result<ContributionReceipt, EscrowError> {
    static NEXT_REFERENCE: AtomicU64 = AtomicU64::new(0);
    let reference = NEXT_REFERENCE.fetch_add(1, Ordering::SeqCst);
    engine.contribute(
        Some(backer),
        campaign,
        ContributionRequest {
            amount: Amount::new(amount),
            reward_tier: None,
            settlement_reference: SettlementReference::new(format!("0xdeposit{}", reference)),
        },
    )
}

pub(crate) fn evidence() -> Evidence {
    Evidence {
        description: "Prototype shipped to every backer".to_string(),
        files: vec!["prototype.pdf".to_string()],
        links: vec!["https://example.org/demo".to_string()],
    }
}

/// Submit evidence for a fully funded `milestone` and open voting on it.
pub(crate) fn submit_and_open_voting<K: KVStore>(engine: &MilestoneEngine<K>, milestone: MilestoneID) {
    engine
        .submit_milestone(Some(&creator()), milestone, evidence(), None)
        .unwrap();
    engine.open_voting(Some(&admin()), milestone).unwrap();
}
