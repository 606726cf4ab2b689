use roomprint_fingerprint::store::{FingerprintStore, JsonFileStore, MemoryStore};
use roomprint_fingerprint::{
    Aggregator, AggregatorConfig, Collector, FingerprintError, FingerprintSummary, LiveScan, Position,
    PresenceValidator, Result, RoomFingerprint, Sampler, SamplerConfig, TrainingContext, TrainingState,
};
use roomprint_hal::{ReplayScanner, WifiReading};
use std::sync::Arc;
use tokio_test::assert_ok;

const SSID: &str = "College-WiFi";

const FRONT: [i32; 7] = [-45, -43, -47, -41, -49, -44, -46];
const MIDDLE: [i32; 7] = [-55, -53, -57, -51, -59, -54, -56];
const BACK: [i32; 7] = [-65, -63, -67, -61, -69, -64, -66];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("roomprint_fingerprint=debug")
        .with_test_writer()
        .try_init();
}

fn readings(values: &[i32]) -> Vec<WifiReading> {
    values
        .iter()
        .enumerate()
        .map(|(i, &rssi)| WifiReading::now(SSID, &format!("00:1a:2b:3c:4d:{:02x}", i % 4), rssi))
        .collect()
}

fn classroom() -> ReplayScanner {
    let all: Vec<i32> = FRONT.iter().chain(&MIDDLE).chain(&BACK).copied().collect();
    ReplayScanner::new("classroom", readings(&all))
}

fn collector(store: Arc<dyn FingerprintStore>) -> Collector {
    Collector::new(
        store,
        Sampler::new(SamplerConfig::default()).unwrap(),
        Aggregator::new(AggregatorConfig::default()),
    )
}

#[tokio::test(start_paused = true)]
async fn trained_room_accepts_nearby_and_rejects_distant_scans() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let collector = collector(store.clone());
    let scanner = classroom();

    let mut run = collector
        .training_run(TrainingContext::new("CMD LAB", "Faculty (Multi-Pos)"))
        .unwrap();
    run.begin().unwrap();
    for position in Position::ALL {
        assert_eq!(run.state(), TrainingState::AwaitingPosition(position));
        assert_ok!(run.capture_position(&scanner).await);
    }
    assert_eq!(run.state(), TrainingState::Done);

    let fingerprint = store.get("CMD LAB").unwrap().unwrap();
    assert_eq!(fingerprint.ssid, SSID);
    assert_eq!(fingerprint.stats.sample_count, 21);
    assert_eq!(fingerprint.stats.avg_rssi, -55);
    assert_eq!(fingerprint.stats.variance, 40.27);
    assert_eq!(fingerprint.stats.std_dev, 6.35);
    // floor(-55 - 2 * 6.3456 - 5)
    assert_eq!(fingerprint.stats.min_rssi, -73);
    assert_eq!(fingerprint.stats.trained_positions, Position::ALL.to_vec());
    assert_eq!(fingerprint.num_access_points(), 4);

    let validator = PresenceValidator::new(store);
    assert!(validator.verify("CMD LAB", &LiveScan::new(SSID, -58)).unwrap().is_match());
    let far = validator.verify("CMD LAB", &LiveScan::new(SSID, -90)).unwrap();
    assert_eq!(far.reason().map(|r| r.code()), Some("SIGNAL_TOO_WEAK"));
    let elsewhere = validator.verify("CMD LAB", &LiveScan::new("Guest", -40)).unwrap();
    assert_eq!(elsewhere.reason().map(|r| r.code()), Some("WRONG_NETWORK"));
}

#[tokio::test(start_paused = true)]
async fn failure_at_middle_keeps_previous_fingerprint() {
    init_tracing();
    let path = std::env::temp_dir()
        .join(format!("roomprint-flow-{}", std::process::id()))
        .join("fingerprints.json");
    let store = Arc::new(JsonFileStore::open(&path).unwrap());
    let collector = collector(store.clone());

    collector
        .training_run(TrainingContext::new("CMD LAB", "Faculty"))
        .unwrap()
        .run_to_completion(&classroom())
        .await
        .unwrap();
    let before = store.get("CMD LAB").unwrap().unwrap();
    let on_disk = std::fs::read_to_string(&path).unwrap();

    // front completes, middle runs dry after three readings
    let mut short: Vec<i32> = FRONT.to_vec();
    short.extend_from_slice(&[-70, -71, -72]);
    let scanner = ReplayScanner::new("short", readings(&short));

    let mut run = collector.training_run(TrainingContext::new("CMD LAB", "Faculty")).unwrap();
    run.begin().unwrap();
    run.capture_position(&scanner).await.unwrap();
    let err = run.capture_position(&scanner).await.unwrap_err();

    assert!(matches!(err, FingerprintError::ScanUnavailable(_)));
    assert_eq!(run.state(), TrainingState::Failed);
    assert_eq!(store.get("CMD LAB").unwrap(), Some(before));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), on_disk);

    if let Some(dir) = path.parent() {
        std::fs::remove_dir_all(dir).ok();
    }
}

#[tokio::test(start_paused = true)]
async fn run_for_new_room_writes_nothing_on_failure() {
    let store = Arc::new(MemoryStore::new());
    let collector = collector(store.clone());
    let scanner = ReplayScanner::new("short", readings(&FRONT[..4]));

    let mut run = collector.training_run(TrainingContext::new("HALL", "Faculty")).unwrap();
    assert!(run.run_to_completion(&scanner).await.is_err());
    assert!(store.list().unwrap().is_empty());
}

/// Store whose uploads always fail
struct ReadOnlyStore(MemoryStore);

impl FingerprintStore for ReadOnlyStore {
    fn upload(&self, _: &str, _: &RoomFingerprint) -> Result<()> {
        Err(FingerprintError::Store("read-only".to_string()))
    }
    fn get(&self, room_id: &str) -> Result<Option<RoomFingerprint>> {
        self.0.get(room_id)
    }
    fn list(&self) -> Result<Vec<FingerprintSummary>> {
        self.0.list()
    }
    fn delete(&self, room_id: &str) -> Result<()> {
        self.0.delete(room_id)
    }
}

#[tokio::test(start_paused = true)]
async fn upload_failure_fails_the_run() {
    let collector = collector(Arc::new(ReadOnlyStore(MemoryStore::new())));

    let mut run = collector.training_run(TrainingContext::new("LAB", "Faculty")).unwrap();
    let err = run.run_to_completion(&classroom()).await.unwrap_err();

    assert!(matches!(err, FingerprintError::Store(_)));
    assert_eq!(run.state(), TrainingState::Failed);
    assert!(run.fingerprint().is_none());
    assert!(!collector.is_training("LAB"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_for_one_room_are_single_flight() {
    let collector = collector(Arc::new(MemoryStore::new()));

    let mut first = collector.training_run(TrainingContext::new("LAB", "A")).unwrap();
    first.begin().unwrap();

    let mut second = collector.training_run(TrainingContext::new("LAB", "B")).unwrap();
    let err = second.run_to_completion(&classroom()).await.unwrap_err();
    assert!(matches!(err, FingerprintError::TrainingAlreadyInProgress(_)));

    first.cancel();
    assert_eq!(first.state(), TrainingState::Idle);
    assert!(second.run_to_completion(&classroom()).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn abandoned_capture_leaves_run_resumable_for_cancel() {
    let store = Arc::new(MemoryStore::new());
    let collector = collector(store.clone());
    let scanner = classroom();

    let mut run = collector.training_run(TrainingContext::new("LAB", "Faculty")).unwrap();
    run.begin().unwrap();
    run.capture_position(&scanner).await.unwrap();

    // stop waiting part way through the middle position
    let timed_out = tokio::time::timeout(
        std::time::Duration::from_millis(2000),
        run.capture_position(&scanner),
    )
    .await;
    assert!(timed_out.is_err());
    assert_eq!(run.state(), TrainingState::AwaitingPosition(Position::Middle));
    assert_eq!(run.samples_collected(), 7);

    run.cancel();
    assert_eq!(run.samples_collected(), 0);
    assert!(store.get("LAB").unwrap().is_none());
    assert!(!collector.is_training("LAB"));
}
