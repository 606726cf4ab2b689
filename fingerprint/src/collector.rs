//! Multi-Position Collector
//!
//! Walks a training run through front, middle and back, one sampler
//! batch per position, then aggregates and stores the fingerprint.
//!
//! A run holds a lease on its room for its whole lifetime, so two runs
//! for the same room cannot overlap. With a lock directory configured
//! the lease is also an exclusive lock file, which keeps separate
//! trainer processes apart. Samples are only appended once a position's
//! batch and survey are complete; dropping a `capture_position` future
//! part way through leaves the run exactly as it was.

use crate::aggregator::{Aggregator, TrainingContext};
use crate::sampler::Sampler;
use crate::store::FingerprintStore;
use crate::{FingerprintError, LoggingObserver, Position, RawSample, Result, RoomFingerprint, TrainingObserver};
use fs2::FileExt;
use roomprint_hal::ScanPrimitive;
use std::collections::HashSet;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Where a training run is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    Idle,
    AwaitingPosition(Position),
    Finalizing,
    Done,
    Failed,
}

impl TrainingState {
    /// 0 while idle, 1..=3 while sampling
    pub fn step(&self) -> usize {
        match self {
            TrainingState::Idle => 0,
            TrainingState::AwaitingPosition(position) => position.step(),
            TrainingState::Finalizing | TrainingState::Done | TrainingState::Failed => Position::ALL.len(),
        }
    }

    /// A run has started and not yet finished
    pub fn is_active(&self) -> bool {
        matches!(self, TrainingState::AwaitingPosition(_) | TrainingState::Finalizing)
    }
}

impl fmt::Display for TrainingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingState::Idle => write!(f, "idle"),
            TrainingState::AwaitingPosition(position) => {
                write!(f, "awaiting {} ({}/{})", position, position.step(), Position::ALL.len())
            }
            TrainingState::Finalizing => write!(f, "finalizing"),
            TrainingState::Done => write!(f, "done"),
            TrainingState::Failed => write!(f, "failed"),
        }
    }
}

/// Rooms with a run in progress
type ActiveRooms = Arc<Mutex<HashSet<String>>>;

/// Exclusive claim on a room, released on drop
struct RoomLease {
    room_id: String,
    active: ActiveRooms,
    // closing the file releases the lock
    _lock_file: Option<File>,
}

impl RoomLease {
    fn acquire(active: &ActiveRooms, room_id: &str, lock_dir: Option<&Path>) -> Result<Self> {
        {
            let mut rooms = active
                .lock()
                .map_err(|_| FingerprintError::InvalidState("active room set poisoned".to_string()))?;
            if !rooms.insert(room_id.to_string()) {
                return Err(FingerprintError::TrainingAlreadyInProgress(room_id.to_string()));
            }
        }

        let mut lease = Self {
            room_id: room_id.to_string(),
            active: active.clone(),
            _lock_file: None,
        };
        if let Some(dir) = lock_dir {
            lease._lock_file = Some(lock_room(dir, room_id)?);
        }
        Ok(lease)
    }
}

/// Lock file name for a room; bytes outside `[A-Za-z0-9-]` are hex escaped
fn lock_file_name(room_id: &str) -> String {
    let mut name = String::with_capacity(room_id.len() + 14);
    for byte in room_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("_{:02x}", byte));
        }
    }
    name.push_str(".training.lock");
    name
}

fn lock_room(dir: &Path, room_id: &str) -> Result<File> {
    std::fs::create_dir_all(dir)
        .map_err(|e| FingerprintError::Store(format!("Failed to create lock directory {:?}: {}", dir, e)))?;

    let path = dir.join(lock_file_name(room_id));
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| FingerprintError::Store(format!("Failed to open {:?}: {}", path, e)))?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
            tracing::warn!("{} is being trained by another process ({:?})", room_id, path);
            Err(FingerprintError::TrainingAlreadyInProgress(room_id.to_string()))
        }
        Err(e) => Err(FingerprintError::Store(format!("Failed to lock {:?}: {}", path, e))),
    }
}

impl Drop for RoomLease {
    fn drop(&mut self) {
        if let Ok(mut rooms) = self.active.lock() {
            rooms.remove(&self.room_id);
        }
    }
}

/// Creates training runs sharing one store and one set of active rooms
#[derive(Clone)]
pub struct Collector {
    store: Arc<dyn FingerprintStore>,
    sampler: Sampler,
    aggregator: Aggregator,
    observer: Arc<dyn TrainingObserver>,
    active: ActiveRooms,
    lock_dir: Option<PathBuf>,
}

impl Collector {
    pub fn new(store: Arc<dyn FingerprintStore>, sampler: Sampler, aggregator: Aggregator) -> Self {
        Self {
            store,
            sampler,
            aggregator,
            observer: Arc::new(LoggingObserver),
            active: Arc::new(Mutex::new(HashSet::new())),
            lock_dir: None,
        }
    }

    /// Also hold a per-room lock file in `dir` while a run is active
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    /// Replace the default logging observer
    pub fn with_observer(mut self, observer: Arc<dyn TrainingObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Prepare a run for `context.room_id`; call [`TrainingRun::begin`] to start it
    pub fn training_run(&self, mut context: TrainingContext) -> Result<TrainingRun> {
        context.room_id = context.room_id.trim().to_string();
        if context.room_id.is_empty() {
            return Err(FingerprintError::MissingRoomId);
        }

        Ok(TrainingRun {
            collector: self.clone(),
            context,
            state: TrainingState::Idle,
            samples: Vec::new(),
            survey: Vec::new(),
            lease: None,
            fingerprint: None,
        })
    }

    /// Whether a run for `room_id` is currently in progress
    pub fn is_training(&self, room_id: &str) -> bool {
        self.active.lock().map(|rooms| rooms.contains(room_id)).unwrap_or(false)
    }
}

/// One room's training run
pub struct TrainingRun {
    collector: Collector,
    context: TrainingContext,
    state: TrainingState,
    samples: Vec<RawSample>,
    /// Access points seen around each completed position
    survey: Vec<RawSample>,
    lease: Option<RoomLease>,
    fingerprint: Option<RoomFingerprint>,
}

impl TrainingRun {
    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn room_id(&self) -> &str {
        &self.context.room_id
    }

    /// Samples accumulated from completed positions
    pub fn samples_collected(&self) -> usize {
        self.samples.len()
    }

    /// Access-point readings accumulated from completed positions
    pub fn survey_collected(&self) -> usize {
        self.survey.len()
    }

    /// Fingerprint produced by this run, once it is `Done`
    pub fn fingerprint(&self) -> Option<&RoomFingerprint> {
        self.fingerprint.as_ref()
    }

    /// Start sampling at the front position
    ///
    /// Allowed from `Idle`, and from `Done` or `Failed` which reset first.
    pub fn begin(&mut self) -> Result<TrainingState> {
        if self.state.is_active() {
            return Err(FingerprintError::InvalidState(format!(
                "{} is already {}",
                self.context.room_id, self.state
            )));
        }
        self.reset();
        self.fingerprint = None;

        self.lease = Some(RoomLease::acquire(
            &self.collector.active,
            &self.context.room_id,
            self.collector.lock_dir.as_deref(),
        )?);
        self.state = TrainingState::AwaitingPosition(Position::Front);

        tracing::info!("Training started for {}", self.context.room_id);
        Ok(self.state)
    }

    /// Sample the current position and advance
    ///
    /// After the back position the run aggregates and uploads on its own,
    /// ending in `Done`. Any failure discards every sample of the run and
    /// leaves the store untouched.
    pub async fn capture_position(&mut self, scanner: &dyn ScanPrimitive) -> Result<TrainingState> {
        let position = match self.state {
            TrainingState::AwaitingPosition(position) => position,
            other => {
                return Err(FingerprintError::InvalidState(format!(
                    "cannot capture a position while {}",
                    other
                )))
            }
        };

        let observer = self.collector.observer.clone();
        let room_id = self.context.room_id.clone();
        let total = self.collector.sampler.config().samples_per_position;

        let batch = self
            .collector
            .sampler
            .sample_with(scanner, position, |index, sample| {
                observer.on_sample(&room_id, sample, index, total)
            })
            .await;

        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => return Err(self.fail(e)),
        };

        let survey = self.collector.sampler.survey(scanner, position).await;

        observer.on_position_complete(&room_id, position, batch.len());
        self.samples.extend(batch);
        self.survey.extend(survey);

        match position.next() {
            Some(next) => {
                self.state = TrainingState::AwaitingPosition(next);
                Ok(self.state)
            }
            None => self.finalize(),
        }
    }

    /// Drive the remaining positions back to back
    pub async fn run_to_completion(&mut self, scanner: &dyn ScanPrimitive) -> Result<RoomFingerprint> {
        if !self.state.is_active() {
            self.begin()?;
        }
        while let TrainingState::AwaitingPosition(_) = self.state {
            self.capture_position(scanner).await?;
        }
        self.fingerprint
            .clone()
            .ok_or_else(|| FingerprintError::InvalidState(format!("run ended {}", self.state)))
    }

    /// Abandon the run, discarding its samples
    pub fn cancel(&mut self) {
        if self.state.is_active() {
            self.collector.observer.on_cancelled(&self.context.room_id);
        }
        self.reset();
    }

    /// Return to `Idle`, releasing the room
    pub fn reset(&mut self) {
        self.samples.clear();
        self.survey.clear();
        self.lease = None;
        self.state = TrainingState::Idle;
    }

    fn finalize(&mut self) -> Result<TrainingState> {
        self.state = TrainingState::Finalizing;

        let fingerprint = match self
            .collector
            .aggregator
            .aggregate_with_survey(&self.context, &self.samples, &self.survey)
        {
            Ok(fingerprint) => fingerprint,
            Err(e) => return Err(self.fail(e)),
        };

        if let Err(e) = self.collector.store.upload(&self.context.room_id, &fingerprint) {
            return Err(self.fail(e));
        }

        self.collector.observer.on_trained(&fingerprint);
        self.fingerprint = Some(fingerprint);
        self.samples.clear();
        self.survey.clear();
        self.lease = None;
        self.state = TrainingState::Done;
        Ok(self.state)
    }

    fn fail(&mut self, error: FingerprintError) -> FingerprintError {
        self.samples.clear();
        self.survey.clear();
        self.lease = None;
        self.state = TrainingState::Failed;
        self.collector.observer.on_failed(&self.context.room_id, &error);
        error
    }
}
