use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{SessionError, SubmitError};
use crate::progress::ProgressTracker;

/// Batch lifecycle: `Idle -> Running <-> Paused -> Stopping -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Running,
    Paused,
    Stopping,
}

/// An encoder process currently owned by a job
#[derive(Debug, Clone)]
pub struct ActiveProcess {
    pub job_id: Uuid,
    pub pid: Option<u32>,
    pub output: PathBuf,
    pub started: Instant,
}

/// How one main asset of the batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemResult {
    Succeeded,
    Failed,
    /// No suitable overlay
    Skipped,
    /// Backing file disappeared before dispatch
    Missing,
    Cancelled,
}

/// Snapshot pushed to status subscribers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStatus {
    pub phase: Phase,
    pub processed: usize,
    pub total: usize,
    pub percentage: f64,
    pub eta_secs: Option<u64>,
    pub current_item: Option<String>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub missing: usize,
    pub cancelled: usize,
    pub active_jobs: usize,
}

#[derive(Debug, Default)]
struct Counts {
    succeeded: usize,
    failed: usize,
    skipped: usize,
    missing: usize,
    cancelled: usize,
}

#[derive(Debug)]
struct SessionState {
    phase: Phase,
    concurrency_limit: usize,
    active: HashMap<String, ActiveProcess>,
    claimed_outputs: HashSet<PathBuf>,
    started_at: Option<Instant>,
    total: usize,
    processed: usize,
    current_item: Option<String>,
    counts: Counts,
    cancel: CancellationToken,
}

impl SessionState {
    fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            concurrency_limit: 0,
            active: HashMap::new(),
            claimed_outputs: HashSet::new(),
            started_at: None,
            total: 0,
            processed: 0,
            current_item: None,
            counts: Counts::default(),
            cancel: CancellationToken::new(),
        }
    }

    fn snapshot(&self) -> BatchStatus {
        let elapsed = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        let progress = ProgressTracker::update(self.processed, self.total, elapsed);
        BatchStatus {
            phase: self.phase,
            processed: self.processed,
            total: self.total,
            percentage: progress.percentage,
            eta_secs: progress.eta.map(|d| d.as_secs()),
            current_item: self.current_item.clone(),
            succeeded: self.counts.succeeded,
            failed: self.counts.failed,
            skipped: self.counts.skipped,
            missing: self.counts.missing,
            cancelled: self.counts.cancelled,
            active_jobs: self.active.len(),
        }
    }
}

/// Process-wide orchestration state.
///
/// Every field lives behind one lock; the driver, job tasks and operator
/// requests all go through the methods below. The lock is never held across
/// an await point.
#[derive(Debug)]
pub struct Session {
    state: Mutex<SessionState>,
    status_tx: watch::Sender<BatchStatus>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(BatchStatus::default());
        Self {
            state: Mutex::new(SessionState::idle()),
            status_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &SessionState) {
        self.status_tx.send_replace(state.snapshot());
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Running or paused: jobs may still start and run
    pub fn is_processing(&self) -> bool {
        matches!(self.phase(), Phase::Running | Phase::Paused)
    }

    pub fn status(&self) -> BatchStatus {
        self.lock().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchStatus> {
        self.status_tx.subscribe()
    }

    /// `Idle -> Running` for a new batch; returns the batch cancellation token
    pub fn begin(&self, total: usize, concurrency_limit: usize) -> Result<CancellationToken, SubmitError> {
        let mut state = self.lock();
        if state.phase != Phase::Idle {
            return Err(SubmitError::AlreadyActive(state.phase));
        }

        *state = SessionState::idle();
        state.phase = Phase::Running;
        state.total = total;
        state.concurrency_limit = concurrency_limit;
        state.started_at = Some(Instant::now());
        let token = state.cancel.clone();

        info!("▶️  Batch started: {} main video(s), up to {} concurrent encode(s)", total, concurrency_limit);
        self.publish(&state);
        Ok(token)
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.phase != Phase::Running {
            return Err(SessionError::InvalidTransition { from: state.phase, action: "pause" });
        }
        state.phase = Phase::Paused;
        info!("⏸️  Processing paused");
        self.publish(&state);
        Ok(())
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.phase != Phase::Paused {
            return Err(SessionError::InvalidTransition { from: state.phase, action: "resume" });
        }
        state.phase = Phase::Running;
        info!("▶️  Processing resumed");
        self.publish(&state);
        Ok(())
    }

    /// `Running | Paused -> Stopping`; cancels every job of the batch
    pub fn request_stop(&self) -> Result<Vec<(String, ActiveProcess)>, SessionError> {
        let mut state = self.lock();
        if !matches!(state.phase, Phase::Running | Phase::Paused) {
            return Err(SessionError::InvalidTransition { from: state.phase, action: "stop" });
        }
        state.phase = Phase::Stopping;
        state.cancel.cancel();

        let active: Vec<_> = state
            .active
            .iter()
            .map(|(k, p)| (k.clone(), p.clone()))
            .collect();
        info!("⏹️  Stopping all processing ({} active encode(s))", active.len());
        self.publish(&state);
        Ok(active)
    }

    /// Back to `Idle`: clears active processes, claims and progress
    pub fn finish(&self) {
        let mut state = self.lock();
        let from = state.phase;
        *state = SessionState::idle();
        debug!("Session {:?} -> Idle", from);
        self.publish(&state);
    }

    /// Reserve an output path; false when another running job holds it
    pub fn claim_output(&self, path: &Path) -> bool {
        self.lock().claimed_outputs.insert(path.to_path_buf())
    }

    pub fn release_output(&self, path: &Path) {
        self.lock().claimed_outputs.remove(path);
    }

    /// Record a spawned encoder under its job key
    pub fn register(&self, key: &str, process: ActiveProcess) {
        let mut state = self.lock();
        debug_assert!(
            state.active.len() < state.concurrency_limit.max(1),
            "active processes would exceed the concurrency limit"
        );
        state.active.insert(key.to_string(), process);
        debug!("Registered encoder for {} ({} active)", key, state.active.len());
    }

    pub fn unregister(&self, key: &str) {
        let mut state = self.lock();
        if state.active.remove(key).is_some() {
            debug!("Released encoder for {} ({} active)", key, state.active.len());
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    pub fn set_current_item(&self, label: Option<String>) {
        let mut state = self.lock();
        state.current_item = label;
        if state.phase != Phase::Paused {
            self.publish(&state);
        }
    }

    /// Count one finished main asset and update progress
    pub fn record(&self, result: ItemResult) {
        let mut state = self.lock();
        state.processed += 1;
        match result {
            ItemResult::Succeeded => state.counts.succeeded += 1,
            ItemResult::Failed => state.counts.failed += 1,
            ItemResult::Skipped => state.counts.skipped += 1,
            ItemResult::Missing => state.counts.missing += 1,
            ItemResult::Cancelled => state.counts.cancelled += 1,
        }
        if state.phase != Phase::Paused {
            self.publish(&state);
        }
    }

    /// Monitor tick: refresh elapsed-time derived fields while running
    pub fn refresh(&self) {
        let state = self.lock();
        if state.phase == Phase::Running {
            self.publish(&state);
        }
    }

    /// Resolve once the session is not paused
    pub async fn wait_while_paused(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as self, so this cannot fail
        let _ = rx.wait_for(|status| status.phase != Phase::Paused).await;
    }
}
