use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::command::{BlendParams, CommandBuilder};
use crate::config::BatchSettings;
use crate::encoder::EncoderProfile;
use crate::error::JobError;
use crate::media::MediaAsset;
use crate::naming::{job_key, output_file_name, resolve_output_dir};
use crate::probe::MediaProbe;
use crate::process::{spawn_stderr_collector, terminate};
use crate::session::{ActiveProcess, ItemResult, Session};

/// How long to wait for the stderr reader once the encoder has exited
const DIAGNOSTICS_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }
}

/// Record of one main/overlay encode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// `<main>_<overlay>`, the key in the session's active-process map
    pub key: String,
    pub main: PathBuf,
    pub overlay: PathBuf,
    pub output_path: Option<PathBuf>,
    pub state: JobState,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(main: &Path, overlay: &Path) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: job_key(main, overlay),
            main: main.to_path_buf(),
            overlay: overlay.to_path_buf(),
            output_path: None,
            state: JobState::Queued,
            reason: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// `Queued -> Running`
    pub fn mark_running(&mut self) -> bool {
        if self.state != JobState::Queued {
            return false;
        }
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Set the terminal state; a job that already finished keeps its first result
    pub fn finish(&mut self, state: JobState, reason: Option<String>) -> bool {
        if self.state.is_terminal() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        self.reason = reason;
        self.finished_at = Some(Utc::now());
        true
    }
}

/// Result of running a [`TranscodeJob`]
#[derive(Debug)]
pub enum JobOutcome {
    Succeeded { output: PathBuf, bytes: u64 },
    Failed(JobError),
    Cancelled,
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Succeeded { .. } => JobState::Succeeded,
            JobOutcome::Failed(_) => JobState::Failed,
            JobOutcome::Cancelled => JobState::Cancelled,
        }
    }

    pub fn item_result(&self) -> ItemResult {
        match self {
            JobOutcome::Succeeded { .. } => ItemResult::Succeeded,
            JobOutcome::Failed(_) => ItemResult::Failed,
            JobOutcome::Cancelled => ItemResult::Cancelled,
        }
    }
}

/// Everything a job borrows from its batch
#[derive(Clone)]
pub struct JobContext {
    pub session: Arc<Session>,
    pub gate: Arc<Semaphore>,
    pub probe: Arc<dyn MediaProbe>,
    pub profile: Arc<EncoderProfile>,
    pub settings: BatchSettings,
    pub ffmpeg_bin: PathBuf,
    pub cancel: CancellationToken,
    pub kill_grace: Duration,
    pub settle_delay: Duration,
    pub monitor_tick: Duration,
}

/// Removes the job's process entry and output claim however the job ends
struct ActiveGuard {
    session: Arc<Session>,
    key: String,
    output: PathBuf,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.session.unregister(&self.key);
        self.session.release_output(&self.output);
    }
}

/// One supervised encode of a main video with an overlay
pub struct TranscodeJob {
    job: Job,
    main: MediaAsset,
    overlay: MediaAsset,
}

impl TranscodeJob {
    pub fn new(main: MediaAsset, overlay: MediaAsset) -> Self {
        Self {
            job: Job::new(&main.path, &overlay.path),
            main,
            overlay,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Wait for a gate permit, encode, verify, and finalise the job record
    pub async fn run(mut self, ctx: &JobContext) -> (Job, JobOutcome) {
        let permit = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return self.conclude(JobOutcome::Cancelled),
            permit = ctx.gate.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return self.conclude(JobOutcome::Cancelled),
            },
        };

        if !ctx.session.is_processing() {
            debug!("Job {}: session no longer processing, not starting", self.job.id);
            drop(permit);
            return self.conclude(JobOutcome::Cancelled);
        }

        self.job.mark_running();
        info!(
            "Job {}: 🎬 Encoding {} with overlay {}",
            self.job.id,
            self.main.label(),
            self.overlay.label()
        );

        let outcome = self.execute(ctx).await;
        drop(permit);
        self.conclude(outcome)
    }

    async fn execute(&mut self, ctx: &JobContext) -> JobOutcome {
        let out_dir = resolve_output_dir(ctx.settings.output_dir.as_deref(), &self.main.path);
        if let Err(source) = tokio::fs::create_dir_all(&out_dir).await {
            return JobOutcome::Failed(JobError::Directory { path: out_dir, source });
        }

        let output = out_dir.join(output_file_name(&self.main, &self.overlay));
        self.job.output_path = Some(output.clone());

        if !ctx.session.claim_output(&output) {
            return JobOutcome::Failed(JobError::OutputClaimed(output));
        }
        let _guard = ActiveGuard {
            session: ctx.session.clone(),
            key: self.job.key.clone(),
            output: output.clone(),
        };

        let outcome = self.encode(ctx, &output).await;
        if !matches!(outcome, JobOutcome::Succeeded { .. }) {
            remove_partial_output(self.job.id, &output).await;
        }
        outcome
    }

    async fn encode(&self, ctx: &JobContext, output: &Path) -> JobOutcome {
        let id = self.job.id;

        let dimensions = match self.main.dimensions {
            Some(dims) => Some(dims),
            None => ctx.probe.probe_dimensions(&self.main.path).await,
        };
        let Some((width, height)) = dimensions else {
            return JobOutcome::Failed(JobError::Probe {
                path: self.main.path.clone(),
                detail: "frame dimensions unavailable".to_string(),
            });
        };

        let params = BlendParams {
            width,
            height,
            alpha: ctx.settings.alpha(),
            profile: &ctx.profile,
        };
        let args = CommandBuilder::new().build_blend_command(&self.main.path, &self.overlay.path, output, &params);
        debug!("Job {}: {} {}", id, ctx.ffmpeg_bin.display(), args.join(" "));

        let mut child = match Command::new(&ctx.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                return JobOutcome::Failed(JobError::Spawn {
                    program: ctx.ffmpeg_bin.clone(),
                    source,
                })
            }
        };

        ctx.session.register(
            &self.job.key,
            ActiveProcess {
                job_id: id,
                pid: child.id(),
                output: output.to_path_buf(),
                started: Instant::now(),
            },
        );

        let diagnostics = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_collector(stderr, format!("ffmpeg {}", self.main.label())));

        let mut ticker = tokio::time::interval(ctx.monitor_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let waited = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = ctx.cancel.cancelled() => {
                    info!("Job {}: ⏹️  Stopping encoder (pid {:?})", id, child.id());
                    if let Err(e) = terminate(&mut child, ctx.kill_grace).await {
                        warn!("Job {}: failed to terminate encoder: {}", id, e);
                    }
                    if let Some(handle) = diagnostics {
                        handle.abort();
                    }
                    return JobOutcome::Cancelled;
                }
                _ = ticker.tick() => ctx.session.refresh(),
            }
        };

        let diagnostics = match diagnostics {
            Some(handle) => {
                let abort = handle.abort_handle();
                match tokio::time::timeout(DIAGNOSTICS_DRAIN_TIMEOUT, handle).await {
                    Ok(Ok(text)) => text,
                    Ok(Err(_)) => String::new(),
                    Err(_) => {
                        abort.abort();
                        String::new()
                    }
                }
            }
            None => String::new(),
        };

        let status = match waited {
            Ok(status) => status,
            Err(e) => {
                return JobOutcome::Failed(JobError::RuntimeFailure {
                    code: -1,
                    diagnostics: format!("waiting for encoder failed: {}", e),
                })
            }
        };

        if !status.success() {
            return JobOutcome::Failed(JobError::RuntimeFailure {
                code: status.code().unwrap_or(-1),
                diagnostics,
            });
        }

        // Give the filesystem a moment before trusting the output
        tokio::time::sleep(ctx.settle_delay).await;

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => JobOutcome::Succeeded {
                output: output.to_path_buf(),
                bytes: meta.len(),
            },
            Ok(_) => JobOutcome::Failed(JobError::OutputIntegrity {
                path: output.to_path_buf(),
                problem: "empty",
            }),
            Err(_) => JobOutcome::Failed(JobError::OutputIntegrity {
                path: output.to_path_buf(),
                problem: "missing",
            }),
        }
    }

    fn conclude(mut self, outcome: JobOutcome) -> (Job, JobOutcome) {
        let id = self.job.id;
        match &outcome {
            JobOutcome::Succeeded { output, bytes } => {
                info!("Job {}: ✅ Created {} ({} bytes)", id, output.display(), bytes);
                self.job.finish(JobState::Succeeded, None);
            }
            JobOutcome::Failed(e) => {
                error!("Job {}: ❌ {} failed: {}", id, self.main.label(), e);
                self.job.finish(JobState::Failed, Some(e.to_string()));
            }
            JobOutcome::Cancelled => {
                info!("Job {}: ⏹️  Cancelled {}", id, self.main.label());
                self.job.finish(JobState::Cancelled, Some("cancelled".to_string()));
            }
        }
        (self.job, outcome)
    }
}

/// Best-effort removal of whatever a failed or stopped encode left behind
async fn remove_partial_output(job_id: Uuid, path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Job {}: 🗑️  Removed incomplete output {}", job_id, path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Job {}: could not remove incomplete output {}: {}", job_id, path.display(), e),
    }
}
