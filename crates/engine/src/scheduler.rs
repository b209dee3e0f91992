use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::{BatchSettings, BlendConfig, DispatchPolicy};
use crate::encoder::{negotiate, EncoderHost};
use crate::error::{SessionError, SubmitError};
use crate::job::{Job, JobContext, JobOutcome, TranscodeJob};
use crate::media::Collection;
use crate::pairing::OverlayPicker;
use crate::probe::MediaProbe;
use crate::session::{BatchStatus, ItemResult, Phase, Session};

/// Final tally of a batch
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub missing: usize,
    pub cancelled: usize,
    pub jobs: Vec<Job>,
    /// Verified outputs with their sizes in bytes
    pub outputs: Vec<(PathBuf, u64)>,
}

impl BatchReport {
    fn record_job(&mut self, session: &Session, job: Job, outcome: JobOutcome) {
        session.record(outcome.item_result());
        match outcome {
            JobOutcome::Succeeded { output, bytes } => {
                self.succeeded += 1;
                self.outputs.push((output, bytes));
            }
            JobOutcome::Failed(_) => self.failed += 1,
            JobOutcome::Cancelled => self.cancelled += 1,
        }
        self.jobs.push(job);
    }

    fn record_item(&mut self, session: &Session, result: ItemResult) {
        session.record(result);
        match result {
            ItemResult::Skipped => self.skipped += 1,
            ItemResult::Missing => self.missing += 1,
            ItemResult::Succeeded => self.succeeded += 1,
            ItemResult::Failed => self.failed += 1,
            ItemResult::Cancelled => self.cancelled += 1,
        }
    }
}

/// A submitted batch; the driver runs until every item is handled or the batch is stopped
pub struct BatchHandle {
    task: JoinHandle<BatchReport>,
}

impl BatchHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<BatchReport> {
        self.task.await.context("Batch driver task failed")
    }
}

/// Pairs main videos with overlays and supervises their encodes
pub struct JobScheduler {
    config: Mutex<BlendConfig>,
    probe: Arc<dyn MediaProbe>,
    host: Arc<dyn EncoderHost>,
    session: Arc<Session>,
}

impl JobScheduler {
    pub fn new(config: BlendConfig, probe: Arc<dyn MediaProbe>, host: Arc<dyn EncoderHost>) -> Self {
        Self {
            config: Mutex::new(config),
            probe,
            host,
            session: Arc::new(Session::new()),
        }
    }

    fn lock_config(&self) -> MutexGuard<'_, BlendConfig> {
        self.config.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> BlendConfig {
        self.lock_config().clone()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Replace the batch settings; only allowed between batches
    pub fn configure(&self, settings: BatchSettings) -> Result<(), SessionError> {
        let phase = self.session.phase();
        if phase != Phase::Idle {
            return Err(SessionError::InvalidTransition { from: phase, action: "configure" });
        }
        settings.validate().map_err(SessionError::InvalidSettings)?;

        info!(
            "Settings: opacity {}%, up to {} concurrent encode(s), hardware {}",
            settings.opacity_percent,
            settings.max_concurrency,
            if settings.prefer_hardware { "preferred" } else { "disabled" }
        );
        self.lock_config().apply_settings(settings);
        Ok(())
    }

    /// Start a batch over every main video.
    ///
    /// All validation happens here, before any task is spawned; a refused
    /// batch leaves the session untouched.
    pub fn submit(&self, main: &Collection, overlay: &Collection) -> Result<BatchHandle, SubmitError> {
        if main.is_empty() {
            return Err(SubmitError::EmptyMain);
        }
        if overlay.is_empty() {
            return Err(SubmitError::EmptyOverlay);
        }
        let phase = self.session.phase();
        if phase != Phase::Idle {
            return Err(SubmitError::AlreadyActive(phase));
        }

        let config = self.config();
        config
            .validate()
            .map_err(|e| SubmitError::InvalidSettings(format!("{:#}", e)))?;

        let cancel = self.session.begin(main.len(), config.max_concurrency)?;
        let driver = BatchDriver {
            session: self.session.clone(),
            probe: self.probe.clone(),
            host: self.host.clone(),
            config,
            main: main.clone(),
            overlay: overlay.clone(),
            cancel,
        };

        Ok(BatchHandle {
            task: tokio::spawn(driver.run()),
        })
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        self.session.pause()
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        self.session.resume()
    }

    /// Cancel the batch; running encoders are terminated by their jobs
    pub fn stop(&self) -> Result<(), SessionError> {
        for (key, process) in self.session.request_stop()? {
            info!(
                "Job {}: stop requested for {} (pid {:?}, running {}s)",
                process.job_id,
                key,
                process.pid,
                process.started.elapsed().as_secs()
            );
        }
        Ok(())
    }

    pub fn status(&self) -> BatchStatus {
        self.session.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchStatus> {
        self.session.subscribe()
    }
}

/// Returns the session to Idle however the driver exits
struct FinishGuard(Arc<Session>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

struct BatchDriver {
    session: Arc<Session>,
    probe: Arc<dyn MediaProbe>,
    host: Arc<dyn EncoderHost>,
    config: BlendConfig,
    main: Collection,
    overlay: Collection,
    cancel: CancellationToken,
}

impl BatchDriver {
    async fn run(self) -> BatchReport {
        let _finish = FinishGuard(self.session.clone());
        let settings = self.config.batch_settings();

        let profile = negotiate(self.host.as_ref(), settings.prefer_hardware).await;
        let ctx = JobContext {
            session: self.session.clone(),
            gate: Arc::new(Semaphore::new(settings.max_concurrency)),
            probe: self.probe.clone(),
            profile: Arc::new(profile),
            settings: settings.clone(),
            ffmpeg_bin: self.config.ffmpeg_bin.clone(),
            cancel: self.cancel.clone(),
            kill_grace: self.config.kill_grace(),
            settle_delay: self.config.settle_delay(),
            monitor_tick: self.config.monitor_tick(),
        };

        let mut picker = OverlayPicker::new(self.config.pair_seed);
        let mut report = BatchReport::default();
        let mut inflight: JoinSet<(Job, JobOutcome)> = JoinSet::new();

        for main in self.main.iter() {
            // Held here while paused; stop wakes the driver too
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.session.wait_while_paused() => {}
            }

            self.session.set_current_item(Some(main.label()));

            if !tokio::fs::try_exists(&main.path).await.unwrap_or(false) {
                error!("Main video no longer exists: {}", main.path.display());
                report.record_item(&self.session, ItemResult::Missing);
                continue;
            }

            let Some(overlay) = picker
                .select_overlay(main.duration, &self.overlay)
                .and_then(|path| self.overlay.get(&path).cloned())
            else {
                warn!(
                    "No overlay between {:.1}s and {:.1}s for {}, skipping",
                    main.duration,
                    main.duration * crate::pairing::MAX_DURATION_FACTOR,
                    main.label()
                );
                report.record_item(&self.session, ItemResult::Skipped);
                continue;
            };

            info!(
                "🔗 Paired {} ({:.1}s) with {} ({:.1}s)",
                main.label(),
                main.duration,
                overlay.label(),
                overlay.duration
            );
            let job = TranscodeJob::new(main.clone(), overlay);

            match self.config.dispatch {
                DispatchPolicy::Ordered => {
                    let (job, outcome) = job.run(&ctx).await;
                    report.record_job(&self.session, job, outcome);
                }
                DispatchPolicy::Overlapped => {
                    // Only as many tasks as permits, so pausing holds back the rest
                    while inflight.len() >= settings.max_concurrency {
                        match inflight.join_next().await {
                            Some(joined) => self.collect(&mut report, joined),
                            None => break,
                        }
                    }
                    let ctx = ctx.clone();
                    inflight.spawn(async move { job.run(&ctx).await });
                }
            }
        }

        while let Some(joined) = inflight.join_next().await {
            self.collect(&mut report, joined);
        }

        info!(
            "🏁 Batch finished: {} succeeded, {} failed, {} skipped, {} missing, {} cancelled",
            report.succeeded, report.failed, report.skipped, report.missing, report.cancelled
        );
        report
    }

    fn collect(&self, report: &mut BatchReport, joined: Result<(Job, JobOutcome), tokio::task::JoinError>) {
        match joined {
            Ok((job, outcome)) => report.record_job(&self.session, job, outcome),
            Err(e) => {
                error!("❌ Job task aborted: {}", e);
                report.record_item(&self.session, ItemResult::Failed);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::media::MediaAsset;
    use crate::testutil::{fake_tools, SoftwareOnlyHost, StaticProbe};
    use std::path::Path;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn config(ffmpeg_bin: &Path) -> BlendConfig {
        let mut cfg = BlendConfig::default_config();
        cfg.ffmpeg_bin = ffmpeg_bin.to_path_buf();
        cfg.prefer_hardware = false;
        cfg.settle_delay_ms = 10;
        cfg.monitor_tick_ms = 20;
        cfg.pair_seed = Some(1);
        cfg
    }

    fn scheduler(cfg: BlendConfig) -> JobScheduler {
        JobScheduler::new(cfg, Arc::new(StaticProbe::default()), Arc::new(SoftwareOnlyHost))
    }

    /// Main videos that exist on disk, with known dimensions
    fn mains(dir: &Path, items: &[(&str, f64)]) -> Collection {
        items
            .iter()
            .map(|(name, duration)| {
                let path = dir.join(name);
                std::fs::write(&path, b"main").unwrap();
                MediaAsset::new(path, *duration).with_dimensions(320, 240)
            })
            .collect()
    }

    fn overlays(dir: &Path, items: &[(&str, f64)]) -> Collection {
        items
            .iter()
            .map(|(name, duration)| MediaAsset::new(dir.join("overlays").join(name), *duration))
            .collect()
    }

    async fn wait_for_active(scheduler: &JobScheduler, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while scheduler.session().active_count() < count {
            assert!(Instant::now() < deadline, "encoders never started");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_end_to_end_pairs_within_window() {
        let tools = fake_tools();
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(config(&tools.ok));

        let main = mains(dir.path(), &[("a.mp4", 10.0)]);
        let overlay = overlays(dir.path(), &[("b.mp4", 5.0), ("c.mp4", 20.0), ("d.mp4", 40.0)]);

        let report = scheduler.submit(&main, &overlay).unwrap().join().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.jobs.len(), 1);

        let expected = dir.path().join("output").join("output_a_C_c.mp4");
        assert_eq!(report.outputs, vec![(expected.clone(), 4)]);
        assert!(expected.exists());
        assert_eq!(scheduler.status(), BatchStatus::default());
    }

    #[tokio::test]
    async fn test_main_without_suitable_overlay_is_skipped() {
        let tools = fake_tools();
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(config(&tools.ok));
        let mut rx = scheduler.subscribe();

        // a (10s) has nothing in [10, 30]; f (20s) pairs with e (31s)
        let main = mains(dir.path(), &[("a.mp4", 10.0), ("f.mp4", 20.0)]);
        let overlay = overlays(dir.path(), &[("b.mp4", 5.0), ("e.mp4", 31.0)]);

        let report = scheduler.submit(&main, &overlay).unwrap().join().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.jobs.len(), 1);
        assert_eq!(report.jobs[0].main, dir.path().join("f.mp4"));
        assert!(!dir.path().join("output").join("output_a_C_b.mp4").exists());
        assert!(!dir.path().join("output").join("output_a_C_e.mp4").exists());
        assert!(dir.path().join("output").join("output_f_C_e.mp4").exists());

        // The last published status is the reset after the batch
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_missing_main_file_is_counted() {
        let tools = fake_tools();
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(config(&tools.ok));

        let mut main = mains(dir.path(), &[("a.mp4", 10.0)]);
        main.insert(MediaAsset::new(dir.path().join("gone.mp4"), 10.0).with_dimensions(320, 240));
        let overlay = overlays(dir.path(), &[("c.mp4", 20.0)]);

        let report = scheduler.submit(&main, &overlay).unwrap().join().await.unwrap();
        assert_eq!(report.missing, 1);
        assert_eq!(report.succeeded, 1);
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_batch() {
        let tools = fake_tools();
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(config(&tools.fail));

        let main = mains(dir.path(), &[("a.mp4", 10.0), ("b.mp4", 12.0)]);
        let overlay = overlays(dir.path(), &[("c.mp4", 20.0)]);

        let report = scheduler.submit(&main, &overlay).unwrap().join().await.unwrap();
        assert_eq!(report.failed, 2);
        assert!(report.outputs.is_empty());
        assert!(!dir.path().join("output").join("output_a_C_c.mp4").exists());
    }

    async fn max_active_during(scheduler: &JobScheduler, handle: BatchHandle) -> (usize, BatchReport) {
        let mut max_seen = 0;
        while !handle.is_finished() {
            max_seen = max_seen.max(scheduler.session().active_count());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        (max_seen, handle.join().await.unwrap())
    }

    #[tokio::test]
    async fn test_overlapped_dispatch_respects_concurrency_limit() {
        let tools = fake_tools();
        let names: Vec<String> = (1..=7).map(|i| format!("m{}.mp4", i)).collect();
        let items: Vec<_> = names.iter().map(|n| (n.as_str(), 10.0)).collect();

        for limit in 1..=3 {
            let dir = TempDir::new().unwrap();
            let mut cfg = config(&tools.slow_ok);
            cfg.dispatch = DispatchPolicy::Overlapped;
            cfg.max_concurrency = limit;
            let scheduler = scheduler(cfg);

            let main = mains(dir.path(), &items);
            let overlay = overlays(dir.path(), &[("c.mp4", 20.0)]);

            let handle = scheduler.submit(&main, &overlay).unwrap();
            let (max_seen, report) = max_active_during(&scheduler, handle).await;
            assert!(max_seen <= limit, "limit {}: saw {} concurrent encoders", limit, max_seen);
            assert!(max_seen >= 1);
            assert_eq!(report.succeeded, names.len());
            assert_eq!(scheduler.session().active_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_ordered_dispatch_runs_one_at_a_time() {
        let tools = fake_tools();
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(config(&tools.slow_ok));

        let main = mains(dir.path(), &[("m1.mp4", 10.0), ("m2.mp4", 10.0), ("m3.mp4", 10.0)]);
        let overlay = overlays(dir.path(), &[("c.mp4", 20.0)]);

        let handle = scheduler.submit(&main, &overlay).unwrap();
        let (max_seen, report) = max_active_during(&scheduler, handle).await;
        assert!(max_seen <= 1);
        assert_eq!(report.succeeded, 3);
        let order: Vec<String> = report
            .jobs
            .iter()
            .map(|j| j.main.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(order, vec!["m1.mp4", "m2.mp4", "m3.mp4"]);
    }

    #[tokio::test]
    async fn test_stop_terminates_all_encoders() {
        let tools = fake_tools();
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&tools.sleeper);
        cfg.dispatch = DispatchPolicy::Overlapped;
        cfg.max_concurrency = 3;
        let scheduler = scheduler(cfg);

        let main = mains(dir.path(), &[("m1.mp4", 10.0), ("m2.mp4", 10.0), ("m3.mp4", 10.0)]);
        let overlay = overlays(dir.path(), &[("c.mp4", 20.0)]);

        let handle = scheduler.submit(&main, &overlay).unwrap();
        wait_for_active(&scheduler, 3).await;

        scheduler.stop().unwrap();
        let report = tokio::time::timeout(Duration::from_secs(7), handle.join())
            .await
            .expect("batch did not stop within the grace period")
            .unwrap();

        assert_eq!(report.cancelled, 3);
        assert_eq!(scheduler.session().active_count(), 0);
        assert_eq!(scheduler.session().phase(), Phase::Idle);
        for name in ["m1", "m2", "m3"] {
            let output = dir.path().join("output").join(format!("output_{}_C_c.mp4", name));
            assert!(!output.exists());
        }
    }

    #[tokio::test]
    async fn test_pause_holds_dispatch_until_resume() {
        let tools = fake_tools();
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(config(&tools.ok));

        let main = mains(dir.path(), &[("a.mp4", 10.0), ("b.mp4", 10.0)]);
        let overlay = overlays(dir.path(), &[("c.mp4", 20.0)]);

        let handle = scheduler.submit(&main, &overlay).unwrap();
        scheduler.pause().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(scheduler.session().active_count(), 0);
        assert!(!dir.path().join("output").exists());
        assert_eq!(scheduler.status().phase, Phase::Paused);

        scheduler.resume().unwrap();
        let report = handle.join().await.unwrap();
        assert_eq!(report.succeeded, 2);
    }

    #[tokio::test]
    async fn test_submit_validation() {
        let tools = fake_tools();
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(config(&tools.sleeper));

        let main = mains(dir.path(), &[("a.mp4", 10.0)]);
        let overlay = overlays(dir.path(), &[("c.mp4", 20.0)]);

        assert!(matches!(
            scheduler.submit(&Collection::new(), &overlay),
            Err(SubmitError::EmptyMain)
        ));
        assert!(matches!(
            scheduler.submit(&main, &Collection::new()),
            Err(SubmitError::EmptyOverlay)
        ));
        assert_eq!(scheduler.status().phase, Phase::Idle);

        let handle = scheduler.submit(&main, &overlay).unwrap();
        assert!(matches!(
            scheduler.submit(&main, &overlay),
            Err(SubmitError::AlreadyActive(Phase::Running))
        ));

        let settings = scheduler.config().batch_settings();
        assert!(matches!(
            scheduler.configure(settings),
            Err(SessionError::InvalidTransition { from: Phase::Running, .. })
        ));

        scheduler.stop().unwrap();
        handle.join().await.unwrap();
        assert!(scheduler.stop().is_err());
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_config() {
        let tools = fake_tools();
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&tools.ok);
        cfg.monitor_tick_ms = 0;
        let scheduler = scheduler(cfg);

        let main = mains(dir.path(), &[("a.mp4", 10.0)]);
        let overlay = overlays(dir.path(), &[("c.mp4", 20.0)]);

        match scheduler.submit(&main, &overlay) {
            Err(SubmitError::InvalidSettings(reason)) => assert!(reason.contains("monitor_tick_ms"), "{}", reason),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("batch with a zero monitor tick was accepted"),
        }
        assert_eq!(scheduler.status().phase, Phase::Idle);
        assert!(!dir.path().join("output").exists());
    }

    #[tokio::test]
    async fn test_configure_validates_settings() {
        let tools = fake_tools();
        let scheduler = scheduler(config(&tools.ok));

        let mut settings = scheduler.config().batch_settings();
        settings.opacity_percent = 16;
        assert!(matches!(scheduler.configure(settings.clone()), Err(SessionError::InvalidSettings(_))));

        settings.opacity_percent = 15;
        settings.max_concurrency = 0;
        assert!(scheduler.configure(settings.clone()).is_err());

        settings.max_concurrency = 4;
        scheduler.configure(settings).unwrap();
        assert_eq!(scheduler.config().opacity_percent, 15);
        assert_eq!(scheduler.config().max_concurrency, 4);
    }
}
