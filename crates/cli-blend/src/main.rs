use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use engine::{
    format_eta, negotiate, BatchReport, BatchStatus, BlendConfig, DispatchPolicy, FfmpegHost, FfprobeProbe, Group,
    JobScheduler, JobState, MediaLibrary, MediaProbe, Phase,
};
use humansize::{format_size, DECIMAL};
use log::{error, info, warn};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Blend main videos with duration-matched overlays
#[derive(Parser, Debug)]
#[command(name = "vblend", author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pair every main video with an overlay and encode the results
    Run {
        /// Main videos or folders of them
        #[arg(long = "main", required = true, num_args = 1..)]
        main: Vec<PathBuf>,

        /// Overlay videos or folders of them
        #[arg(long = "overlay", required = true, num_args = 1..)]
        overlay: Vec<PathBuf>,

        /// Overlay opacity in percent (1-15)
        #[arg(long)]
        opacity: Option<u8>,

        /// Maximum number of encoders running at once
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Skip NVENC / AMF detection and encode with libx264
        #[arg(long)]
        no_hardware: bool,

        /// Write outputs here instead of <main dir>/output
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Seed for overlay selection
        #[arg(long)]
        seed: Option<u64>,

        /// Dispatch jobs as soon as a pairing is made instead of one after another
        #[arg(long)]
        overlapped: bool,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rename files to a numbered sequence (Main_001, video_overlay_001, ...)
    Rename {
        #[arg(long, value_enum)]
        group: GroupArg,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show which encoder a batch would use
    Encoders {
        #[arg(long)]
        no_hardware: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GroupArg {
    Main,
    Overlay,
}

impl From<GroupArg> for Group {
    fn from(arg: GroupArg) -> Self {
        match arg {
            GroupArg::Main => Group::Main,
            GroupArg::Overlay => Group::Overlay,
        }
    }
}

/// Copies log records to stderr and the session log file
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Open `<log_dir>/process_log_<YYYYmmdd_HHMMSS>.txt`
fn open_session_log(log_dir: &Path) -> Result<(PathBuf, File)> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    let name = format!("process_log_{}.txt", chrono::Local::now().format("%Y%m%d_%H%M%S"));
    let path = log_dir.join(name);
    let file = File::create(&path).with_context(|| format!("Failed to create log file: {}", path.display()))?;
    Ok((path, file))
}

fn init_logging(verbose: bool, log_dir: &Path) {
    let default_level = if verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    builder.format_timestamp_secs();

    let log_file = match open_session_log(log_dir) {
        Ok((path, file)) => {
            builder.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
            Some(path)
        }
        Err(e) => {
            eprintln!("Logging to stderr only: {:#}", e);
            None
        }
    };

    builder.init();
    if let Some(path) = log_file {
        info!("Session log: {}", path.display());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = BlendConfig::load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(cli.verbose, &cfg.log_dir);

    let ok = match cli.command {
        Commands::Run {
            main,
            overlay,
            opacity,
            max_concurrency,
            no_hardware,
            output_dir,
            seed,
            overlapped,
            json,
        } => {
            let mut cfg = cfg;
            if let Some(opacity) = opacity {
                cfg.opacity_percent = opacity;
            }
            if let Some(n) = max_concurrency {
                cfg.max_concurrency = n;
            }
            if no_hardware {
                cfg.prefer_hardware = false;
            }
            if output_dir.is_some() {
                cfg.output_dir = output_dir;
            }
            if seed.is_some() {
                cfg.pair_seed = seed;
            }
            if overlapped {
                cfg.dispatch = DispatchPolicy::Overlapped;
            }
            cfg.validate()?;
            run_batch(cfg, &main, &overlay, json).await?
        }
        Commands::Rename { group, files } => rename(&cfg, group.into(), &files).await?,
        Commands::Encoders { no_hardware } => {
            let host = FfmpegHost::new(&cfg.ffmpeg_bin);
            let profile = negotiate(&host, cfg.prefer_hardware && !no_hardware).await;
            println!("Encoder: {} ({})", profile.encoder_id, profile.kind);
            println!("Hardware decode hint: {}", profile.hwaccel_hint());
            for (key, value) in &profile.params {
                println!("  -{} {}", key, value);
            }
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Add files and folders to a collection, logging what could not be used
async fn import(library: &mut MediaLibrary, inputs: &[PathBuf], group: Group) {
    for input in inputs {
        if input.is_dir() {
            match library.import_folder(input, group).await {
                Ok(summary) => {
                    for path in &summary.rejected {
                        warn!("Skipped unreadable {} video {}", group, path.display());
                    }
                }
                Err(e) => error!("Cannot import {}: {}", input.display(), e),
            }
        } else if let Err(e) = library.add_asset(input, group).await {
            error!("{}", e);
        }
    }
}

/// Background thread feeding operator commands from stdin
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn handle_command(scheduler: &JobScheduler, line: &str) {
    let result = match line.trim() {
        "pause" | "p" => scheduler.pause(),
        "resume" | "r" => scheduler.resume(),
        "stop" | "s" | "q" => scheduler.stop(),
        "status" => {
            print_status(&scheduler.status());
            Ok(())
        }
        "" => Ok(()),
        other => {
            warn!("Unknown command '{}' (pause, resume, stop, status)", other);
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!("{}", e);
    }
}

fn print_status(status: &BatchStatus) {
    let eta = format_eta(status.eta_secs.map(Duration::from_secs));
    println!(
        "[{:?}] {}/{} ({:.1}%) ETA {} | active {} | {}",
        status.phase,
        status.processed,
        status.total,
        status.percentage,
        eta,
        status.active_jobs,
        status.current_item.as_deref().unwrap_or("-")
    );
}

async fn run_batch(cfg: BlendConfig, main: &[PathBuf], overlay: &[PathBuf], json: bool) -> Result<bool> {
    let probe: Arc<dyn MediaProbe> = Arc::new(FfprobeProbe::new(&cfg.ffprobe_bin));
    let host = Arc::new(FfmpegHost::new(&cfg.ffmpeg_bin));

    info!("Configuration loaded:");
    info!("  Opacity: {}%", cfg.opacity_percent);
    info!("  Max concurrency: {}", cfg.max_concurrency);
    info!("  Dispatch: {:?}", cfg.dispatch);
    match &cfg.output_dir {
        Some(dir) => info!("  Output dir: {}", dir.display()),
        None => info!("  Output dir: <main dir>/output"),
    }

    let mut library = MediaLibrary::new(probe.clone());
    import(&mut library, main, Group::Main).await;
    import(&mut library, overlay, Group::Overlay).await;
    info!(
        "Library: {} main video(s), {} overlay video(s)",
        library.main().len(),
        library.overlay().len()
    );

    let scheduler = Arc::new(JobScheduler::new(cfg, probe, host));
    let handle = match scheduler.submit(library.main(), library.overlay()) {
        Ok(handle) => handle,
        Err(e) => {
            error!("❌ Cannot start batch: {}", e);
            return Ok(false);
        }
    };
    println!("Commands: pause | resume | stop | status");

    let printer = {
        let mut rx = scheduler.subscribe();
        tokio::spawn(async move {
            let mut last: Option<(Phase, usize, Option<String>)> = None;
            while rx.changed().await.is_ok() {
                let status = rx.borrow_and_update().clone();
                let key = (status.phase, status.processed, status.current_item.clone());
                if last.as_ref() != Some(&key) && status.phase != Phase::Idle {
                    print_status(&status);
                    last = Some(key);
                }
            }
        })
    };

    let mut commands = spawn_stdin_reader();
    let join = handle.join();
    tokio::pin!(join);

    let report = loop {
        tokio::select! {
            report = &mut join => break report?,
            Some(line) = commands.recv() => handle_command(&scheduler, &line),
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping batch");
                if let Err(e) = scheduler.stop() {
                    warn!("{}", e);
                }
            }
        }
    };
    printer.abort();

    print_summary(&report, json)?;
    Ok(report.failed == 0)
}

fn print_summary(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report).context("Failed to serialize report")?);
        return Ok(());
    }

    println!();
    println!(
        "Finished: {} succeeded, {} failed, {} skipped, {} missing, {} cancelled",
        report.succeeded, report.failed, report.skipped, report.missing, report.cancelled
    );

    let mut total: u64 = 0;
    for (path, bytes) in &report.outputs {
        total += *bytes;
        println!("  ✅ {:>10}  {}", format_size(*bytes, DECIMAL), path.display());
    }
    if report.outputs.len() > 1 {
        println!("  Total: {}", format_size(total, DECIMAL));
    }

    for job in report.jobs.iter().filter(|j| j.state == JobState::Failed) {
        println!(
            "  ❌ {}: {}",
            job.main.display(),
            job.reason.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn rename(cfg: &BlendConfig, group: Group, files: &[PathBuf]) -> Result<bool> {
    let probe: Arc<dyn MediaProbe> = Arc::new(FfprobeProbe::new(&cfg.ffprobe_bin));
    let mut library = MediaLibrary::new(probe);

    let mut accepted = Vec::new();
    for file in files {
        match library.add_asset(file, group).await {
            Ok(_) => accepted.push(file.clone()),
            Err(e) => error!("{}", e),
        }
    }
    if accepted.is_empty() {
        error!("❌ Nothing to rename");
        return Ok(false);
    }

    let renamed = library
        .rename_assets(&accepted, group)
        .await
        .context("Failed to rename files")?;
    for (old, new) in accepted.iter().zip(&renamed) {
        println!("{} -> {}", old.display(), new.display());
    }
    Ok(accepted.len() == files.len())
}
