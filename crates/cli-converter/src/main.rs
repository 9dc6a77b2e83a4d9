use anyhow::{Context, Result};
use clap::Parser;
use converter::{
    abort, ConversionFlags, ConversionJob, ConversionStatus, ConverterConfig, StatusStore, SubmitError,
    Supervisor, TargetFormat, WorkerPool,
};
use humansize::{format_size, DECIMAL};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Media conversion runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Target format (mp4, webm, mkv, mov, avi, gif, mp3, wav, ogg, flac, m4a)
    #[arg(short, long)]
    format: String,

    /// Directory for converted files
    #[arg(short, long)]
    out_dir: PathBuf,

    /// Play the output backwards
    #[arg(long)]
    reverse: bool,

    /// Strip the audio track
    #[arg(long)]
    mute: bool,

    /// Override the configured worker count
    #[arg(short, long)]
    workers: Option<usize>,

    /// Print final statuses as JSON
    #[arg(long)]
    json: bool,

    /// Input media files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; --verbose raises the default level
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let mut cfg = ConverterConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(workers) = args.workers {
        cfg.worker_count = workers;
    }

    info!("Converter starting");
    info!("Configuration loaded:");
    info!("  ffmpeg: {}", cfg.ffmpeg_bin.display());
    info!("  ffprobe: {}", cfg.ffprobe_bin.display());
    info!("  Workers: {}", cfg.effective_workers());
    info!("  Probe timeout: {}s", cfg.probe_timeout_secs);

    // Reject bad formats before staging anything
    let format: TargetFormat = args.format.parse()?;
    let flags = ConversionFlags { reverse: args.reverse, mute: args.mute };

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create output directory: {}", args.out_dir.display()))?;
    let staging_dir = args.out_dir.join(".staging");
    fs::create_dir_all(&staging_dir)
        .with_context(|| format!("Failed to create staging directory: {}", staging_dir.display()))?;

    let mut pending = VecDeque::new();
    for input in &args.inputs {
        pending.push_back(stage_job(input, &staging_dir, &args.out_dir, format, flags)?);
    }

    let store = Arc::new(StatusStore::new());
    let supervisor = Arc::new(Supervisor::new(cfg.clone(), store.clone()));
    let pool = WorkerPool::start(cfg.effective_workers(), supervisor);

    let mut submitted: Vec<ConversionJob> = Vec::new();
    let mut interrupted = false;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        // Feed the queue until it pushes back
        while let Some(job) = pending.pop_front() {
            store.put(&job.id, ConversionStatus::new(&job));
            match pool.submit(job.clone()) {
                Ok(()) => {
                    info!("Job {}: submitted {}", job.id, job.source.display());
                    submitted.push(job);
                }
                Err(SubmitError::QueueFull) => {
                    debug!("Queue full, {} job(s) waiting", pending.len() + 1);
                    store.remove(&job.id);
                    pending.push_front(job);
                    break;
                }
                Err(e) => {
                    store.remove(&job.id);
                    return Err(e).context("Worker pool refused job");
                }
            }
        }

        let all_done = pending.is_empty()
            && submitted.iter().all(|j| store.get(&j.id).map_or(true, |s| s.complete));
        if all_done {
            break;
        }

        for active in store.list_active() {
            if interrupted {
                // Jobs already queued when Ctrl-C arrived are stopped as they start
                if let Err(e) = abort(&store, &active.id) {
                    debug!("Job {}: abort not delivered: {}", active.id, e);
                }
            } else {
                info!("{} [{}] {:>5.1}%", active.output_name, active.format, active.progress);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(if interrupted { 100 } else { 1000 })) => {}
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                warn!("Interrupted, aborting running conversions");
                for job in pending.drain(..) {
                    remove_staged(&job.source);
                }
            }
        }
    }

    pool.stop().await;
    let _ = fs::remove_dir(&staging_dir);

    let mut failures = 0;
    let mut report = Vec::new();
    for job in &submitted {
        let Some(status) = store.get(&job.id) else { continue };
        if status.succeeded() {
            let size = fs::metadata(&status.destination).map(|m| m.len()).unwrap_or(0);
            info!("✅ {} ({})", status.destination.display(), format_size(size, DECIMAL));
        } else if status.aborted() {
            warn!("⏹  {} aborted", status.destination.display());
            failures += 1;
        } else {
            error!("❌ {}: {}", status.destination.display(), status.error.as_deref().unwrap_or("unknown error"));
            failures += 1;
        }
        report.push(serde_json::json!({ "id": job.id, "status": status }));
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if failures > 0 {
        anyhow::bail!("{} of {} conversion(s) did not succeed", failures, submitted.len());
    }
    Ok(())
}

/// Copy an input into the staging area; the core deletes its source once done
fn stage_job(
    input: &Path,
    staging_dir: &Path,
    out_dir: &Path,
    format: TargetFormat,
    flags: ConversionFlags,
) -> Result<ConversionJob> {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Input has no file name: {}", input.display()))?;
    let file_name = input
        .file_name()
        .with_context(|| format!("Input has no file name: {}", input.display()))?;

    let destination = out_dir.join(format!("{}.{}", stem, format.extension()));
    let mut job = ConversionJob::new(PathBuf::new(), destination, format.extension(), flags);

    let staged = staging_dir.join(format!("{}-{}", job.id, file_name.to_string_lossy()));
    fs::copy(input, &staged)
        .with_context(|| format!("Failed to stage input: {} -> {}", input.display(), staged.display()))?;
    job.source = staged;
    Ok(job)
}

fn remove_staged(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("Failed to remove staged file {}: {}", path.display(), e);
    }
}
