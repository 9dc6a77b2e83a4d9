use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::config::ConverterConfig;
use crate::error::ConversionError;
use crate::ffprobe;
use crate::formats::{CommandBuilder, TargetFormat};
use crate::job::ConversionJob;
use crate::metadata;
use crate::progress::ProgressParser;
use crate::status::{ProcessGuard, ProcessHandle, StatusStore};

/// Number of trailing encoder log lines kept for error messages
const STDERR_TAIL_LINES: usize = 20;

/// How a job's encoder run ended, before cleanup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    /// Failed before the encoder was started; nothing was written
    Rejected(ConversionError),
    /// Failed after the encoder ran; its output may be partial
    Failed(ConversionError),
    Aborted,
}

/// Runs one conversion job at a time on behalf of a worker
pub struct Supervisor {
    cfg: ConverterConfig,
    store: Arc<StatusStore>,
    builder: CommandBuilder,
}

impl Supervisor {
    pub fn new(cfg: ConverterConfig, store: Arc<StatusStore>) -> Self {
        Self { cfg, store, builder: CommandBuilder::new() }
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.cfg
    }

    /// Run `job` to a terminal state. Every failure is written to the job's
    /// status record; nothing is returned to the caller.
    pub async fn run_job(&self, job: ConversionJob) {
        info!("Job {}: converting {} to {} ({})", job.id, job.source.display(), job.destination.display(), job.format);
        let outcome = self.execute(&job).await;
        self.finish(&job, outcome).await;
    }

    async fn execute(&self, job: &ConversionJob) -> Outcome {
        // Configuration errors fail before anything is spawned
        let args = match job
            .format
            .parse::<TargetFormat>()
            .and_then(|format| self.builder.build_encode_command(&job.source, &job.destination, format, job.flags))
        {
            Ok(args) => args,
            Err(e) => {
                error!("Job {}: {}", job.id, e);
                return Outcome::Rejected(e);
            }
        };

        match ffprobe::probe_duration(&self.cfg, &job.source).await {
            Ok(duration) => {
                info!("Job {}: source duration {:.2}s", job.id, duration);
                self.store.set_duration(&job.id, duration);
            }
            Err(e) => {
                warn!("Job {}: duration probe failed, using estimated progress: {:#}", job.id, e);
            }
        }

        if let Some(parent) = job.destination.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!("Job {}: failed to create {}: {}", job.id, parent.display(), e);
                return Outcome::Rejected(ConversionError::Prepare(format!(
                    "cannot create output directory {}: {}",
                    parent.display(),
                    e
                )));
            }
        }

        self.run_encoder(job, args).await
    }

    async fn run_encoder(&self, job: &ConversionJob, args: Vec<String>) -> Outcome {
        debug!("Job {}: executing {} {}", job.id, self.cfg.ffmpeg_bin.display(), args.join(" "));

        let mut cmd = Command::new(&self.cfg.ffmpeg_bin);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Job {}: failed to spawn {}: {}", job.id, self.cfg.ffmpeg_bin.display(), e);
                return Outcome::Rejected(ConversionError::Spawn(format!(
                    "{}: {}",
                    self.cfg.ffmpeg_bin.display(),
                    e
                )));
            }
        };

        // Registered before the process is visible to abort; released after it is reaped
        let guard = child
            .id()
            .map(|pid| ProcessGuard::register(self.store.clone(), &job.id, ProcessHandle::new(pid)));
        if let Some(pid) = child.id() {
            debug!("Job {}: encoder running as pid {}", job.id, pid);
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let parser = ProgressParser::new(self.store.clone(), &job.id, &self.cfg);
        let progress_handle = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut reader = BufReader::new(stdout);
                parser.consume(&mut reader).await;
                // Keep the pipe drained after progress=end or a bad line
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
            }
        });
        let stderr_handle = tokio::spawn(async move {
            match stderr {
                Some(stderr) => drain_diagnostics(stderr).await,
                None => Vec::new(),
            }
        });

        if let Err(e) = progress_handle.await {
            warn!("Job {}: progress reader task failed: {}", job.id, e);
        }
        let stderr_tail = match stderr_handle.await {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Job {}: stderr reader task failed: {}", job.id, e);
                Vec::new()
            }
        };

        let wait_result = child.wait().await;
        drop(guard);

        let status = match wait_result {
            Ok(status) => status,
            Err(e) => {
                error!("Job {}: failed to wait for encoder: {}", job.id, e);
                return Outcome::Failed(ConversionError::Spawn(format!("wait failed: {}", e)));
            }
        };

        if self.store.abort_requested(&job.id) {
            info!("Job {}: encoder exited after abort ({})", job.id, status);
            return Outcome::Aborted;
        }

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            error!("Job {}: encoder failed with exit code {}", job.id, code);
            return Outcome::Failed(ConversionError::ExitStatus { code, stderr: stderr_tail.join("\n") });
        }

        classify_output(&job.destination).await
    }

    /// Clean up after a job whose task died without reaching `finish`
    pub async fn abandon(&self, job: &ConversionJob, error: ConversionError) {
        self.finish(job, Outcome::Failed(error)).await;
    }

    async fn finish(&self, job: &ConversionJob, outcome: Outcome) {
        match &outcome {
            Outcome::Succeeded => {
                match metadata::copy_metadata(&self.cfg, &job.source, &job.destination).await {
                    Ok(true) => debug!("Job {}: metadata copied", job.id),
                    Ok(false) => {}
                    Err(e) => warn!("Job {}: metadata copy failed: {:#}", job.id, e),
                }
            }
            Outcome::Failed(_) | Outcome::Aborted => {
                remove_file_logged(&job.id, &job.destination).await;
            }
            // The destination may belong to someone else
            Outcome::Rejected(_) => {}
        }

        remove_file_logged(&job.id, &job.source).await;

        match outcome {
            Outcome::Succeeded => {
                self.store.mark_succeeded(&job.id);
                info!("Job {}: ✅ conversion complete: {}", job.id, job.destination.display());
            }
            Outcome::Rejected(e) | Outcome::Failed(e) => {
                self.store.mark_failed(&job.id, &e.to_string());
                error!("Job {}: ❌ conversion failed: {}", job.id, e);
            }
            Outcome::Aborted => {
                self.store.mark_aborted(&job.id);
                info!("Job {}: conversion aborted by user", job.id);
            }
        }
    }
}

/// A clean exit still needs a non-empty output file
async fn classify_output(destination: &Path) -> Outcome {
    match tokio::fs::metadata(destination).await {
        Ok(meta) if meta.len() > 0 => Outcome::Succeeded,
        Ok(_) => Outcome::Failed(ConversionError::EmptyOutput),
        Err(_) => Outcome::Failed(ConversionError::MissingOutput),
    }
}

/// Read the encoder's log to EOF, keeping the last few lines.
/// Invalid UTF-8 is replaced rather than ending the read.
async fn drain_diagnostics<R: AsyncRead + Unpin>(stream: R) -> Vec<String> {
    let mut reader = BufReader::new(stream);
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if line.is_empty() {
                    continue;
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Err(e) => {
                warn!("error reading encoder log: {}", e);
                break;
            }
        }
    }
    tail.into_iter().collect()
}

async fn remove_file_logged(job_id: &str, path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Job {}: 🗑️  deleted {}", job_id, path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Job {}: failed to delete {}: {}", job_id, path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ConversionFlags;
    use crate::status::ConversionStatus;

    fn supervisor(cfg: ConverterConfig) -> Supervisor {
        Supervisor::new(cfg, Arc::new(StatusStore::new()))
    }

    #[tokio::test]
    async fn test_drain_keeps_tail_and_survives_bad_utf8() {
        let mut input = Vec::new();
        for i in 0..30 {
            input.extend_from_slice(format!("line {}\n", i).as_bytes());
        }
        input.extend_from_slice(b"bad \xff byte\n");
        let tail = drain_diagnostics(&input[..]).await;
        assert_eq!(tail.len(), STDERR_TAIL_LINES);
        assert_eq!(tail[0], "line 11");
        assert_eq!(tail.last().unwrap(), "bad \u{fffd} byte");
    }

    #[tokio::test]
    async fn test_classify_output() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp4");
        assert_eq!(classify_output(&missing).await, Outcome::Failed(ConversionError::MissingOutput));

        let empty = dir.path().join("empty.mp4");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(classify_output(&empty).await, Outcome::Failed(ConversionError::EmptyOutput));

        let full = dir.path().join("full.mp4");
        std::fs::write(&full, b"frames").unwrap();
        assert_eq!(classify_output(&full).await, Outcome::Succeeded);
    }

    #[tokio::test]
    async fn test_unsupported_format_fails_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.mov");
        std::fs::write(&source, b"data").unwrap();

        let cfg = ConverterConfig {
            ffmpeg_bin: "/nonexistent/ffmpeg".into(),
            ffprobe_bin: "/nonexistent/ffprobe".into(),
            exiftool_bin: None,
            ..Default::default()
        };
        let sup = supervisor(cfg);
        let job = ConversionJob::new(&source, dir.path().join("out.xyz"), "xyz", ConversionFlags::default());
        sup.store().put(&job.id, ConversionStatus::new(&job));

        sup.run_job(job.clone()).await;

        let status = sup.store().get(&job.id).unwrap();
        assert!(status.complete);
        assert_eq!(status.error.as_deref(), Some("unsupported target format: xyz"));
        assert!(!source.exists(), "source is removed once the job is terminal");
        assert!(sup.store().get_process(&job.id).is_none());
    }

    #[tokio::test]
    async fn test_rejected_job_leaves_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.mov");
        std::fs::write(&source, b"data").unwrap();
        let destination = dir.path().join("out.xyz");
        std::fs::write(&destination, b"not ours").unwrap();

        let cfg = ConverterConfig {
            ffmpeg_bin: "/nonexistent/ffmpeg".into(),
            ffprobe_bin: "/nonexistent/ffprobe".into(),
            exiftool_bin: None,
            ..Default::default()
        };
        let sup = supervisor(cfg);

        let job = ConversionJob::new(&source, &destination, "xyz", ConversionFlags::default());
        sup.store().put(&job.id, ConversionStatus::new(&job));
        sup.run_job(job.clone()).await;
        assert!(sup.store().get(&job.id).unwrap().complete);
        assert_eq!(std::fs::read(&destination).unwrap(), b"not ours");

        // Encoder binary missing: still nothing was written
        std::fs::write(&source, b"data").unwrap();
        let existing = dir.path().join("out.mp4");
        std::fs::write(&existing, b"not ours either").unwrap();
        let job = ConversionJob::new(&source, &existing, "mp4", ConversionFlags::default());
        sup.store().put(&job.id, ConversionStatus::new(&job));
        sup.run_job(job.clone()).await;
        assert!(sup.store().get(&job.id).unwrap().error.unwrap().starts_with("failed to start encoder"));
        assert_eq!(std::fs::read(&existing).unwrap(), b"not ours either");
    }

    #[tokio::test]
    async fn test_abandon_cleans_up_and_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.mov");
        let destination = dir.path().join("out.mp4");
        std::fs::write(&source, b"data").unwrap();
        std::fs::write(&destination, b"partial").unwrap();

        let sup = supervisor(ConverterConfig::default());
        let job = ConversionJob::new(&source, &destination, "mp4", ConversionFlags::default());
        sup.store().put(&job.id, ConversionStatus::new(&job));

        sup.abandon(&job, ConversionError::Crashed("task panicked".to_string())).await;

        let status = sup.store().get(&job.id).unwrap();
        assert!(status.complete);
        assert_eq!(status.error.as_deref(), Some("conversion worker crashed: task panicked"));
        assert!(!source.exists());
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_missing_encoder_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.mov");
        std::fs::write(&source, b"data").unwrap();

        let cfg = ConverterConfig {
            ffmpeg_bin: "/nonexistent/ffmpeg".into(),
            ffprobe_bin: "/nonexistent/ffprobe".into(),
            exiftool_bin: None,
            ..Default::default()
        };
        let sup = supervisor(cfg);
        let job = ConversionJob::new(&source, dir.path().join("nested/out.mp4"), "mp4", ConversionFlags::default());
        sup.store().put(&job.id, ConversionStatus::new(&job));

        sup.run_job(job.clone()).await;

        let status = sup.store().get(&job.id).unwrap();
        assert!(status.complete);
        assert!(!status.succeeded());
        assert!(status.error.unwrap().starts_with("failed to start encoder"));
        assert_eq!(status.duration_secs, 0.0);
        assert!(dir.path().join("nested").is_dir());
    }
}
