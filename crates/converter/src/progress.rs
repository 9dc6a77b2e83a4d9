//! Translates the encoder's `key=value` progress stream into a percentage.
//!
//! With a known source duration every `out_time_us` line maps directly to
//! `out_time / duration * 100`. Without one the parser falls back to a
//! heuristic: each `out_time_us` or `frame` line adds a fixed step, at most
//! once per interval, and never past the ceiling. The parser stops at
//! `progress=end`; the final 100% is written by the supervisor when it
//! finalizes the job, never here.

use std::sync::Arc;
use std::time::{Duration, Instant};
use log::{debug, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::config::ConverterConfig;
use crate::status::StatusStore;

/// What the parser made of a single line
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineOutcome {
    /// Progress was raised to the given percentage
    Updated(f64),
    /// Recognized or skipped without changing progress
    Ignored,
    /// `progress=end` was seen; stop reading
    End,
}

pub struct ProgressParser {
    store: Arc<StatusStore>,
    job_id: String,
    step: f64,
    interval: Duration,
    ceiling: f64,
    last_tick: Option<Instant>,
}

impl ProgressParser {
    pub fn new(store: Arc<StatusStore>, job_id: &str, cfg: &ConverterConfig) -> Self {
        Self {
            store,
            job_id: job_id.to_string(),
            step: cfg.heuristic_step,
            interval: Duration::from_millis(cfg.heuristic_interval_ms),
            ceiling: cfg.heuristic_ceiling.clamp(0.0, 100.0),
            last_tick: None,
        }
    }

    /// Read the stream until `progress=end` or EOF. Undecodable lines are
    /// skipped; read errors are logged and end parsing, never the job.
    pub async fn consume<R>(mut self, mut reader: R)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    if self.handle_line(&line) == LineOutcome::End {
                        debug!("Job {}: encoder reported progress=end", self.job_id);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Job {}: error reading progress stream: {}", self.job_id, e);
                    break;
                }
            }
        }
    }

    pub fn handle_line(&mut self, line: &str) -> LineOutcome {
        self.handle_line_at(line, Instant::now())
    }

    fn handle_line_at(&mut self, line: &str, now: Instant) -> LineOutcome {
        let Some((key, value)) = line.trim().split_once('=') else {
            return LineOutcome::Ignored;
        };
        let value = value.trim();

        match key.trim() {
            "progress" if value == "end" => LineOutcome::End,
            "out_time_us" => {
                let duration = self.store.duration(&self.job_id);
                if duration > 0.0 {
                    match value.parse::<i64>() {
                        Ok(us) => {
                            let seconds = us.max(0) as f64 / 1_000_000.0;
                            self.raise((seconds / duration * 100.0).clamp(0.0, 100.0))
                        }
                        Err(_) => LineOutcome::Ignored,
                    }
                } else {
                    self.tick(now)
                }
            }
            "frame" if self.store.duration(&self.job_id) <= 0.0 => self.tick(now),
            _ => LineOutcome::Ignored,
        }
    }

    fn tick(&mut self, now: Instant) -> LineOutcome {
        if let Some(last) = self.last_tick {
            if now.saturating_duration_since(last) < self.interval {
                return LineOutcome::Ignored;
            }
        }
        self.last_tick = Some(now);
        let current = self.store.progress(&self.job_id);
        if current >= self.ceiling {
            return LineOutcome::Ignored;
        }
        self.raise((current + self.step).min(self.ceiling))
    }

    fn raise(&self, percentage: f64) -> LineOutcome {
        if self.store.raise_progress(&self.job_id, percentage) {
            LineOutcome::Updated(percentage)
        } else {
            LineOutcome::Ignored
        }
    }
}
