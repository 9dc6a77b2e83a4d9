//! Shared status table for conversions.
//!
//! `StatusStore` owns two independently locked tables: status records by
//! job id and handles of running encoder processes by job id. Records are
//! only reachable through the store's methods; reads hand out clones so a
//! poller never observes a half-written record, and every write goes
//! through one of the narrow mutators below.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::Serialize;

use crate::error::ABORT_SENTINEL;
use crate::job::{output_name, ConversionJob};
use crate::signal;

/// How a finished job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationReason {
    Completed,
    Failed,
    Aborted,
}

/// Mutable progress record for one job
#[derive(Debug, Clone, Serialize)]
pub struct ConversionStatus {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub format: String,
    /// 0.0 to 100.0, never decreasing while the job runs
    pub progress: f64,
    pub complete: bool,
    pub error: Option<String>,
    /// Probed source duration in seconds, 0 when unknown
    pub duration_secs: f64,
    pub termination: Option<TerminationReason>,
    pub abort_requested: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ConversionStatus {
    /// Initial record for a job about to be submitted
    pub fn new(job: &ConversionJob) -> Self {
        Self {
            source: job.source.clone(),
            destination: job.destination.clone(),
            format: job.format.clone(),
            progress: 0.0,
            complete: false,
            error: None,
            duration_secs: 0.0,
            termination: None,
            abort_requested: false,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.termination == Some(TerminationReason::Completed)
    }

    pub fn aborted(&self) -> bool {
        self.termination == Some(TerminationReason::Aborted)
    }
}

/// Summary of a running job, as returned by `StatusStore::list_active`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveJob {
    pub id: String,
    pub output_name: String,
    pub format: String,
    pub progress: f64,
}

/// Reference to a running encoder process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    /// Ask the process to exit
    pub fn terminate(&self) -> Result<(), String> {
        signal::terminate(self.pid)
    }

    /// Force the process to exit
    pub fn kill(&self) -> Result<(), String> {
        signal::kill(self.pid)
    }
}

#[derive(Debug, Default)]
pub struct StatusStore {
    statuses: Mutex<HashMap<String, ConversionStatus>>,
    processes: Mutex<HashMap<String, ProcessHandle>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking writer cannot leave a record half-updated (all updates are
    // single assignments under the lock), so a poisoned table is still usable.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the status record for `id`
    pub fn put(&self, id: &str, status: ConversionStatus) {
        lock(&self.statuses).insert(id.to_string(), status);
    }

    /// Copy of the status record for `id`
    pub fn get(&self, id: &str) -> Option<ConversionStatus> {
        lock(&self.statuses).get(id).cloned()
    }

    /// Evict a status record. Never called by the core itself.
    pub fn remove(&self, id: &str) -> Option<ConversionStatus> {
        lock(&self.statuses).remove(id)
    }

    /// Evict completed records that finished more than `max_age` ago.
    /// Returns the number of records removed.
    pub fn evict_finished(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut statuses = lock(&self.statuses);
        let before = statuses.len();
        statuses.retain(|_, s| !(s.complete && s.finished_at.map_or(false, |t| t <= cutoff)));
        before - statuses.len()
    }

    /// Record the probed source duration
    pub fn set_duration(&self, id: &str, duration_secs: f64) {
        if let Some(status) = lock(&self.statuses).get_mut(id) {
            if !status.complete {
                status.duration_secs = duration_secs.max(0.0);
            }
        }
    }

    /// Source duration recorded for `id`, 0 when unknown
    pub fn duration(&self, id: &str) -> f64 {
        lock(&self.statuses).get(id).map_or(0.0, |s| s.duration_secs)
    }

    /// Current progress of `id`, 0 when unknown
    pub fn progress(&self, id: &str) -> f64 {
        lock(&self.statuses).get(id).map_or(0.0, |s| s.progress)
    }

    /// Raise the progress of a running job. Values are clamped to 0..=100 and
    /// ignored unless they exceed the stored value. Returns true if stored.
    pub fn raise_progress(&self, id: &str, percentage: f64) -> bool {
        if !percentage.is_finite() {
            return false;
        }
        let percentage = percentage.clamp(0.0, 100.0);
        match lock(&self.statuses).get_mut(id) {
            Some(status) if !status.complete && percentage > status.progress => {
                status.progress = percentage;
                true
            }
            _ => false,
        }
    }

    /// Finalize `id` as succeeded. No-op (false) if already complete.
    pub fn mark_succeeded(&self, id: &str) -> bool {
        self.finalize(id, TerminationReason::Completed, None)
    }

    /// Finalize `id` as failed with `message`. No-op (false) if already complete.
    pub fn mark_failed(&self, id: &str, message: &str) -> bool {
        self.finalize(id, TerminationReason::Failed, Some(message.to_string()))
    }

    /// Finalize `id` as aborted by the user. No-op (false) if already complete.
    pub fn mark_aborted(&self, id: &str) -> bool {
        self.finalize(id, TerminationReason::Aborted, Some(ABORT_SENTINEL.to_string()))
    }

    fn finalize(&self, id: &str, reason: TerminationReason, error: Option<String>) -> bool {
        let mut statuses = lock(&self.statuses);
        let Some(status) = statuses.get_mut(id) else {
            return false;
        };
        if status.complete {
            return false;
        }
        if reason == TerminationReason::Completed {
            status.progress = 100.0;
        }
        status.error = error;
        status.termination = Some(reason);
        status.finished_at = Some(Utc::now());
        status.complete = true;
        true
    }

    /// Flag a running job as aborted by the user and set the abort sentinel.
    /// Returns false if the record is missing or already complete.
    pub fn request_abort(&self, id: &str) -> bool {
        match lock(&self.statuses).get_mut(id) {
            Some(status) if !status.complete => {
                status.abort_requested = true;
                status.error = Some(ABORT_SENTINEL.to_string());
                true
            }
            _ => false,
        }
    }

    /// Undo `request_abort` when no signal could be delivered
    pub fn clear_abort_request(&self, id: &str) {
        if let Some(status) = lock(&self.statuses).get_mut(id) {
            if !status.complete && status.abort_requested {
                status.abort_requested = false;
                status.error = None;
            }
        }
    }

    pub fn abort_requested(&self, id: &str) -> bool {
        lock(&self.statuses).get(id).map_or(false, |s| s.abort_requested)
    }

    /// Jobs with a registered process that have not completed yet
    pub fn list_active(&self) -> Vec<ActiveJob> {
        let ids: Vec<String> = lock(&self.processes).keys().cloned().collect();
        let statuses = lock(&self.statuses);
        let mut active: Vec<ActiveJob> = ids
            .into_iter()
            .filter_map(|id| {
                let status = statuses.get(&id)?;
                if status.complete {
                    return None;
                }
                Some(ActiveJob {
                    id,
                    output_name: output_name(&status.destination),
                    format: status.format.clone(),
                    progress: status.progress,
                })
            })
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    /// Register the running process for `id`.
    /// Returns false (and keeps the existing handle) if one is already registered.
    pub fn register_process(&self, id: &str, handle: ProcessHandle) -> bool {
        let mut processes = lock(&self.processes);
        if processes.contains_key(id) {
            return false;
        }
        processes.insert(id.to_string(), handle);
        true
    }

    pub fn unregister_process(&self, id: &str) -> Option<ProcessHandle> {
        lock(&self.processes).remove(id)
    }

    pub fn get_process(&self, id: &str) -> Option<ProcessHandle> {
        lock(&self.processes).get(id).copied()
    }
}

/// Keeps a process handle registered for as long as the guard lives
#[derive(Debug)]
pub struct ProcessGuard {
    store: Arc<StatusStore>,
    id: String,
}

impl ProcessGuard {
    /// Register `handle` for `id`; the handle is unregistered when the guard drops
    pub fn register(store: Arc<StatusStore>, id: &str, handle: ProcessHandle) -> Self {
        if !store.register_process(id, handle) {
            debug!("Job {}: replacing stale process handle", id);
            store.unregister_process(id);
            store.register_process(id, handle);
        }
        Self { store, id: id.to_string() }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.store.unregister_process(&self.id);
        debug!("Job {}: process handle released", self.id);
    }
}
