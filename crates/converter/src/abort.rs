use log::{info, warn};

use crate::error::AbortError;
use crate::status::StatusStore;

/// Request termination of the encoder running job `id`.
///
/// Success means a signal was delivered, not that the job has stopped. The
/// status is flagged with the abort sentinel before signalling so the
/// supervisor classifies the resulting exit as an abort; the terminal state
/// itself is written by the supervisor once the process has exited.
pub fn abort(store: &StatusStore, id: &str) -> Result<(), AbortError> {
    let status = store.get(id).ok_or(AbortError::NotFound)?;
    if status.complete {
        return Err(AbortError::AlreadyComplete);
    }
    // No handle yet (queued) or any more (just exited)
    let handle = store.get_process(id).ok_or(AbortError::NotFound)?;

    if !store.request_abort(id) {
        return Err(AbortError::AlreadyComplete);
    }

    info!("Job {}: abort requested, terminating encoder pid {}", id, handle.pid);
    if let Err(term_err) = handle.terminate() {
        warn!("Job {}: graceful termination failed ({}), forcing kill", id, term_err);
        if let Err(kill_err) = handle.kill() {
            return signal_failed(store, id, format!("{}; {}", term_err, kill_err));
        }
    }

    Ok(())
}

/// Neither signal was delivered. The encoder may already have exited and the
/// job been finalized, in which case the stored outcome is reported instead.
fn signal_failed(store: &StatusStore, id: &str, reason: String) -> Result<(), AbortError> {
    store.clear_abort_request(id);
    match store.get(id) {
        Some(status) if status.aborted() => Ok(()),
        Some(status) if status.complete => Err(AbortError::AlreadyComplete),
        Some(_) => Err(AbortError::Signal(reason)),
        None => Err(AbortError::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ABORT_SENTINEL;
    use crate::job::{ConversionFlags, ConversionJob};
    use crate::status::{ConversionStatus, ProcessHandle};

    fn store_with_job() -> (StatusStore, String) {
        let job = ConversionJob::new("/in/a.mov", "/out/a.mp4", "mp4", ConversionFlags::default());
        let store = StatusStore::new();
        store.put(&job.id, ConversionStatus::new(&job));
        (store, job.id)
    }

    #[test]
    fn test_unknown_id_not_found() {
        let store = StatusStore::new();
        assert_eq!(abort(&store, "nope"), Err(AbortError::NotFound));
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn test_queued_job_not_found() {
        let (store, id) = store_with_job();
        assert_eq!(abort(&store, &id), Err(AbortError::NotFound));
        let status = store.get(&id).unwrap();
        assert!(!status.abort_requested);
        assert!(status.error.is_none());
    }

    #[test]
    fn test_completed_job_untouched() {
        let (store, id) = store_with_job();
        store.mark_succeeded(&id);
        let before = store.get(&id).unwrap();
        assert_eq!(abort(&store, &id), Err(AbortError::AlreadyComplete));
        let after = store.get(&id).unwrap();
        assert_eq!(after.error, before.error);
        assert_eq!(after.termination, before.termination);
        assert_eq!(after.progress, 100.0);
    }

    #[test]
    fn test_signal_failure_reported_and_rolled_back() {
        let (store, id) = store_with_job();
        store.register_process(&id, ProcessHandle::new(u32::MAX));
        let err = abort(&store, &id).unwrap_err();
        assert!(matches!(err, AbortError::Signal(_)));
        let status = store.get(&id).unwrap();
        assert!(!status.abort_requested);
        assert!(status.error.is_none());
    }

    #[test]
    fn test_signal_failure_after_job_finalized() {
        let (store, id) = store_with_job();
        store.request_abort(&id);
        store.mark_aborted(&id);
        assert_eq!(signal_failed(&store, &id, "ESRCH".to_string()), Ok(()));
        assert!(store.get(&id).unwrap().aborted());

        let (store, id) = store_with_job();
        store.request_abort(&id);
        store.mark_failed(&id, "encoder exited with code 1");
        assert_eq!(signal_failed(&store, &id, "ESRCH".to_string()), Err(AbortError::AlreadyComplete));

        let (store, id) = store_with_job();
        store.request_abort(&id);
        assert_eq!(
            signal_failed(&store, &id, "ESRCH".to_string()),
            Err(AbortError::Signal("ESRCH".to_string()))
        );
        assert!(!store.abort_requested(&id));
    }

    #[cfg(unix)]
    #[test]
    fn test_abort_running_process() {
        let (store, id) = store_with_job();
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        store.register_process(&id, ProcessHandle::new(child.id()));

        assert_eq!(abort(&store, &id), Ok(()));
        let status = store.get(&id).unwrap();
        assert!(status.abort_requested);
        assert!(!status.complete);
        assert_eq!(status.error.as_deref(), Some(ABORT_SENTINEL));
        assert!(!child.wait().unwrap().success());
    }
}
