//! Bounded job queue and worker pool.
//!
//! `submit` never waits: when `2 × worker_count` jobs are already queued
//! the job is rejected with `SubmitError::QueueFull` so the caller can report
//! the server as busy. Each worker runs one job at a time.

use std::sync::{Arc, Mutex, PoisonError};
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::error::{ConversionError, SubmitError};
use crate::job::ConversionJob;
use crate::supervisor::Supervisor;

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<ConversionJob>>>;

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<ConversionJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    capacity: usize,
}

impl WorkerPool {
    /// Launch `worker_count` workers (at least one). Must be called from
    /// within a tokio runtime.
    pub fn start(worker_count: usize, supervisor: Arc<Supervisor>) -> Self {
        let worker_count = worker_count.max(1);
        let capacity = worker_count * 2;
        let (sender, receiver) = mpsc::channel::<ConversionJob>(capacity);
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..worker_count)
            .map(|index| tokio::spawn(worker_loop(index, receiver.clone(), supervisor.clone())))
            .collect();

        info!("Worker pool started: {} workers, queue capacity {}", worker_count, capacity);

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            worker_count,
            capacity,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_capacity(&self) -> usize {
        self.capacity
    }

    /// Queue `job` without blocking
    pub fn submit(&self, job: ConversionJob) -> Result<(), SubmitError> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            return Err(SubmitError::Stopped);
        };
        let id = job.id.clone();
        match sender.try_send(job) {
            Ok(()) => {
                debug!("Job {}: queued", id);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!("Job {}: rejected, queue full ({} pending)", id, self.capacity);
                Err(SubmitError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(SubmitError::Stopped),
        }
    }

    /// Close intake and wait for queued and in-flight jobs to finish
    pub async fn stop(&self) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        info!("Worker pool stopping, waiting for {} workers", workers.len());
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(index: usize, receiver: SharedReceiver, supervisor: Arc<Supervisor>) {
    debug!("Worker {} started", index);
    loop {
        // Only the idle worker waiting here holds the lock; it is released before the job runs
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        let id = job.id.clone();
        info!("Worker {}: picked up job {}", index, id);

        // A panicking job must not take the worker down with it
        let sup = supervisor.clone();
        let task_job = job.clone();
        if let Err(e) = tokio::spawn(async move { sup.run_job(task_job).await }).await {
            error!("Job {}: conversion task crashed: {}", id, e);
            supervisor.abandon(&job, ConversionError::Crashed(e.to_string())).await;
        }
    }
    debug!("Worker {} exiting, queue closed", index);
}
