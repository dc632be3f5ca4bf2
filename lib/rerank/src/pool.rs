// Fixed-size worker pool for model inference.
// Callers submit a scoring job and block on a reply channel until a
// worker has run it. Panics inside a scorer are caught on the worker and
// returned as inference errors.

use crate::scorer::Scorer;
use geoknn_core::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    jobs: Mutex<VecDeque<Job>>,
    condvar: Condvar,
    running: AtomicBool,
    started: AtomicU64,
}

pub struct InferencePool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl InferencePool {
    /// Start `size` worker threads (at least one)
    pub fn new(size: usize) -> Result<Self> {
        let shared = Arc::new(Shared {
            jobs: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            running: AtomicBool::new(true),
            started: AtomicU64::new(0),
        });

        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("inference-worker-{}", worker_id))
                .spawn(move || worker_loop(&shared))?;
            workers.push(handle);
        }
        tracing::debug!(workers = size, "started inference pool");
        Ok(Self { shared, workers })
    }

    /// One worker per available core
    pub fn with_available_parallelism() -> Result<Self> {
        let size = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new(size)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn pending_jobs(&self) -> usize {
        self.shared.jobs.lock().len()
    }

    /// Jobs picked up by a worker so far
    pub fn jobs_started(&self) -> u64 {
        self.shared.started.load(Ordering::Relaxed)
    }

    fn submit(&self, job: Job) {
        let mut jobs = self.shared.jobs.lock();
        jobs.push_back(job);
        self.shared.condvar.notify_one();
    }

    /// Run `scorer` on a worker and wait for its scores.
    ///
    /// The result has exactly one finite score per candidate; anything else
    /// is an inference error.
    pub fn score(&self, scorer: Arc<dyn Scorer>, anchor: Vec<f32>, candidates: Vec<Vec<f32>>) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let expected = candidates.len();
        let (tx, rx) = mpsc::sync_channel(1);
        self.submit(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| scorer.score(&anchor, &candidates)))
                .unwrap_or_else(|payload| {
                    Err(Error::Inference(format!(
                        "{} scorer panicked: {}",
                        scorer.kind(),
                        panic_message(payload.as_ref())
                    )))
                });
            // The caller may have gone away; nothing to report to then
            let _ = tx.send(outcome);
        }));

        let scores = rx
            .recv()
            .map_err(|_| Error::Inference("inference worker dropped the request".into()))??;
        if scores.len() != expected {
            return Err(Error::Inference(format!(
                "scorer returned {} scores for {} candidates",
                scores.len(),
                expected
            )));
        }
        if let Some(i) = scores.iter().position(|s| !s.is_finite()) {
            return Err(Error::Inference(format!("non-finite score for candidate {}", i)));
        }
        Ok(scores)
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut jobs = shared.jobs.lock();
            while jobs.is_empty() && shared.running.load(Ordering::Acquire) {
                shared.condvar.wait(&mut jobs);
            }
            match jobs.pop_front() {
                Some(job) => job,
                // Queue drained and shutting down
                None => break,
            }
        };
        shared.started.fetch_add(1, Ordering::Relaxed);
        job();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Drop for InferencePool {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.condvar.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
