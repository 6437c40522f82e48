//! Serial work queues
//!
//! A [`WorkQueue`] is one worker thread draining a channel of jobs in
//! submission order. Sessions receive their queue through
//! [`SessionContext`](super::SessionContext); [`shared_work_queue`] provides
//! the process-wide queue per session kind for callers that do not bring
//! their own.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{JoinHandle, ThreadId};

use crossbeam::channel::{self, Receiver, Sender};

use super::error::{MediaError, MediaResult};
use super::session::SessionKind;
use crate::codec::lock;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Single-threaded, ordered job executor
pub struct WorkQueue {
  name: String,
  sender: Mutex<Option<Sender<Job>>>,
  worker: Mutex<Option<JoinHandle<()>>>,
  worker_id: ThreadId,
}

impl WorkQueue {
  pub fn new(name: impl Into<String>) -> MediaResult<Self> {
    let name = name.into();
    let (sender, receiver) = channel::unbounded::<Job>();
    let handle = std::thread::Builder::new()
      .name(name.clone())
      .spawn(move || Self::worker_loop(receiver))
      .map_err(|e| MediaError::abort(format!("failed to spawn {}: {}", name, e)))?;
    let worker_id = handle.thread().id();

    tracing::debug!(target: "webcodecs", queue = %name, "work queue started");
    Ok(Self {
      name,
      sender: Mutex::new(Some(sender)),
      worker: Mutex::new(Some(handle)),
      worker_id,
    })
  }

  fn worker_loop(receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
      if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::error!(target: "webcodecs", "work queue job panicked");
      }
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Whether the caller is running on this queue's worker thread
  pub fn is_current(&self) -> bool {
    std::thread::current().id() == self.worker_id
  }

  /// Queue `job` behind everything dispatched so far. Returns false once the
  /// queue has been shut down.
  pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
    self.try_dispatch(Box::new(job)).is_ok()
  }

  /// Like [`dispatch`](Self::dispatch), handing the job back when refused
  pub fn try_dispatch(&self, job: Job) -> Result<(), Job> {
    match lock(&self.sender).as_ref() {
      Some(sender) => sender.send(job).map_err(|e| e.into_inner()),
      None => Err(job),
    }
  }

  /// Stop accepting jobs, run the ones already queued, and join the worker.
  /// Called from a job on this queue it only stops accepting jobs.
  pub fn shutdown(&self) {
    lock(&self.sender).take();
    if self.is_current() {
      return;
    }
    if let Some(handle) = lock(&self.worker).take() {
      let _ = handle.join();
      tracing::debug!(target: "webcodecs", queue = %self.name, "work queue stopped");
    }
  }
}

impl Drop for WorkQueue {
  fn drop(&mut self) {
    self.shutdown();
  }
}

static SHARED_QUEUES: Mutex<Vec<(SessionKind, Arc<WorkQueue>)>> = Mutex::new(Vec::new());

/// Process-wide queue for one session kind, created on first use
pub fn shared_work_queue(kind: SessionKind) -> MediaResult<Arc<WorkQueue>> {
  let mut queues = lock(&SHARED_QUEUES);
  if let Some((_, queue)) = queues.iter().find(|(k, _)| *k == kind) {
    return Ok(queue.clone());
  }
  let queue = Arc::new(WorkQueue::new(kind.queue_name())?);
  queues.push((kind, queue.clone()));
  Ok(queue)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn test_jobs_run_in_submission_order() {
    let queue = WorkQueue::new("test queue").unwrap();
    let (tx, rx) = channel::unbounded();
    for i in 0..100 {
      let tx = tx.clone();
      assert!(queue.dispatch(move || tx.send(i).unwrap()));
    }
    let received: Vec<i32> = (0..100)
      .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
      .collect();
    assert_eq!(received, (0..100).collect::<Vec<_>>());
  }

  #[test]
  fn test_panicking_job_does_not_kill_queue() {
    let queue = WorkQueue::new("test queue").unwrap();
    queue.dispatch(|| panic!("boom"));
    let (tx, rx) = channel::bounded(1);
    queue.dispatch(move || tx.send(()).unwrap());
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
  }

  #[test]
  fn test_dispatch_after_shutdown_is_refused() {
    let queue = WorkQueue::new("test queue").unwrap();
    queue.shutdown();
    assert!(!queue.dispatch(|| {}));
  }

  #[test]
  fn test_is_current() {
    let queue = Arc::new(WorkQueue::new("test queue").unwrap());
    assert!(!queue.is_current());
    let (tx, rx) = channel::bounded(1);
    let inner = queue.clone();
    queue.dispatch(move || tx.send(inner.is_current()).unwrap());
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
  }

  #[test]
  fn test_shared_queue_is_reused_per_kind() {
    let a = shared_work_queue(SessionKind::AudioDecoder).unwrap();
    let b = shared_work_queue(SessionKind::AudioDecoder).unwrap();
    let c = shared_work_queue(SessionKind::VideoEncoder).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
  }
}
