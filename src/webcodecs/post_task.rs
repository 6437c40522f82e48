//! Posting contexts
//!
//! Sessions never call user callbacks from a worker or element thread; they
//! post a task to the [`TaskPoster`] the caller supplied. Posted tasks run in
//! submission order relative to each other.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::mpsc;

use super::work_queue::WorkQueue;
use crate::codec::lock;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Execution context results are delivered on
pub trait TaskPoster: Send + Sync {
  fn post_task(&self, task: Task);
}

impl<F> TaskPoster for F
where
  F: Fn(Task) + Send + Sync,
{
  fn post_task(&self, task: Task) {
    self(task)
  }
}

impl TaskPoster for WorkQueue {
  fn post_task(&self, task: Task) {
    if !self.dispatch(task) {
      tracing::warn!(target: "webcodecs", queue = %self.name(), "dropping task posted after shutdown");
    }
  }
}

/// Collects tasks until the owner runs them with [`run_pending`](Self::run_pending)
#[derive(Default)]
pub struct ManualPoster {
  tasks: Mutex<VecDeque<Task>>,
}

impl ManualPoster {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn pending(&self) -> usize {
    lock(&self.tasks).len()
  }

  /// Run queued tasks, including ones posted while running, until none are
  /// left. Returns the number of tasks run.
  pub fn run_pending(&self) -> usize {
    let mut ran = 0;
    loop {
      let task = lock(&self.tasks).pop_front();
      match task {
        Some(task) => {
          task();
          ran += 1;
        }
        None => return ran,
      }
    }
  }
}

impl TaskPoster for ManualPoster {
  fn post_task(&self, task: Task) {
    lock(&self.tasks).push_back(task);
  }
}

/// Runs posted tasks, in order, on a tokio runtime
pub struct TokioPoster {
  sender: mpsc::UnboundedSender<Task>,
}

impl TokioPoster {
  /// Spawn the draining task on `handle`
  pub fn new(handle: &tokio::runtime::Handle) -> Self {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
    handle.spawn(async move {
      while let Some(task) = receiver.recv().await {
        task();
      }
    });
    Self { sender }
  }
}

impl TaskPoster for TokioPoster {
  fn post_task(&self, task: Task) {
    if self.sender.send(task).is_err() {
      tracing::warn!(target: "webcodecs", "runtime gone, dropping posted task");
    }
  }
}
