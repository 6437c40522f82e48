//! Threaded queue element
//!
//! Runs a wrapped element on a dedicated worker thread so that its output
//! reaches the pads asynchronously, decoupled from the thread that pushed the
//! input. Flush-start bypasses the queue; everything else is serialized.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};

use crate::codec::element::{Element, EventDisposition, SrcPad, push_event_to_all};
use crate::codec::{Buffer, Event, Format, HarnessError, HarnessResult, lock};

/// Items travelling to the worker thread, tagged with the flush epoch they
/// were queued in
enum QueueItem {
  Buffer(Buffer),
  Event(Event),
}

struct QueueShared {
  inner: Mutex<Box<dyn Element>>,
  pads: Mutex<Vec<SrcPad>>,
  /// Bumped on every flush-start; items from older epochs are discarded
  epoch: AtomicU64,
}

/// Element wrapper running `inner` on its own streaming thread
pub struct QueueElement {
  name: String,
  shared: Arc<QueueShared>,
  sender: Option<Sender<(u64, QueueItem)>>,
  receiver: Receiver<(u64, QueueItem)>,
  worker: Option<JoinHandle<()>>,
}

impl QueueElement {
  pub fn new(inner: Box<dyn Element>) -> Self {
    let name = format!("queue:{}", inner.name());
    let (sender, receiver) = channel::unbounded();
    Self {
      name,
      shared: Arc::new(QueueShared {
        inner: Mutex::new(inner),
        pads: Mutex::new(Vec::new()),
        epoch: AtomicU64::new(0),
      }),
      sender: Some(sender),
      receiver,
      worker: None,
    }
  }

  fn enqueue(&self, item: QueueItem) -> HarnessResult<()> {
    let epoch = self.shared.epoch.load(Ordering::SeqCst);
    match &self.sender {
      Some(sender) => sender
        .send((epoch, item))
        .map_err(|_| HarnessError::Processing("queue worker stopped".to_string())),
      None => Err(HarnessError::Closed),
    }
  }

  fn worker_loop(shared: Arc<QueueShared>, receiver: Receiver<(u64, QueueItem)>) {
    while let Ok((epoch, item)) = receiver.recv() {
      let current = shared.epoch.load(Ordering::SeqCst);
      match item {
        QueueItem::Buffer(buffer) => {
          if epoch != current {
            continue;
          }
          let result = lock(&shared.inner).chain(buffer);
          if let Err(e) = result {
            tracing::warn!(target: "harness", "queued element failed: {}", e);
            let pads = lock(&shared.pads).clone();
            push_event_to_all(&pads, &Event::Error(e.to_string()));
          }
        }
        QueueItem::Event(event) => {
          // Flush-stop closes the epoch it was queued in, never skip it
          if epoch != current && event != Event::FlushStop {
            continue;
          }
          let disposition = lock(&shared.inner).handle_event(&event);
          let pads = lock(&shared.pads).clone();
          match disposition {
            Ok(EventDisposition::Forward) => {
              push_event_to_all(&pads, &event);
            }
            Ok(EventDisposition::Handled) => {}
            Err(e) => {
              push_event_to_all(&pads, &Event::Error(e.to_string()));
            }
          }
        }
      }
    }
    tracing::trace!(target: "harness", "queue worker exiting");
  }
}

impl Element for QueueElement {
  fn name(&self) -> &str {
    &self.name
  }

  fn src_pad_count(&self) -> usize {
    lock(&self.shared.inner).src_pad_count()
  }

  fn negotiate(&mut self, format: &Format, pads: &[SrcPad]) -> HarnessResult<()> {
    lock(&self.shared.inner).negotiate(format, pads)?;
    *lock(&self.shared.pads) = pads.to_vec();

    if self.worker.is_none() {
      let shared = self.shared.clone();
      let receiver = self.receiver.clone();
      let handle = std::thread::Builder::new()
        .name(self.name.clone())
        .spawn(move || Self::worker_loop(shared, receiver))
        .map_err(|e| HarnessError::ElementCreation(format!("failed to spawn worker: {}", e)))?;
      self.worker = Some(handle);
    }
    Ok(())
  }

  fn chain(&mut self, buffer: Buffer) -> HarnessResult<()> {
    self.enqueue(QueueItem::Buffer(buffer))
  }

  fn handle_event(&mut self, event: &Event) -> HarnessResult<EventDisposition> {
    if *event == Event::FlushStart {
      self.shared.epoch.fetch_add(1, Ordering::SeqCst);
      let mut dropped = 0usize;
      while self.receiver.try_recv().is_ok() {
        dropped += 1;
      }
      tracing::trace!(target: "harness", element = %self.name, dropped, "flushing queue");

      let disposition = lock(&self.shared.inner).handle_event(event)?;
      if disposition == EventDisposition::Forward {
        let pads = lock(&self.shared.pads).clone();
        push_event_to_all(&pads, event);
      }
      return Ok(EventDisposition::Handled);
    }

    self.enqueue(QueueItem::Event(event.clone()))?;
    Ok(EventDisposition::Handled)
  }

  fn teardown(&mut self) {
    self.shared.epoch.fetch_add(1, Ordering::SeqCst);
    while self.receiver.try_recv().is_ok() {}
    self.sender = None;
    if let Some(handle) = self.worker.take() {
      let _ = handle.join();
    }
    lock(&self.shared.pads).clear();
    lock(&self.shared.inner).teardown();
  }
}

impl Drop for QueueElement {
  fn drop(&mut self) {
    self.teardown();
  }
}
