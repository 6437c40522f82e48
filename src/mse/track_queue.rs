//! Per-track sample queue
//!
//! A [`TrackQueue`] sits between the demuxer (producer) and the playback
//! pipeline (consumer). It never refuses an item; instead it turns "full"
//! once occupancy reaches the high-water mark and stays full until the
//! consumer brings it down to the low-water mark, at which point the
//! producers waiting in [`notify_when_low_level`](TrackQueue::notify_when_low_level)
//! are called back in registration order.
//!
//! One mutex guards the items, the full flag and both handler lists. Handlers
//! run after the lock is released, so they may call back into the queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use super::{MseError, MseResult};
use crate::codec::{Event, Sample, lock};

/// One-shot callback
pub type QueueHandler = Box<dyn FnOnce() + Send>;

/// Thresholds of a [`TrackQueue`], in items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackQueueConfig {
  /// Occupancy at or below which a full queue accepts samples again
  pub low_water: usize,
  /// Occupancy at which the queue turns full
  pub high_water: usize,
}

impl Default for TrackQueueConfig {
  fn default() -> Self {
    Self {
      low_water: 2,
      high_water: 10,
    }
  }
}

impl TrackQueueConfig {
  pub fn new(low_water: usize, high_water: usize) -> MseResult<Self> {
    let config = Self {
      low_water,
      high_water,
    };
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> MseResult<()> {
    if self.low_water >= self.high_water {
      return Err(MseError::InvalidConfig(format!(
        "low water mark {} must be below high water mark {}",
        self.low_water, self.high_water
      )));
    }
    Ok(())
  }
}

/// Media object travelling through a track queue
#[derive(Debug, Clone)]
pub enum QueuedObject {
  Sample(Sample),
  /// Serialized event (end-of-stream, stream start, ...)
  Event(Event),
}

impl QueuedObject {
  pub fn sample(&self) -> Option<&Sample> {
    match self {
      QueuedObject::Sample(sample) => Some(sample),
      QueuedObject::Event(_) => None,
    }
  }

  /// Duration in microseconds, zero for events and unknown durations
  fn duration(&self) -> u64 {
    self
      .sample()
      .and_then(|sample| sample.buffer.duration())
      .unwrap_or(0)
  }
}

struct QueueState {
  items: VecDeque<QueuedObject>,
  full: bool,
  /// Sum of the durations of queued samples, in microseconds
  duration_enqueued: u64,
  low_level_handlers: Vec<QueueHandler>,
  not_empty_handlers: Vec<QueueHandler>,
}

impl QueueState {
  /// Handlers due after occupancy went down
  fn after_removal(&mut self, config: &TrackQueueConfig) -> Vec<QueueHandler> {
    if self.items.len() > config.low_water {
      return Vec::new();
    }
    self.full = false;
    std::mem::take(&mut self.low_level_handlers)
  }
}

/// Bounded-by-convention FIFO between a track's producer and consumer
pub struct TrackQueue {
  track_id: String,
  config: TrackQueueConfig,
  state: Mutex<QueueState>,
}

impl TrackQueue {
  pub fn new(track_id: impl Into<String>, config: TrackQueueConfig) -> MseResult<Self> {
    config.validate()?;
    Ok(Self {
      track_id: track_id.into(),
      config,
      state: Mutex::new(QueueState {
        items: VecDeque::new(),
        full: false,
        duration_enqueued: 0,
        low_level_handlers: Vec::new(),
        not_empty_handlers: Vec::new(),
      }),
    })
  }

  pub fn track_id(&self) -> &str {
    &self.track_id
  }

  pub fn config(&self) -> &TrackQueueConfig {
    &self.config
  }

  pub fn len(&self) -> usize {
    lock(&self.state).items.len()
  }

  pub fn is_empty(&self) -> bool {
    lock(&self.state).items.is_empty()
  }

  pub fn is_full(&self) -> bool {
    lock(&self.state).full
  }

  /// Producers should hold off while this is false
  pub fn is_ready_for_more_samples(&self) -> bool {
    !self.is_full()
  }

  /// Total duration of the queued samples, in microseconds
  pub fn duration_enqueued(&self) -> u64 {
    lock(&self.state).duration_enqueued
  }

  /// Append `object`. Always succeeds; may turn the queue full.
  pub fn enqueue_object(&self, object: QueuedObject) {
    let handlers = {
      let mut state = lock(&self.state);
      state.duration_enqueued += object.duration();
      state.items.push_back(object);
      if !state.full && state.items.len() >= self.config.high_water {
        state.full = true;
        tracing::trace!(target: "track_queue", track = %self.track_id, size = state.items.len(), "queue full");
      }
      std::mem::take(&mut state.not_empty_handlers)
    };
    for handler in handlers {
      handler();
    }
  }

  /// Remove the oldest item
  pub fn dequeue(&self) -> Option<QueuedObject> {
    let (object, handlers) = {
      let mut state = lock(&self.state);
      let object = state.items.pop_front()?;
      state.duration_enqueued = state.duration_enqueued.saturating_sub(object.duration());
      let handlers = state.after_removal(&self.config);
      (object, handlers)
    };
    if !handlers.is_empty() {
      tracing::trace!(target: "track_queue", track = %self.track_id, handlers = handlers.len(), "low level reached");
    }
    for handler in handlers {
      handler();
    }
    Some(object)
  }

  /// Call `handler` once the queue is no longer full. A queue that is not
  /// full calls it right away.
  pub fn notify_when_low_level(&self, handler: impl FnOnce() + Send + 'static) {
    {
      let mut state = lock(&self.state);
      if state.full {
        state.low_level_handlers.push(Box::new(handler));
        return;
      }
    }
    handler();
  }

  /// Call `handler` once the queue holds an item. A non-empty queue calls it
  /// right away.
  pub fn notify_when_not_empty(&self, handler: impl FnOnce() + Send + 'static) {
    {
      let mut state = lock(&self.state);
      if state.items.is_empty() {
        state.not_empty_handlers.push(Box::new(handler));
        return;
      }
    }
    handler();
  }

  /// Drop every queued item without emitting it. Producers waiting for the
  /// low level are released.
  pub fn clear(&self) {
    let handlers = {
      let mut state = lock(&self.state);
      let dropped = state.items.len();
      state.items.clear();
      state.duration_enqueued = 0;
      tracing::debug!(target: "track_queue", track = %self.track_id, dropped, "cleared");
      state.after_removal(&self.config)
    };
    for handler in handlers {
      handler();
    }
  }
}

impl fmt::Debug for TrackQueue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = lock(&self.state);
    f.debug_struct("TrackQueue")
      .field("track_id", &self.track_id)
      .field("size", &state.items.len())
      .field("full", &state.full)
      .field("config", &self.config)
      .finish()
  }
}
