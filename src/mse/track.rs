//! Media Source track
//!
//! Wraps one [`TrackQueue`] with the identity of the track it feeds. The
//! owner must call [`remove`](MediaSourceTrack::remove) before dropping it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::MseResult;
use super::init_segment::TrackDescription;
use super::track_queue::{QueuedObject, TrackQueue, TrackQueueConfig};
use crate::codec::{Format, MediaKind};

pub struct MediaSourceTrack {
  track_type: MediaKind,
  index: usize,
  id: u64,
  string_id: String,
  initial_format: Format,
  queue: Arc<TrackQueue>,
  removed: AtomicBool,
}

impl MediaSourceTrack {
  pub fn new(description: &TrackDescription, config: TrackQueueConfig) -> MseResult<Self> {
    let queue = TrackQueue::new(description.string_id.clone(), config)?;
    tracing::debug!(
      target: "mse",
      track = %description.string_id,
      kind = description.track_type.as_str(),
      format = %description.format,
      "created track"
    );
    Ok(Self {
      track_type: description.track_type,
      index: description.index,
      id: description.id,
      string_id: description.string_id.clone(),
      initial_format: description.format.clone(),
      queue: Arc::new(queue),
      removed: AtomicBool::new(false),
    })
  }

  pub fn track_type(&self) -> MediaKind {
    self.track_type
  }

  pub fn index(&self) -> usize {
    self.index
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn string_id(&self) -> &str {
    &self.string_id
  }

  pub fn initial_format(&self) -> &Format {
    &self.initial_format
  }

  /// Consumer side of the track
  pub fn queue(&self) -> &Arc<TrackQueue> {
    &self.queue
  }

  pub fn is_ready_for_more_samples(&self) -> bool {
    self.queue.is_ready_for_more_samples()
  }

  /// Run `handler` once the track wants samples again
  pub fn notify_when_ready_for_more_samples(&self, handler: impl FnOnce() + Send + 'static) {
    self.queue.notify_when_low_level(handler);
  }

  /// Queue a sample or event. Ignored once the track was removed.
  pub fn enqueue_object(&self, object: QueuedObject) {
    if self.is_removed() {
      tracing::debug!(target: "mse", track = %self.string_id, "dropping object for removed track");
      return;
    }
    self.queue.enqueue_object(object);
  }

  pub fn clear_queue(&self) {
    self.queue.clear();
  }

  /// Detach the track: queued objects are dropped and nothing more is accepted
  pub fn remove(&self) {
    if self.removed.swap(true, Ordering::AcqRel) {
      return;
    }
    tracing::debug!(target: "mse", track = %self.string_id, "removed track");
    self.queue.clear();
  }

  pub fn is_removed(&self) -> bool {
    self.removed.load(Ordering::Acquire)
  }
}

impl Drop for MediaSourceTrack {
  fn drop(&mut self) {
    if !self.is_removed() {
      tracing::warn!(target: "mse", track = %self.string_id, "track dropped without being removed");
    }
  }
}

impl fmt::Debug for MediaSourceTrack {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MediaSourceTrack")
      .field("track_type", &self.track_type)
      .field("id", &self.id)
      .field("string_id", &self.string_id)
      .field("queued", &self.queue.len())
      .field("removed", &self.is_removed())
      .finish()
  }
}
