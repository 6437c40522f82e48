//! Stream output sink
//!
//! One sink sits behind every source pad of a harnessed element. Elements push
//! into it from whatever thread they run on; the harness owner pulls from it.
//! Buffers and events keep their arrival order.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use super::buffer::Buffer;
use super::element::FlowReturn;
use super::event::{Event, OutputItem};
use super::format::Format;
use super::lock;

type NotifyFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct SinkState {
  items: VecDeque<OutputItem>,
  flushing: bool,
  eos: bool,
  /// Last format announced on this pad (sticky)
  format: Option<Format>,
  /// Number of flush-stop events seen so far
  flush_stops: u64,
}

/// Ordered collector for one output pad
pub struct StreamOutputSink {
  index: usize,
  state: Mutex<SinkState>,
  cond: Condvar,
  on_output: Mutex<Option<NotifyFn>>,
}

impl StreamOutputSink {
  pub fn new(index: usize) -> Self {
    Self {
      index,
      state: Mutex::new(SinkState::default()),
      cond: Condvar::new(),
      on_output: Mutex::new(None),
    }
  }

  pub fn index(&self) -> usize {
    self.index
  }

  /// Install a hook run (outside the sink lock) whenever an item is queued
  pub fn set_output_notify(&self, notify: Option<NotifyFn>) {
    *lock(&self.on_output) = notify;
  }

  fn notify_output(&self) {
    let notify = lock(&self.on_output).clone();
    if let Some(notify) = notify {
      notify();
    }
  }

  pub fn push_buffer(&self, buffer: Buffer) -> FlowReturn {
    {
      let mut state = lock(&self.state);
      if state.flushing {
        tracing::trace!(target: "harness", pad = self.index, "dropping buffer while flushing");
        return FlowReturn::Flushing;
      }
      if state.eos {
        return FlowReturn::Eos;
      }
      state.items.push_back(OutputItem::Buffer(buffer));
    }
    self.cond.notify_all();
    self.notify_output();
    FlowReturn::Ok
  }

  pub fn push_event(&self, event: Event) -> FlowReturn {
    {
      let mut state = lock(&self.state);
      match event {
        Event::FlushStart => {
          state.flushing = true;
          let dropped = state.items.len();
          state.items.clear();
          tracing::trace!(target: "harness", pad = self.index, dropped, "flush start");
          drop(state);
          self.cond.notify_all();
          return FlowReturn::Ok;
        }
        Event::FlushStop => {
          state.flushing = false;
          state.eos = false;
          state.flush_stops += 1;
          state.items.push_back(OutputItem::Event(Event::FlushStop));
        }
        Event::FormatChanged(format) => {
          state.format = Some(format.clone());
          if state.flushing {
            return FlowReturn::Flushing;
          }
          state
            .items
            .push_back(OutputItem::Event(Event::FormatChanged(format)));
        }
        Event::Eos => {
          if state.flushing {
            return FlowReturn::Flushing;
          }
          state.eos = true;
          state.items.push_back(OutputItem::Event(event));
        }
        other => {
          if state.flushing {
            return FlowReturn::Flushing;
          }
          state.items.push_back(OutputItem::Event(other));
        }
      }
    }
    self.cond.notify_all();
    self.notify_output();
    FlowReturn::Ok
  }

  /// Remove and return the oldest item
  pub fn pop(&self) -> Option<OutputItem> {
    lock(&self.state).items.pop_front()
  }

  /// Remove and return every queued item, oldest first
  pub fn drain(&self) -> Vec<OutputItem> {
    lock(&self.state).items.drain(..).collect()
  }

  pub fn len(&self) -> usize {
    lock(&self.state).items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_flushing(&self) -> bool {
    lock(&self.state).flushing
  }

  pub fn is_eos(&self) -> bool {
    lock(&self.state).eos
  }

  pub fn current_format(&self) -> Option<Format> {
    lock(&self.state).format.clone()
  }

  pub fn flush_stop_count(&self) -> u64 {
    lock(&self.state).flush_stops
  }

  /// Block until more than `seen` flush-stop events have arrived.
  /// Returns false on timeout.
  pub fn wait_for_flush_stop(&self, seen: u64, timeout: Duration) -> bool {
    let state = lock(&self.state);
    let (state, _) = self
      .cond
      .wait_timeout_while(state, timeout, |s| s.flush_stops <= seen)
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    state.flush_stops > seen
  }

  /// Block until end-of-stream reached this pad. Returns false on timeout.
  pub fn wait_for_eos(&self, timeout: Duration) -> bool {
    let state = lock(&self.state);
    let (state, _) = self
      .cond
      .wait_timeout_while(state, timeout, |s| !s.eos)
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    state.eos
  }

  /// Drop everything and return to the initial state (format is kept)
  pub fn clear(&self) {
    let mut state = lock(&self.state);
    state.items.clear();
    state.flushing = false;
    state.eos = false;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::thread;

  fn tagged(pts: i64) -> Buffer {
    Buffer::from_vec(vec![pts as u8]).with_timestamp(pts)
  }

  #[test]
  fn test_items_keep_arrival_order() {
    let sink = StreamOutputSink::new(0);
    sink.push_event(Event::FormatChanged(Format::new("audio/x-raw")));
    sink.push_buffer(tagged(0));
    sink.push_buffer(tagged(10));
    sink.push_event(Event::Eos);

    let items = sink.drain();
    assert_eq!(items.len(), 4);
    assert!(matches!(items[0], OutputItem::Event(Event::FormatChanged(_))));
    assert!(matches!(&items[1], OutputItem::Buffer(b) if b.timestamp() == Some(0)));
    assert!(matches!(&items[2], OutputItem::Buffer(b) if b.timestamp() == Some(10)));
    assert!(matches!(items[3], OutputItem::Event(Event::Eos)));
  }

  #[test]
  fn test_flush_drops_queued_and_incoming_buffers() {
    let sink = StreamOutputSink::new(0);
    sink.push_buffer(tagged(0));
    assert_eq!(sink.push_event(Event::FlushStart), FlowReturn::Ok);
    assert!(sink.is_empty());
    assert_eq!(sink.push_buffer(tagged(10)), FlowReturn::Flushing);

    sink.push_event(Event::FlushStop);
    assert_eq!(sink.flush_stop_count(), 1);
    assert_eq!(sink.push_buffer(tagged(20)), FlowReturn::Ok);

    let items = sink.drain();
    assert!(matches!(items[0], OutputItem::Event(Event::FlushStop)));
    assert!(matches!(&items[1], OutputItem::Buffer(b) if b.timestamp() == Some(20)));
  }

  #[test]
  fn test_buffers_after_eos_are_refused_until_flush() {
    let sink = StreamOutputSink::new(0);
    sink.push_event(Event::Eos);
    assert!(sink.is_eos());
    assert_eq!(sink.push_buffer(tagged(0)), FlowReturn::Eos);

    sink.push_event(Event::FlushStart);
    sink.push_event(Event::FlushStop);
    assert!(!sink.is_eos());
    assert_eq!(sink.push_buffer(tagged(0)), FlowReturn::Ok);
  }

  #[test]
  fn test_format_is_sticky() {
    let sink = StreamOutputSink::new(0);
    assert!(sink.current_format().is_none());
    sink.push_event(Event::FormatChanged(Format::new("video/x-raw")));
    sink.drain();
    assert_eq!(sink.current_format(), Some(Format::new("video/x-raw")));
  }

  #[test]
  fn test_wait_for_flush_stop_from_other_thread() {
    let sink = Arc::new(StreamOutputSink::new(0));
    let seen = sink.flush_stop_count();

    let pusher = sink.clone();
    let handle = thread::spawn(move || {
      pusher.push_event(Event::FlushStart);
      pusher.push_event(Event::FlushStop);
    });

    assert!(sink.wait_for_flush_stop(seen, Duration::from_secs(5)));
    handle.join().unwrap();
  }

  #[test]
  fn test_wait_for_flush_stop_times_out() {
    let sink = StreamOutputSink::new(0);
    assert!(!sink.wait_for_flush_stop(0, Duration::from_millis(10)));
  }

  #[test]
  fn test_output_notify() {
    let sink = StreamOutputSink::new(0);
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    sink.set_output_notify(Some(Arc::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    })));

    sink.push_buffer(tagged(0));
    sink.push_event(Event::Eos);
    assert_eq!(count.load(Ordering::SeqCst), 2);
  }
}
