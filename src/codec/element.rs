//! Element capability interface
//!
//! An [`Element`] is an already-instantiated processing unit (decoder, encoder,
//! demuxer, transform). The harness only talks to it through this trait:
//! negotiate a format, chain buffers in, hand it events. Elements emit output
//! by pushing into their [`SrcPad`]s, from the calling thread or from threads
//! of their own.

use std::fmt;
use std::sync::{Arc, Mutex};

use super::buffer::Buffer;
use super::event::Event;
use super::format::Format;
use super::sink::StreamOutputSink;
use super::{HarnessResult, lock};

/// Result of pushing into a pad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowReturn {
  Ok,
  /// Downstream is flushing; the item was dropped
  Flushing,
  /// Downstream already saw end-of-stream
  Eos,
  /// The pad is no longer connected to a harness
  NotLinked,
}

impl FlowReturn {
  pub fn is_ok(self) -> bool {
    self == FlowReturn::Ok
  }
}

/// What the harness should do with an event after the element saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
  /// Forward the event to every source pad
  Forward,
  /// The element took care of it (or forwards it later itself)
  Handled,
}

/// Output pad of a harnessed element.
///
/// Cheap to clone. The link to the sink is guarded by a lock that teardown
/// clears, so a push racing with teardown sees `NotLinked` instead of a
/// dangling sink.
#[derive(Clone)]
pub struct SrcPad {
  index: usize,
  peer: Arc<Mutex<Option<Arc<StreamOutputSink>>>>,
}

impl SrcPad {
  pub(crate) fn linked(index: usize, sink: Arc<StreamOutputSink>) -> Self {
    Self {
      index,
      peer: Arc::new(Mutex::new(Some(sink))),
    }
  }

  /// A pad that is not connected to anything
  pub fn unlinked(index: usize) -> Self {
    Self {
      index,
      peer: Arc::new(Mutex::new(None)),
    }
  }

  pub fn index(&self) -> usize {
    self.index
  }

  pub fn is_linked(&self) -> bool {
    lock(&self.peer).is_some()
  }

  pub(crate) fn unlink(&self) {
    *lock(&self.peer) = None;
  }

  pub fn push(&self, buffer: Buffer) -> FlowReturn {
    match lock(&self.peer).as_ref() {
      Some(sink) => sink.push_buffer(buffer),
      None => FlowReturn::NotLinked,
    }
  }

  pub fn push_event(&self, event: Event) -> FlowReturn {
    match lock(&self.peer).as_ref() {
      Some(sink) => sink.push_event(event),
      None => FlowReturn::NotLinked,
    }
  }
}

impl fmt::Debug for SrcPad {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SrcPad")
      .field("index", &self.index)
      .field("linked", &self.is_linked())
      .finish()
  }
}

/// Processing element driven by a [`Harness`](super::Harness)
pub trait Element: Send + 'static {
  fn name(&self) -> &str;

  /// Number of source pads; fixed for the element's lifetime
  fn src_pad_count(&self) -> usize {
    1
  }

  /// Accept or reject `format` as input. On success the element keeps the
  /// pads it will push to and announces its output format on them.
  fn negotiate(&mut self, format: &Format, pads: &[SrcPad]) -> HarnessResult<()>;

  /// Process one input buffer
  fn chain(&mut self, buffer: Buffer) -> HarnessResult<()>;

  fn handle_event(&mut self, _event: &Event) -> HarnessResult<EventDisposition> {
    Ok(EventDisposition::Forward)
  }

  /// Release resources; no pad pushes may follow
  fn teardown(&mut self) {}
}

/// Push `event` to every pad, returning the first non-ok flow
pub fn push_event_to_all(pads: &[SrcPad], event: &Event) -> FlowReturn {
  let mut result = FlowReturn::Ok;
  for pad in pads {
    let flow = pad.push_event(event.clone());
    if result.is_ok() {
      result = flow;
    }
  }
  result
}
