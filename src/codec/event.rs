//! Control events and output items

use super::buffer::Buffer;
use super::format::{Format, MediaKind};

/// One stream announced in a [`StreamCollection`]
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
  pub kind: MediaKind,
  pub stream_id: String,
  pub format: Format,
}

/// Set of streams a demuxing element exposes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamCollection {
  /// Total duration in microseconds, `None` when unknown (live/infinite)
  pub duration: Option<u64>,
  pub streams: Vec<StreamInfo>,
}

/// Payload-less control signal travelling alongside buffers
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
  StreamStart { stream_id: String },
  /// Output format for the following buffers (sticky)
  FormatChanged(Format),
  StreamCollection(StreamCollection),
  FlushStart,
  FlushStop,
  /// End of stream; elements drain internal state when they see it
  Eos,
  /// Request the next encoded frame to be a key frame
  ForceKeyUnit,
  /// Error reported by an element outside of a push call
  Error(String),
}

impl Event {
  pub fn name(&self) -> &'static str {
    match self {
      Event::StreamStart { .. } => "stream-start",
      Event::FormatChanged(_) => "format-changed",
      Event::StreamCollection(_) => "stream-collection",
      Event::FlushStart => "flush-start",
      Event::FlushStop => "flush-stop",
      Event::Eos => "eos",
      Event::ForceKeyUnit => "force-key-unit",
      Event::Error(_) => "error",
    }
  }

  /// Flush events bypass data ordering; everything else is serialized with buffers
  pub fn is_flush(&self) -> bool {
    matches!(self, Event::FlushStart | Event::FlushStop)
  }
}

/// Item collected by a stream output sink
#[derive(Debug, Clone)]
pub enum OutputItem {
  Buffer(Buffer),
  Event(Event),
}
