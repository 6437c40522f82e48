//! Element harness layer
//!
//! Buffers, negotiable formats, the element capability trait, per-pad output
//! sinks and the push/pull harness that ties them together. Concrete element
//! kinds live in [`elements`], the codec table in [`registry`].

pub mod buffer;
pub mod element;
pub mod elements;
pub mod event;
pub mod format;
pub mod harness;
pub mod registry;
pub mod sink;

pub use buffer::{Buffer, BufferFlags, BufferSource, FrameId, PlaneLayout, Sample};
pub use element::{Element, EventDisposition, FlowReturn, SrcPad};
pub use event::{Event, OutputItem, StreamCollection, StreamInfo};
pub use format::{FieldValue, Format, MediaKind};
pub use harness::{Harness, HarnessState, OutputStream};
pub use registry::{CodecDirection, ElementFactory, ElementProvider, ElementRegistry};
pub use sink::StreamOutputSink;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Harness configuration
#[derive(Debug, Clone)]
pub struct HarnessConfig {
  /// Upper bound for flush and drain acknowledgement waits
  pub flush_timeout: Duration,
}

impl Default for HarnessConfig {
  fn default() -> Self {
    Self {
      flush_timeout: Duration::from_secs(5),
    }
  }
}

/// Opus specific encoder/decoder parameters
#[derive(Debug, Clone, PartialEq)]
pub struct OpusConfig {
  /// Channel mapping family (0 = mono/stereo, 1 = Vorbis order)
  pub channel_mapping_family: u8,
  /// Frame duration in microseconds
  pub frame_duration: u64,
  pub complexity: Option<u8>,
}

impl Default for OpusConfig {
  fn default() -> Self {
    Self {
      channel_mapping_family: 0,
      frame_duration: 20_000,
      complexity: None,
    }
  }
}

/// Audio session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AudioConfig {
  /// Sample rate in Hz
  pub sample_rate: u32,
  /// Number of channels
  pub number_of_channels: u32,
  /// Target bitrate in bits per second
  pub bit_rate: Option<u64>,
  /// Codec specific header (e.g. AudioSpecificConfig for AAC)
  pub description: Option<Vec<u8>>,
  pub opus: Option<OpusConfig>,
}

impl Default for AudioConfig {
  fn default() -> Self {
    Self {
      sample_rate: 48_000,
      number_of_channels: 2,
      bit_rate: None,
      description: None,
      opus: None,
    }
  }
}

/// Video session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VideoConfig {
  /// Coded width in pixels
  pub width: u32,
  /// Coded height in pixels
  pub height: u32,
  /// Target bitrate in bits per second
  pub bit_rate: Option<u64>,
  /// Frames per second
  pub framerate: Option<f64>,
  /// Codec specific header (e.g. avcC for H.264)
  pub description: Option<Vec<u8>>,
}

impl Default for VideoConfig {
  fn default() -> Self {
    Self {
      width: 1920,
      height: 1080,
      bit_rate: None,
      framerate: None,
      description: None,
    }
  }
}

/// Capability configuration handed to the element provider
#[derive(Debug, Clone, PartialEq)]
pub enum Configuration {
  Audio(AudioConfig),
  Video(VideoConfig),
}

impl Configuration {
  pub fn kind(&self) -> MediaKind {
    match self {
      Configuration::Audio(_) => MediaKind::Audio,
      Configuration::Video(_) => MediaKind::Video,
    }
  }

  pub fn audio(&self) -> Option<&AudioConfig> {
    match self {
      Configuration::Audio(config) => Some(config),
      Configuration::Video(_) => None,
    }
  }

  pub fn video(&self) -> Option<&VideoConfig> {
    match self {
      Configuration::Video(config) => Some(config),
      Configuration::Audio(_) => None,
    }
  }
}

/// Harness error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarnessError {
  #[error("Element {element} rejected format {format}")]
  NegotiationFailed { element: String, format: String },

  #[error("Unsupported codec: {0}")]
  Unsupported(String),

  #[error("Failed to create element: {0}")]
  ElementCreation(String),

  #[error("Processing error: {0}")]
  Processing(String),

  #[error("Harness not started")]
  NotStarted,

  #[error("Harness is flushing")]
  Flushing,

  #[error("Harness is closed")]
  Closed,

  #[error("Timed out after {0:?} waiting for the element")]
  FlushTimeout(Duration),

  #[error("Invalid state: {0}")]
  InvalidState(String),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// Lock a mutex, recovering the guard if a panicking thread poisoned it.
///
/// All state guarded in this crate is consistent between statements, so a
/// poisoned lock carries no torn data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
