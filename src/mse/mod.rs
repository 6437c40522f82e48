//! Media Source track feeding
//!
//! A [`SourceBufferParser`] runs appended bytes through a demuxing element
//! and reports an [`InitializationSegment`] plus demuxed samples. A
//! [`SourceBuffer`] turns those into [`MediaSourceTrack`]s, each pacing its
//! samples through a [`TrackQueue`] towards the playback pipeline.

pub mod init_segment;
pub mod parser;
pub mod source_buffer;
pub mod track;
pub mod track_queue;

pub use init_segment::{InitializationSegment, TrackDescription};
pub use parser::{
  DemuxerFactory, MediaSample, ParserClient, PresentationSize, SourceBufferParser, sniff_format,
};
pub use source_buffer::SourceBuffer;
pub use track::MediaSourceTrack;
pub use track_queue::{QueuedObject, TrackQueue, TrackQueueConfig};

use crate::codec::HarnessError;

/// Media Source error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MseError {
  #[error("Invalid track queue configuration: {0}")]
  InvalidConfig(String),

  #[error("Unable to determine buffer media type")]
  UnknownMediaType,

  #[error("Parsing error: {0}")]
  Parse(String),

  #[error("Stream topology changed")]
  TopologyChanged,

  #[error("No track with id {0}")]
  UnknownTrack(u64),

  #[error("Parser stopped")]
  Stopped,

  #[error(transparent)]
  Harness(#[from] HarnessError),
}

pub type MseResult<T> = Result<T, MseError>;
