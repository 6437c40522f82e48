//! Encoded chunks
//!
//! One [`EncodedChunk`] type serves audio and video: decoders take them as
//! input, encoders produce them.

use std::fmt;

use super::error::{MediaError, MediaResult};
use super::session::{FrameTiming, SessionOutput};
use crate::codec::{Buffer, Configuration, Format};

/// Type of encoded chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedChunkType {
  /// Keyframe - can be decoded independently
  Key,
  /// Delta frame - depends on previous frames
  Delta,
}

impl EncodedChunkType {
  pub fn as_str(&self) -> &'static str {
    match self {
      EncodedChunkType::Key => "key",
      EncodedChunkType::Delta => "delta",
    }
  }
}

impl fmt::Display for EncodedChunkType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Compressed audio or video unit
#[derive(Clone)]
pub struct EncodedChunk {
  chunk_type: EncodedChunkType,
  timestamp: i64,
  duration: Option<u64>,
  data: Buffer,
}

impl EncodedChunk {
  /// Copies `data`
  pub fn new(
    chunk_type: EncodedChunkType,
    timestamp: i64,
    duration: Option<u64>,
    data: &[u8],
  ) -> Self {
    Self::from_buffer(chunk_type, timestamp, duration, Buffer::copy_from_slice(data))
  }

  /// Shares `data` without copying
  pub fn from_buffer(
    chunk_type: EncodedChunkType,
    timestamp: i64,
    duration: Option<u64>,
    data: Buffer,
  ) -> Self {
    Self {
      chunk_type,
      timestamp,
      duration,
      data,
    }
  }

  pub fn chunk_type(&self) -> EncodedChunkType {
    self.chunk_type
  }

  /// Timestamp in microseconds
  pub fn timestamp(&self) -> i64 {
    self.timestamp
  }

  /// Duration in microseconds
  pub fn duration(&self) -> Option<u64> {
    self.duration
  }

  pub fn byte_length(&self) -> usize {
    self.data.size()
  }

  pub fn data(&self) -> &[u8] {
    self.data.data()
  }

  /// Copy the payload into `destination`
  pub fn copy_to(&self, destination: &mut [u8]) -> MediaResult<()> {
    let data = self.data.data();
    if destination.len() < data.len() {
      return Err(MediaError::constraint(format!(
        "destination is too small: need {} bytes, got {}",
        data.len(),
        destination.len()
      )));
    }
    destination[..data.len()].copy_from_slice(data);
    Ok(())
  }

  /// Payload as a buffer carrying the chunk's timing and key flag
  pub fn buffer(&self) -> Buffer {
    let buffer = self
      .data
      .clone()
      .with_timestamp(self.timestamp)
      .with_key_frame(self.chunk_type == EncodedChunkType::Key);
    match self.duration {
      Some(duration) => buffer.with_duration(duration),
      None => buffer,
    }
  }
}

impl fmt::Debug for EncodedChunk {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EncodedChunk")
      .field("type", &self.chunk_type)
      .field("timestamp", &self.timestamp)
      .field("duration", &self.duration)
      .field("byte_length", &self.byte_length())
      .finish()
  }
}

impl SessionOutput for EncodedChunk {
  fn from_output(
    buffer: Buffer,
    timing: FrameTiming,
    _format: Option<&Format>,
    _config: &Configuration,
  ) -> MediaResult<Self> {
    let chunk_type = if buffer.is_key_frame() {
      EncodedChunkType::Key
    } else {
      EncodedChunkType::Delta
    };
    Ok(Self::from_buffer(
      chunk_type,
      timing.timestamp,
      timing.duration,
      buffer,
    ))
  }
}
