//! Buffer objects
//!
//! A [`Buffer`] is a reference-counted, immutable chunk of media data with
//! timing and flags. Payloads are either owned (copied in once) or wrapped
//! around externally owned memory with a release hook.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::format::Format;

// ============================================================================
// Buffer Source Trait (for zero-copy wrapping)
// ============================================================================

/// Object-safe trait for read-only access to externally owned memory.
///
/// Implementors must keep the returned slice valid and unchanged for their
/// whole lifetime.
pub trait BufferSource: Send + Sync {
  fn buffer_data(&self) -> &[u8];
}

impl BufferSource for Vec<u8> {
  fn buffer_data(&self) -> &[u8] {
    self.as_slice()
  }
}

impl BufferSource for Box<[u8]> {
  fn buffer_data(&self) -> &[u8] {
    self
  }
}

impl BufferSource for Arc<[u8]> {
  fn buffer_data(&self) -> &[u8] {
    self
  }
}

type ReleaseFn = Box<dyn FnOnce() + Send + Sync>;

struct WrappedMemory {
  source: Box<dyn BufferSource>,
  release: Option<ReleaseFn>,
}

impl Drop for WrappedMemory {
  fn drop(&mut self) {
    if let Some(release) = self.release.take() {
      release();
    }
  }
}

#[derive(Clone)]
enum Payload {
  Owned(Arc<[u8]>),
  Wrapped(Arc<WrappedMemory>),
}

impl Payload {
  fn as_slice(&self) -> &[u8] {
    match self {
      Payload::Owned(data) => data,
      Payload::Wrapped(memory) => memory.source.buffer_data(),
    }
  }
}

// ============================================================================
// Flags and identifiers
// ============================================================================

/// Buffer flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
  pub const NONE: BufferFlags = BufferFlags(0);
  /// Not a key frame: decoding depends on earlier buffers
  pub const DELTA_UNIT: BufferFlags = BufferFlags(1 << 0);
  /// First buffer after a gap in the stream
  pub const DISCONT: BufferFlags = BufferFlags(1 << 1);
  /// Codec header (e.g. Vorbis identification packet)
  pub const HEADER: BufferFlags = BufferFlags(1 << 2);

  pub fn contains(self, other: BufferFlags) -> bool {
    self.0 & other.0 == other.0
  }

  pub fn insert(&mut self, other: BufferFlags) {
    self.0 |= other.0;
  }

  pub fn remove(&mut self, other: BufferFlags) {
    self.0 &= !other.0;
  }
}

/// Origin tag carried from an input buffer to the outputs derived from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

impl FrameId {
  /// Allocate a process-unique identifier
  pub fn next() -> Self {
    FrameId(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
  }

  pub fn value(self) -> u64 {
    self.0
  }
}

/// Layout of one plane inside a buffer payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
  /// Byte offset of the plane's first row/sample
  pub offset: usize,
  /// Bytes per row (video) or per plane (audio)
  pub stride: usize,
}

// ============================================================================
// Buffer
// ============================================================================

/// Immutable, reference-counted media buffer.
///
/// Timestamps and durations are in microseconds. Cloning a `Buffer` shares the
/// payload; the `with_*` builders return a new buffer and never touch the
/// original.
#[derive(Clone)]
pub struct Buffer {
  payload: Payload,
  pts: Option<i64>,
  dts: Option<i64>,
  duration: Option<u64>,
  flags: BufferFlags,
  planes: Option<Arc<[PlaneLayout]>>,
  frame_id: Option<FrameId>,
}

impl Buffer {
  fn with_payload(payload: Payload) -> Self {
    Self {
      payload,
      pts: None,
      dts: None,
      duration: None,
      flags: BufferFlags::NONE,
      planes: None,
      frame_id: None,
    }
  }

  /// Take ownership of `data` without copying
  pub fn from_vec(data: Vec<u8>) -> Self {
    Self::with_payload(Payload::Owned(data.into()))
  }

  /// Copy `data` into a new owned payload
  pub fn copy_from_slice(data: &[u8]) -> Self {
    Self::with_payload(Payload::Owned(Arc::from(data)))
  }

  /// Wrap externally owned memory. `release` runs once the last clone of the
  /// buffer (and of every buffer derived from it by a `with_*` builder) drops.
  pub fn wrap(
    source: impl BufferSource + 'static,
    release: impl FnOnce() + Send + Sync + 'static,
  ) -> Self {
    Self::with_payload(Payload::Wrapped(Arc::new(WrappedMemory {
      source: Box::new(source),
      release: Some(Box::new(release)),
    })))
  }

  pub fn empty() -> Self {
    Self::from_vec(Vec::new())
  }

  #[inline]
  pub fn data(&self) -> &[u8] {
    self.payload.as_slice()
  }

  #[inline]
  pub fn size(&self) -> usize {
    self.data().len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.size() == 0
  }

  /// Whether the payload is borrowed from an external owner
  pub fn is_wrapped(&self) -> bool {
    matches!(self.payload, Payload::Wrapped(_))
  }

  /// Presentation timestamp in microseconds
  pub fn timestamp(&self) -> Option<i64> {
    self.pts
  }

  pub fn decode_timestamp(&self) -> Option<i64> {
    self.dts
  }

  /// Duration in microseconds
  pub fn duration(&self) -> Option<u64> {
    self.duration
  }

  pub fn flags(&self) -> BufferFlags {
    self.flags
  }

  pub fn is_key_frame(&self) -> bool {
    !self.flags.contains(BufferFlags::DELTA_UNIT)
  }

  pub fn planes(&self) -> Option<&[PlaneLayout]> {
    self.planes.as_deref()
  }

  pub fn frame_id(&self) -> Option<FrameId> {
    self.frame_id
  }

  pub fn with_timestamp(mut self, pts: i64) -> Self {
    self.pts = Some(pts);
    self
  }

  pub fn without_timestamp(mut self) -> Self {
    self.pts = None;
    self
  }

  pub fn with_decode_timestamp(mut self, dts: i64) -> Self {
    self.dts = Some(dts);
    self
  }

  pub fn with_duration(mut self, duration: u64) -> Self {
    self.duration = Some(duration);
    self
  }

  pub fn with_key_frame(mut self, key_frame: bool) -> Self {
    if key_frame {
      self.flags.remove(BufferFlags::DELTA_UNIT);
    } else {
      self.flags.insert(BufferFlags::DELTA_UNIT);
    }
    self
  }

  pub fn with_flags(mut self, flags: BufferFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn with_planes(mut self, planes: Vec<PlaneLayout>) -> Self {
    self.planes = Some(planes.into());
    self
  }

  pub fn with_frame_id(mut self, frame_id: FrameId) -> Self {
    self.frame_id = Some(frame_id);
    self
  }

  /// New buffer with `data` as payload and this buffer's metadata.
  ///
  /// Used by elements that derive an output from an input, so timing and the
  /// origin tag follow the data. Plane layouts are dropped since they describe
  /// the old payload.
  pub fn derive(&self, data: Vec<u8>) -> Self {
    Self {
      payload: Payload::Owned(data.into()),
      pts: self.pts,
      dts: self.dts,
      duration: self.duration,
      flags: self.flags,
      planes: None,
      frame_id: self.frame_id,
    }
  }
}

impl fmt::Debug for Buffer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Buffer")
      .field("size", &self.size())
      .field("pts", &self.pts)
      .field("duration", &self.duration)
      .field("flags", &self.flags)
      .field("frame_id", &self.frame_id)
      .finish()
  }
}

/// A buffer together with the format it was produced under
#[derive(Debug, Clone)]
pub struct Sample {
  pub buffer: Buffer,
  pub format: Option<Format>,
}

impl Sample {
  pub fn new(buffer: Buffer, format: Option<Format>) -> Self {
    Self { buffer, format }
  }
}
