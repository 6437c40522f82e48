//! RTP transform backend
//!
//! One backend exists per (media type, side) of an RTP sender or receiver.
//! Without an input callback packets pass through untouched. With one, every
//! packet is wrapped in a [`TransformableFrame`], handed to the callback, and
//! the backend blocks until the frame comes back through
//! [`RtpTransformBackend::process_transformed_frame`], possibly from another
//! thread.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::packet::{RtpFrameMetadata, RtpHeader};
use super::{RtcError, RtcResult};
use crate::codec::element::{Element, FlowReturn, SrcPad, push_event_to_all};
use crate::codec::{Buffer, Event, Format, HarnessError, HarnessResult, lock};

static BACKEND_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Default bound on the wait for a transformed frame
pub const DEFAULT_TRANSFORM_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpMediaType {
  Audio,
  Video,
}

impl RtpMediaType {
  pub fn as_str(&self) -> &'static str {
    match self {
      RtpMediaType::Audio => "audio",
      RtpMediaType::Video => "video",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpTransformSide {
  Sender,
  Receiver,
}

impl RtpTransformSide {
  pub fn as_str(&self) -> &'static str {
    match self {
      RtpTransformSide::Sender => "sender",
      RtpTransformSide::Receiver => "receiver",
    }
  }
}

/// One RTP packet on its way through an application transform
pub struct TransformableFrame {
  buffer: Option<Buffer>,
  serial: u64,
  is_audio_sender_frame: bool,
}

impl TransformableFrame {
  pub fn new(buffer: Buffer, is_audio_sender_frame: bool) -> Self {
    Self {
      buffer: Some(buffer),
      serial: 0,
      is_audio_sender_frame,
    }
  }

  pub fn is_audio_sender_frame(&self) -> bool {
    self.is_audio_sender_frame
  }

  fn packet(&self) -> RtcResult<(&Buffer, RtpHeader)> {
    let buffer = self.buffer.as_ref().ok_or(RtcError::FrameTaken)?;
    let header = RtpHeader::parse(buffer.data())?;
    Ok((buffer, header))
  }

  /// RTP payload
  pub fn data(&self) -> RtcResult<Vec<u8>> {
    let (buffer, header) = self.packet()?;
    Ok(header.payload(buffer.data()).to_vec())
  }

  /// Replace the RTP payload, keeping the header
  pub fn set_data(&mut self, payload: &[u8]) -> RtcResult<()> {
    let (buffer, header) = self.packet()?;
    let packet = header.with_payload(buffer.data(), payload);
    let replaced = buffer.derive(packet);
    self.buffer = Some(replaced);
    Ok(())
  }

  pub fn is_key_frame(&self) -> bool {
    self.buffer.as_ref().is_some_and(Buffer::is_key_frame)
  }

  /// RTP timestamp, zero once the buffer was taken
  pub fn timestamp(&self) -> u64 {
    self
      .packet()
      .map(|(_, header)| header.timestamp as u64)
      .unwrap_or(0)
  }

  pub fn metadata(&self) -> RtcResult<RtpFrameMetadata> {
    Ok(self.packet()?.1.metadata())
  }

  pub fn take_buffer(&mut self) -> Option<Buffer> {
    self.buffer.take()
  }
}

impl fmt::Debug for TransformableFrame {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TransformableFrame")
      .field("buffer", &self.buffer)
      .field("is_audio_sender_frame", &self.is_audio_sender_frame)
      .finish()
  }
}

/// Receives each frame to transform
pub type TransformCallback = Box<dyn FnMut(TransformableFrame) + Send>;

#[derive(Default)]
struct Transformed {
  /// Serial of the frame being waited for
  expected: u64,
  buffer: Option<Buffer>,
}

pub struct RtpTransformBackend {
  id: String,
  media_type: RtpMediaType,
  side: RtpTransformSide,
  timeout: Duration,
  input_callback: Mutex<Option<TransformCallback>>,
  serial: AtomicU64,
  transformed: Mutex<Transformed>,
  cond: Condvar,
}

impl RtpTransformBackend {
  pub fn new(media_type: RtpMediaType, side: RtpTransformSide) -> Self {
    Self::with_timeout(media_type, side, DEFAULT_TRANSFORM_TIMEOUT)
  }

  pub fn with_timeout(media_type: RtpMediaType, side: RtpTransformSide, timeout: Duration) -> Self {
    let id = format!(
      "rtp-{}-{}-transform-{}",
      media_type.as_str(),
      side.as_str(),
      BACKEND_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    Self {
      id,
      media_type,
      side,
      timeout,
      input_callback: Mutex::new(None),
      serial: AtomicU64::new(0),
      transformed: Mutex::new(Transformed::default()),
      cond: Condvar::new(),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn media_type(&self) -> RtpMediaType {
    self.media_type
  }

  pub fn side(&self) -> RtpTransformSide {
    self.side
  }

  pub fn has_input_callback(&self) -> bool {
    lock(&self.input_callback).is_some()
  }

  /// Install or clear the callback; takes effect for the next packet
  pub fn set_input_callback(&self, callback: Option<TransformCallback>) {
    let mut current = lock(&self.input_callback);
    tracing::debug!(
      target: "rtc",
      backend = %self.id,
      "setting {} input callback",
      if callback.is_some() { "non-empty" } else { "empty" }
    );
    *current = callback;
  }

  pub fn clear_transformable_frame_callback(&self) {
    self.set_input_callback(None);
  }

  /// Hand a transformed frame back to the waiting [`transform`](Self::transform)
  pub fn process_transformed_frame(&self, mut frame: TransformableFrame) {
    let Some(buffer) = frame.take_buffer() else {
      tracing::warn!(target: "rtc", backend = %self.id, "no frame");
      return;
    };
    let mut transformed = lock(&self.transformed);
    if frame.serial != transformed.expected {
      tracing::warn!(target: "rtc", backend = %self.id, serial = frame.serial, "dropping stale transformed frame");
      return;
    }
    tracing::trace!(target: "rtc", backend = %self.id, "notifying transformed frame");
    transformed.buffer = Some(buffer);
    self.cond.notify_all();
  }

  /// Run `buffer` through the input callback and wait for the result.
  /// Without a callback the buffer is returned as is.
  pub fn transform(&self, buffer: Buffer) -> RtcResult<Buffer> {
    let mut callback = lock(&self.input_callback);
    let Some(callback) = callback.as_mut() else {
      tracing::trace!(target: "rtc", backend = %self.id, "no input callback, doing pass-through transform");
      return Ok(buffer);
    };

    let serial = self.serial.fetch_add(1, Ordering::Relaxed) + 1;
    {
      let mut transformed = lock(&self.transformed);
      transformed.expected = serial;
      transformed.buffer = None;
    }

    let is_audio_sender_frame =
      self.media_type == RtpMediaType::Audio && self.side == RtpTransformSide::Sender;
    let mut frame = TransformableFrame::new(buffer, is_audio_sender_frame);
    frame.serial = serial;
    tracing::trace!(target: "rtc", backend = %self.id, serial, "transforming frame");
    callback(frame);

    let deadline = Instant::now() + self.timeout;
    let mut transformed = lock(&self.transformed);
    loop {
      if let Some(buffer) = transformed.buffer.take() {
        tracing::trace!(target: "rtc", backend = %self.id, serial, "frame transformed, passing to call site");
        return Ok(buffer);
      }
      let now = Instant::now();
      if now >= deadline {
        tracing::warn!(target: "rtc", backend = %self.id, serial, "transformed frame not returned");
        return Err(RtcError::Timeout(self.timeout));
      }
      transformed = self
        .cond
        .wait_timeout(transformed, deadline - now)
        .map(|(guard, _)| guard)
        .unwrap_or_else(|poisoned| poisoned.into_inner().0);
    }
  }
}

impl fmt::Debug for RtpTransformBackend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RtpTransformBackend")
      .field("id", &self.id)
      .field("media_type", &self.media_type)
      .field("side", &self.side)
      .field("timeout", &self.timeout)
      .finish()
  }
}

/// Harness element running RTP packets through a backend
pub struct RtpTransformElement {
  backend: Arc<RtpTransformBackend>,
  pads: Vec<SrcPad>,
}

impl RtpTransformElement {
  pub fn new(backend: Arc<RtpTransformBackend>) -> Self {
    Self {
      backend,
      pads: Vec::new(),
    }
  }

  pub fn backend(&self) -> &Arc<RtpTransformBackend> {
    &self.backend
  }
}

impl Element for RtpTransformElement {
  fn name(&self) -> &str {
    self.backend.id()
  }

  fn negotiate(&mut self, format: &Format, pads: &[SrcPad]) -> HarnessResult<()> {
    if !format.has_type("application/x-rtp") {
      return Err(HarnessError::NegotiationFailed {
        element: self.backend.id().to_string(),
        format: format.to_string(),
      });
    }
    self.pads = pads.to_vec();
    push_event_to_all(&self.pads, &Event::FormatChanged(format.clone()));
    Ok(())
  }

  fn chain(&mut self, buffer: Buffer) -> HarnessResult<()> {
    let output = self
      .backend
      .transform(buffer)
      .map_err(|e| HarnessError::Processing(e.to_string()))?;
    let Some(pad) = self.pads.first() else {
      return Ok(());
    };
    match pad.push(output) {
      FlowReturn::Eos => Err(HarnessError::Processing(
        "buffer pushed after end-of-stream".to_string(),
      )),
      FlowReturn::Ok | FlowReturn::Flushing | FlowReturn::NotLinked => Ok(()),
    }
  }

  fn teardown(&mut self) {
    self.pads.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::Harness;
  use crate::rtc::packet::build_packet;
  use crossbeam::channel;
  use std::sync::Weak;

  fn packet(seq: u16, payload: &[u8]) -> Buffer {
    Buffer::from_vec(build_packet(111, seq, seq as u32 * 960, 0x1234, &[42], payload))
  }

  /// Callback that XORs the payload and hands the frame straight back
  fn xor_callback(backend: &Arc<RtpTransformBackend>) -> TransformCallback {
    let weak: Weak<RtpTransformBackend> = Arc::downgrade(backend);
    Box::new(move |mut frame: TransformableFrame| {
      let payload: Vec<u8> = frame.data().unwrap().iter().map(|b| b ^ 0xff).collect();
      frame.set_data(&payload).unwrap();
      if let Some(backend) = weak.upgrade() {
        backend.process_transformed_frame(frame);
      }
    })
  }

  #[test]
  fn test_pass_through_without_callback() {
    let backend = RtpTransformBackend::new(RtpMediaType::Video, RtpTransformSide::Receiver);
    assert!(backend.id().starts_with("rtp-video-receiver-transform-"));
    let input = packet(1, b"abc");
    let output = backend.transform(input.clone()).unwrap();
    assert_eq!(output.data(), input.data());
  }

  #[test]
  fn test_callback_transforms_payload() {
    let backend = Arc::new(RtpTransformBackend::new(
      RtpMediaType::Audio,
      RtpTransformSide::Sender,
    ));
    backend.set_input_callback(Some(xor_callback(&backend)));

    let output = backend.transform(packet(7, &[0x00, 0x0f])).unwrap();
    let header = RtpHeader::parse(output.data()).unwrap();
    assert_eq!(header.payload(output.data()), &[0xff, 0xf0]);
    assert_eq!(header.sequence_number, 7);
    assert_eq!(header.csrcs, vec![42]);

    backend.clear_transformable_frame_callback();
    assert!(!backend.has_input_callback());
    let output = backend.transform(packet(8, &[1])).unwrap();
    assert_eq!(RtpHeader::parse(output.data()).unwrap().payload(output.data()), &[1]);
  }

  #[test]
  fn test_frame_returned_from_another_thread() {
    let backend = Arc::new(RtpTransformBackend::new(
      RtpMediaType::Video,
      RtpTransformSide::Sender,
    ));
    let (tx, rx) = channel::unbounded::<TransformableFrame>();
    backend.set_input_callback(Some(Box::new(move |frame| {
      let _ = tx.send(frame);
    })));

    let worker_backend = backend.clone();
    let worker = std::thread::spawn(move || {
      for mut frame in rx.iter().take(3) {
        assert!(!frame.is_audio_sender_frame());
        let mut payload = frame.data().unwrap();
        payload.reverse();
        frame.set_data(&payload).unwrap();
        worker_backend.process_transformed_frame(frame);
      }
    });

    for seq in 0..3u16 {
      let output = backend.transform(packet(seq, &[1, 2, seq as u8])).unwrap();
      let header = RtpHeader::parse(output.data()).unwrap();
      assert_eq!(header.payload(output.data()), &[seq as u8, 2, 1]);
    }
    worker.join().unwrap();
  }

  #[test]
  fn test_missing_frame_times_out_and_late_frame_is_dropped() {
    let backend = Arc::new(RtpTransformBackend::with_timeout(
      RtpMediaType::Audio,
      RtpTransformSide::Receiver,
      Duration::from_millis(20),
    ));
    // Keeps the first frame; returns it late together with the second one
    let weak = Arc::downgrade(&backend);
    let held = Mutex::new(None::<TransformableFrame>);
    backend.set_input_callback(Some(Box::new(move |frame| {
      let mut held = held.lock().unwrap();
      match held.take() {
        None => *held = Some(frame),
        Some(stale) => {
          if let Some(backend) = weak.upgrade() {
            backend.process_transformed_frame(stale);
            backend.process_transformed_frame(frame);
          }
        }
      }
    })));

    let err = backend.transform(packet(1, b"late")).unwrap_err();
    assert_eq!(err, RtcError::Timeout(Duration::from_millis(20)));

    let output = backend.transform(packet(2, b"next")).unwrap();
    let header = RtpHeader::parse(output.data()).unwrap();
    assert_eq!(header.sequence_number, 2);
    assert_eq!(header.payload(output.data()), b"next");
  }

  #[test]
  fn test_frame_accessors() {
    let buffer = packet(3, b"hello").with_key_frame(false);
    let mut frame = TransformableFrame::new(buffer, true);
    assert!(frame.is_audio_sender_frame());
    assert!(!frame.is_key_frame());
    assert_eq!(frame.timestamp(), 2880);
    assert_eq!(frame.data().unwrap(), b"hello");
    let metadata = frame.metadata().unwrap();
    assert_eq!(metadata.synchronization_source, 0x1234);
    assert_eq!(metadata.contributing_sources, vec![42]);
    assert_eq!(metadata.payload_type, 111);

    assert!(frame.take_buffer().is_some());
    assert_eq!(frame.timestamp(), 0);
    assert_eq!(frame.data().unwrap_err(), RtcError::FrameTaken);
  }

  #[test]
  fn test_element_in_harness() {
    let backend = Arc::new(RtpTransformBackend::new(
      RtpMediaType::Audio,
      RtpTransformSide::Sender,
    ));
    backend.set_input_callback(Some(xor_callback(&backend)));

    let rejecting = Harness::new(Box::new(RtpTransformElement::new(backend.clone())), |_, _| {});
    assert!(matches!(
      rejecting.start(Format::new("audio/x-opus")),
      Err(HarnessError::NegotiationFailed { .. })
    ));

    let (tx, rx) = channel::unbounded();
    let harness = Harness::new(
      Box::new(RtpTransformElement::new(backend)),
      move |_, buffer: Buffer| {
        let _ = tx.send(buffer);
      },
    );
    harness
      .start(Format::new("application/x-rtp").with_str("media", "audio"))
      .unwrap();
    for seq in 0..3u16 {
      harness.push_buffer(packet(seq, &[0xf0, seq as u8])).unwrap();
    }
    assert_eq!(harness.process_output_buffers().unwrap(), 3);

    let payloads: Vec<Vec<u8>> = rx
      .try_iter()
      .map(|buffer| {
        let header = RtpHeader::parse(buffer.data()).unwrap();
        header.payload(buffer.data()).to_vec()
      })
      .collect();
    assert_eq!(payloads, vec![vec![0x0f, 0xff], vec![0x0f, 0xfe], vec![0x0f, 0xfd]]);
  }
}
