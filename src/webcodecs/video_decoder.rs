//! VideoDecoder
//!
//! Decodes [`EncodedChunk`]s into [`VideoFrame`]s on top of a session.
//! See: https://w3c.github.io/webcodecs/#videodecoder-interface

use std::future::Future;
use std::sync::Arc;

use super::encoded_chunk::EncodedChunk;
use super::error::MediaResult;
use super::post_task::TaskPoster;
use super::session::{
  FrameTiming, QueueCounter, Session, SessionContext, SessionKind, completion,
};
use super::video_frame::VideoFrame;
use crate::codec::{Configuration, Format, VideoConfig};

/// Video decoder session
#[derive(Debug)]
pub struct VideoDecoder {
  session: Session<VideoFrame>,
  queue_size: QueueCounter,
}

impl VideoDecoder {
  /// Configure a decoder for `codec`; `on_created` receives it (or the
  /// reason it could not be built) on `poster`
  pub fn create(
    codec: &str,
    config: VideoConfig,
    context: SessionContext,
    poster: Arc<dyn TaskPoster>,
    output: impl Fn(VideoFrame) + Send + Sync + 'static,
    on_created: impl FnOnce(MediaResult<VideoDecoder>) + Send + 'static,
  ) {
    Session::create(
      SessionKind::VideoDecoder,
      codec,
      Configuration::Video(config),
      context,
      poster,
      Arc::new(output),
      move |result| {
        on_created(result.map(|session| VideoDecoder {
          session,
          queue_size: QueueCounter::default(),
        }))
      },
    );
  }

  /// [`create`](Self::create) as a future
  pub fn create_async(
    codec: &str,
    config: VideoConfig,
    context: SessionContext,
    poster: Arc<dyn TaskPoster>,
    output: impl Fn(VideoFrame) + Send + Sync + 'static,
  ) -> impl Future<Output = MediaResult<VideoDecoder>> + Send {
    completion(move |done| Self::create(codec, config, context, poster, output, done))
  }

  pub fn codec(&self) -> &str {
    self.session.codec()
  }

  pub fn output_format(&self) -> Option<Format> {
    self.session.output_format()
  }

  pub fn decode_queue_size(&self) -> usize {
    self.queue_size.get()
  }

  pub fn is_closed(&self) -> bool {
    self.session.is_closed()
  }

  /// Decode one chunk. `done` reports the outcome of this chunk; frames go
  /// to the output callback.
  pub fn decode(&self, chunk: &EncodedChunk, done: impl FnOnce(MediaResult<()>) + Send + 'static) {
    let ticket = self.queue_size.enter();
    self.session.submit(
      chunk.buffer(),
      FrameTiming::new(chunk.timestamp(), chunk.duration()),
      None,
      move |result| {
        drop(ticket);
        done(result)
      },
    );
  }

  pub fn flush(&self, done: impl FnOnce(MediaResult<()>) + Send + 'static) {
    self.session.flush(done);
  }

  pub fn flush_async(&self) -> impl Future<Output = MediaResult<()>> + Send {
    completion(|done| self.session.flush(done))
  }

  pub fn reset(&self) {
    self.session.reset();
  }

  pub fn close(&self) {
    self.session.close();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::elements::{BufferTransform, TransformElement};
  use crate::codec::{Buffer, CodecDirection, ElementRegistry, HarnessError, HarnessResult};
  use crate::webcodecs::encoded_chunk::EncodedChunkType;
  use crate::webcodecs::error::DOMExceptionName;
  use crate::webcodecs::video_frame::VideoPixelFormat;
  use crate::webcodecs::work_queue::WorkQueue;
  use crossbeam::channel;
  use futures::executor::block_on;
  use std::time::Duration;

  /// Emits a blank I420 frame per chunk, tagged with the chunk's first byte
  struct BlankDecoder {
    frame_size: usize,
  }

  impl BufferTransform for BlankDecoder {
    fn name(&self) -> &str {
      "blankdec"
    }

    fn output_format(&mut self, input: &Format) -> HarnessResult<Format> {
      let (Some(width), Some(height)) = (input.get_positive("width"), input.get_positive("height"))
      else {
        return Err(HarnessError::NegotiationFailed {
          element: "blankdec".to_string(),
          format: input.to_string(),
        });
      };
      self.frame_size = VideoPixelFormat::I420.frame_size(width, height);
      Ok(
        Format::new("video/x-raw")
          .with_str("format", "I420")
          .with_int("width", width as i64)
          .with_int("height", height as i64),
      )
    }

    fn transform(&mut self, input: Buffer) -> HarnessResult<Vec<Buffer>> {
      let mut frame = vec![0u8; self.frame_size];
      frame[0] = input.data()[0];
      Ok(vec![input.derive(frame)])
    }
  }

  fn context() -> SessionContext {
    let registry = ElementRegistry::with_defaults();
    registry.register(CodecDirection::Decoder, "vp8", |_| {
      Ok(Box::new(TransformElement::new(BlankDecoder { frame_size: 0 })))
    });
    let queue = Arc::new(WorkQueue::new("test decoder queue").unwrap());
    SessionContext::new(queue, Arc::new(registry))
  }

  fn small() -> VideoConfig {
    VideoConfig {
      width: 4,
      height: 2,
      ..Default::default()
    }
  }

  #[test]
  fn test_decode_frames_in_order() {
    let (tx, rx) = channel::unbounded();
    let poster: Arc<dyn TaskPoster> = Arc::new(WorkQueue::new("test callbacks").unwrap());
    let decoder = block_on(VideoDecoder::create_async("vp8", small(), context(), poster, move |frame| {
      let _ = tx.send(frame);
    }))
    .unwrap();

    for i in 0..5u8 {
      let kind = if i == 0 { EncodedChunkType::Key } else { EncodedChunkType::Delta };
      let chunk = EncodedChunk::new(kind, i as i64 * 33_333, Some(33_333), &[i, 0xaa]);
      decoder.decode(&chunk, |result| assert!(result.is_ok()));
    }
    block_on(decoder.flush_async()).unwrap();

    let frames: Vec<VideoFrame> = rx.try_iter().collect();
    assert_eq!(frames.len(), 5);
    for (i, frame) in frames.iter().enumerate() {
      assert_eq!(frame.timestamp(), i as i64 * 33_333);
      assert_eq!(frame.duration(), Some(33_333));
      assert_eq!(frame.format(), VideoPixelFormat::I420);
      let mut out = vec![0u8; frame.allocation_size()];
      frame.copy_to(&mut out).unwrap();
      assert_eq!(out.len(), 12);
      assert_eq!(out[0], i as u8);
    }
    assert_eq!(
      decoder.output_format().unwrap().get_str("format"),
      Some("I420")
    );
  }

  #[test]
  fn test_reset_then_decode_again() {
    let (tx, rx) = channel::unbounded();
    let poster: Arc<dyn TaskPoster> = Arc::new(WorkQueue::new("test callbacks").unwrap());
    let decoder = block_on(VideoDecoder::create_async("vp8", small(), context(), poster, move |frame| {
      let _ = tx.send(frame);
    }))
    .unwrap();

    decoder.reset();
    let chunk = EncodedChunk::new(EncodedChunkType::Key, 7, None, &[9]);
    let (done_tx, done_rx) = channel::unbounded();
    decoder.decode(&chunk, move |result| {
      let _ = done_tx.send(result);
    });
    block_on(decoder.flush_async()).unwrap();
    assert!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap().is_ok());
    let frames: Vec<VideoFrame> = rx.try_iter().collect();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].timestamp(), 7);
  }

  #[test]
  fn test_unregistered_video_codec() {
    let poster: Arc<dyn TaskPoster> = Arc::new(WorkQueue::new("test callbacks").unwrap());
    let err = block_on(VideoDecoder::create_async("avc1.42001f", small(), context(), poster, |_| {}))
      .unwrap_err();
    assert_eq!(err.name, DOMExceptionName::NotSupportedError);
  }
}
