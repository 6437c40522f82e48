//! VideoEncoder
//!
//! Encodes [`VideoFrame`]s into [`EncodedChunk`]s on top of a session.
//! See: https://w3c.github.io/webcodecs/#videoencoder-interface

use std::future::Future;
use std::sync::Arc;

use super::encoded_chunk::EncodedChunk;
use super::error::{MediaError, MediaResult};
use super::post_task::TaskPoster;
use super::session::{
  ActiveConfiguration, FrameTiming, QueueCounter, Session, SessionContext, SessionKind, completion,
};
use super::video_frame::{VideoFrame, VideoPixelFormat};
use crate::codec::{Configuration, Event, VideoConfig};

/// Per-frame encode options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoEncoderEncodeOptions {
  /// Request a key frame for this frame
  pub key_frame: bool,
}

/// Video encoder session
#[derive(Debug)]
pub struct VideoEncoder {
  session: Session<EncodedChunk>,
  queue_size: QueueCounter,
}

impl VideoEncoder {
  /// Configure an encoder for `codec`; `on_created` receives it (or the
  /// reason it could not be built) on `poster`
  pub fn create(
    codec: &str,
    config: VideoConfig,
    context: SessionContext,
    poster: Arc<dyn TaskPoster>,
    output: impl Fn(EncodedChunk) + Send + Sync + 'static,
    on_created: impl FnOnce(MediaResult<VideoEncoder>) + Send + 'static,
  ) {
    Session::create(
      SessionKind::VideoEncoder,
      codec,
      Configuration::Video(config),
      context,
      poster,
      Arc::new(output),
      move |result| {
        on_created(result.map(|session| VideoEncoder {
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
    output: impl Fn(EncodedChunk) + Send + Sync + 'static,
  ) -> impl Future<Output = MediaResult<VideoEncoder>> + Send {
    completion(move |done| Self::create(codec, config, context, poster, output, done))
  }

  pub fn codec(&self) -> &str {
    self.session.codec()
  }

  pub fn active_configuration(&self) -> ActiveConfiguration {
    self.session.active_configuration()
  }

  pub fn encode_queue_size(&self) -> usize {
    self.queue_size.get()
  }

  pub fn is_closed(&self) -> bool {
    self.session.is_closed()
  }

  /// Frames must already be in the negotiated pixel format and size
  fn check_frame(&self, frame: &VideoFrame) -> MediaResult<()> {
    let expected = self
      .session
      .input_format()
      .and_then(|f| f.get_str("format").and_then(VideoPixelFormat::from_raw_format))
      .unwrap_or(VideoPixelFormat::I420);
    if frame.format() != expected {
      return Err(MediaError::constraint(format!(
        "frame is {:?}, encoder takes {:?}",
        frame.format(),
        expected
      )));
    }
    if let Some(config) = self.session.config().video()
      && (frame.coded_width() != config.width || frame.coded_height() != config.height)
    {
      return Err(MediaError::constraint(format!(
        "frame is {}x{}, encoder is configured for {}x{}",
        frame.coded_width(),
        frame.coded_height(),
        config.width,
        config.height
      )));
    }
    Ok(())
  }

  /// Encode one frame. `done` reports the outcome; chunks go to the output
  /// callback.
  pub fn encode(
    &self,
    frame: &VideoFrame,
    options: VideoEncoderEncodeOptions,
    done: impl FnOnce(MediaResult<()>) + Send + 'static,
  ) {
    let ticket = self.queue_size.enter();
    let done = move |result| {
      drop(ticket);
      done(result)
    };
    if let Err(e) = self.check_frame(frame) {
      self.session.reject(e, done);
      return;
    }
    let pre_event = options.key_frame.then_some(Event::ForceKeyUnit);
    self.session.submit(
      frame.buffer(),
      FrameTiming::new(frame.timestamp(), frame.duration()),
      pre_event,
      done,
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
  use crate::codec::{Buffer, CodecDirection, ElementRegistry, Format, HarnessResult};
  use crate::webcodecs::encoded_chunk::EncodedChunkType;
  use crate::webcodecs::error::DOMExceptionName;
  use crate::webcodecs::video_frame::VideoFrameBufferInit;
  use crate::webcodecs::work_queue::WorkQueue;
  use crossbeam::channel;
  use futures::executor::block_on;
  use std::time::Duration;

  /// First frame and requested frames are key frames; output is one byte
  struct TinyEncoder {
    key_pending: bool,
  }

  impl BufferTransform for TinyEncoder {
    fn name(&self) -> &str {
      "tinyenc"
    }

    fn output_format(&mut self, input: &Format) -> HarnessResult<Format> {
      let mut format = Format::new("video/x-vp8").with_bytes("codec_data", &[1, 2]);
      for field in ["width", "height"] {
        if let Some(value) = input.get_int(field) {
          format = format.with_int(field, value);
        }
      }
      Ok(format)
    }

    fn transform(&mut self, input: Buffer) -> HarnessResult<Vec<Buffer>> {
      let key = std::mem::take(&mut self.key_pending);
      Ok(vec![input.derive(vec![input.data()[0]]).with_key_frame(key)])
    }

    fn force_key_unit(&mut self) {
      self.key_pending = true;
    }
  }

  fn encoder(output: impl Fn(EncodedChunk) + Send + Sync + 'static) -> VideoEncoder {
    let registry = ElementRegistry::new();
    registry.register(CodecDirection::Encoder, "vp8", |_| {
      Ok(Box::new(TransformElement::new(TinyEncoder { key_pending: true })))
    });
    let queue = Arc::new(WorkQueue::new("test encoder queue").unwrap());
    let context = SessionContext::new(queue, Arc::new(registry));
    let poster: Arc<dyn TaskPoster> = Arc::new(WorkQueue::new("test callbacks").unwrap());
    let config = VideoConfig {
      width: 2,
      height: 2,
      ..Default::default()
    };
    block_on(VideoEncoder::create_async("vp8", config, context, poster, output)).unwrap()
  }

  fn frame(tag: u8, timestamp: i64, width: u32) -> VideoFrame {
    let init = VideoFrameBufferInit {
      format: VideoPixelFormat::I420,
      coded_width: width,
      coded_height: 2,
      timestamp,
      duration: None,
    };
    let mut data = vec![0u8; VideoPixelFormat::I420.frame_size(width, 2)];
    data[0] = tag;
    VideoFrame::from_vec(data, init).unwrap()
  }

  #[test]
  fn test_key_frame_request() {
    let (tx, rx) = channel::unbounded();
    let encoder = encoder(move |chunk| {
      let _ = tx.send(chunk);
    });
    for i in 0..4u8 {
      let options = VideoEncoderEncodeOptions { key_frame: i == 2 };
      encoder.encode(&frame(i, i as i64 * 100, 2), options, |_| {});
    }
    block_on(encoder.flush_async()).unwrap();

    let chunks: Vec<EncodedChunk> = rx.try_iter().collect();
    let types: Vec<EncodedChunkType> = chunks.iter().map(|c| c.chunk_type()).collect();
    assert_eq!(
      types,
      vec![
        EncodedChunkType::Key,
        EncodedChunkType::Delta,
        EncodedChunkType::Key,
        EncodedChunkType::Delta,
      ]
    );
    let stamps: Vec<i64> = chunks.iter().map(|c| c.timestamp()).collect();
    assert_eq!(stamps, vec![0, 100, 200, 300]);
    assert_eq!(chunks[3].data(), &[3]);
  }

  #[test]
  fn test_wrong_frame_size_is_constraint_error() {
    let encoder = encoder(|_| {});
    let (tx, rx) = channel::unbounded();
    encoder.encode(&frame(0, 0, 4), Default::default(), move |result| {
      let _ = tx.send(result);
    });
    let err = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();
    assert_eq!(err.name, DOMExceptionName::ConstraintError);
    assert_eq!(encoder.encode_queue_size(), 0);
  }

  #[test]
  fn test_active_configuration_reports_description() {
    let encoder = encoder(|_| {});
    let active = encoder.active_configuration();
    assert_eq!(active.codec, "vp8");
    assert_eq!(active.description, Some(vec![1, 2]));
    assert_eq!(active.output_format.unwrap().get_int("width"), Some(2));
  }
}
