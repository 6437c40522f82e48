//! AudioDecoder
//!
//! Decodes [`EncodedChunk`]s into [`RawAudioData`] on top of a session.
//! See: https://w3c.github.io/webcodecs/#audiodecoder-interface

use std::future::Future;
use std::sync::Arc;

use super::audio_data::RawAudioData;
use super::encoded_chunk::EncodedChunk;
use super::error::MediaResult;
use super::post_task::TaskPoster;
use super::session::{
  FrameTiming, QueueCounter, Session, SessionContext, SessionKind, completion,
};
use crate::codec::{AudioConfig, Configuration, Format};

/// Audio decoder session
///
/// Example:
/// ```no_run
/// # use std::sync::Arc;
/// # use media_harness::webcodecs::{AudioDecoder, SessionContext, SessionKind, WorkQueue};
/// # use media_harness::AudioConfig;
/// # async fn run() -> media_harness::webcodecs::MediaResult<()> {
/// let context = SessionContext::default_for(SessionKind::AudioDecoder)?;
/// let poster = Arc::new(WorkQueue::new("audio callbacks")?);
/// let config = AudioConfig { sample_rate: 8_000, number_of_channels: 1, ..Default::default() };
/// let decoder = AudioDecoder::create_async("ulaw", config, context, poster, |data| {
///   println!("decoded {} frames", data.number_of_frames());
/// })
/// .await?;
/// decoder.flush_async().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AudioDecoder {
  session: Session<RawAudioData>,
  queue_size: QueueCounter,
}

impl AudioDecoder {
  /// Configure a decoder for `codec`; `on_created` receives it (or the
  /// reason it could not be built) on `poster`
  pub fn create(
    codec: &str,
    config: AudioConfig,
    context: SessionContext,
    poster: Arc<dyn TaskPoster>,
    output: impl Fn(RawAudioData) + Send + Sync + 'static,
    on_created: impl FnOnce(MediaResult<AudioDecoder>) + Send + 'static,
  ) {
    Session::create(
      SessionKind::AudioDecoder,
      codec,
      Configuration::Audio(config),
      context,
      poster,
      Arc::new(output),
      move |result| {
        on_created(result.map(|session| AudioDecoder {
          session,
          queue_size: QueueCounter::default(),
        }))
      },
    );
  }

  /// [`create`](Self::create) as a future
  pub fn create_async(
    codec: &str,
    config: AudioConfig,
    context: SessionContext,
    poster: Arc<dyn TaskPoster>,
    output: impl Fn(RawAudioData) + Send + Sync + 'static,
  ) -> impl Future<Output = MediaResult<AudioDecoder>> + Send {
    completion(move |done| Self::create(codec, config, context, poster, output, done))
  }

  pub fn codec(&self) -> &str {
    self.session.codec()
  }

  /// Format decoded audio comes out in
  pub fn output_format(&self) -> Option<Format> {
    self.session.output_format()
  }

  /// Decodes submitted but not completed yet
  pub fn decode_queue_size(&self) -> usize {
    self.queue_size.get()
  }

  pub fn is_closed(&self) -> bool {
    self.session.is_closed()
  }

  /// Decode one chunk. `done` reports the outcome of this chunk; decoded
  /// audio goes to the output callback.
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

  /// Resolves once every decoded frame was delivered; `AbortError` if the
  /// decoder was reset or closed first
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
