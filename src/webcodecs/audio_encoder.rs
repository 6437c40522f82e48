//! AudioEncoder
//!
//! Encodes [`RawAudioData`] into [`EncodedChunk`]s on top of a session.
//! See: https://w3c.github.io/webcodecs/#audioencoder-interface

use std::future::Future;
use std::sync::Arc;

use super::audio_data::{AudioSampleFormat, RawAudioData};
use super::encoded_chunk::EncodedChunk;
use super::error::{MediaError, MediaResult};
use super::post_task::TaskPoster;
use super::session::{
  ActiveConfiguration, FrameTiming, QueueCounter, Session, SessionContext, SessionKind, completion,
};
use crate::codec::{AudioConfig, Buffer, Configuration};

/// Audio encoder session
#[derive(Debug)]
pub struct AudioEncoder {
  session: Session<EncodedChunk>,
  queue_size: QueueCounter,
}

impl AudioEncoder {
  /// Configure an encoder for `codec`; `on_created` receives it (or the
  /// reason it could not be built) on `poster`
  pub fn create(
    codec: &str,
    config: AudioConfig,
    context: SessionContext,
    poster: Arc<dyn TaskPoster>,
    output: impl Fn(EncodedChunk) + Send + Sync + 'static,
    on_created: impl FnOnce(MediaResult<AudioEncoder>) + Send + 'static,
  ) {
    Session::create(
      SessionKind::AudioEncoder,
      codec,
      Configuration::Audio(config),
      context,
      poster,
      Arc::new(output),
      move |result| {
        on_created(result.map(|session| AudioEncoder {
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
    output: impl Fn(EncodedChunk) + Send + Sync + 'static,
  ) -> impl Future<Output = MediaResult<AudioEncoder>> + Send {
    completion(move |done| Self::create(codec, config, context, poster, output, done))
  }

  pub fn codec(&self) -> &str {
    self.session.codec()
  }

  pub fn active_configuration(&self) -> ActiveConfiguration {
    self.session.active_configuration()
  }

  /// Encodes submitted but not completed yet
  pub fn encode_queue_size(&self) -> usize {
    self.queue_size.get()
  }

  pub fn is_closed(&self) -> bool {
    self.session.is_closed()
  }

  /// Sample format the encoder element takes
  fn input_sample_format(&self) -> AudioSampleFormat {
    self
      .session
      .input_format()
      .as_ref()
      .and_then(AudioSampleFormat::from_format)
      .unwrap_or(AudioSampleFormat::S16)
  }

  fn prepare(&self, data: &RawAudioData) -> MediaResult<Buffer> {
    if let Some(config) = self.session.config().audio()
      && (data.sample_rate() != config.sample_rate
        || data.number_of_channels() != config.number_of_channels)
    {
      return Err(MediaError::constraint(format!(
        "audio is {} Hz / {} channels, encoder is configured for {} Hz / {} channels",
        data.sample_rate(),
        data.number_of_channels(),
        config.sample_rate,
        config.number_of_channels
      )));
    }

    let target = self.input_sample_format();
    if data.format() == target {
      return Ok(data.buffer());
    }
    tracing::trace!(target: "webcodecs", from = ?data.format(), to = ?target, "converting encoder input");
    Ok(
      Buffer::from_vec(data.to_format(target)?)
        .with_timestamp(data.timestamp())
        .with_duration(data.duration()),
    )
  }

  /// Encode one block of audio, converting it to the sample format the
  /// encoder takes. `done` reports the outcome; chunks go to the output
  /// callback.
  pub fn encode(&self, data: &RawAudioData, done: impl FnOnce(MediaResult<()>) + Send + 'static) {
    let ticket = self.queue_size.enter();
    let done = move |result| {
      drop(ticket);
      done(result)
    };
    match self.prepare(data) {
      Ok(buffer) => self.session.submit(
        buffer,
        FrameTiming::new(data.timestamp(), Some(data.duration())),
        None,
        done,
      ),
      Err(e) => self.session.reject(e, done),
    }
  }

  pub fn flush(&self, done: impl FnOnce(MediaResult<()>) + Send + 'static) {
    self.session.flush(done);
  }

  /// Resolves once every chunk was delivered; `AbortError` if the encoder
  /// was reset or closed first
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
