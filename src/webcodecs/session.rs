//! Decoder/encoder session core
//!
//! A [`Session`] owns one [`Harness`] and runs every operation against it on
//! the session's [`WorkQueue`], in submission order. Results never reach the
//! caller directly from the queue or from element threads: output objects and
//! completion callbacks are posted to the caller's [`TaskPoster`] and pass a
//! [`DeliveryGate`] right before they run, so nothing is delivered once
//! [`close`](Session::close) returned and nothing from before a
//! [`reset`](Session::reset) is delivered after it.
//!
//! Inputs are tagged with a [`FrameId`]; elements carry the tag to the outputs
//! they derive, which is how outputs find the timestamp and duration of the
//! input they came from even when an element holds frames back.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::ThreadId;

use futures::channel::oneshot;

use super::codec_string::{encoded_format, raw_format, resolve_codec};
use super::error::{MediaError, MediaResult};
use super::post_task::TaskPoster;
use super::work_queue::{WorkQueue, shared_work_queue};
use crate::codec::{
  Buffer, CodecDirection, Configuration, ElementProvider, ElementRegistry, Event, Format, FrameId,
  Harness, HarnessConfig, MediaKind, OutputStream, lock,
};

/// Kind of session, one shared work queue per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
  AudioDecoder,
  AudioEncoder,
  VideoDecoder,
  VideoEncoder,
}

impl SessionKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      SessionKind::AudioDecoder => "AudioDecoder",
      SessionKind::AudioEncoder => "AudioEncoder",
      SessionKind::VideoDecoder => "VideoDecoder",
      SessionKind::VideoEncoder => "VideoEncoder",
    }
  }

  pub fn queue_name(&self) -> String {
    format!("{} queue", self.as_str())
  }

  pub fn direction(&self) -> CodecDirection {
    match self {
      SessionKind::AudioDecoder | SessionKind::VideoDecoder => CodecDirection::Decoder,
      SessionKind::AudioEncoder | SessionKind::VideoEncoder => CodecDirection::Encoder,
    }
  }

  pub fn media_kind(&self) -> MediaKind {
    match self {
      SessionKind::AudioDecoder | SessionKind::AudioEncoder => MediaKind::Audio,
      SessionKind::VideoDecoder | SessionKind::VideoEncoder => MediaKind::Video,
    }
  }
}

impl fmt::Display for SessionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

static DEFAULT_REGISTRY: OnceLock<Arc<ElementRegistry>> = OnceLock::new();

/// Process-wide registry used by [`SessionContext::default_for`]
pub fn default_registry() -> Arc<ElementRegistry> {
  DEFAULT_REGISTRY
    .get_or_init(|| Arc::new(ElementRegistry::with_defaults()))
    .clone()
}

/// Everything a session depends on besides its codec configuration
#[derive(Clone)]
pub struct SessionContext {
  pub work_queue: Arc<WorkQueue>,
  pub provider: Arc<dyn ElementProvider>,
  pub harness: HarnessConfig,
}

impl SessionContext {
  pub fn new(work_queue: Arc<WorkQueue>, provider: Arc<dyn ElementProvider>) -> Self {
    Self {
      work_queue,
      provider,
      harness: HarnessConfig::default(),
    }
  }

  /// Shared work queue for `kind` and the default registry
  pub fn default_for(kind: SessionKind) -> MediaResult<Self> {
    Ok(Self::new(shared_work_queue(kind)?, default_registry()))
  }

  pub fn with_harness_config(mut self, harness: HarnessConfig) -> Self {
    self.harness = harness;
    self
  }
}

impl fmt::Debug for SessionContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SessionContext")
      .field("work_queue", &self.work_queue.name())
      .field("harness", &self.harness)
      .finish()
  }
}

/// Timing of one submitted frame, in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
  pub timestamp: i64,
  pub duration: Option<u64>,
}

impl FrameTiming {
  pub fn new(timestamp: i64, duration: Option<u64>) -> Self {
    Self {
      timestamp,
      duration,
    }
  }
}

const MAX_PENDING_FRAMES: usize = 128;

/// Timing of submitted frames, looked up by origin tag
#[derive(Default)]
struct PendingFrames {
  frames: VecDeque<(FrameId, FrameTiming)>,
}

impl PendingFrames {
  fn push(&mut self, id: FrameId, timing: FrameTiming) {
    if self.frames.len() >= MAX_PENDING_FRAMES {
      self.frames.pop_front();
    }
    self.frames.push_back((id, timing));
  }

  /// Entries stay after a lookup: one input may yield several outputs
  fn timing_for(&mut self, buffer: &Buffer) -> FrameTiming {
    let found = match buffer.frame_id() {
      Some(id) => self
        .frames
        .iter()
        .find(|(frame, _)| *frame == id)
        .map(|(_, timing)| *timing),
      // Untagged output: assume submission order
      None => self.frames.pop_front().map(|(_, timing)| timing),
    };
    match found {
      Some(timing) => FrameTiming {
        duration: timing.duration.or(buffer.duration()),
        ..timing
      },
      None => FrameTiming::new(buffer.timestamp().unwrap_or(0), buffer.duration()),
    }
  }

  fn clear(&mut self) {
    self.frames.clear();
  }
}

struct GateState {
  closed: bool,
  generation: u64,
  /// Threads currently running a gated callback
  delivering: Vec<ThreadId>,
}

/// Last check before a posted callback runs
pub struct DeliveryGate {
  state: Mutex<GateState>,
  idle: Condvar,
}

impl Default for DeliveryGate {
  fn default() -> Self {
    Self {
      state: Mutex::new(GateState {
        closed: false,
        generation: 0,
        delivering: Vec::new(),
      }),
      idle: Condvar::new(),
    }
  }
}

struct DeliveryGuard<'a> {
  gate: &'a DeliveryGate,
  thread: ThreadId,
}

impl Drop for DeliveryGuard<'_> {
  fn drop(&mut self) {
    let mut state = lock(&self.gate.state);
    if let Some(position) = state.delivering.iter().position(|t| *t == self.thread) {
      state.delivering.swap_remove(position);
    }
    drop(state);
    self.gate.idle.notify_all();
  }
}

impl DeliveryGate {
  pub fn generation(&self) -> u64 {
    lock(&self.state).generation
  }

  pub fn is_closed(&self) -> bool {
    lock(&self.state).closed
  }

  /// Run `f` unless the gate is closed or, when `generation` is given, has
  /// moved past it. Returns whether `f` ran.
  pub fn deliver(&self, generation: Option<u64>, f: impl FnOnce()) -> bool {
    let thread = std::thread::current().id();
    {
      let mut state = lock(&self.state);
      if state.closed || generation.is_some_and(|g| g != state.generation) {
        return false;
      }
      state.delivering.push(thread);
    }
    let _guard = DeliveryGuard { gate: self, thread };
    f();
    true
  }

  /// Close for good. Returns false if it already was. Waits for callbacks
  /// running on other threads; a callback closing its own session does not
  /// wait for itself.
  pub fn close(&self) -> bool {
    let mut state = lock(&self.state);
    let first = !state.closed;
    state.closed = true;
    self.wait_idle(state);
    first
  }

  /// Start a new generation, waiting like [`close`](Self::close)
  pub fn advance(&self) -> u64 {
    let mut state = lock(&self.state);
    state.generation += 1;
    let generation = state.generation;
    self.wait_idle(state);
    generation
  }

  fn wait_idle(&self, mut state: MutexGuard<'_, GateState>) {
    let me = std::thread::current().id();
    while state.delivering.iter().any(|t| *t != me) {
      state = self.idle.wait(state).unwrap_or_else(PoisonError::into_inner);
    }
  }
}

/// Object a session builds from one output buffer
pub trait SessionOutput: Sized + Send + 'static {
  fn from_output(
    buffer: Buffer,
    timing: FrameTiming,
    format: Option<&Format>,
    config: &Configuration,
  ) -> MediaResult<Self>;
}

pub type OutputCallback<O> = Arc<dyn Fn(O) + Send + Sync>;

/// Configuration a configured session reports back
#[derive(Debug, Clone)]
pub struct ActiveConfiguration {
  pub codec: String,
  /// Format the element produces, once announced
  pub output_format: Option<Format>,
  /// Sample rate and channels, or coded size
  pub config: Configuration,
  /// Codec specific header, from the output format or the configuration
  pub description: Option<Vec<u8>>,
}

/// Completion of one submission or flush
pub type DoneCallback = Box<dyn FnOnce(MediaResult<()>) + Send>;

/// Turn a callback-style operation into a future. `start` runs right away;
/// a callback dropped without running (session closed, reset) resolves to
/// `AbortError`.
pub(crate) fn completion<T: Send + 'static>(
  start: impl FnOnce(Box<dyn FnOnce(MediaResult<T>) + Send>),
) -> impl Future<Output = MediaResult<T>> + Send {
  let (sender, receiver) = oneshot::channel();
  start(Box::new(move |result| {
    let _ = sender.send(result);
  }));
  async move {
    receiver
      .await
      .unwrap_or_else(|_| Err(MediaError::abort("operation aborted")))
  }
}

/// Number of submissions whose completion callback has not run or been
/// discarded yet
#[derive(Debug, Clone, Default)]
pub(crate) struct QueueCounter(Arc<AtomicUsize>);

impl QueueCounter {
  pub(crate) fn get(&self) -> usize {
    self.0.load(Ordering::SeqCst)
  }

  pub(crate) fn enter(&self) -> QueueTicket {
    self.0.fetch_add(1, Ordering::SeqCst);
    QueueTicket(self.0.clone())
  }
}

/// Decrements its counter when dropped
pub(crate) struct QueueTicket(Arc<AtomicUsize>);

impl Drop for QueueTicket {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

/// Queue `job` with `callback`, or hand the callback back if the queue no
/// longer accepts work
fn dispatch_with<C: Send + 'static>(
  queue: &WorkQueue,
  callback: C,
  job: impl FnOnce(C) + Send + 'static,
) -> Result<(), C> {
  let slot = Arc::new(Mutex::new(Some(callback)));
  let job_slot = slot.clone();
  let accepted = queue.dispatch(move || {
    if let Some(callback) = lock(&job_slot).take() {
      job(callback);
    }
  });
  if accepted {
    return Ok(());
  }
  match lock(&slot).take() {
    Some(callback) => Err(callback),
    None => Ok(()),
  }
}

struct SessionShared<O> {
  kind: SessionKind,
  codec: String,
  config: Configuration,
  context: SessionContext,
  poster: Arc<dyn TaskPoster>,
  output: OutputCallback<O>,
  gate: Arc<DeliveryGate>,
  /// Generation whose reset flush has completed on the queue
  flushed_generation: AtomicU64,
  pending: Mutex<PendingFrames>,
  /// Output that could not be converted, reported with the next completion
  output_error: Mutex<Option<MediaError>>,
  harness: Mutex<Option<Arc<Harness>>>,
  drain_scheduled: AtomicBool,
}

impl<O: SessionOutput> SessionShared<O> {
  fn harness(&self) -> Option<Arc<Harness>> {
    lock(&self.harness).clone()
  }

  /// Runs on the work queue
  fn build(self: &Arc<Self>) -> MediaResult<()> {
    let parsed = resolve_codec(&self.codec)?;
    if parsed.family.kind() != self.kind.media_kind() {
      return Err(MediaError::not_supported(format!(
        "Unsupported {} codec: {}",
        self.kind.media_kind(),
        self.codec
      )));
    }
    let input_format = match self.kind.direction() {
      CodecDirection::Decoder => encoded_format(&parsed, &self.config)?,
      CodecDirection::Encoder => raw_format(&parsed, &self.config)?,
    };

    let element = self
      .context
      .provider
      .lookup(self.kind.direction(), &self.codec, &self.config)?;

    let weak = Arc::downgrade(self);
    let harness = Harness::with_config(element, self.context.harness.clone(), move |stream, buffer| {
      if let Some(shared) = weak.upgrade() {
        shared.route_output(stream, buffer);
      }
    });
    harness.start(input_format)?;

    let weak = Arc::downgrade(self);
    harness.set_output_notify(Arc::new(move || {
      if let Some(shared) = weak.upgrade() {
        shared.schedule_drain();
      }
    }));

    tracing::debug!(target: "webcodecs", kind = %self.kind, codec = %self.codec, element = %harness.name(), "session configured");
    *lock(&self.harness) = Some(Arc::new(harness));
    Ok(())
  }

  /// Called from the harness output callback, on the work queue
  fn route_output(&self, stream: &OutputStream, buffer: Buffer) {
    let generation = self.gate.generation();
    if generation != self.flushed_generation.load(Ordering::SeqCst) {
      tracing::trace!(target: "webcodecs", kind = %self.kind, "dropping output from before reset");
      return;
    }

    let timing = lock(&self.pending).timing_for(&buffer);
    let format = stream.output_format();
    match O::from_output(buffer, timing, format.as_ref(), &self.config) {
      Ok(output) => {
        let gate = self.gate.clone();
        let callback = self.output.clone();
        self.poster.post_task(Box::new(move || {
          gate.deliver(Some(generation), move || callback(output));
        }));
      }
      Err(e) => {
        tracing::warn!(target: "webcodecs", kind = %self.kind, "failed to convert output: {}", e);
        lock(&self.output_error).get_or_insert(e);
      }
    }
  }

  /// Output showed up outside of a queue job (element thread); drain it from
  /// the queue. Coalesced: one drain job in flight at a time.
  fn schedule_drain(self: &Arc<Self>) {
    if self.context.work_queue.is_current() || self.gate.is_closed() {
      return;
    }
    if self.drain_scheduled.swap(true, Ordering::SeqCst) {
      return;
    }
    let shared = self.clone();
    let accepted = self.context.work_queue.dispatch(move || {
      shared.drain_scheduled.store(false, Ordering::SeqCst);
      if let Err(e) = shared.process_output() {
        lock(&shared.output_error).get_or_insert(e);
      }
    });
    if !accepted {
      self.drain_scheduled.store(false, Ordering::SeqCst);
    }
  }

  fn process_output(&self) -> MediaResult<()> {
    match self.harness() {
      Some(harness) => {
        harness.process_output_samples()?;
        Ok(())
      }
      None => Ok(()),
    }
  }

  fn take_output_error(&self) -> MediaResult<()> {
    match lock(&self.output_error).take() {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  fn process_input(
    &self,
    buffer: Buffer,
    timing: FrameTiming,
    pre_event: Option<Event>,
  ) -> MediaResult<()> {
    if buffer.is_empty() {
      return Err(MediaError::encoding("Empty frame"));
    }
    let harness = self
      .harness()
      .ok_or_else(|| MediaError::invalid_state(format!("{} is not configured", self.kind)))?;

    let frame_id = FrameId::next();
    lock(&self.pending).push(frame_id, timing);
    if let Some(event) = pre_event {
      harness.push_event(event)?;
    }
    harness.push_buffer(buffer.with_frame_id(frame_id))?;
    let processed = self.process_output();
    self.take_output_error()?;
    processed
  }

  /// Deliver everything buffered, then re-arm the harness for more input
  fn drain_harness(&self) -> MediaResult<()> {
    let Some(harness) = self.harness() else {
      return Ok(());
    };
    let drained = harness.drain();
    let flushed = harness.flush_buffers();
    lock(&self.pending).clear();
    self.take_output_error()?;
    drained?;
    flushed?;
    Ok(())
  }

  /// Post `done(result)`; with a generation it is dropped after a reset
  fn complete(&self, generation: Option<u64>, done: DoneCallback, result: MediaResult<()>) {
    let gate = self.gate.clone();
    self.poster.post_task(Box::new(move || {
      gate.deliver(generation, move || done(result));
    }));
  }
}

/// One decode or encode lifecycle on top of a harness
pub struct Session<O: SessionOutput> {
  shared: Arc<SessionShared<O>>,
}

impl<O: SessionOutput> Session<O> {
  /// Build the session on the context's work queue and post the outcome with
  /// `poster`. The session delivers output objects through `output`, on
  /// `poster` as well.
  pub fn create(
    kind: SessionKind,
    codec: &str,
    config: Configuration,
    context: SessionContext,
    poster: Arc<dyn TaskPoster>,
    output: OutputCallback<O>,
    on_created: impl FnOnce(MediaResult<Session<O>>) + Send + 'static,
  ) {
    let shared = Arc::new(SessionShared {
      kind,
      codec: codec.to_string(),
      config,
      context: context.clone(),
      poster: poster.clone(),
      output,
      gate: Arc::new(DeliveryGate::default()),
      flushed_generation: AtomicU64::new(0),
      pending: Mutex::new(PendingFrames::default()),
      output_error: Mutex::new(None),
      harness: Mutex::new(None),
      drain_scheduled: AtomicBool::new(false),
    });

    let job_poster = poster.clone();
    let codec = codec.to_string();
    let dispatched = dispatch_with(&context.work_queue, on_created, move |on_created| {
      let result = panic::catch_unwind(AssertUnwindSafe(|| shared.build()))
        .unwrap_or_else(|_| {
          tracing::error!(target: "webcodecs", %kind, %codec, "session configuration panicked");
          Err(MediaError::not_supported(format!(
            "{} could not be configured for {}",
            kind, codec
          )))
        })
        .map(|_| Session { shared });
      if let Err(e) = &result {
        tracing::warn!(target: "webcodecs", %kind, %codec, "session creation failed: {}", e);
      }
      job_poster.post_task(Box::new(move || on_created(result)));
    });

    if let Err(on_created) = dispatched {
      tracing::warn!(target: "webcodecs", %kind, "work queue stopped, cannot create session");
      poster.post_task(Box::new(move || {
        on_created(Err(MediaError::abort(format!("{} work queue stopped", kind))))
      }));
    }
  }

  pub fn kind(&self) -> SessionKind {
    self.shared.kind
  }

  pub fn codec(&self) -> &str {
    &self.shared.codec
  }

  pub fn config(&self) -> &Configuration {
    &self.shared.config
  }

  pub fn is_closed(&self) -> bool {
    self.shared.gate.is_closed()
  }

  /// Format negotiated for the session input
  pub fn input_format(&self) -> Option<Format> {
    self.shared.harness().and_then(|h| h.input_format())
  }

  /// Format the element announced for its first output
  pub fn output_format(&self) -> Option<Format> {
    let harness = self.shared.harness()?;
    harness
      .output_streams()
      .first()
      .and_then(|stream| stream.sink().current_format())
  }

  /// What the session is actually running with
  pub fn active_configuration(&self) -> ActiveConfiguration {
    let output_format = self.output_format();
    let description = output_format
      .as_ref()
      .and_then(|f| f.get_bytes("codec_data"))
      .map(|bytes| bytes.to_vec())
      .or_else(|| match &self.shared.config {
        Configuration::Audio(audio) => audio.description.clone(),
        Configuration::Video(video) => video.description.clone(),
      });
    ActiveConfiguration {
      codec: self.shared.codec.clone(),
      output_format,
      config: self.shared.config.clone(),
      description,
    }
  }

  /// Queue one input frame. `done` reports whether it was accepted; output
  /// arrives separately. A no-op once closed.
  pub fn submit(
    &self,
    buffer: Buffer,
    timing: FrameTiming,
    pre_event: Option<Event>,
    done: impl FnOnce(MediaResult<()>) + Send + 'static,
  ) {
    self.run_input(
      move |shared| shared.process_input(buffer, timing, pre_event),
      done,
    );
  }

  /// Report `error` for an input that could not be submitted, in order with
  /// the completions of earlier submissions. A no-op once closed.
  pub fn reject(&self, error: MediaError, done: impl FnOnce(MediaResult<()>) + Send + 'static) {
    self.run_input(move |_| Err(error), done);
  }

  fn run_input(
    &self,
    work: impl FnOnce(&SessionShared<O>) -> MediaResult<()> + Send + 'static,
    done: impl FnOnce(MediaResult<()>) + Send + 'static,
  ) {
    let gate = &self.shared.gate;
    if gate.is_closed() {
      tracing::trace!(target: "webcodecs", kind = %self.shared.kind, "ignoring input after close");
      return;
    }
    let generation = gate.generation();
    let shared = self.shared.clone();
    let dispatched = dispatch_with(
      &self.shared.context.work_queue,
      Box::new(done) as DoneCallback,
      move |done| {
        if shared.gate.is_closed() || shared.gate.generation() != generation {
          return;
        }
        let result = work(&shared);
        shared.complete(Some(generation), done, result);
      },
    );
    if let Err(done) = dispatched {
      self.shared.complete(
        Some(generation),
        done,
        Err(MediaError::abort("work queue stopped")),
      );
    }
  }

  /// Drain everything submitted so far; `done` runs after the resulting
  /// output callbacks. A flush overtaken by `reset`, before or while it
  /// drains, reports `AbortError`. A no-op once closed.
  pub fn flush(&self, done: impl FnOnce(MediaResult<()>) + Send + 'static) {
    let gate = &self.shared.gate;
    if gate.is_closed() {
      return;
    }
    let generation = gate.generation();
    let shared = self.shared.clone();
    let dispatched = dispatch_with(
      &self.shared.context.work_queue,
      Box::new(done) as DoneCallback,
      move |done| {
        let result = if shared.gate.generation() != generation {
          Err(MediaError::abort("flush aborted by reset"))
        } else {
          let drained = shared.drain_harness();
          // Outputs drained after a reset were dropped by route_output
          if shared.gate.generation() != generation {
            tracing::debug!(target: "webcodecs", kind = %shared.kind, "flush overtaken by reset while draining");
            Err(MediaError::abort("flush aborted by reset"))
          } else {
            drained
          }
        };
        shared.complete(None, done, result);
      },
    );
    if let Err(done) = dispatched {
      self
        .shared
        .complete(None, done, Err(MediaError::abort("work queue stopped")));
    }
  }

  /// Drop pending input and undelivered output; the session stays usable.
  /// A no-op once closed.
  pub fn reset(&self) {
    let gate = &self.shared.gate;
    if gate.is_closed() {
      return;
    }
    let generation = gate.advance();
    tracing::debug!(target: "webcodecs", kind = %self.shared.kind, generation, "reset");

    let shared = self.shared.clone();
    self.shared.context.work_queue.dispatch(move || {
      if let Some(harness) = shared.harness()
        && let Err(e) = harness.flush_buffers()
      {
        tracing::warn!(target: "webcodecs", kind = %shared.kind, "reset flush failed: {}", e);
      }
      lock(&shared.pending).clear();
      lock(&shared.output_error).take();
      shared
        .flushed_generation
        .fetch_max(generation, Ordering::SeqCst);
    });
  }

  /// Stop delivering and release the element. Idempotent; once it returns no
  /// callback of this session runs.
  pub fn close(&self) {
    if !self.shared.gate.close() {
      return;
    }
    tracing::debug!(target: "webcodecs", kind = %self.shared.kind, codec = %self.shared.codec, "close");

    let shared = self.shared.clone();
    let teardown: Box<dyn FnOnce() + Send> = Box::new(move || {
      if let Some(harness) = lock(&shared.harness).take() {
        harness.reset();
      }
      lock(&shared.pending).clear();
    });
    if let Err(teardown) = self.shared.context.work_queue.try_dispatch(teardown) {
      teardown();
    }
  }
}

impl<O: SessionOutput> Drop for Session<O> {
  fn drop(&mut self) {
    self.close();
  }
}

impl<O: SessionOutput> fmt::Debug for Session<O> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Session")
      .field("kind", &self.shared.kind)
      .field("codec", &self.shared.codec)
      .field("closed", &self.is_closed())
      .finish()
  }
}
