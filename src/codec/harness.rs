//! Element harness
//!
//! Wraps one element and turns its push-style output into pull-style delivery:
//! the element pushes into per-pad [`StreamOutputSink`]s from any thread, and
//! the owner drains them with [`Harness::process_output_buffers`], which runs
//! the output callback in arrival order on the owner's thread.
//!
//! Lifecycle: `Uninitialized -> Started -> (Flushing -> Started)* -> Closed`.

use std::fmt;
use std::sync::{Arc, Mutex};

use super::buffer::Buffer;
use super::element::{Element, EventDisposition, SrcPad, push_event_to_all};
use super::event::{Event, OutputItem};
use super::format::Format;
use super::sink::StreamOutputSink;
use super::{HarnessConfig, HarnessError, HarnessResult, lock};

/// Called once per output buffer, in arrival order
pub type OutputCallback = Box<dyn Fn(&OutputStream, Buffer) + Send + Sync>;

/// Called once per output event, interleaved with buffers in arrival order
pub type EventCallback = Box<dyn Fn(&OutputStream, &Event) + Send + Sync>;

/// Harness lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
  Uninitialized,
  Started,
  Flushing,
  Closed,
}

/// Owner-side view of one element output pad
pub struct OutputStream {
  index: usize,
  sink: Arc<StreamOutputSink>,
  /// Format of the buffers most recently handed to the owner
  delivered_format: Mutex<Option<Format>>,
}

impl OutputStream {
  pub fn index(&self) -> usize {
    self.index
  }

  /// Format the current output buffer was produced under
  pub fn output_format(&self) -> Option<Format> {
    lock(&self.delivered_format).clone()
  }

  pub fn sink(&self) -> &StreamOutputSink {
    &self.sink
  }
}

impl fmt::Debug for OutputStream {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OutputStream")
      .field("index", &self.index)
      .field("queued", &self.sink.len())
      .finish()
  }
}

#[derive(Default)]
struct Callbacks {
  output: Option<OutputCallback>,
  event: Option<EventCallback>,
}

struct HarnessInner {
  state: HarnessState,
  input_format: Option<Format>,
}

/// Push/pull wrapper around one element
pub struct Harness {
  name: String,
  config: HarnessConfig,
  element: Mutex<Box<dyn Element>>,
  pads: Vec<SrcPad>,
  streams: Vec<OutputStream>,
  inner: Mutex<HarnessInner>,
  callbacks: Mutex<Callbacks>,
}

impl Harness {
  /// Wrap `element`; `output` receives every produced buffer.
  ///
  /// The output callback runs with the harness callback lock held and must
  /// not reset or drop the harness it belongs to.
  pub fn new(
    element: Box<dyn Element>,
    output: impl Fn(&OutputStream, Buffer) + Send + Sync + 'static,
  ) -> Self {
    Self::with_config(element, HarnessConfig::default(), output)
  }

  /// [`new`](Self::new) with explicit limits. The same restriction applies:
  /// `output` runs with the callback lock held and must not reset or drop
  /// its harness.
  pub fn with_config(
    element: Box<dyn Element>,
    config: HarnessConfig,
    output: impl Fn(&OutputStream, Buffer) + Send + Sync + 'static,
  ) -> Self {
    let name = element.name().to_string();
    let mut pads = Vec::new();
    let mut streams = Vec::new();
    for index in 0..element.src_pad_count() {
      let sink = Arc::new(StreamOutputSink::new(index));
      pads.push(SrcPad::linked(index, sink.clone()));
      streams.push(OutputStream {
        index,
        sink,
        delivered_format: Mutex::new(None),
      });
    }

    tracing::debug!(target: "harness", element = %name, pads = pads.len(), "created harness");

    Self {
      name,
      config,
      element: Mutex::new(element),
      pads,
      streams,
      inner: Mutex::new(HarnessInner {
        state: HarnessState::Uninitialized,
        input_format: None,
      }),
      callbacks: Mutex::new(Callbacks {
        output: Some(Box::new(output)),
        event: None,
      }),
    }
  }

  /// Observe events (format changes, end-of-stream, element errors) as they
  /// are drained, in order with buffers.
  ///
  /// Runs with the callback lock held, like the output callback: it must not
  /// reset or drop the harness.
  pub fn set_event_callback(&self, callback: impl Fn(&OutputStream, &Event) + Send + Sync + 'static) {
    let mut callbacks = lock(&self.callbacks);
    if lock(&self.inner).state != HarnessState::Closed {
      callbacks.event = Some(Box::new(callback));
    }
  }

  /// Run `notify` whenever any output pad queues an item. The hook may run on
  /// an element thread and should only schedule a later drain.
  pub fn set_output_notify(&self, notify: Arc<dyn Fn() + Send + Sync>) {
    for stream in &self.streams {
      stream.sink.set_output_notify(Some(notify.clone()));
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn config(&self) -> &HarnessConfig {
    &self.config
  }

  pub fn state(&self) -> HarnessState {
    lock(&self.inner).state
  }

  pub fn is_started(&self) -> bool {
    matches!(
      self.state(),
      HarnessState::Started | HarnessState::Flushing
    )
  }

  pub fn input_format(&self) -> Option<Format> {
    lock(&self.inner).input_format.clone()
  }

  pub fn output_streams(&self) -> &[OutputStream] {
    &self.streams
  }

  /// Negotiate `format` with the element and activate it
  pub fn start(&self, format: Format) -> HarnessResult<()> {
    let mut element = lock(&self.element);
    {
      let inner = lock(&self.inner);
      match inner.state {
        HarnessState::Uninitialized => {}
        HarnessState::Closed => return Err(HarnessError::Closed),
        _ => {
          return Err(HarnessError::InvalidState(format!(
            "{} already started",
            self.name
          )));
        }
      }
    }

    if let Err(e) = element.negotiate(&format, &self.pads) {
      tracing::warn!(target: "harness", element = %self.name, %format, "negotiation failed: {}", e);
      return Err(match e {
        HarnessError::NegotiationFailed { .. } => e,
        _ => HarnessError::NegotiationFailed {
          element: self.name.clone(),
          format: format.to_string(),
        },
      });
    }

    let mut inner = lock(&self.inner);
    tracing::debug!(target: "harness", element = %self.name, %format, "started");
    inner.input_format = Some(format);
    inner.state = HarnessState::Started;
    Ok(())
  }

  /// Feed one buffer. A no-op once the harness is closed.
  pub fn push_buffer(&self, buffer: Buffer) -> HarnessResult<()> {
    let mut element = lock(&self.element);
    match lock(&self.inner).state {
      HarnessState::Started => {}
      HarnessState::Closed => {
        tracing::trace!(target: "harness", element = %self.name, "ignoring buffer pushed after close");
        return Ok(());
      }
      HarnessState::Uninitialized => return Err(HarnessError::NotStarted),
      HarnessState::Flushing => return Err(HarnessError::Flushing),
    }

    tracing::trace!(target: "harness", element = %self.name, ?buffer, "push");
    element.chain(buffer).map_err(|e| {
      tracing::warn!(target: "harness", element = %self.name, "processing failed: {}", e);
      match e {
        HarnessError::Processing(_) => e,
        other => HarnessError::Processing(other.to_string()),
      }
    })
  }

  /// Feed a control event. A no-op once the harness is closed.
  pub fn push_event(&self, event: Event) -> HarnessResult<()> {
    match self.state() {
      HarnessState::Closed => return Ok(()),
      HarnessState::Uninitialized => return Err(HarnessError::NotStarted),
      HarnessState::Started | HarnessState::Flushing => {}
    }
    self.send_event(&event)
  }

  fn send_event(&self, event: &Event) -> HarnessResult<()> {
    let mut element = lock(&self.element);
    tracing::trace!(target: "harness", element = %self.name, event = event.name(), "event");
    if element.handle_event(event)? == EventDisposition::Forward {
      push_event_to_all(&self.pads, event);
    }
    Ok(())
  }

  /// Pull the oldest queued item of one output stream without running callbacks
  pub fn pull(&self, stream: usize) -> Option<OutputItem> {
    let stream = self.streams.get(stream)?;
    let item = stream.sink.pop()?;
    if let OutputItem::Event(Event::FormatChanged(format)) = &item {
      *lock(&stream.delivered_format) = Some(format.clone());
    }
    Some(item)
  }

  /// Drain every output stream, invoking the callbacks in arrival order.
  ///
  /// Returns the number of buffers delivered. An error event found in the
  /// drained items is reported after everything queued has been delivered.
  pub fn process_output_buffers(&self) -> HarnessResult<usize> {
    let callbacks = lock(&self.callbacks);
    let mut delivered = 0;
    let mut first_error: Option<String> = None;

    for stream in &self.streams {
      for item in stream.sink.drain() {
        match item {
          OutputItem::Buffer(buffer) => {
            if let Some(output) = &callbacks.output {
              output(stream, buffer);
              delivered += 1;
            }
          }
          OutputItem::Event(event) => {
            match &event {
              Event::FormatChanged(format) => {
                *lock(&stream.delivered_format) = Some(format.clone());
              }
              Event::Error(message) => {
                tracing::warn!(target: "harness", element = %self.name, "element error: {}", message);
                first_error.get_or_insert_with(|| message.clone());
              }
              _ => {}
            }
            if let Some(on_event) = &callbacks.event {
              on_event(stream, &event);
            }
          }
        }
      }
    }

    match first_error {
      Some(message) => Err(HarnessError::Processing(message)),
      None => Ok(delivered),
    }
  }

  /// Same as [`process_output_buffers`](Self::process_output_buffers); the
  /// callback gets the producing stream, whose `output_format()` completes the
  /// buffer into a sample.
  pub fn process_output_samples(&self) -> HarnessResult<usize> {
    self.process_output_buffers()
  }

  /// Send flush-start/flush-stop and wait until every pad acknowledged the
  /// boundary. Output of buffers pushed before the call never shows up after
  /// it returns.
  pub fn flush_buffers(&self) -> HarnessResult<()> {
    {
      let mut inner = lock(&self.inner);
      match inner.state {
        HarnessState::Closed | HarnessState::Uninitialized => return Ok(()),
        HarnessState::Flushing => {
          return Err(HarnessError::InvalidState(
            "flush already in progress".to_string(),
          ));
        }
        HarnessState::Started => inner.state = HarnessState::Flushing,
      }
    }

    let seen: Vec<u64> = self
      .streams
      .iter()
      .map(|s| s.sink.flush_stop_count())
      .collect();

    let result = self
      .send_event(&Event::FlushStart)
      .and_then(|_| self.send_event(&Event::FlushStop))
      .and_then(|_| {
        for (stream, seen) in self.streams.iter().zip(seen) {
          if !stream.sink.wait_for_flush_stop(seen, self.config.flush_timeout) {
            tracing::warn!(target: "harness", element = %self.name, pad = stream.index, "flush not acknowledged");
            return Err(HarnessError::FlushTimeout(self.config.flush_timeout));
          }
        }
        Ok(())
      });

    let mut inner = lock(&self.inner);
    if inner.state == HarnessState::Flushing {
      inner.state = HarnessState::Started;
    }
    tracing::debug!(target: "harness", element = %self.name, ok = result.is_ok(), "flushed");
    result
  }

  /// Push end-of-stream, wait until it reached every pad, then deliver all
  /// output. The harness stays at end-of-stream until the next flush.
  pub fn drain(&self) -> HarnessResult<usize> {
    match self.state() {
      HarnessState::Closed => return Ok(0),
      HarnessState::Uninitialized => return Err(HarnessError::NotStarted),
      HarnessState::Flushing => return Err(HarnessError::Flushing),
      HarnessState::Started => {}
    }

    self.send_event(&Event::Eos)?;
    for stream in &self.streams {
      if !stream.sink.wait_for_eos(self.config.flush_timeout) {
        return Err(HarnessError::FlushTimeout(self.config.flush_timeout));
      }
    }
    self.process_output_buffers()
  }

  /// Disconnect the callbacks, then tear the element down. Idempotent.
  pub fn reset(&self) {
    {
      // Waits for an in-progress drain to finish delivering
      let mut callbacks = lock(&self.callbacks);
      callbacks.output = None;
      callbacks.event = None;
    }

    {
      let mut inner = lock(&self.inner);
      if inner.state == HarnessState::Closed {
        return;
      }
      inner.state = HarnessState::Closed;
    }

    for stream in &self.streams {
      stream.sink.set_output_notify(None);
    }
    for pad in &self.pads {
      pad.unlink();
    }
    lock(&self.element).teardown();
    for stream in &self.streams {
      stream.sink.clear();
    }

    tracing::debug!(target: "harness", element = %self.name, "closed");
  }
}

impl Drop for Harness {
  fn drop(&mut self) {
    self.reset();
  }
}

impl fmt::Debug for Harness {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Harness")
      .field("element", &self.name)
      .field("state", &self.state())
      .field("streams", &self.streams)
      .finish()
  }
}
