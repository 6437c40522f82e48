//! Synchronous buffer transforms

use crate::codec::element::{Element, EventDisposition, FlowReturn, SrcPad};
use crate::codec::{Buffer, Event, Format, HarnessError, HarnessResult};

/// One-in, zero-or-more-out processing step.
///
/// Implementations that hold input back (lookahead, reordering) return it
/// from `drain` at end-of-stream.
pub trait BufferTransform: Send + 'static {
  fn name(&self) -> &str;

  /// Output format for `input`, or an error if the input is not acceptable
  fn output_format(&mut self, input: &Format) -> HarnessResult<Format>;

  fn transform(&mut self, input: Buffer) -> HarnessResult<Vec<Buffer>>;

  fn drain(&mut self) -> HarnessResult<Vec<Buffer>> {
    Ok(Vec::new())
  }

  /// Discard held-back input
  fn flush(&mut self) {}

  /// Next output should be a key frame
  fn force_key_unit(&mut self) {}
}

/// Element adapter for a [`BufferTransform`]
pub struct TransformElement<T> {
  transform: T,
  pad: Option<SrcPad>,
}

impl<T: BufferTransform> TransformElement<T> {
  pub fn new(transform: T) -> Self {
    Self {
      transform,
      pad: None,
    }
  }

  fn push_all(&self, buffers: Vec<Buffer>) -> HarnessResult<()> {
    let Some(pad) = &self.pad else {
      return Ok(());
    };
    for buffer in buffers {
      if pad.push(buffer) == FlowReturn::Eos {
        return Err(HarnessError::Processing(
          "buffer pushed after end-of-stream".to_string(),
        ));
      }
    }
    Ok(())
  }
}

impl<T: BufferTransform> Element for TransformElement<T> {
  fn name(&self) -> &str {
    self.transform.name()
  }

  fn negotiate(&mut self, format: &Format, pads: &[SrcPad]) -> HarnessResult<()> {
    let output = self.transform.output_format(format)?;
    self.pad = pads.first().cloned();
    if let Some(pad) = &self.pad {
      pad.push_event(Event::FormatChanged(output));
    }
    Ok(())
  }

  fn chain(&mut self, buffer: Buffer) -> HarnessResult<()> {
    let outputs = self.transform.transform(buffer)?;
    self.push_all(outputs)
  }

  fn handle_event(&mut self, event: &Event) -> HarnessResult<EventDisposition> {
    match event {
      Event::Eos => {
        let outputs = self.transform.drain()?;
        self.push_all(outputs)?;
      }
      Event::FlushStart => self.transform.flush(),
      Event::ForceKeyUnit => self.transform.force_key_unit(),
      _ => {}
    }
    Ok(EventDisposition::Forward)
  }

  fn teardown(&mut self) {
    self.pad = None;
  }
}

type TransformFn = Box<dyn FnMut(Buffer) -> HarnessResult<Option<Buffer>> + Send>;

/// Closure-backed transform that keeps the input format
pub struct FnTransform {
  name: String,
  func: TransformFn,
}

impl FnTransform {
  pub fn new(
    name: impl Into<String>,
    func: impl FnMut(Buffer) -> HarnessResult<Option<Buffer>> + Send + 'static,
  ) -> Self {
    Self {
      name: name.into(),
      func: Box::new(func),
    }
  }
}

impl BufferTransform for FnTransform {
  fn name(&self) -> &str {
    &self.name
  }

  fn output_format(&mut self, input: &Format) -> HarnessResult<Format> {
    Ok(input.clone())
  }

  fn transform(&mut self, input: Buffer) -> HarnessResult<Vec<Buffer>> {
    Ok((self.func)(input)?.into_iter().collect())
  }
}
