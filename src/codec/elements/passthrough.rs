//! Identity element

use crate::codec::element::{Element, FlowReturn, SrcPad, push_event_to_all};
use crate::codec::{Buffer, Event, Format, HarnessError, HarnessResult};

/// Forwards every buffer and event unchanged.
///
/// Optionally restricted to input formats whose media type starts with a
/// given prefix.
pub struct PassthroughElement {
  name: String,
  accepts: Option<String>,
  pads: Vec<SrcPad>,
}

impl PassthroughElement {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      accepts: None,
      pads: Vec::new(),
    }
  }

  /// Only accept formats whose media type starts with `prefix`
  pub fn accepting(name: impl Into<String>, prefix: impl Into<String>) -> Self {
    Self {
      accepts: Some(prefix.into()),
      ..Self::new(name)
    }
  }
}

impl Element for PassthroughElement {
  fn name(&self) -> &str {
    &self.name
  }

  fn negotiate(&mut self, format: &Format, pads: &[SrcPad]) -> HarnessResult<()> {
    if let Some(prefix) = &self.accepts
      && !format.has_type(prefix)
    {
      return Err(HarnessError::NegotiationFailed {
        element: self.name.clone(),
        format: format.to_string(),
      });
    }
    self.pads = pads.to_vec();
    push_event_to_all(&self.pads, &Event::FormatChanged(format.clone()));
    Ok(())
  }

  fn chain(&mut self, buffer: Buffer) -> HarnessResult<()> {
    let Some(pad) = self.pads.first() else {
      return Ok(());
    };
    match pad.push(buffer) {
      FlowReturn::Eos => Err(HarnessError::Processing(
        "buffer pushed after end-of-stream".to_string(),
      )),
      // Dropped on purpose while flushing or after teardown
      FlowReturn::Ok | FlowReturn::Flushing | FlowReturn::NotLinked => Ok(()),
    }
  }

  fn teardown(&mut self) {
    self.pads.clear();
  }
}
