//! Element chains
//!
//! [`ElementChain`] presents an ordered list of elements (a parser in front of
//! a decoder, say) as a single element. Every internal link is a
//! [`StreamOutputSink`]; whatever a stage queues on its link is handed to the
//! next stage from the thread that produced it.
//!
//! Flush events are delivered to every stage directly, in order. All other
//! events travel through the links with the buffers.

use std::sync::{Arc, Mutex, Weak};

use crate::codec::element::{Element, EventDisposition, SrcPad, push_event_to_all};
use crate::codec::event::OutputItem;
use crate::codec::sink::StreamOutputSink;
use crate::codec::{Buffer, Event, Format, HarnessError, HarnessResult, lock};

struct Stage {
  element: Mutex<Box<dyn Element>>,
  pads: Mutex<Vec<SrcPad>>,
}

struct Link {
  sink: Arc<StreamOutputSink>,
  /// Held while handing items on, so they reach the next stage in order
  forwarding: Mutex<()>,
}

struct ChainShared {
  stages: Vec<Stage>,
  /// `links[i]` connects `stages[i]` to `stages[i + 1]`
  links: Vec<Link>,
}

impl ChainShared {
  fn last_pads(&self) -> Vec<SrcPad> {
    self
      .stages
      .last()
      .map(|stage| lock(&stage.pads).clone())
      .unwrap_or_default()
  }

  fn deliver_event(&self, index: usize, event: &Event) -> HarnessResult<()> {
    let stage = &self.stages[index];
    let disposition = lock(&stage.element).handle_event(event)?;
    if disposition == EventDisposition::Forward {
      let pads = lock(&stage.pads).clone();
      push_event_to_all(&pads, event);
    }
    Ok(())
  }

  fn forward(&self, index: usize) {
    let Some(link) = self.links.get(index) else {
      return;
    };
    let next = index + 1;
    let _serial = lock(&link.forwarding);
    while let Some(item) = link.sink.pop() {
      let result = match item {
        OutputItem::Buffer(buffer) => lock(&self.stages[next].element).chain(buffer),
        OutputItem::Event(Event::FlushStart | Event::FlushStop) => continue,
        OutputItem::Event(Event::FormatChanged(format)) => {
          let pads = lock(&self.stages[next].pads).clone();
          lock(&self.stages[next].element).negotiate(&format, &pads)
        }
        OutputItem::Event(event) => self.deliver_event(next, &event),
      };
      if let Err(e) = result {
        tracing::warn!(target: "harness", stage = next, "chained element failed: {}", e);
        push_event_to_all(&self.last_pads(), &Event::Error(e.to_string()));
      }
    }
  }
}

/// Ordered elements wrapped as one
pub struct ElementChain {
  name: String,
  shared: Arc<ChainShared>,
  torn_down: bool,
}

impl ElementChain {
  /// All but the last element must have exactly one source pad
  pub fn new(elements: Vec<Box<dyn Element>>) -> HarnessResult<Self> {
    if elements.is_empty() {
      return Err(HarnessError::ElementCreation(
        "element chain needs at least one element".to_string(),
      ));
    }
    let count = elements.len();
    for element in &elements[..count - 1] {
      if element.src_pad_count() != 1 {
        return Err(HarnessError::ElementCreation(format!(
          "{} has {} source pads and cannot be chained",
          element.name(),
          element.src_pad_count()
        )));
      }
    }

    let name = elements
      .iter()
      .map(|e| e.name())
      .collect::<Vec<_>>()
      .join(" ! ");
    let links = (0..count - 1)
      .map(|index| Link {
        sink: Arc::new(StreamOutputSink::new(index)),
        forwarding: Mutex::new(()),
      })
      .collect();
    let stages = elements
      .into_iter()
      .map(|element| Stage {
        element: Mutex::new(element),
        pads: Mutex::new(Vec::new()),
      })
      .collect();

    Ok(Self {
      name,
      shared: Arc::new(ChainShared { stages, links }),
      torn_down: false,
    })
  }

  pub fn len(&self) -> usize {
    self.shared.stages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.shared.stages.is_empty()
  }

  fn install_forwarding(&self) {
    for (index, link) in self.shared.links.iter().enumerate() {
      let weak: Weak<ChainShared> = Arc::downgrade(&self.shared);
      link.sink.set_output_notify(Some(Arc::new(move || {
        if let Some(shared) = weak.upgrade() {
          shared.forward(index);
        }
      })));
    }
  }
}

impl Element for ElementChain {
  fn name(&self) -> &str {
    &self.name
  }

  fn src_pad_count(&self) -> usize {
    self
      .shared
      .stages
      .last()
      .map(|stage| lock(&stage.element).src_pad_count())
      .unwrap_or(1)
  }

  fn negotiate(&mut self, format: &Format, pads: &[SrcPad]) -> HarnessResult<()> {
    let shared = &self.shared;
    let last = shared.stages.len() - 1;
    let mut format = format.clone();

    for (index, stage) in shared.stages.iter().enumerate() {
      let stage_pads = match shared.links.get(index) {
        Some(link) => vec![SrcPad::linked(0, link.sink.clone())],
        None => pads.to_vec(),
      };
      let mut element = lock(&stage.element);
      element.negotiate(&format, &stage_pads)?;
      *lock(&stage.pads) = stage_pads;

      if index < last {
        let link = &shared.links[index];
        // The announcement feeds the next negotiation, not the next stage
        link.sink.drain();
        format = link.sink.current_format().ok_or_else(|| HarnessError::NegotiationFailed {
          element: element.name().to_string(),
          format: format.to_string(),
        })?;
      }
    }

    self.install_forwarding();
    tracing::debug!(target: "harness", chain = %self.name, "chain negotiated");
    Ok(())
  }

  fn chain(&mut self, buffer: Buffer) -> HarnessResult<()> {
    lock(&self.shared.stages[0].element).chain(buffer)
  }

  fn handle_event(&mut self, event: &Event) -> HarnessResult<EventDisposition> {
    if event.is_flush() {
      for index in 0..self.shared.stages.len() {
        self.shared.deliver_event(index, event)?;
      }
    } else {
      self.shared.deliver_event(0, event)?;
    }
    Ok(EventDisposition::Handled)
  }

  fn teardown(&mut self) {
    if self.torn_down {
      return;
    }
    self.torn_down = true;

    for link in &self.shared.links {
      link.sink.set_output_notify(None);
    }
    for stage in &self.shared.stages {
      let pads = std::mem::take(&mut *lock(&stage.pads));
      for pad in &pads {
        pad.unlink();
      }
      lock(&stage.element).teardown();
    }
    for link in &self.shared.links {
      link.sink.clear();
    }
  }
}

impl Drop for ElementChain {
  fn drop(&mut self) {
    self.teardown();
  }
}
