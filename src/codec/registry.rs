//! Element provider
//!
//! Sessions never build elements themselves; they ask an [`ElementProvider`]
//! for one by codec string and configuration. [`ElementRegistry`] is the
//! table-driven provider, pre-populated by [`ElementRegistry::with_defaults`]
//! with the codecs this crate implements.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::elements::{G711Decoder, G711Encoder, G711Law, PassthroughElement, TransformElement};
use super::{Configuration, Element, HarnessError, HarnessResult};
use crate::webcodecs::codec_string::{CodecFamily, PcmFormat, parse_codec_string};

/// Which side of a codec an element implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecDirection {
  Decoder,
  Encoder,
}

impl CodecDirection {
  pub fn as_str(&self) -> &'static str {
    match self {
      CodecDirection::Decoder => "decoder",
      CodecDirection::Encoder => "encoder",
    }
  }
}

impl fmt::Display for CodecDirection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Source of ready-to-wrap elements
pub trait ElementProvider: Send + Sync {
  /// Element for `codec` in `direction`, or [`HarnessError::Unsupported`].
  /// May block (plugin or device enumeration); sessions call it off the
  /// caller's thread.
  fn lookup(
    &self,
    direction: CodecDirection,
    codec: &str,
    config: &Configuration,
  ) -> HarnessResult<Box<dyn Element>>;
}

pub type ElementFactory =
  Arc<dyn Fn(&Configuration) -> HarnessResult<Box<dyn Element>> + Send + Sync>;

/// Codec table keyed by direction and codec
#[derive(Default)]
pub struct ElementRegistry {
  factories: RwLock<HashMap<(CodecDirection, String), ElementFactory>>,
}

impl ElementRegistry {
  /// Empty registry
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry with G.711 codecs and `pcm-*` identity elements
  pub fn with_defaults() -> Self {
    let registry = Self::new();
    for law in [G711Law::Alaw, G711Law::Mulaw] {
      let family = match law {
        G711Law::Alaw => CodecFamily::Alaw,
        G711Law::Mulaw => CodecFamily::Ulaw,
      };
      registry.register(CodecDirection::Decoder, family.key(), move |_| {
        Ok(Box::new(TransformElement::new(G711Decoder::new(law))))
      });
      registry.register(CodecDirection::Encoder, family.key(), move |_| {
        Ok(Box::new(TransformElement::new(G711Encoder::new(law))))
      });
    }

    for pcm in [
      PcmFormat::U8,
      PcmFormat::S16,
      PcmFormat::S24,
      PcmFormat::S32,
      PcmFormat::F32,
    ] {
      let key = CodecFamily::Pcm(pcm).key();
      for direction in [CodecDirection::Decoder, CodecDirection::Encoder] {
        registry.register(direction, key, move |_| {
          Ok(Box::new(PassthroughElement::accepting(
            format!("{}-{}", key, direction),
            "audio/x-raw",
          )))
        });
      }
    }
    registry
  }

  /// Canonical key: the codec family when the string parses, else the
  /// lowercased string itself
  fn key_for(codec: &str) -> String {
    match parse_codec_string(codec) {
      Some(parsed) => parsed.family.key().to_string(),
      None => codec.to_lowercase(),
    }
  }

  /// Register (or replace) the factory for `codec`. Parseable codec strings
  /// register the whole family (`mp4a.40.2` covers every AAC string).
  pub fn register(
    &self,
    direction: CodecDirection,
    codec: &str,
    factory: impl Fn(&Configuration) -> HarnessResult<Box<dyn Element>> + Send + Sync + 'static,
  ) {
    let key = Self::key_for(codec);
    tracing::debug!(target: "harness", %direction, codec = %key, "registered element factory");
    self
      .factories
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert((direction, key), Arc::new(factory));
  }

  pub fn supports(&self, direction: CodecDirection, codec: &str) -> bool {
    self.factory(direction, codec).is_some()
  }

  fn factory(&self, direction: CodecDirection, codec: &str) -> Option<ElementFactory> {
    let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
    factories
      .get(&(direction, codec.to_lowercase()))
      .or_else(|| factories.get(&(direction, Self::key_for(codec))))
      .cloned()
  }
}

impl ElementProvider for ElementRegistry {
  fn lookup(
    &self,
    direction: CodecDirection,
    codec: &str,
    config: &Configuration,
  ) -> HarnessResult<Box<dyn Element>> {
    let Some(factory) = self.factory(direction, codec) else {
      tracing::debug!(target: "harness", %direction, codec, "no element registered");
      return Err(HarnessError::Unsupported(codec.to_string()));
    };
    // Factory runs without the table lock held
    factory(config)
  }
}

impl fmt::Debug for ElementRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
    let mut keys: Vec<String> = factories
      .keys()
      .map(|(direction, codec)| format!("{}:{}", direction, codec))
      .collect();
    keys.sort();
    f.debug_struct("ElementRegistry").field("codecs", &keys).finish()
  }
}
