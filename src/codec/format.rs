//! Negotiable format descriptors
//!
//! A [`Format`] is a media type plus a set of typed fields, printed the same
//! way pipeline caps usually are: `audio/x-alaw, rate=(int)8000, channels=(int)1`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Logical kind of a track or stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
  Audio,
  Video,
  Text,
}

impl MediaKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      MediaKind::Audio => "audio",
      MediaKind::Video => "video",
      MediaKind::Text => "text",
    }
  }
}

impl fmt::Display for MediaKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Typed format field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
  Int(i64),
  Bool(bool),
  Str(String),
  Fraction(i32, i32),
  Bytes(Arc<[u8]>),
}

impl fmt::Display for FieldValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FieldValue::Int(v) => write!(f, "(int){}", v),
      FieldValue::Bool(v) => write!(f, "(boolean){}", v),
      FieldValue::Str(v) => write!(f, "(string){}", v),
      FieldValue::Fraction(n, d) => write!(f, "(fraction){}/{}", n, d),
      FieldValue::Bytes(v) => write!(f, "(buffer)<{} bytes>", v.len()),
    }
  }
}

/// Media type plus typed fields
#[derive(Debug, Clone, PartialEq)]
pub struct Format {
  media_type: String,
  fields: BTreeMap<String, FieldValue>,
}

impl Format {
  pub fn new(media_type: impl Into<String>) -> Self {
    Self {
      media_type: media_type.into(),
      fields: BTreeMap::new(),
    }
  }

  pub fn media_type(&self) -> &str {
    &self.media_type
  }

  /// Whether the media type starts with `prefix` (e.g. `"audio/"`)
  pub fn has_type(&self, prefix: &str) -> bool {
    self.media_type.starts_with(prefix)
  }

  pub fn kind(&self) -> Option<MediaKind> {
    if self.has_type("audio/") {
      Some(MediaKind::Audio)
    } else if self.has_type("video/") || self.has_type("image/") {
      Some(MediaKind::Video)
    } else if self.has_type("text/") || self.has_type("application/x-subtitle") {
      Some(MediaKind::Text)
    } else {
      None
    }
  }

  pub fn with_field(mut self, name: &str, value: FieldValue) -> Self {
    self.fields.insert(name.to_string(), value);
    self
  }

  pub fn with_int(self, name: &str, value: i64) -> Self {
    self.with_field(name, FieldValue::Int(value))
  }

  pub fn with_bool(self, name: &str, value: bool) -> Self {
    self.with_field(name, FieldValue::Bool(value))
  }

  pub fn with_str(self, name: &str, value: impl Into<String>) -> Self {
    self.with_field(name, FieldValue::Str(value.into()))
  }

  pub fn with_fraction(self, name: &str, numerator: i32, denominator: i32) -> Self {
    self.with_field(name, FieldValue::Fraction(numerator, denominator))
  }

  pub fn with_bytes(self, name: &str, value: &[u8]) -> Self {
    self.with_field(name, FieldValue::Bytes(Arc::from(value)))
  }

  pub fn set(&mut self, name: &str, value: FieldValue) {
    self.fields.insert(name.to_string(), value);
  }

  pub fn field(&self, name: &str) -> Option<&FieldValue> {
    self.fields.get(name)
  }

  pub fn get_int(&self, name: &str) -> Option<i64> {
    match self.fields.get(name) {
      Some(FieldValue::Int(v)) => Some(*v),
      _ => None,
    }
  }

  pub fn get_bool(&self, name: &str) -> Option<bool> {
    match self.fields.get(name) {
      Some(FieldValue::Bool(v)) => Some(*v),
      _ => None,
    }
  }

  pub fn get_str(&self, name: &str) -> Option<&str> {
    match self.fields.get(name) {
      Some(FieldValue::Str(v)) => Some(v.as_str()),
      _ => None,
    }
  }

  pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
    match self.fields.get(name) {
      Some(FieldValue::Bytes(v)) => Some(v),
      _ => None,
    }
  }

  /// Integer field that must fit a positive `u32` (rates, sizes, channels)
  pub fn get_positive(&self, name: &str) -> Option<u32> {
    self
      .get_int(name)
      .and_then(|v| u32::try_from(v).ok())
      .filter(|v| *v > 0)
  }

  /// Same media type, and every field set in `other` has the same value here
  pub fn is_subset_of(&self, other: &Format) -> bool {
    self.media_type == other.media_type
      && other
        .fields
        .iter()
        .all(|(name, value)| self.fields.get(name) == Some(value))
  }
}

impl fmt::Display for Format {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.media_type)?;
    for (name, value) in &self.fields {
      write!(f, ", {}={}", name, value)?;
    }
    Ok(())
  }
}
