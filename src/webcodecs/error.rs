//! DOMException-style errors for codec sessions
//!
//! Every failure a session reports carries one of the DOMException names the
//! WebCodecs surface uses, and renders as `"<Name>: <message>"`.
//!
//! Mapping from harness failures:
//! - negotiation failures / unsupported codecs -> `NotSupportedError`
//! - processing failures -> `EncodingError`
//! - wrong lifecycle state -> `InvalidStateError`
//! - flush/drain not acknowledged in time -> `AbortError`
//!
//! Caller-correctable size/format mismatches (e.g. a destination buffer too
//! small for `copy_to`) are `ConstraintError`, never `EncodingError`.

use std::fmt;

use crate::codec::HarnessError;

/// DOMException error names used by WebCodecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DOMExceptionName {
  /// Encoding or decoding operation failed
  EncodingError,
  /// Unsupported codec or configuration
  NotSupportedError,
  /// Wrong state (e.g., operating on closed object)
  InvalidStateError,
  /// Invalid data format
  DataError,
  /// Operation was aborted
  AbortError,
  /// Generic type error
  TypeError,
  /// Constraint not satisfied
  ConstraintError,
}

impl DOMExceptionName {
  pub fn as_str(&self) -> &'static str {
    match self {
      DOMExceptionName::EncodingError => "EncodingError",
      DOMExceptionName::NotSupportedError => "NotSupportedError",
      DOMExceptionName::InvalidStateError => "InvalidStateError",
      DOMExceptionName::DataError => "DataError",
      DOMExceptionName::AbortError => "AbortError",
      DOMExceptionName::TypeError => "TypeError",
      DOMExceptionName::ConstraintError => "ConstraintError",
    }
  }
}

impl fmt::Display for DOMExceptionName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Error reported through session callbacks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct MediaError {
  pub name: DOMExceptionName,
  pub message: String,
}

impl MediaError {
  pub fn new(name: DOMExceptionName, message: impl Into<String>) -> Self {
    Self {
      name,
      message: message.into(),
    }
  }

  pub fn not_supported(message: impl Into<String>) -> Self {
    Self::new(DOMExceptionName::NotSupportedError, message)
  }

  pub fn encoding(message: impl Into<String>) -> Self {
    Self::new(DOMExceptionName::EncodingError, message)
  }

  pub fn invalid_state(message: impl Into<String>) -> Self {
    Self::new(DOMExceptionName::InvalidStateError, message)
  }

  pub fn data(message: impl Into<String>) -> Self {
    Self::new(DOMExceptionName::DataError, message)
  }

  pub fn abort(message: impl Into<String>) -> Self {
    Self::new(DOMExceptionName::AbortError, message)
  }

  pub fn type_error(message: impl Into<String>) -> Self {
    Self::new(DOMExceptionName::TypeError, message)
  }

  pub fn constraint(message: impl Into<String>) -> Self {
    Self::new(DOMExceptionName::ConstraintError, message)
  }
}

impl From<HarnessError> for MediaError {
  fn from(error: HarnessError) -> Self {
    let name = match &error {
      HarnessError::NegotiationFailed { .. }
      | HarnessError::Unsupported(_)
      | HarnessError::ElementCreation(_) => DOMExceptionName::NotSupportedError,
      HarnessError::Processing(_) => DOMExceptionName::EncodingError,
      HarnessError::FlushTimeout(_) => DOMExceptionName::AbortError,
      HarnessError::NotStarted
      | HarnessError::Flushing
      | HarnessError::Closed
      | HarnessError::InvalidState(_) => DOMExceptionName::InvalidStateError,
    };
    MediaError::new(name, error.to_string())
  }
}

pub type MediaResult<T> = Result<T, MediaError>;
