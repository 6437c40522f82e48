//! RTP frame transforms
//!
//! An [`RtpTransformBackend`] hands each outgoing or incoming RTP packet to
//! an application callback as a [`TransformableFrame`] and waits for the
//! transformed frame to come back. [`RtpTransformElement`] puts a backend in
//! a [`Harness`](crate::codec::Harness).

pub mod packet;
pub mod transform;

pub use packet::{RtpFrameMetadata, RtpHeader};
pub use transform::{
  RtpMediaType, RtpTransformBackend, RtpTransformElement, RtpTransformSide, TransformableFrame,
};

use std::time::Duration;

use crate::codec::HarnessError;

/// RTP transform error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RtcError {
  #[error("Invalid RTP packet: {0}")]
  InvalidPacket(String),

  #[error("Frame already taken")]
  FrameTaken,

  #[error("Transformed frame not returned within {0:?}")]
  Timeout(Duration),

  #[error(transparent)]
  Harness(#[from] HarnessError),
}

pub type RtcResult<T> = Result<T, RtcError>;
