#![deny(clippy::all)]

//! Media element harness and track queues
//!
//! This crate wraps processing elements (decoders, encoders, parsers, RTP
//! transforms) in a uniform push/pull harness, runs WebCodecs-style
//! decoder/encoder sessions on top of it, and paces demuxed samples through
//! per-track queues for Media Source playback.

// Buffers, formats, elements and the harness itself
pub mod codec;

// Decoder/encoder sessions (WebCodecs-style surface)
pub mod webcodecs;

// Media Source track feeding
pub mod mse;

// RTP frame transforms
pub mod rtc;

pub use codec::{
  AudioConfig, Buffer, BufferFlags, CodecDirection, Configuration, Element, ElementProvider,
  ElementRegistry, Event, Format, FrameId, Harness, HarnessConfig, HarnessError,
  HarnessResult, MediaKind, OutputStream, Sample, SrcPad, VideoConfig,
};
pub use codec::elements::ElementChain;
pub use mse::{
  InitializationSegment, MediaSourceTrack, MseError, MseResult, SourceBuffer, SourceBufferParser,
  TrackQueue, TrackQueueConfig,
};
pub use rtc::{RtcError, RtcResult, RtpTransformBackend, RtpTransformElement, TransformableFrame};
pub use webcodecs::{
  AudioDataCopyToOptions, AudioDecoder, AudioEncoder, AudioSampleFormat, DOMExceptionName,
  EncodedChunk, EncodedChunkType, MediaError, MediaResult, RawAudioData, SessionContext,
  TaskPoster, VideoDecoder, VideoEncoder, VideoFrame, VideoPixelFormat, WorkQueue,
};
