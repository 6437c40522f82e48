//! WebCodecs-style decoder and encoder sessions
//!
//! Typed sessions ([`AudioDecoder`], [`AudioEncoder`], [`VideoDecoder`],
//! [`VideoEncoder`]) on top of the shared [`session`] core, the raw and
//! encoded media objects they exchange, and the execution contexts
//! ([`WorkQueue`], [`TaskPoster`]) they run on.
//! See: https://developer.mozilla.org/en-US/docs/Web/API/WebCodecs_API

mod audio_data;
mod audio_decoder;
mod audio_encoder;
pub mod codec_string;
mod encoded_chunk;
pub mod error;
pub mod post_task;
pub mod session;
mod video_decoder;
mod video_encoder;
mod video_frame;
pub mod work_queue;

pub use audio_data::{AudioDataCopyToOptions, AudioDataInit, AudioSampleFormat, RawAudioData};
pub use audio_decoder::AudioDecoder;
pub use audio_encoder::AudioEncoder;
pub use codec_string::{CodecFamily, ParsedCodec, PcmFormat, parse_codec_string};
pub use encoded_chunk::{EncodedChunk, EncodedChunkType};
pub use error::{DOMExceptionName, MediaError, MediaResult};
pub use post_task::{ManualPoster, Task, TaskPoster, TokioPoster};
pub use session::{
  ActiveConfiguration, DeliveryGate, FrameTiming, Session, SessionContext, SessionKind,
  SessionOutput, default_registry,
};
pub use video_decoder::VideoDecoder;
pub use video_encoder::{VideoEncoder, VideoEncoderEncodeOptions};
pub use video_frame::{VideoFrame, VideoFrameBufferInit, VideoPixelFormat};
pub use work_queue::{WorkQueue, shared_work_queue};
