//! Concrete element kinds
//!
//! - [`PassthroughElement`]: forwards buffers untouched (raw PCM "codecs")
//! - [`TransformElement`]: drives a [`BufferTransform`] on the caller's thread
//! - [`QueueElement`]: runs another element on a worker thread
//! - [`ElementChain`]: several elements presented as one
//! - [`g711`]: A-law / µ-law encoders and decoders

pub mod chain;
pub mod g711;
pub mod passthrough;
pub mod queue;
pub mod transform;

pub use chain::ElementChain;
pub use g711::{G711Decoder, G711Encoder, G711Law};
pub use passthrough::PassthroughElement;
pub use queue::QueueElement;
pub use transform::{BufferTransform, FnTransform, TransformElement};
