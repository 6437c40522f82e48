//! Source buffer parser
//!
//! Feeds appended bytes through a demuxer element inside a [`Harness`] and
//! turns its output into initialization segments and per-track samples for a
//! [`ParserClient`]. The demuxer is created on the first pushed buffer, once
//! the container format is known.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::init_segment::InitializationSegment;
use super::{MseError, MseResult};
use crate::codec::{
  Buffer, Element, Event, FieldValue, Format, Harness, HarnessConfig, HarnessError, HarnessResult,
  MediaKind, Sample, lock,
};

/// Builds the demuxer element for a container format
pub type DemuxerFactory = Arc<dyn Fn(&Format) -> HarnessResult<Box<dyn Element>> + Send + Sync>;

static PARSER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Display size of a video sample, pixel aspect ratio applied
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresentationSize {
  pub width: f64,
  pub height: f64,
}

impl PresentationSize {
  /// Size described by a raw or encoded video format
  pub fn from_format(format: &Format) -> Option<Self> {
    let mut width = format.get_positive("width")? as f64;
    let mut height = format.get_positive("height")? as f64;
    if let Some(FieldValue::Fraction(n, d)) = format.field("pixel-aspect-ratio")
      && *n > 0
      && *d > 0
    {
      if n > d {
        width = width * *n as f64 / *d as f64;
      } else {
        height = height * *d as f64 / *n as f64;
      }
    }
    Some(Self { width, height })
  }
}

/// Demuxed sample addressed to one track
#[derive(Debug, Clone)]
pub struct MediaSample {
  pub track_id: u64,
  pub sample: Sample,
  /// Set for video samples
  pub presentation_size: Option<PresentationSize>,
}

/// Receiver of parser output
pub trait ParserClient: Send + Sync {
  fn initialization_segment(&self, segment: InitializationSegment) -> MseResult<()>;

  fn sample(&self, sample: MediaSample) -> MseResult<()>;
}

enum ParsedItem {
  Sample(Sample),
  Event(Event),
}

enum ParserOutput {
  Segment(InitializationSegment),
  Sample(MediaSample),
}

struct ParserState {
  harness: Option<Harness>,
  /// Set once the current harness produced an initialization segment
  announced: bool,
  initialization_segment: Option<InitializationSegment>,
  stopped: bool,
}

/// Demuxes appended bytes for one source buffer
pub struct SourceBufferParser {
  name: String,
  container_type: String,
  factory: DemuxerFactory,
  client: Arc<dyn ParserClient>,
  harness_config: HarnessConfig,
  pending: Arc<Mutex<Vec<ParsedItem>>>,
  state: Mutex<ParserState>,
}

impl SourceBufferParser {
  /// `mime_type` is the source buffer type, parameters allowed
  /// (`video/mp4; codecs="avc1.42E01E"`)
  pub fn new(mime_type: &str, factory: DemuxerFactory, client: Arc<dyn ParserClient>) -> Self {
    Self::with_config(mime_type, factory, client, HarnessConfig::default())
  }

  pub fn with_config(
    mime_type: &str,
    factory: DemuxerFactory,
    client: Arc<dyn ParserClient>,
    harness_config: HarnessConfig,
  ) -> Self {
    let container_type = container_type(mime_type);
    let name = format!(
      "sb-parser-{}-{}",
      container_type.replace('/', "-"),
      PARSER_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    tracing::debug!(target: "mse", parser = %name, "created parser");
    Self {
      name,
      container_type,
      factory,
      client,
      harness_config,
      pending: Arc::new(Mutex::new(Vec::new())),
      state: Mutex::new(ParserState {
        harness: None,
        announced: false,
        initialization_segment: None,
        stopped: false,
      }),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn container_type(&self) -> &str {
    &self.container_type
  }

  /// Last initialization segment produced, kept across parser resets
  pub fn initialization_segment(&self) -> Option<InitializationSegment> {
    lock(&self.state).initialization_segment.clone()
  }

  /// Format the demuxer was started with
  pub fn input_format(&self) -> Option<Format> {
    lock(&self.state)
      .harness
      .as_ref()
      .and_then(|h| h.input_format())
  }

  fn start_harness(&self, first: &Buffer) -> MseResult<Harness> {
    let format = match container_format(&self.container_type) {
      Some(format) => format,
      None => sniff_format(first.data()).ok_or_else(|| {
        tracing::warn!(target: "mse", parser = %self.name, "unable to determine buffer media type");
        MseError::UnknownMediaType
      })?,
    };

    let element = (self.factory)(&format)?;
    let samples = self.pending.clone();
    let harness = Harness::with_config(element, self.harness_config.clone(), move |stream, buffer| {
      lock(&samples).push(ParsedItem::Sample(Sample::new(buffer, stream.output_format())));
    });
    let events = self.pending.clone();
    harness.set_event_callback(move |_, event| {
      if matches!(event, Event::StreamCollection(_) | Event::Eos) {
        lock(&events).push(ParsedItem::Event(event.clone()));
      }
    });
    harness.start(format)?;
    Ok(harness)
  }

  /// Parse one appended buffer. Initialization segments and samples reach
  /// the client before this returns.
  pub fn push_new_buffer(&self, buffer: Buffer) -> MseResult<()> {
    let outputs = {
      let mut state = lock(&self.state);
      if state.stopped {
        return Err(MseError::Stopped);
      }
      if state.harness.is_none() {
        state.harness = Some(self.start_harness(&buffer)?);
        state.announced = false;
      }
      let Some(harness) = state.harness.as_ref() else {
        return Err(MseError::Harness(HarnessError::NotStarted));
      };

      let processed = harness
        .push_buffer(buffer)
        .and_then(|_| harness.process_output_samples());
      let items = std::mem::take(&mut *lock(&self.pending));
      if let Err(e) = processed {
        tracing::warn!(target: "mse", parser = %self.name, "parsing failed: {}", e);
        return Err(MseError::Parse(e.to_string()));
      }
      self.collect_outputs(&mut state, items)?
    };

    for output in outputs {
      match output {
        ParserOutput::Segment(segment) => self.client.initialization_segment(segment)?,
        ParserOutput::Sample(sample) => self.client.sample(sample)?,
      }
    }
    Ok(())
  }

  /// Events first, then samples, so a collection announced on any stream
  /// covers the samples drained with it.
  ///
  /// A topology change discards the whole batch: nothing drained with it
  /// reaches the client.
  fn collect_outputs(
    &self,
    state: &mut ParserState,
    items: Vec<ParsedItem>,
  ) -> MseResult<Vec<ParserOutput>> {
    let sample_count = items
      .iter()
      .filter(|item| matches!(item, ParsedItem::Sample(_)))
      .count();
    let mut outputs = Vec::new();
    let mut samples = Vec::new();
    for item in items {
      match item {
        ParsedItem::Sample(sample) => samples.push(sample),
        ParsedItem::Event(Event::Eos) if state.initialization_segment.is_some() => {
          tracing::warn!(
            target: "mse",
            parser = %self.name,
            dropped_samples = sample_count,
            dropped_segments = outputs.len(),
            "stream topology changed, discarding parsed batch"
          );
          return Err(MseError::TopologyChanged);
        }
        ParsedItem::Event(Event::StreamCollection(collection)) if !state.announced => {
          let segment = InitializationSegment::from_stream_collection(&collection);
          tracing::debug!(target: "mse", parser = %self.name, tracks = segment.tracks.len(), "initialization segment");
          state.announced = true;
          state.initialization_segment = Some(segment.clone());
          outputs.push(ParserOutput::Segment(segment));
        }
        ParsedItem::Event(_) => {}
      }
    }

    for sample in samples {
      if let Some(sample) = self.route(state, sample) {
        outputs.push(ParserOutput::Sample(sample));
      }
    }
    Ok(outputs)
  }

  fn route(&self, state: &ParserState, sample: Sample) -> Option<MediaSample> {
    let format = sample.format.as_ref();
    if format.is_some_and(|f| f.has_type("audio/x-vorbis")) && sample.buffer.timestamp().is_none() {
      // Vorbis header packets
      tracing::debug!(target: "mse", parser = %self.name, "ignoring sample without timestamp");
      return None;
    }

    let kind = format.and_then(Format::kind).unwrap_or(MediaKind::Text);
    let presentation_size = match kind {
      MediaKind::Video => Some(
        format
          .and_then(PresentationSize::from_format)
          .unwrap_or(PresentationSize {
            width: 0.0,
            height: 0.0,
          }),
      ),
      _ => None,
    };

    let Some(track) = state
      .initialization_segment
      .as_ref()
      .and_then(|segment| segment.first_of(kind))
    else {
      tracing::warn!(target: "mse", parser = %self.name, kind = kind.as_str(), "no track for sample");
      return None;
    };

    tracing::trace!(
      target: "mse",
      parser = %self.name,
      track = track.id,
      pts = ?sample.buffer.timestamp(),
      duration = ?sample.buffer.duration(),
      "sample"
    );
    Some(MediaSample {
      track_id: track.id,
      sample,
      presentation_size,
    })
  }

  /// Drop the demuxer and its buffered bytes. The next pushed buffer starts
  /// a new one; the last initialization segment is kept.
  pub fn reset_parser_state(&self) {
    tracing::debug!(target: "mse", parser = %self.name, "resetting parser state");
    let harness = lock(&self.state).harness.take();
    // Harness teardown runs outside the parser lock
    drop(harness);
    lock(&self.pending).clear();
  }

  /// Tear the demuxer down for good; later pushes fail with
  /// [`MseError::Stopped`]
  pub fn stop_parser(&self) {
    tracing::debug!(target: "mse", parser = %self.name, "stopping");
    let harness = {
      let mut state = lock(&self.state);
      state.stopped = true;
      state.harness.take()
    };
    if let Some(harness) = harness {
      harness.reset();
    }
    lock(&self.pending).clear();
  }
}

impl fmt::Debug for SourceBufferParser {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = lock(&self.state);
    f.debug_struct("SourceBufferParser")
      .field("name", &self.name)
      .field("container_type", &self.container_type)
      .field("started", &state.harness.is_some())
      .field("stopped", &state.stopped)
      .finish()
  }
}

/// MIME type without parameters, lowercased
fn container_type(mime_type: &str) -> String {
  mime_type
    .split(';')
    .next()
    .unwrap_or_default()
    .trim()
    .to_ascii_lowercase()
}

/// Demuxer input format implied by the container type alone
fn container_format(container_type: &str) -> Option<Format> {
  if container_type.ends_with("mp4") || container_type.ends_with("aac") {
    Some(Format::new("video/quicktime").with_str("variant", "mse-bytestream"))
  } else if container_type == "audio/flac" {
    Some(Format::new("audio/x-flac"))
  } else {
    None
  }
}

/// Guess the container format from the first bytes of a stream
pub fn sniff_format(data: &[u8]) -> Option<Format> {
  if data.len() >= 8 && &data[4..8] == b"ftyp" {
    return Some(Format::new("video/quicktime"));
  }
  if data.starts_with(&[0x1a, 0x45, 0xdf, 0xa3]) {
    let head = &data[..data.len().min(64)];
    let is_webm = head.windows(4).any(|w| w == b"webm");
    return Some(Format::new(if is_webm { "video/webm" } else { "video/x-matroska" }));
  }
  if data.starts_with(b"fLaC") {
    return Some(Format::new("audio/x-flac"));
  }
  if data.starts_with(b"OggS") {
    return Some(Format::new("application/ogg"));
  }
  if data.starts_with(b"ID3") {
    return Some(Format::new("application/x-id3"));
  }
  if data.len() >= 2 && data[0] == 0xff && data[1] & 0xf0 == 0xf0 && data[1] & 0x06 == 0 {
    return Some(
      Format::new("audio/mpeg")
        .with_int("mpegversion", 4)
        .with_str("stream-format", "adts"),
    );
  }
  if data.len() >= 2 && data[0] == 0xff && data[1] & 0xe0 == 0xe0 && data[1] & 0x06 != 0 {
    return Some(Format::new("audio/mpeg").with_int("mpegversion", 1));
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::element::{FlowReturn, SrcPad, push_event_to_all};
  use crate::codec::{StreamCollection, StreamInfo};

  const EOS_MARKER: u8 = 0xee;

  /// Announces its streams on negotiation. Each pushed buffer is a list of
  /// `[pad, timestamp]` pairs; a pad of `EOS_MARKER` ends the stream.
  struct ToyDemuxer {
    streams: Vec<Format>,
    pads: Vec<SrcPad>,
  }

  impl ToyDemuxer {
    fn new(streams: Vec<Format>) -> Self {
      Self {
        streams,
        pads: Vec::new(),
      }
    }
  }

  impl Element for ToyDemuxer {
    fn name(&self) -> &str {
      "toydemux"
    }

    fn src_pad_count(&self) -> usize {
      self.streams.len()
    }

    fn negotiate(&mut self, _format: &Format, pads: &[SrcPad]) -> HarnessResult<()> {
      self.pads = pads.to_vec();
      let collection = StreamCollection {
        duration: Some(30_000_000),
        streams: self
          .streams
          .iter()
          .enumerate()
          .map(|(i, format)| StreamInfo {
            kind: format.kind().unwrap_or(MediaKind::Text),
            stream_id: format!("toy-{}", i),
            format: format.clone(),
          })
          .collect(),
      };
      for (pad, format) in self.pads.iter().zip(&self.streams) {
        pad.push_event(Event::FormatChanged(format.clone()));
      }
      // Announced on the last pad, after the first pad's samples drain
      if let Some(pad) = self.pads.last() {
        pad.push_event(Event::StreamCollection(collection));
      }
      Ok(())
    }

    fn chain(&mut self, buffer: Buffer) -> HarnessResult<()> {
      for pair in buffer.data().chunks(2) {
        if pair[0] == EOS_MARKER {
          push_event_to_all(&self.pads, &Event::Eos);
          continue;
        }
        let Some(pad) = self.pads.get(pair[0] as usize) else {
          return Err(HarnessError::Processing("bad pad".to_string()));
        };
        let out = match pair.get(1).copied() {
          Some(0xff) => Buffer::from_vec(vec![0xff]).without_timestamp(),
          Some(ts) => Buffer::from_vec(vec![ts]).with_timestamp(ts as i64 * 1000),
          None => Buffer::from_vec(Vec::new()),
        };
        if pad.push(out) == FlowReturn::Eos {
          return Err(HarnessError::Processing("pushed after eos".to_string()));
        }
      }
      Ok(())
    }
  }

  #[derive(Default)]
  struct Recorder {
    segments: Mutex<Vec<InitializationSegment>>,
    samples: Mutex<Vec<MediaSample>>,
  }

  impl ParserClient for Recorder {
    fn initialization_segment(&self, segment: InitializationSegment) -> MseResult<()> {
      self.segments.lock().unwrap().push(segment);
      Ok(())
    }

    fn sample(&self, sample: MediaSample) -> MseResult<()> {
      self.samples.lock().unwrap().push(sample);
      Ok(())
    }
  }

  fn av_streams() -> Vec<Format> {
    vec![
      Format::new("video/x-h264")
        .with_int("width", 640)
        .with_int("height", 480)
        .with_fraction("pixel-aspect-ratio", 4, 3),
      Format::new("audio/mpeg").with_int("mpegversion", 4),
    ]
  }

  fn new_parser(
    mime_type: &str,
    streams: Vec<Format>,
  ) -> (SourceBufferParser, Arc<Recorder>, Arc<Mutex<Vec<Format>>>) {
    let started = Arc::new(Mutex::new(Vec::new()));
    let seen = started.clone();
    let factory: DemuxerFactory = Arc::new(move |format: &Format| {
      seen.lock().unwrap().push(format.clone());
      Ok(Box::new(ToyDemuxer::new(streams.clone())) as Box<dyn Element>)
    });
    let recorder = Arc::new(Recorder::default());
    let parser = SourceBufferParser::new(mime_type, factory, recorder.clone());
    (parser, recorder, started)
  }

  #[test]
  fn test_container_formats() {
    let (parser, _, started) = new_parser("video/mp4; codecs=\"avc1.42E01E\"", av_streams());
    assert_eq!(parser.container_type(), "video/mp4");
    assert!(parser.name().starts_with("sb-parser-video-mp4-"));
    parser.push_new_buffer(Buffer::from_vec(vec![0, 1])).unwrap();
    let format = started.lock().unwrap()[0].clone();
    assert_eq!(format.media_type(), "video/quicktime");
    assert_eq!(format.get_str("variant"), Some("mse-bytestream"));
    assert_eq!(parser.input_format(), Some(format));

    let (parser, _, started) = new_parser("audio/flac", av_streams());
    parser.push_new_buffer(Buffer::from_vec(vec![1, 1])).unwrap();
    assert_eq!(started.lock().unwrap()[0].media_type(), "audio/x-flac");
  }

  #[test]
  fn test_sniffing() {
    let mut mp4 = vec![0, 0, 0, 24];
    mp4.extend_from_slice(b"ftypisom");
    assert_eq!(sniff_format(&mp4).unwrap().media_type(), "video/quicktime");

    let mut webm = vec![0x1a, 0x45, 0xdf, 0xa3, 0x9f, 0x42, 0x82, 0x84];
    webm.extend_from_slice(b"webm");
    assert_eq!(sniff_format(&webm).unwrap().media_type(), "video/webm");
    assert_eq!(
      sniff_format(&[0x1a, 0x45, 0xdf, 0xa3, 0, 0]).unwrap().media_type(),
      "video/x-matroska"
    );
    assert_eq!(sniff_format(b"fLaC\0\0").unwrap().media_type(), "audio/x-flac");
    assert_eq!(sniff_format(b"OggS\0\x02").unwrap().media_type(), "application/ogg");

    let adts = sniff_format(&[0xff, 0xf1, 0x50, 0x80]).unwrap();
    assert_eq!(adts.get_int("mpegversion"), Some(4));
    let mp3 = sniff_format(&[0xff, 0xfb, 0x90, 0x64]).unwrap();
    assert_eq!(mp3.get_int("mpegversion"), Some(1));

    assert!(sniff_format(b"garbage").is_none());
    assert!(sniff_format(&[]).is_none());
  }

  #[test]
  fn test_unknown_media_type() {
    let (parser, recorder, started) = new_parser("video/x-unknown", av_streams());
    let err = parser.push_new_buffer(Buffer::from_vec(b"garbage".to_vec())).unwrap_err();
    assert_eq!(err, MseError::UnknownMediaType);
    assert!(started.lock().unwrap().is_empty());
    assert!(recorder.segments.lock().unwrap().is_empty());
  }

  #[test]
  fn test_segment_then_routed_samples() {
    let (parser, recorder, _) = new_parser("video/mp4", av_streams());
    // Video at 1 ms, audio at 2 ms, video at 3 ms
    parser.push_new_buffer(Buffer::from_vec(vec![0, 1, 1, 2, 0, 3])).unwrap();

    let segments = recorder.segments.lock().unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].duration, Some(30_000_000));
    assert_eq!(segments[0].tracks.len(), 2);

    let samples = recorder.samples.lock().unwrap();
    let routed: Vec<(u64, Option<i64>)> = samples
      .iter()
      .map(|s| (s.track_id, s.sample.buffer.timestamp()))
      .collect();
    assert_eq!(routed, vec![(1, Some(1000)), (1, Some(3000)), (2, Some(2000))]);

    let size = samples[0].presentation_size.unwrap();
    assert_eq!(size.width, 640.0 * 4.0 / 3.0);
    assert_eq!(size.height, 480.0);
    assert!(samples[2].presentation_size.is_none());
    assert_eq!(
      samples[2].sample.format.as_ref().unwrap().media_type(),
      "audio/mpeg"
    );
  }

  #[test]
  fn test_segment_announced_once_per_demuxer() {
    let (parser, recorder, started) = new_parser("video/mp4", av_streams());
    parser.push_new_buffer(Buffer::from_vec(vec![0, 1])).unwrap();
    parser.push_new_buffer(Buffer::from_vec(vec![0, 2])).unwrap();
    assert_eq!(recorder.segments.lock().unwrap().len(), 1);
    assert_eq!(started.lock().unwrap().len(), 1);

    parser.reset_parser_state();
    assert!(parser.initialization_segment().is_some());
    parser.push_new_buffer(Buffer::from_vec(vec![0, 3])).unwrap();
    assert_eq!(started.lock().unwrap().len(), 2);
    assert_eq!(recorder.segments.lock().unwrap().len(), 2);
    assert_eq!(recorder.samples.lock().unwrap().len(), 3);
  }

  #[test]
  fn test_eos_after_segment_is_topology_change() {
    let (parser, _, _) = new_parser("video/mp4", av_streams());
    parser.push_new_buffer(Buffer::from_vec(vec![0, 1])).unwrap();
    let err = parser.push_new_buffer(Buffer::from_vec(vec![EOS_MARKER, 0])).unwrap_err();
    assert_eq!(err, MseError::TopologyChanged);
  }

  #[test]
  fn test_topology_change_discards_batch() {
    let (parser, recorder, _) = new_parser("video/mp4", av_streams());
    parser.push_new_buffer(Buffer::from_vec(vec![0, 1])).unwrap();
    // A sample, then end of stream, in one append
    let err = parser
      .push_new_buffer(Buffer::from_vec(vec![1, 2, EOS_MARKER, 0]))
      .unwrap_err();
    assert_eq!(err, MseError::TopologyChanged);
    let samples = recorder.samples.lock().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].sample.buffer.timestamp(), Some(1000));
  }

  #[test]
  fn test_vorbis_headers_dropped() {
    let (parser, recorder, _) = new_parser(
      "audio/mp4",
      vec![Format::new("audio/x-vorbis").with_int("rate", 48_000)],
    );
    // Two header packets without timestamps, then one frame
    parser.push_new_buffer(Buffer::from_vec(vec![0, 0xff, 0, 0xff, 0, 5])).unwrap();
    let samples = recorder.samples.lock().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].track_id, 1);
    assert_eq!(samples[0].sample.buffer.timestamp(), Some(5000));
  }

  #[test]
  fn test_stop_parser() {
    let (parser, _, _) = new_parser("video/mp4", av_streams());
    parser.push_new_buffer(Buffer::from_vec(vec![0, 1])).unwrap();
    parser.stop_parser();
    assert_eq!(
      parser.push_new_buffer(Buffer::from_vec(vec![0, 2])).unwrap_err(),
      MseError::Stopped
    );
    assert!(parser.input_format().is_none());
  }

  #[test]
  fn test_demuxer_error_is_parse_error() {
    let (parser, _, _) = new_parser("video/mp4", av_streams());
    let err = parser.push_new_buffer(Buffer::from_vec(vec![9, 1])).unwrap_err();
    assert!(matches!(err, MseError::Parse(_)));
  }
}
