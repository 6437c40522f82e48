//! Source buffer
//!
//! Owns the tracks of one Media Source buffer. Appended bytes go through a
//! [`SourceBufferParser`]; initialization segments (re)build the track set
//! and demuxed samples land in the queue of the track they belong to.

use std::sync::{Arc, Mutex};

use super::init_segment::InitializationSegment;
use super::parser::{DemuxerFactory, MediaSample, ParserClient, SourceBufferParser};
use super::track::MediaSourceTrack;
use super::track_queue::{QueuedObject, TrackQueueConfig};
use super::{MseError, MseResult};
use crate::codec::{Buffer, HarnessConfig, lock};

#[derive(Default)]
struct TrackSetState {
  segment: Option<InitializationSegment>,
  tracks: Vec<Arc<MediaSourceTrack>>,
}

/// Parser client side of a source buffer
struct TrackSet {
  queue_config: TrackQueueConfig,
  state: Mutex<TrackSetState>,
}

impl TrackSet {
  fn remove_all(state: &mut TrackSetState) {
    for track in state.tracks.drain(..) {
      track.remove();
    }
    state.segment = None;
  }
}

impl ParserClient for TrackSet {
  fn initialization_segment(&self, segment: InitializationSegment) -> MseResult<()> {
    let mut state = lock(&self.state);
    if let Some(current) = &state.segment {
      if current.same_topology(&segment) {
        tracing::debug!(target: "mse", "initialization segment matches current tracks");
        state.segment = Some(segment);
        return Ok(());
      }
      tracing::warn!(target: "mse", tracks = state.tracks.len(), "track topology changed, removing tracks");
      Self::remove_all(&mut state);
      return Err(MseError::TopologyChanged);
    }

    let tracks = segment
      .tracks
      .iter()
      .map(|description| MediaSourceTrack::new(description, self.queue_config).map(Arc::new))
      .collect::<MseResult<Vec<_>>>()?;
    tracing::debug!(target: "mse", tracks = tracks.len(), duration = ?segment.duration, "tracks created");
    state.tracks = tracks;
    state.segment = Some(segment);
    Ok(())
  }

  fn sample(&self, sample: MediaSample) -> MseResult<()> {
    let track = lock(&self.state)
      .tracks
      .iter()
      .find(|t| t.id() == sample.track_id)
      .cloned()
      .ok_or(MseError::UnknownTrack(sample.track_id))?;
    // Enqueue outside the lock; low-level handlers may run here
    track.enqueue_object(QueuedObject::Sample(sample.sample));
    Ok(())
  }
}

/// Track set fed by appended container bytes
pub struct SourceBuffer {
  parser: SourceBufferParser,
  tracks: Arc<TrackSet>,
}

impl SourceBuffer {
  pub fn new(
    mime_type: &str,
    factory: DemuxerFactory,
    queue_config: TrackQueueConfig,
  ) -> MseResult<Self> {
    Self::with_config(mime_type, factory, queue_config, HarnessConfig::default())
  }

  pub fn with_config(
    mime_type: &str,
    factory: DemuxerFactory,
    queue_config: TrackQueueConfig,
    harness_config: HarnessConfig,
  ) -> MseResult<Self> {
    queue_config.validate()?;
    let tracks = Arc::new(TrackSet {
      queue_config,
      state: Mutex::new(TrackSetState::default()),
    });
    let parser = SourceBufferParser::with_config(mime_type, factory, tracks.clone(), harness_config);
    Ok(Self { parser, tracks })
  }

  pub fn container_type(&self) -> &str {
    self.parser.container_type()
  }

  /// Parse appended bytes into the track queues
  pub fn append_buffer(&self, data: Buffer) -> MseResult<()> {
    self.parser.push_new_buffer(data)
  }

  /// Current tracks, in initialization segment order
  pub fn tracks(&self) -> Vec<Arc<MediaSourceTrack>> {
    lock(&self.tracks.state).tracks.clone()
  }

  pub fn track(&self, id: u64) -> Option<Arc<MediaSourceTrack>> {
    lock(&self.tracks.state)
      .tracks
      .iter()
      .find(|t| t.id() == id)
      .cloned()
  }

  pub fn initialization_segment(&self) -> Option<InitializationSegment> {
    lock(&self.tracks.state).segment.clone()
  }

  /// Abort the current append; buffered bytes are discarded, tracks stay
  pub fn reset_parser_state(&self) {
    self.parser.reset_parser_state();
  }

  /// Drop every queued sample, e.g. on seek
  pub fn flush(&self) {
    for track in self.tracks() {
      track.clear_queue();
    }
  }

  /// Stop parsing and remove every track
  pub fn detach(&self) {
    self.parser.stop_parser();
    TrackSet::remove_all(&mut lock(&self.tracks.state));
  }
}

impl Drop for SourceBuffer {
  fn drop(&mut self) {
    self.detach();
  }
}

impl std::fmt::Debug for SourceBuffer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SourceBuffer")
      .field("parser", &self.parser)
      .field("tracks", &self.tracks())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::element::SrcPad;
  use crate::codec::{
    Element, Event, Format, HarnessError, HarnessResult, MediaKind, StreamCollection, StreamInfo,
  };
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// One stream per entry; every input byte becomes a sample on pad `byte % pads`
  struct ByteDemuxer {
    streams: Vec<Format>,
    pads: Vec<SrcPad>,
  }

  impl Element for ByteDemuxer {
    fn name(&self) -> &str {
      "bytedemux"
    }

    fn src_pad_count(&self) -> usize {
      self.streams.len()
    }

    fn negotiate(&mut self, _format: &Format, pads: &[SrcPad]) -> HarnessResult<()> {
      self.pads = pads.to_vec();
      for (pad, format) in self.pads.iter().zip(&self.streams) {
        pad.push_event(Event::FormatChanged(format.clone()));
      }
      let collection = StreamCollection {
        duration: None,
        streams: self
          .streams
          .iter()
          .enumerate()
          .map(|(i, format)| StreamInfo {
            kind: format.kind().unwrap_or(MediaKind::Text),
            stream_id: format!("{}-{}", format.media_type(), i),
            format: format.clone(),
          })
          .collect(),
      };
      if let Some(pad) = self.pads.first() {
        pad.push_event(Event::StreamCollection(collection));
      }
      Ok(())
    }

    fn chain(&mut self, buffer: Buffer) -> HarnessResult<()> {
      if self.pads.is_empty() {
        return Err(HarnessError::NotStarted);
      }
      for (i, byte) in buffer.data().iter().enumerate() {
        let pad = &self.pads[*byte as usize % self.pads.len()];
        let _ = pad.push(Buffer::from_vec(vec![*byte]).with_timestamp(i as i64).with_duration(1));
      }
      Ok(())
    }
  }

  fn factory(streams: Arc<Mutex<Vec<Format>>>) -> DemuxerFactory {
    Arc::new(move |_: &Format| {
      let streams = streams.lock().unwrap().clone();
      Ok(Box::new(ByteDemuxer {
        streams,
        pads: Vec::new(),
      }) as Box<dyn Element>)
    })
  }

  fn av() -> Vec<Format> {
    vec![Format::new("video/x-vp9"), Format::new("audio/x-opus")]
  }

  #[test]
  fn test_append_creates_tracks_and_fills_queues() {
    let streams = Arc::new(Mutex::new(av()));
    let source = SourceBuffer::new("video/webm", factory(streams), TrackQueueConfig::new(1, 3).unwrap())
      .unwrap();
    // EBML magic sniffs as Matroska; even bytes go to video, odd to audio
    source.append_buffer(Buffer::from_vec(vec![0x1a, 0x45, 0xdf, 0xa3])).unwrap();

    let tracks = source.tracks();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].track_type(), MediaKind::Video);
    assert_eq!(tracks[1].track_type(), MediaKind::Audio);
    assert_eq!(source.initialization_segment().unwrap().duration, None);

    // 0x1a is even -> video; the rest are odd -> audio
    assert_eq!(tracks[0].queue().len(), 1);
    assert_eq!(tracks[1].queue().len(), 3);
    assert!(!tracks[1].is_ready_for_more_samples());
    assert!(source.track(2).is_some());
    assert!(source.track(3).is_none());
  }

  #[test]
  fn test_backpressure_signal_reaches_producer() {
    let streams = Arc::new(Mutex::new(vec![Format::new("audio/mpeg")]));
    let source = SourceBuffer::new("audio/mp4", factory(streams), TrackQueueConfig::new(1, 3).unwrap())
      .unwrap();
    source.append_buffer(Buffer::from_vec(vec![1, 2, 3])).unwrap();
    let track = source.track(1).unwrap();
    assert!(!track.is_ready_for_more_samples());

    let resumed = Arc::new(AtomicUsize::new(0));
    let hit = resumed.clone();
    track.notify_when_ready_for_more_samples(move || {
      hit.fetch_add(1, Ordering::SeqCst);
    });
    track.queue().dequeue();
    track.queue().dequeue();
    assert_eq!(resumed.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_same_topology_keeps_tracks() {
    let streams = Arc::new(Mutex::new(av()));
    let source = SourceBuffer::new("video/mp4", factory(streams), TrackQueueConfig::default()).unwrap();
    source.append_buffer(Buffer::from_vec(vec![0])).unwrap();
    let before = source.tracks();

    source.reset_parser_state();
    source.append_buffer(Buffer::from_vec(vec![2])).unwrap();
    let after = source.tracks();
    assert!(Arc::ptr_eq(&before[0], &after[0]));
    assert_eq!(after[0].queue().len(), 2);
  }

  #[test]
  fn test_topology_change_removes_tracks() {
    let streams = Arc::new(Mutex::new(av()));
    let source =
      SourceBuffer::new("video/mp4", factory(streams.clone()), TrackQueueConfig::default()).unwrap();
    source.append_buffer(Buffer::from_vec(vec![0, 1])).unwrap();
    let old = source.tracks();

    *streams.lock().unwrap() = vec![Format::new("video/x-h264")];
    source.reset_parser_state();
    let err = source.append_buffer(Buffer::from_vec(vec![0])).unwrap_err();
    assert_eq!(err, MseError::TopologyChanged);
    assert!(source.tracks().is_empty());
    assert!(source.initialization_segment().is_none());
    assert!(old.iter().all(|t| t.is_removed() && t.queue().is_empty()));
  }

  #[test]
  fn test_flush_and_detach() {
    let streams = Arc::new(Mutex::new(av()));
    let source = SourceBuffer::new("video/mp4", factory(streams), TrackQueueConfig::default()).unwrap();
    source.append_buffer(Buffer::from_vec(vec![0, 1, 2])).unwrap();
    source.flush();
    assert!(source.tracks().iter().all(|t| t.queue().is_empty()));

    let tracks = source.tracks();
    source.detach();
    assert!(tracks.iter().all(|t| t.is_removed()));
    assert_eq!(
      source.append_buffer(Buffer::from_vec(vec![0])).unwrap_err(),
      MseError::Stopped
    );
  }

  #[test]
  fn test_invalid_queue_config() {
    let streams = Arc::new(Mutex::new(av()));
    let config = TrackQueueConfig {
      low_water: 4,
      high_water: 4,
    };
    assert!(matches!(
      SourceBuffer::new("video/mp4", factory(streams), config),
      Err(MseError::InvalidConfig(_))
    ));
  }
}
