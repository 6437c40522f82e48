//! Initialization segment description

use crate::codec::{Format, MediaKind, StreamCollection};

/// One track announced by an initialization segment
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDescription {
  pub track_type: MediaKind,
  /// Position of the stream in the collection
  pub index: usize,
  pub id: u64,
  pub string_id: String,
  /// Format the track starts with
  pub format: Format,
}

/// Track layout and duration parsed from the head of a byte stream
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InitializationSegment {
  /// Microseconds; `None` is an unbounded (live) stream
  pub duration: Option<u64>,
  pub tracks: Vec<TrackDescription>,
}

impl InitializationSegment {
  /// Describe every stream of `collection`. Track ids are the stream
  /// position plus one.
  pub fn from_stream_collection(collection: &StreamCollection) -> Self {
    let tracks = collection
      .streams
      .iter()
      .enumerate()
      .map(|(index, stream)| TrackDescription {
        track_type: stream.kind,
        index,
        id: index as u64 + 1,
        string_id: stream.stream_id.clone(),
        format: stream.format.clone(),
      })
      .collect();
    Self {
      duration: collection.duration,
      tracks,
    }
  }

  pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &TrackDescription> {
    self.tracks.iter().filter(move |t| t.track_type == kind)
  }

  pub fn audio_tracks(&self) -> impl Iterator<Item = &TrackDescription> {
    self.tracks_of(MediaKind::Audio)
  }

  pub fn video_tracks(&self) -> impl Iterator<Item = &TrackDescription> {
    self.tracks_of(MediaKind::Video)
  }

  pub fn text_tracks(&self) -> impl Iterator<Item = &TrackDescription> {
    self.tracks_of(MediaKind::Text)
  }

  pub fn first_of(&self, kind: MediaKind) -> Option<&TrackDescription> {
    self.tracks_of(kind).next()
  }

  pub fn track(&self, id: u64) -> Option<&TrackDescription> {
    self.tracks.iter().find(|t| t.id == id)
  }

  /// Same track kinds carrying the same media types, in the same order.
  /// Format details (resolution, rate) may differ.
  pub fn same_topology(&self, other: &InitializationSegment) -> bool {
    self.tracks.len() == other.tracks.len()
      && self.tracks.iter().zip(&other.tracks).all(|(a, b)| {
        a.track_type == b.track_type && a.format.media_type() == b.format.media_type()
      })
  }
}
