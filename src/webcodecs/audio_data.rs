//! Raw audio data
//!
//! [`RawAudioData`] is what audio decoders output and audio encoders take as
//! input: a block of PCM frames in one of the eight WebCodecs sample formats,
//! plus its timestamp. `copy_to` converts between formats and layouts.

use std::fmt;

use super::error::{MediaError, MediaResult};
use super::session::{FrameTiming, SessionOutput};
use crate::codec::{Buffer, Configuration, Format};

/// Audio sample format (WebCodecs `AudioSampleFormat`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSampleFormat {
  /// Unsigned 8-bit integer samples, interleaved
  U8,
  /// Signed 16-bit integer samples, interleaved
  S16,
  /// Signed 32-bit integer samples, interleaved
  S32,
  /// 32-bit float samples, interleaved
  F32,
  /// Unsigned 8-bit integer samples, planar
  U8Planar,
  /// Signed 16-bit integer samples, planar
  S16Planar,
  /// Signed 32-bit integer samples, planar
  S32Planar,
  /// 32-bit float samples, planar
  F32Planar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleType {
  U8,
  S16,
  S32,
  F32,
}

impl AudioSampleFormat {
  /// Sample format described by an `audio/x-raw` format
  pub fn from_format(format: &Format) -> Option<Self> {
    if !format.has_type("audio/x-raw") {
      return None;
    }
    let planar = format.get_str("layout") == Some("non-interleaved");
    let sample_format = match format.get_str("format")? {
      "U8" => AudioSampleFormat::U8,
      "S16LE" => AudioSampleFormat::S16,
      "S32LE" => AudioSampleFormat::S32,
      "F32LE" => AudioSampleFormat::F32,
      _ => return None,
    };
    Some(if planar {
      sample_format.to_planar()
    } else {
      sample_format
    })
  }

  /// `format` field of the matching `audio/x-raw` format
  pub fn raw_format(&self) -> &'static str {
    match self.sample_type() {
      SampleType::U8 => "U8",
      SampleType::S16 => "S16LE",
      SampleType::S32 => "S32LE",
      SampleType::F32 => "F32LE",
    }
  }

  /// `layout` field of the matching `audio/x-raw` format
  pub fn layout(&self) -> &'static str {
    if self.is_planar() {
      "non-interleaved"
    } else {
      "interleaved"
    }
  }

  /// Get bytes per sample
  pub fn bytes_per_sample(&self) -> usize {
    match self.sample_type() {
      SampleType::U8 => 1,
      SampleType::S16 => 2,
      SampleType::S32 | SampleType::F32 => 4,
    }
  }

  /// Check if this is a planar format
  pub fn is_planar(&self) -> bool {
    matches!(
      self,
      AudioSampleFormat::U8Planar
        | AudioSampleFormat::S16Planar
        | AudioSampleFormat::S32Planar
        | AudioSampleFormat::F32Planar
    )
  }

  fn to_planar(self) -> Self {
    match self {
      AudioSampleFormat::U8 => AudioSampleFormat::U8Planar,
      AudioSampleFormat::S16 => AudioSampleFormat::S16Planar,
      AudioSampleFormat::S32 => AudioSampleFormat::S32Planar,
      AudioSampleFormat::F32 => AudioSampleFormat::F32Planar,
      planar => planar,
    }
  }

  fn sample_type(&self) -> SampleType {
    match self {
      AudioSampleFormat::U8 | AudioSampleFormat::U8Planar => SampleType::U8,
      AudioSampleFormat::S16 | AudioSampleFormat::S16Planar => SampleType::S16,
      AudioSampleFormat::S32 | AudioSampleFormat::S32Planar => SampleType::S32,
      AudioSampleFormat::F32 | AudioSampleFormat::F32Planar => SampleType::F32,
    }
  }
}

fn read_sample(bytes: &[u8], sample_type: SampleType) -> f32 {
  match sample_type {
    SampleType::U8 => (bytes[0] as f32 - 128.0) / 128.0,
    SampleType::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
    SampleType::S32 => {
      (i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64 / 2_147_483_648.0) as f32
    }
    SampleType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
  }
}

fn write_sample(value: f32, sample_type: SampleType, out: &mut [u8]) {
  match sample_type {
    SampleType::U8 => out[0] = (value * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8,
    SampleType::S16 => {
      let sample = (value * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
      out[..2].copy_from_slice(&sample.to_le_bytes());
    }
    SampleType::S32 => {
      let sample = (value as f64 * 2_147_483_648.0)
        .round()
        .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32;
      out[..4].copy_from_slice(&sample.to_le_bytes());
    }
    SampleType::F32 => out[..4].copy_from_slice(&value.to_le_bytes()),
  }
}

/// Shape of a [`RawAudioData`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioDataInit {
  /// Sample format
  pub format: AudioSampleFormat,
  /// Sample rate in Hz
  pub sample_rate: u32,
  /// Number of frames (samples per channel)
  pub number_of_frames: u32,
  /// Number of channels
  pub number_of_channels: u32,
  /// Timestamp in microseconds
  pub timestamp: i64,
}

/// Options for copyTo operation
#[derive(Debug, Clone, Default)]
pub struct AudioDataCopyToOptions {
  /// The index of the audio plane to copy
  pub plane_index: u32,
  /// The offset in frames to start copying from (optional)
  pub frame_offset: Option<u32>,
  /// The number of frames to copy (optional, defaults to all remaining)
  pub frame_count: Option<u32>,
  /// Target format for conversion (optional)
  pub format: Option<AudioSampleFormat>,
}

/// Uncompressed audio
#[derive(Clone)]
pub struct RawAudioData {
  format: AudioSampleFormat,
  sample_rate: u32,
  number_of_frames: u32,
  number_of_channels: u32,
  timestamp: i64,
  data: Buffer,
}

impl RawAudioData {
  /// Wrap `data`, which must hold at least `number_of_frames` frames
  pub fn new(data: Buffer, init: AudioDataInit) -> MediaResult<Self> {
    if init.sample_rate == 0 || init.number_of_channels == 0 {
      return Err(MediaError::type_error(
        "sample rate and channel count must be positive",
      ));
    }
    let required = init.number_of_frames as usize
      * init.number_of_channels as usize
      * init.format.bytes_per_sample();
    if data.size() < required {
      return Err(MediaError::type_error(format!(
        "data holds {} bytes, {} frames need {}",
        data.size(),
        init.number_of_frames,
        required
      )));
    }
    Ok(Self {
      format: init.format,
      sample_rate: init.sample_rate,
      number_of_frames: init.number_of_frames,
      number_of_channels: init.number_of_channels,
      timestamp: init.timestamp,
      data,
    })
  }

  pub fn from_vec(data: Vec<u8>, init: AudioDataInit) -> MediaResult<Self> {
    Self::new(Buffer::from_vec(data), init)
  }

  pub fn format(&self) -> AudioSampleFormat {
    self.format
  }

  pub fn sample_rate(&self) -> u32 {
    self.sample_rate
  }

  pub fn number_of_frames(&self) -> u32 {
    self.number_of_frames
  }

  pub fn number_of_channels(&self) -> u32 {
    self.number_of_channels
  }

  /// Timestamp in microseconds
  pub fn timestamp(&self) -> i64 {
    self.timestamp
  }

  /// Duration in microseconds
  pub fn duration(&self) -> u64 {
    self.number_of_frames as u64 * 1_000_000 / self.sample_rate as u64
  }

  pub fn number_of_planes(&self) -> u32 {
    if self.format.is_planar() {
      self.number_of_channels
    } else {
      1
    }
  }

  /// Payload as a timestamped buffer
  pub fn buffer(&self) -> Buffer {
    self
      .data
      .clone()
      .with_timestamp(self.timestamp)
      .with_duration(self.duration())
  }

  /// Describes this data as an `audio/x-raw` format
  pub fn format_descriptor(&self) -> Format {
    Format::new("audio/x-raw")
      .with_str("format", self.format.raw_format())
      .with_str("layout", self.format.layout())
      .with_int("rate", self.sample_rate as i64)
      .with_int("channels", self.number_of_channels as i64)
  }

  /// (format, plane, first frame, frame count) selected by `options`
  fn copy_region(
    &self,
    options: &AudioDataCopyToOptions,
  ) -> MediaResult<(AudioSampleFormat, usize, usize, usize)> {
    let format = options.format.unwrap_or(self.format);
    let planes = if format.is_planar() {
      self.number_of_channels
    } else {
      1
    };
    if options.plane_index >= planes {
      return Err(MediaError::constraint(format!(
        "Invalid plane index {} for {} planes",
        options.plane_index, planes
      )));
    }
    let frame_offset = options.frame_offset.unwrap_or(0);
    if frame_offset > self.number_of_frames {
      return Err(MediaError::constraint(format!(
        "frame offset {} past {} frames",
        frame_offset, self.number_of_frames
      )));
    }
    let available = self.number_of_frames - frame_offset;
    let frame_count = options.frame_count.unwrap_or(available);
    if frame_count > available {
      return Err(MediaError::constraint(format!(
        "frame count {} exceeds the {} frames available",
        frame_count, available
      )));
    }
    Ok((
      format,
      options.plane_index as usize,
      frame_offset as usize,
      frame_count as usize,
    ))
  }

  /// Bytes `copy_to` with the same options writes
  pub fn allocation_size(&self, options: &AudioDataCopyToOptions) -> MediaResult<usize> {
    let (format, _, _, frames) = self.copy_region(options)?;
    let samples = if format.is_planar() {
      frames
    } else {
      frames * self.number_of_channels as usize
    };
    Ok(samples * format.bytes_per_sample())
  }

  fn source_offset(&self, frame: usize, channel: usize) -> usize {
    let channels = self.number_of_channels as usize;
    let sample = if self.format.is_planar() {
      channel * self.number_of_frames as usize + frame
    } else {
      frame * channels + channel
    };
    sample * self.format.bytes_per_sample()
  }

  /// Copy (and convert) the selected plane into `destination`, returning the
  /// number of bytes written
  pub fn copy_to(
    &self,
    destination: &mut [u8],
    options: &AudioDataCopyToOptions,
  ) -> MediaResult<usize> {
    let (format, plane, frame_offset, frames) = self.copy_region(options)?;
    let size = self.allocation_size(options)?;
    if destination.len() < size {
      return Err(MediaError::constraint("Destination buffer too small"));
    }

    let src = self.data.data();
    let src_bps = self.format.bytes_per_sample();
    let dst_bps = format.bytes_per_sample();
    let src_type = self.format.sample_type();
    let dst_type = format.sample_type();
    let channels: Vec<usize> = if format.is_planar() {
      vec![plane]
    } else {
      (0..self.number_of_channels as usize).collect()
    };

    let mut out = 0;
    for frame in frame_offset..frame_offset + frames {
      for &channel in &channels {
        let at = self.source_offset(frame, channel);
        let sample = &src[at..at + src_bps];
        let target = &mut destination[out..out + dst_bps];
        if src_type == dst_type {
          target.copy_from_slice(sample);
        } else {
          write_sample(read_sample(sample, src_type), dst_type, target);
        }
        out += dst_bps;
      }
    }
    Ok(out)
  }

  /// Everything converted to `format` as one buffer (all planes back to back)
  pub fn to_format(&self, format: AudioSampleFormat) -> MediaResult<Vec<u8>> {
    let planes = if format.is_planar() {
      self.number_of_channels
    } else {
      1
    };
    let mut data = Vec::new();
    for plane_index in 0..planes {
      let options = AudioDataCopyToOptions {
        plane_index,
        format: Some(format),
        ..Default::default()
      };
      let start = data.len();
      data.resize(start + self.allocation_size(&options)?, 0);
      self.copy_to(&mut data[start..], &options)?;
    }
    Ok(data)
  }
}

impl fmt::Debug for RawAudioData {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RawAudioData")
      .field("format", &self.format)
      .field("sample_rate", &self.sample_rate)
      .field("number_of_frames", &self.number_of_frames)
      .field("number_of_channels", &self.number_of_channels)
      .field("timestamp", &self.timestamp)
      .finish()
  }
}

impl SessionOutput for RawAudioData {
  fn from_output(
    buffer: Buffer,
    timing: FrameTiming,
    format: Option<&Format>,
    config: &Configuration,
  ) -> MediaResult<Self> {
    let sample_format = format
      .and_then(AudioSampleFormat::from_format)
      .ok_or_else(|| {
        MediaError::encoding(format!(
          "Unsupported decoder output format: {}",
          format.map(|f| f.to_string()).unwrap_or_default()
        ))
      })?;
    let audio = config.audio();
    let sample_rate = format
      .and_then(|f| f.get_positive("rate"))
      .or(audio.map(|a| a.sample_rate))
      .unwrap_or(0);
    let channels = format
      .and_then(|f| f.get_positive("channels"))
      .or(audio.map(|a| a.number_of_channels))
      .unwrap_or(0);
    let frame_size = channels as usize * sample_format.bytes_per_sample();
    if frame_size == 0 {
      return Err(MediaError::encoding("decoder output has no channels"));
    }

    Self::new(
      buffer.clone(),
      AudioDataInit {
        format: sample_format,
        sample_rate,
        number_of_frames: (buffer.size() / frame_size) as u32,
        number_of_channels: channels,
        timestamp: timing.timestamp,
      },
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::AudioConfig;
  use crate::webcodecs::error::DOMExceptionName;

  fn s16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
  }

  fn stereo_s16() -> RawAudioData {
    // frames: (1, 2), (3, 4), (5, 6)
    RawAudioData::from_vec(
      s16(&[1, 2, 3, 4, 5, 6]),
      AudioDataInit {
        format: AudioSampleFormat::S16,
        sample_rate: 48_000,
        number_of_frames: 3,
        number_of_channels: 2,
        timestamp: 1_000,
      },
    )
    .unwrap()
  }

  #[test]
  fn test_format_properties() {
    assert_eq!(AudioSampleFormat::S16.bytes_per_sample(), 2);
    assert_eq!(AudioSampleFormat::F32Planar.bytes_per_sample(), 4);
    assert!(AudioSampleFormat::U8Planar.is_planar());
    assert!(!AudioSampleFormat::S32.is_planar());

    let format = Format::new("audio/x-raw")
      .with_str("format", "F32LE")
      .with_str("layout", "non-interleaved");
    assert_eq!(
      AudioSampleFormat::from_format(&format),
      Some(AudioSampleFormat::F32Planar)
    );
    let s24 = Format::new("audio/x-raw").with_str("format", "S24LE");
    assert_eq!(AudioSampleFormat::from_format(&s24), None);
  }

  #[test]
  fn test_allocation_size() {
    let data = stereo_s16();
    assert_eq!(data.allocation_size(&Default::default()).unwrap(), 12);
    let planar = AudioDataCopyToOptions {
      plane_index: 1,
      format: Some(AudioSampleFormat::F32Planar),
      ..Default::default()
    };
    assert_eq!(data.allocation_size(&planar).unwrap(), 12);
    let partial = AudioDataCopyToOptions {
      frame_offset: Some(1),
      frame_count: Some(1),
      ..Default::default()
    };
    assert_eq!(data.allocation_size(&partial).unwrap(), 4);
  }

  #[test]
  fn test_copy_deinterleaves_one_plane() {
    let data = stereo_s16();
    let mut out = [0u8; 6];
    let options = AudioDataCopyToOptions {
      plane_index: 1,
      format: Some(AudioSampleFormat::S16Planar),
      ..Default::default()
    };
    assert_eq!(data.copy_to(&mut out, &options).unwrap(), 6);
    assert_eq!(out.to_vec(), s16(&[2, 4, 6]));
  }

  #[test]
  fn test_planar_to_interleaved() {
    let planar = RawAudioData::from_vec(
      s16(&[1, 3, 5, 2, 4, 6]),
      AudioDataInit {
        format: AudioSampleFormat::S16Planar,
        sample_rate: 8_000,
        number_of_frames: 3,
        number_of_channels: 2,
        timestamp: 0,
      },
    )
    .unwrap();
    let interleaved = planar.to_format(AudioSampleFormat::S16).unwrap();
    assert_eq!(interleaved, s16(&[1, 2, 3, 4, 5, 6]));
  }

  #[test]
  fn test_sample_conversion() {
    let data = RawAudioData::from_vec(
      s16(&[16384, -32768]),
      AudioDataInit {
        format: AudioSampleFormat::S16,
        sample_rate: 8_000,
        number_of_frames: 2,
        number_of_channels: 1,
        timestamp: 0,
      },
    )
    .unwrap();
    let floats = data.to_format(AudioSampleFormat::F32).unwrap();
    let values: Vec<f32> = floats
      .chunks_exact(4)
      .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
      .collect();
    assert_eq!(values, vec![0.5, -1.0]);

    let bytes = data.to_format(AudioSampleFormat::U8).unwrap();
    assert_eq!(bytes, vec![192, 0]);
  }

  #[test]
  fn test_destination_too_small_is_constraint_error() {
    let data = stereo_s16();
    let mut out = [0u8; 4];
    let err = data.copy_to(&mut out, &Default::default()).unwrap_err();
    assert_eq!(err.name, DOMExceptionName::ConstraintError);
    assert_eq!(err.message, "Destination buffer too small");
  }

  #[test]
  fn test_out_of_range_region_is_rejected() {
    let data = stereo_s16();
    let options = AudioDataCopyToOptions {
      frame_offset: Some(2),
      frame_count: Some(2),
      ..Default::default()
    };
    assert_eq!(
      data.allocation_size(&options).unwrap_err().name,
      DOMExceptionName::ConstraintError
    );
    let bad_plane = AudioDataCopyToOptions {
      plane_index: 1,
      ..Default::default()
    };
    assert!(data.allocation_size(&bad_plane).is_err());
  }

  #[test]
  fn test_short_payload_is_rejected() {
    let result = RawAudioData::from_vec(
      vec![0; 3],
      AudioDataInit {
        format: AudioSampleFormat::S16,
        sample_rate: 8_000,
        number_of_frames: 2,
        number_of_channels: 1,
        timestamp: 0,
      },
    );
    assert_eq!(result.unwrap_err().name, DOMExceptionName::TypeError);
  }

  #[test]
  fn test_from_decoder_output() {
    let format = Format::new("audio/x-raw")
      .with_str("format", "S16LE")
      .with_str("layout", "interleaved")
      .with_int("rate", 8_000)
      .with_int("channels", 1);
    let config = Configuration::Audio(AudioConfig::default());
    let data = RawAudioData::from_output(
      Buffer::from_vec(vec![0; 160]),
      FrameTiming::new(20_000, None),
      Some(&format),
      &config,
    )
    .unwrap();
    assert_eq!(data.number_of_frames(), 80);
    assert_eq!(data.sample_rate(), 8_000);
    assert_eq!(data.timestamp(), 20_000);
    assert_eq!(data.duration(), 10_000);
    assert_eq!(data.buffer().timestamp(), Some(20_000));
  }
}
