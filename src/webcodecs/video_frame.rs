//! Raw video frames
//!
//! [`VideoFrame`] is decoder output and encoder input. Planes may be padded
//! (a row stride wider than the visible row); `copy_to` always writes them
//! tightly packed.

use std::fmt;

use super::error::{MediaError, MediaResult};
use super::session::{FrameTiming, SessionOutput};
use crate::codec::{Buffer, Configuration, Format, PlaneLayout};

/// Video pixel format (WebCodecs `VideoPixelFormat`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoPixelFormat {
  /// Planar YUV 4:2:0, 12bpp, (1 Cr & Cb sample per 2x2 Y samples)
  I420,
  /// Planar YUV 4:2:0, 12bpp, with alpha plane
  I420A,
  /// Planar YUV 4:2:2, 16bpp
  I422,
  /// Planar YUV 4:4:4, 24bpp
  I444,
  /// Semi-planar YUV 4:2:0, 12bpp (Y plane + interleaved UV)
  NV12,
  /// Semi-planar YUV 4:2:0, 12bpp (Y plane + interleaved VU)
  NV21,
  /// RGBA 32bpp
  RGBA,
  /// RGBX 32bpp (alpha ignored)
  RGBX,
  /// BGRA 32bpp
  BGRA,
  /// BGRX 32bpp (alpha ignored)
  BGRX,
}

impl VideoPixelFormat {
  /// Pixel format named by the `format` field of a `video/x-raw` format
  pub fn from_raw_format(name: &str) -> Option<Self> {
    Some(match name {
      "I420" => VideoPixelFormat::I420,
      "A420" => VideoPixelFormat::I420A,
      "Y42B" => VideoPixelFormat::I422,
      "Y444" => VideoPixelFormat::I444,
      "NV12" => VideoPixelFormat::NV12,
      "NV21" => VideoPixelFormat::NV21,
      "RGBA" => VideoPixelFormat::RGBA,
      "RGBx" => VideoPixelFormat::RGBX,
      "BGRA" => VideoPixelFormat::BGRA,
      "BGRx" => VideoPixelFormat::BGRX,
      _ => return None,
    })
  }

  /// `format` field of the matching `video/x-raw` format
  pub fn raw_format(&self) -> &'static str {
    match self {
      VideoPixelFormat::I420 => "I420",
      VideoPixelFormat::I420A => "A420",
      VideoPixelFormat::I422 => "Y42B",
      VideoPixelFormat::I444 => "Y444",
      VideoPixelFormat::NV12 => "NV12",
      VideoPixelFormat::NV21 => "NV21",
      VideoPixelFormat::RGBA => "RGBA",
      VideoPixelFormat::RGBX => "RGBx",
      VideoPixelFormat::BGRA => "BGRA",
      VideoPixelFormat::BGRX => "BGRx",
    }
  }

  pub fn plane_count(&self) -> usize {
    match self {
      VideoPixelFormat::I420 | VideoPixelFormat::I422 | VideoPixelFormat::I444 => 3,
      VideoPixelFormat::I420A => 4,
      VideoPixelFormat::NV12 | VideoPixelFormat::NV21 => 2,
      VideoPixelFormat::RGBA
      | VideoPixelFormat::RGBX
      | VideoPixelFormat::BGRA
      | VideoPixelFormat::BGRX => 1,
    }
  }

  /// (bytes per row, rows) of `plane` for a `width` x `height` frame
  pub fn plane_size(&self, plane: usize, width: u32, height: u32) -> (usize, usize) {
    let (w, h) = (width as usize, height as usize);
    let (half_w, half_h) = (w.div_ceil(2), h.div_ceil(2));
    match (self, plane) {
      (VideoPixelFormat::RGBA | VideoPixelFormat::RGBX, _)
      | (VideoPixelFormat::BGRA | VideoPixelFormat::BGRX, _) => (w * 4, h),
      (_, 0) => (w, h),
      (VideoPixelFormat::I420 | VideoPixelFormat::I420A, 1 | 2) => (half_w, half_h),
      (VideoPixelFormat::I420A, _) => (w, h),
      (VideoPixelFormat::I422, _) => (half_w, h),
      (VideoPixelFormat::NV12 | VideoPixelFormat::NV21, _) => (half_w * 2, half_h),
      _ => (w, h),
    }
  }

  /// Tightly packed plane layouts
  pub fn packed_layout(&self, width: u32, height: u32) -> Vec<PlaneLayout> {
    let mut offset = 0;
    (0..self.plane_count())
      .map(|plane| {
        let (stride, rows) = self.plane_size(plane, width, height);
        let layout = PlaneLayout { offset, stride };
        offset += stride * rows;
        layout
      })
      .collect()
  }

  /// Bytes of a tightly packed frame
  pub fn frame_size(&self, width: u32, height: u32) -> usize {
    (0..self.plane_count())
      .map(|plane| {
        let (row, rows) = self.plane_size(plane, width, height);
        row * rows
      })
      .sum()
  }
}

/// Shape of a [`VideoFrame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFrameBufferInit {
  pub format: VideoPixelFormat,
  pub coded_width: u32,
  pub coded_height: u32,
  /// Timestamp in microseconds
  pub timestamp: i64,
  /// Duration in microseconds
  pub duration: Option<u64>,
}

/// Uncompressed video frame
#[derive(Clone)]
pub struct VideoFrame {
  format: VideoPixelFormat,
  coded_width: u32,
  coded_height: u32,
  timestamp: i64,
  duration: Option<u64>,
  layout: Vec<PlaneLayout>,
  data: Buffer,
}

impl VideoFrame {
  /// Wrap `data`. Plane layouts attached to the buffer are honored, otherwise
  /// the planes are assumed tightly packed.
  pub fn new(data: Buffer, init: VideoFrameBufferInit) -> MediaResult<Self> {
    if init.coded_width == 0 || init.coded_height == 0 {
      return Err(MediaError::type_error("coded size must be positive"));
    }
    let layout = match data.planes() {
      Some(planes) => planes.to_vec(),
      None => init.format.packed_layout(init.coded_width, init.coded_height),
    };
    if layout.len() != init.format.plane_count() {
      return Err(MediaError::type_error(format!(
        "{:?} needs {} planes, got {}",
        init.format,
        init.format.plane_count(),
        layout.len()
      )));
    }
    for (plane, plane_layout) in layout.iter().enumerate() {
      let (row, rows) = init
        .format
        .plane_size(plane, init.coded_width, init.coded_height);
      let end = plane_layout.offset + plane_layout.stride * (rows - 1) + row;
      if plane_layout.stride < row || end > data.size() {
        return Err(MediaError::type_error(format!(
          "plane {} does not fit in {} bytes",
          plane,
          data.size()
        )));
      }
    }

    Ok(Self {
      format: init.format,
      coded_width: init.coded_width,
      coded_height: init.coded_height,
      timestamp: init.timestamp,
      duration: init.duration,
      layout,
      data,
    })
  }

  pub fn from_vec(data: Vec<u8>, init: VideoFrameBufferInit) -> MediaResult<Self> {
    Self::new(Buffer::from_vec(data), init)
  }

  pub fn format(&self) -> VideoPixelFormat {
    self.format
  }

  pub fn coded_width(&self) -> u32 {
    self.coded_width
  }

  pub fn coded_height(&self) -> u32 {
    self.coded_height
  }

  /// Timestamp in microseconds
  pub fn timestamp(&self) -> i64 {
    self.timestamp
  }

  /// Duration in microseconds
  pub fn duration(&self) -> Option<u64> {
    self.duration
  }

  /// Layout of the planes in the underlying payload
  pub fn layout(&self) -> &[PlaneLayout] {
    &self.layout
  }

  /// Calculate the allocation size needed for copyTo
  pub fn allocation_size(&self) -> usize {
    self.format.frame_size(self.coded_width, self.coded_height)
  }

  /// Payload as a timestamped buffer
  pub fn buffer(&self) -> Buffer {
    let buffer = self
      .data
      .clone()
      .with_timestamp(self.timestamp)
      .with_planes(self.layout.clone());
    match self.duration {
      Some(duration) => buffer.with_duration(duration),
      None => buffer,
    }
  }

  /// Describes this frame as a `video/x-raw` format
  pub fn format_descriptor(&self) -> Format {
    Format::new("video/x-raw")
      .with_str("format", self.format.raw_format())
      .with_int("width", self.coded_width as i64)
      .with_int("height", self.coded_height as i64)
  }

  /// Copy every plane, tightly packed, into `destination`. Returns the
  /// layout of the copied planes.
  pub fn copy_to(&self, destination: &mut [u8]) -> MediaResult<Vec<PlaneLayout>> {
    let size = self.allocation_size();
    if destination.len() < size {
      return Err(MediaError::constraint(format!(
        "Buffer too small: need {} bytes, got {}",
        size,
        destination.len()
      )));
    }

    let src = self.data.data();
    let packed = self.format.packed_layout(self.coded_width, self.coded_height);
    for (plane, (from, to)) in self.layout.iter().zip(&packed).enumerate() {
      let (row, rows) = self
        .format
        .plane_size(plane, self.coded_width, self.coded_height);
      for r in 0..rows {
        let src_start = from.offset + r * from.stride;
        let dst_start = to.offset + r * to.stride;
        destination[dst_start..dst_start + row].copy_from_slice(&src[src_start..src_start + row]);
      }
    }
    Ok(packed)
  }
}

impl fmt::Debug for VideoFrame {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("VideoFrame")
      .field("format", &self.format)
      .field("coded_width", &self.coded_width)
      .field("coded_height", &self.coded_height)
      .field("timestamp", &self.timestamp)
      .field("duration", &self.duration)
      .finish()
  }
}

impl SessionOutput for VideoFrame {
  fn from_output(
    buffer: Buffer,
    timing: FrameTiming,
    format: Option<&Format>,
    config: &Configuration,
  ) -> MediaResult<Self> {
    let raw = format.filter(|f| f.has_type("video/x-raw"));
    let pixel_format = match raw.and_then(|f| f.get_str("format")) {
      Some(name) => VideoPixelFormat::from_raw_format(name)
        .ok_or_else(|| MediaError::encoding(format!("Unsupported pixel format: {}", name)))?,
      None => VideoPixelFormat::I420,
    };
    let video = config.video();
    let width = raw
      .and_then(|f| f.get_positive("width"))
      .or(video.map(|v| v.width))
      .unwrap_or(0);
    let height = raw
      .and_then(|f| f.get_positive("height"))
      .or(video.map(|v| v.height))
      .unwrap_or(0);

    Self::new(
      buffer,
      VideoFrameBufferInit {
        format: pixel_format,
        coded_width: width,
        coded_height: height,
        timestamp: timing.timestamp,
        duration: timing.duration,
      },
    )
    .map_err(|e| MediaError::encoding(format!("Invalid decoder output: {}", e.message)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::VideoConfig;
  use crate::webcodecs::error::DOMExceptionName;

  fn init(format: VideoPixelFormat, width: u32, height: u32) -> VideoFrameBufferInit {
    VideoFrameBufferInit {
      format,
      coded_width: width,
      coded_height: height,
      timestamp: 0,
      duration: None,
    }
  }

  #[test]
  fn test_frame_sizes() {
    assert_eq!(VideoPixelFormat::I420.frame_size(4, 4), 24);
    assert_eq!(VideoPixelFormat::I420.frame_size(3, 3), 9 + 4 + 4);
    assert_eq!(VideoPixelFormat::NV12.frame_size(4, 2), 8 + 4);
    assert_eq!(VideoPixelFormat::I422.frame_size(4, 2), 8 + 4 + 4);
    assert_eq!(VideoPixelFormat::I420A.frame_size(2, 2), 4 + 1 + 1 + 4);
    assert_eq!(VideoPixelFormat::BGRA.frame_size(2, 2), 16);
  }

  #[test]
  fn test_packed_layout() {
    let layout = VideoPixelFormat::I420.packed_layout(4, 2);
    assert_eq!(
      layout,
      vec![
        PlaneLayout { offset: 0, stride: 4 },
        PlaneLayout { offset: 8, stride: 2 },
        PlaneLayout { offset: 10, stride: 2 },
      ]
    );
  }

  #[test]
  fn test_raw_format_names() {
    for format in [
      VideoPixelFormat::I420,
      VideoPixelFormat::I420A,
      VideoPixelFormat::NV12,
      VideoPixelFormat::RGBX,
    ] {
      assert_eq!(VideoPixelFormat::from_raw_format(format.raw_format()), Some(format));
    }
    assert_eq!(VideoPixelFormat::from_raw_format("P010"), None);
  }

  #[test]
  fn test_copy_to_removes_row_padding() {
    // 2x2 RGBA rows padded to 12 bytes
    let mut data = vec![0u8; 24];
    data[..8].copy_from_slice(&[1; 8]);
    data[12..20].copy_from_slice(&[2; 8]);
    let buffer = Buffer::from_vec(data).with_planes(vec![PlaneLayout { offset: 0, stride: 12 }]);
    let frame = VideoFrame::new(buffer, init(VideoPixelFormat::RGBA, 2, 2)).unwrap();

    let mut out = vec![0u8; frame.allocation_size()];
    let layout = frame.copy_to(&mut out).unwrap();
    assert_eq!(layout, vec![PlaneLayout { offset: 0, stride: 8 }]);
    assert_eq!(&out[..8], &[1; 8]);
    assert_eq!(&out[8..], &[2; 8]);
  }

  #[test]
  fn test_copy_to_small_destination_is_constraint_error() {
    let frame = VideoFrame::from_vec(vec![0; 24], init(VideoPixelFormat::I420, 4, 4)).unwrap();
    let mut out = vec![0u8; 23];
    assert_eq!(
      frame.copy_to(&mut out).unwrap_err().name,
      DOMExceptionName::ConstraintError
    );
  }

  #[test]
  fn test_short_payload_is_rejected() {
    let err = VideoFrame::from_vec(vec![0; 10], init(VideoPixelFormat::I420, 4, 4)).unwrap_err();
    assert_eq!(err.name, DOMExceptionName::TypeError);
  }

  #[test]
  fn test_from_decoder_output() {
    let format = Format::new("video/x-raw")
      .with_str("format", "NV12")
      .with_int("width", 4)
      .with_int("height", 2);
    let config = Configuration::Video(VideoConfig::default());
    let frame = VideoFrame::from_output(
      Buffer::from_vec(vec![0; 12]),
      FrameTiming::new(33_333, Some(33_333)),
      Some(&format),
      &config,
    )
    .unwrap();
    assert_eq!(frame.format(), VideoPixelFormat::NV12);
    assert_eq!((frame.coded_width(), frame.coded_height()), (4, 2));
    assert_eq!(frame.timestamp(), 33_333);

    let err = VideoFrame::from_output(
      Buffer::from_vec(vec![0; 4]),
      FrameTiming::new(0, None),
      Some(&format),
      &config,
    )
    .unwrap_err();
    assert_eq!(err.name, DOMExceptionName::EncodingError);
  }
}
