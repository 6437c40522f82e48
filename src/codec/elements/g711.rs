//! G.711 A-law / µ-law codecs
//!
//! Raw side is interleaved signed 16-bit little-endian PCM
//! (`audio/x-raw, format=S16LE`); encoded side is one byte per sample
//! (`audio/x-alaw` or `audio/x-mulaw`).

use crate::codec::elements::BufferTransform;
use crate::codec::{Buffer, Format, HarnessError, HarnessResult};

const SEG_AEND: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];
const SEG_UEND: [i32; 8] = [0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF];
const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 8159;

fn segment(value: i32, table: &[i32; 8]) -> usize {
  table.iter().position(|end| value <= *end).unwrap_or(table.len())
}

pub fn linear_to_alaw(pcm: i16) -> u8 {
  let mut value = (pcm as i32) >> 3;
  let mask = if value >= 0 {
    0xD5
  } else {
    value = -value - 1;
    0x55
  };

  let seg = segment(value, &SEG_AEND);
  if seg >= 8 {
    return (0x7F ^ mask) as u8;
  }
  let mut aval = (seg as i32) << 4;
  if seg < 2 {
    aval |= (value >> 1) & 0x0F;
  } else {
    aval |= (value >> seg) & 0x0F;
  }
  (aval ^ mask) as u8
}

pub fn alaw_to_linear(alaw: u8) -> i16 {
  let alaw = alaw ^ 0x55;
  let mut t = ((alaw & 0x0F) as i32) << 4;
  let seg = ((alaw & 0x70) >> 4) as i32;
  match seg {
    0 => t += 8,
    1 => t += 0x108,
    _ => {
      t += 0x108;
      t <<= seg - 1;
    }
  }
  if alaw & 0x80 != 0 { t as i16 } else { (-t) as i16 }
}

pub fn linear_to_ulaw(pcm: i16) -> u8 {
  let mut value = (pcm as i32) >> 2;
  let mask = if value < 0 {
    value = -value;
    0x7F
  } else {
    0xFF
  };
  value = value.min(ULAW_CLIP) + (ULAW_BIAS >> 2);

  let seg = segment(value, &SEG_UEND);
  if seg >= 8 {
    return (0x7F ^ mask) as u8;
  }
  let uval = ((seg as i32) << 4) | ((value >> (seg + 1)) & 0x0F);
  (uval ^ mask) as u8
}

pub fn ulaw_to_linear(ulaw: u8) -> i16 {
  let ulaw = !ulaw;
  let mut t = (((ulaw & 0x0F) as i32) << 3) + ULAW_BIAS;
  t <<= (ulaw & 0x70) >> 4;
  if ulaw & 0x80 != 0 {
    (ULAW_BIAS - t) as i16
  } else {
    (t - ULAW_BIAS) as i16
  }
}

/// Companding law
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Law {
  Alaw,
  Mulaw,
}

impl G711Law {
  pub fn media_type(self) -> &'static str {
    match self {
      G711Law::Alaw => "audio/x-alaw",
      G711Law::Mulaw => "audio/x-mulaw",
    }
  }

  fn encode(self, sample: i16) -> u8 {
    match self {
      G711Law::Alaw => linear_to_alaw(sample),
      G711Law::Mulaw => linear_to_ulaw(sample),
    }
  }

  fn decode(self, byte: u8) -> i16 {
    match self {
      G711Law::Alaw => alaw_to_linear(byte),
      G711Law::Mulaw => ulaw_to_linear(byte),
    }
  }
}

fn rate_and_channels(element: &str, format: &Format) -> HarnessResult<(u32, u32)> {
  match (format.get_positive("rate"), format.get_positive("channels")) {
    (Some(rate), Some(channels)) => Ok((rate, channels)),
    _ => Err(HarnessError::NegotiationFailed {
      element: element.to_string(),
      format: format.to_string(),
    }),
  }
}

/// Fill in a duration from the sample count when the input has none
fn with_sample_duration(buffer: Buffer, frames: usize, rate: u32) -> Buffer {
  if buffer.duration().is_some() || rate == 0 {
    return buffer;
  }
  let duration = frames as u64 * 1_000_000 / rate as u64;
  buffer.with_duration(duration)
}

/// S16LE PCM to G.711
pub struct G711Encoder {
  law: G711Law,
  name: String,
  rate: u32,
  channels: u32,
}

impl G711Encoder {
  pub fn new(law: G711Law) -> Self {
    let name = match law {
      G711Law::Alaw => "alawenc",
      G711Law::Mulaw => "mulawenc",
    };
    Self {
      law,
      name: name.to_string(),
      rate: 0,
      channels: 0,
    }
  }
}

impl BufferTransform for G711Encoder {
  fn name(&self) -> &str {
    &self.name
  }

  fn output_format(&mut self, input: &Format) -> HarnessResult<Format> {
    let s16 = input.get_str("format").is_none_or(|f| f == "S16LE");
    if !input.has_type("audio/x-raw") || !s16 {
      return Err(HarnessError::NegotiationFailed {
        element: self.name.clone(),
        format: input.to_string(),
      });
    }
    let (rate, channels) = rate_and_channels(&self.name, input)?;
    self.rate = rate;
    self.channels = channels;
    Ok(
      Format::new(self.law.media_type())
        .with_int("rate", rate as i64)
        .with_int("channels", channels as i64),
    )
  }

  fn transform(&mut self, input: Buffer) -> HarnessResult<Vec<Buffer>> {
    let data = input.data();
    if data.len() % 2 != 0 {
      return Err(HarnessError::Processing(format!(
        "{}: odd payload size {}",
        self.name,
        data.len()
      )));
    }
    let encoded: Vec<u8> = data
      .chunks_exact(2)
      .map(|s| self.law.encode(i16::from_le_bytes([s[0], s[1]])))
      .collect();
    let frames = encoded.len() / self.channels.max(1) as usize;
    let output = with_sample_duration(input.derive(encoded), frames, self.rate);
    Ok(vec![output])
  }
}

/// G.711 to S16LE PCM
pub struct G711Decoder {
  law: G711Law,
  name: String,
  rate: u32,
  channels: u32,
}

impl G711Decoder {
  pub fn new(law: G711Law) -> Self {
    let name = match law {
      G711Law::Alaw => "alawdec",
      G711Law::Mulaw => "mulawdec",
    };
    Self {
      law,
      name: name.to_string(),
      rate: 0,
      channels: 0,
    }
  }
}

impl BufferTransform for G711Decoder {
  fn name(&self) -> &str {
    &self.name
  }

  fn output_format(&mut self, input: &Format) -> HarnessResult<Format> {
    if input.media_type() != self.law.media_type() {
      return Err(HarnessError::NegotiationFailed {
        element: self.name.clone(),
        format: input.to_string(),
      });
    }
    let (rate, channels) = rate_and_channels(&self.name, input)?;
    self.rate = rate;
    self.channels = channels;
    Ok(
      Format::new("audio/x-raw")
        .with_str("format", "S16LE")
        .with_str("layout", "interleaved")
        .with_int("rate", rate as i64)
        .with_int("channels", channels as i64),
    )
  }

  fn transform(&mut self, input: Buffer) -> HarnessResult<Vec<Buffer>> {
    let decoded: Vec<u8> = input
      .data()
      .iter()
      .flat_map(|b| self.law.decode(*b).to_le_bytes())
      .collect();
    let frames = input.size() / self.channels.max(1) as usize;
    let output = with_sample_duration(input.derive(decoded), frames, self.rate);
    Ok(vec![output])
  }
}
