//! Codec string parser
//!
//! Parses WebCodecs codec strings (`mp4a.40.2`, `opus`, `pcm-s16`,
//! `vp09.PP.LL.DD`, `av01.P.LLT.DD`, `avc1.PPCCLL`, `hev1.P.T.Lxxx`, ...)
//! into a [`CodecFamily`] plus profile/level/bit depth, and maps a parsed codec
//! and its configuration to the encoded and raw [`Format`]s a session
//! negotiates with.

use crate::codec::{Configuration, Format, HarnessError, HarnessResult, MediaKind};

/// Linear PCM sample encodings accepted as `pcm-*` codec strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PcmFormat {
  U8,
  S16,
  S24,
  S32,
  F32,
}

impl PcmFormat {
  fn from_suffix(suffix: &str) -> Option<Self> {
    match suffix {
      "u8" => Some(PcmFormat::U8),
      "s16" => Some(PcmFormat::S16),
      "s24" => Some(PcmFormat::S24),
      "s32" => Some(PcmFormat::S32),
      "f32" => Some(PcmFormat::F32),
      _ => None,
    }
  }

  /// `format` field of the matching `audio/x-raw` format
  pub fn raw_format(self) -> &'static str {
    match self {
      PcmFormat::U8 => "U8",
      PcmFormat::S16 => "S16LE",
      PcmFormat::S24 => "S24LE",
      PcmFormat::S32 => "S32LE",
      PcmFormat::F32 => "F32LE",
    }
  }

  pub fn bytes_per_sample(self) -> usize {
    match self {
      PcmFormat::U8 => 1,
      PcmFormat::S16 => 2,
      PcmFormat::S24 => 3,
      PcmFormat::S32 | PcmFormat::F32 => 4,
    }
  }
}

/// Codec family a codec string resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecFamily {
  Aac,
  Mp3,
  Opus,
  Flac,
  Vorbis,
  Alaw,
  Ulaw,
  Pcm(PcmFormat),
  H264,
  H265,
  Vp8,
  Vp9,
  Av1,
}

impl CodecFamily {
  pub fn kind(self) -> MediaKind {
    match self {
      CodecFamily::H264
      | CodecFamily::H265
      | CodecFamily::Vp8
      | CodecFamily::Vp9
      | CodecFamily::Av1 => MediaKind::Video,
      _ => MediaKind::Audio,
    }
  }

  /// Canonical identifier, used as the element registry key
  pub fn key(self) -> &'static str {
    match self {
      CodecFamily::Aac => "aac",
      CodecFamily::Mp3 => "mp3",
      CodecFamily::Opus => "opus",
      CodecFamily::Flac => "flac",
      CodecFamily::Vorbis => "vorbis",
      CodecFamily::Alaw => "alaw",
      CodecFamily::Ulaw => "ulaw",
      CodecFamily::Pcm(PcmFormat::U8) => "pcm-u8",
      CodecFamily::Pcm(PcmFormat::S16) => "pcm-s16",
      CodecFamily::Pcm(PcmFormat::S24) => "pcm-s24",
      CodecFamily::Pcm(PcmFormat::S32) => "pcm-s32",
      CodecFamily::Pcm(PcmFormat::F32) => "pcm-f32",
      CodecFamily::H264 => "h264",
      CodecFamily::H265 => "h265",
      CodecFamily::Vp8 => "vp8",
      CodecFamily::Vp9 => "vp9",
      CodecFamily::Av1 => "av1",
    }
  }
}

/// Codec family plus whatever the codec string says about the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCodec {
  pub family: CodecFamily,
  /// AAC object type, `profile_idc` (H.264/H.265) or `seq_profile` (VP9/AV1)
  pub profile: Option<u8>,
  /// As written in the codec string: `level_idc` for H.264, `general_level_idc`
  /// for H.265, tens of a level for VP9, `seq_level_idx` for AV1
  pub level: Option<u8>,
  pub bit_depth: Option<u8>,
  /// 420, 422 or 444
  pub chroma_subsampling: Option<u16>,
}

impl ParsedCodec {
  pub fn new(family: CodecFamily) -> Self {
    Self {
      family,
      profile: None,
      level: None,
      bit_depth: None,
      chroma_subsampling: None,
    }
  }

  /// `profile` field of the encoded format, when the codec string names one
  /// that is known
  pub fn profile_name(&self) -> Option<&'static str> {
    let profile = self.profile?;
    match self.family {
      CodecFamily::Aac => match profile {
        1 => Some("main"),
        2 => Some("lc"),
        3 => Some("ssr"),
        4 => Some("ltp"),
        5 => Some("he-aac"),
        29 => Some("he-aac-v2"),
        _ => None,
      },
      CodecFamily::H264 => match profile {
        66 => Some("baseline"),
        77 => Some("main"),
        88 => Some("extended"),
        100 => Some("high"),
        110 => Some("high-10"),
        122 => Some("high-4:2:2"),
        244 => Some("high-4:4:4"),
        _ => None,
      },
      CodecFamily::H265 => match profile {
        1 => Some("main"),
        2 => Some("main-10"),
        3 => Some("main-still-picture"),
        4 => Some("main-444"),
        _ => None,
      },
      CodecFamily::Vp9 => match profile {
        0 => Some("0"),
        1 => Some("1"),
        2 => Some("2"),
        3 => Some("3"),
        _ => None,
      },
      CodecFamily::Av1 => match profile {
        0 => Some("main"),
        1 => Some("high"),
        2 => Some("professional"),
        _ => None,
      },
      _ => None,
    }
  }

  /// `level` field of the encoded format (`"3.1"`, `"4"`)
  pub fn level_name(&self) -> Option<String> {
    let level = self.level? as u32;
    let tenths = match self.family {
      CodecFamily::H264 | CodecFamily::Vp9 => level,
      // general_level_idc is 30 times the level
      CodecFamily::H265 => level / 3,
      // seq_level_idx 0 is level 2.0, four minor levels per major
      CodecFamily::Av1 => (2 + level / 4) * 10 + level % 4,
      _ => return None,
    };
    Some(match tenths % 10 {
      0 => format!("{}", tenths / 10),
      minor => format!("{}.{}", tenths / 10, minor),
    })
  }
}

fn decimal(field: Option<&&str>) -> Option<u8> {
  field?.parse().ok()
}

/// Two hex digits at `at`; `None` unless both are ASCII hex
fn hex_byte(field: &str, at: usize) -> Option<u8> {
  let digits = field.get(at..at + 2)?;
  if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
    return None;
  }
  u8::from_str_radix(digits, 16).ok()
}

/// Add the profile and level the codec string carries
fn with_stream_info(format: Format, parsed: &ParsedCodec) -> Format {
  let format = match parsed.profile_name() {
    Some(profile) => format.with_str("profile", profile),
    None => format,
  };
  match parsed.level_name() {
    Some(level) => format.with_str("level", level),
    None => format,
  }
}

/// Parse a WebCodecs codec string
///
/// Recognized:
/// - AAC: `mp4a.40.N`, `mp4a.67`, `aac`
/// - MP3: `mp3`, `mp4a.69`, `mp4a.6b`
/// - `opus`, `flac`, `vorbis`, `alaw`, `ulaw`
/// - Linear PCM: `pcm-u8`, `pcm-s16`, `pcm-s24`, `pcm-s32`, `pcm-f32`
/// - `vp8`, `vp9`, `av1`
/// - `vp09.PP.LL.DD.CC...`, `av01.P.LLT.DD.M.CCC...`
/// - `avc1.PPCCLL`, `avc3.PPCCLL`, `hev1.P.C.TLLL...`, `hvc1.P.C.TLLL...`
///
/// Video strings only need their prefix to be recognized; malformed fields
/// after it are left unset.
pub fn parse_codec_string(codec: &str) -> Option<ParsedCodec> {
  let codec = codec.to_lowercase();

  if let Some(parsed) = parse_audio(&codec) {
    return Some(parsed);
  }

  match codec.as_str() {
    "vp8" => return Some(ParsedCodec::new(CodecFamily::Vp8)),
    "vp9" => return Some(ParsedCodec::new(CodecFamily::Vp9)),
    "av1" => return Some(ParsedCodec::new(CodecFamily::Av1)),
    _ => {}
  }

  let fields: Vec<&str> = codec.split('.').collect();
  let parsed = match fields.first().copied() {
    Some("vp09") => parse_vp9(&fields),
    Some("av01") => parse_av1(&fields),
    Some("avc1" | "avc3") => parse_avc(&fields),
    Some("hev1" | "hvc1") => parse_hevc(&fields),
    _ => return None,
  };
  Some(parsed)
}

/// Like [`parse_codec_string`], with the failure spelled out
pub fn resolve_codec(codec: &str) -> HarnessResult<ParsedCodec> {
  if let Some(parsed) = parse_codec_string(codec) {
    return Ok(parsed);
  }
  if codec.to_lowercase().starts_with("pcm-") {
    return Err(HarnessError::Unsupported(format!(
      "Invalid LPCM codec format: {}",
      codec
    )));
  }
  Err(HarnessError::Unsupported(codec.to_string()))
}

fn parse_audio(codec: &str) -> Option<ParsedCodec> {
  let family = match codec {
    "aac" | "mp4a.67" => CodecFamily::Aac,
    "mp3" | "mp4a.69" | "mp4a.6b" | "mp4a.40.34" => CodecFamily::Mp3,
    "opus" => CodecFamily::Opus,
    "flac" => CodecFamily::Flac,
    "vorbis" => CodecFamily::Vorbis,
    "alaw" => CodecFamily::Alaw,
    "ulaw" => CodecFamily::Ulaw,
    _ => {
      if let Some(suffix) = codec.strip_prefix("pcm-") {
        return PcmFormat::from_suffix(suffix).map(|f| ParsedCodec::new(CodecFamily::Pcm(f)));
      }
      // mp4a.40.N: N is the MPEG-4 audio object type
      let object_type = codec.strip_prefix("mp4a.40.")?.parse::<u8>().ok()?;
      let mut parsed = ParsedCodec::new(CodecFamily::Aac);
      parsed.profile = Some(object_type);
      return Some(parsed);
    }
  };
  Some(ParsedCodec::new(family))
}

fn parse_vp9(fields: &[&str]) -> ParsedCodec {
  let mut parsed = ParsedCodec::new(CodecFamily::Vp9);
  parsed.profile = decimal(fields.get(1));
  parsed.level = decimal(fields.get(2));
  parsed.bit_depth = decimal(fields.get(3));
  parsed.chroma_subsampling = match fields.get(4).copied() {
    // 00 and 01 differ only in chroma siting
    Some("00" | "01") => Some(420),
    Some("02") => Some(422),
    Some("03") => Some(444),
    _ => None,
  };
  parsed
}

fn parse_av1(fields: &[&str]) -> ParsedCodec {
  let mut parsed = ParsedCodec::new(CodecFamily::Av1);
  parsed.profile = decimal(fields.get(1));
  // LLT: two level digits, then the tier letter
  parsed.level = fields
    .get(2)
    .and_then(|field| field.get(..2))
    .and_then(|digits| digits.parse().ok());
  parsed.bit_depth = decimal(fields.get(3));
  parsed.chroma_subsampling = match fields.get(5).copied() {
    Some("110" | "111") => Some(420),
    Some("100") => Some(422),
    Some("000") => Some(444),
    _ => None,
  };
  parsed
}

fn parse_avc(fields: &[&str]) -> ParsedCodec {
  let mut parsed = ParsedCodec::new(CodecFamily::H264);
  let Some(field) = fields.get(1).filter(|field| field.len() == 6) else {
    return parsed;
  };
  // PPCCLL: profile_idc, constraint flags, level_idc
  parsed.profile = hex_byte(field, 0);
  parsed.level = hex_byte(field, 4);
  (parsed.bit_depth, parsed.chroma_subsampling) = match parsed.profile {
    Some(66 | 77 | 88 | 100) => (Some(8), Some(420)),
    Some(110) => (Some(10), Some(420)),
    Some(122) => (None, Some(422)),
    Some(244) => (None, Some(444)),
    _ => (None, None),
  };
  parsed
}

fn parse_hevc(fields: &[&str]) -> ParsedCodec {
  let mut parsed = ParsedCodec::new(CodecFamily::H265);
  // Profile space prefix (A, B, C) ahead of profile_idc
  parsed.profile = fields
    .get(1)
    .map(|field| field.trim_start_matches(['a', 'b', 'c']))
    .and_then(|digits| digits.parse().ok());
  (parsed.bit_depth, parsed.chroma_subsampling) = match parsed.profile {
    Some(1 | 3) => (Some(8), Some(420)),
    Some(2) => (Some(10), Some(420)),
    _ => (None, None),
  };
  // Tier letter, then general_level_idc
  parsed.level = fields
    .get(3)
    .and_then(|field| field.strip_prefix(['l', 'h']))
    .and_then(|digits| digits.parse().ok());
  parsed
}

fn audio_config<'a>(
  parsed: &ParsedCodec,
  config: &'a Configuration,
) -> HarnessResult<&'a crate::codec::AudioConfig> {
  config.audio().ok_or_else(|| {
    HarnessError::Unsupported(format!(
      "Unsupported audio codec {} for a video configuration",
      parsed.family.key()
    ))
  })
}

fn video_config<'a>(
  parsed: &ParsedCodec,
  config: &'a Configuration,
) -> HarnessResult<&'a crate::codec::VideoConfig> {
  config.video().ok_or_else(|| {
    HarnessError::Unsupported(format!(
      "Unsupported video codec {} for an audio configuration",
      parsed.family.key()
    ))
  })
}

/// Format of the encoded side of a session for `parsed` under `config`
pub fn encoded_format(parsed: &ParsedCodec, config: &Configuration) -> HarnessResult<Format> {
  if parsed.family.kind() == MediaKind::Audio {
    let audio = audio_config(parsed, config)?;
    let format = match parsed.family {
      CodecFamily::Aac => {
        let format = Format::new("audio/mpeg").with_int("mpegversion", 4);
        match &audio.description {
          Some(codec_data) => format
            .with_str("stream-format", "raw")
            .with_bytes("codec_data", codec_data),
          None => format.with_str("stream-format", "adts"),
        }
      }
      CodecFamily::Mp3 => Format::new("audio/mpeg")
        .with_int("mpegversion", 1)
        .with_int("layer", 3),
      CodecFamily::Opus => {
        let family = audio
          .opus
          .as_ref()
          .map(|opus| opus.channel_mapping_family)
          .unwrap_or(0);
        Format::new("audio/x-opus").with_int("channel-mapping-family", family as i64)
      }
      CodecFamily::Flac => Format::new("audio/x-flac"),
      CodecFamily::Vorbis => Format::new("audio/x-vorbis"),
      CodecFamily::Alaw => Format::new("audio/x-alaw"),
      CodecFamily::Ulaw => Format::new("audio/x-mulaw"),
      CodecFamily::Pcm(pcm) => Format::new("audio/x-raw")
        .with_str("format", pcm.raw_format())
        .with_str("layout", "interleaved"),
      _ => return Err(HarnessError::Unsupported(parsed.family.key().to_string())),
    };
    let format = match (&audio.description, parsed.family) {
      (Some(header), CodecFamily::Flac | CodecFamily::Vorbis | CodecFamily::Opus) => {
        format.with_bytes("streamheader", header)
      }
      _ => format,
    };
    return Ok(
      with_stream_info(format, parsed)
        .with_int("rate", audio.sample_rate as i64)
        .with_int("channels", audio.number_of_channels as i64),
    );
  }

  let video = video_config(parsed, config)?;
  let format = match parsed.family {
    CodecFamily::H264 | CodecFamily::H265 => {
      let (media_type, packetized) = match parsed.family {
        CodecFamily::H264 => ("video/x-h264", "avc"),
        _ => ("video/x-h265", "hvc1"),
      };
      let format = Format::new(media_type).with_str("alignment", "au");
      match &video.description {
        Some(codec_data) => format
          .with_str("stream-format", packetized)
          .with_bytes("codec_data", codec_data),
        None => format.with_str("stream-format", "byte-stream"),
      }
    }
    CodecFamily::Vp8 => Format::new("video/x-vp8"),
    CodecFamily::Vp9 => Format::new("video/x-vp9"),
    CodecFamily::Av1 => Format::new("video/x-av1"),
    _ => return Err(HarnessError::Unsupported(parsed.family.key().to_string())),
  };
  Ok(
    with_stream_info(format, parsed)
      .with_int("width", video.width as i64)
      .with_int("height", video.height as i64),
  )
}

/// Format of the raw side of a session for `parsed` under `config`
pub fn raw_format(parsed: &ParsedCodec, config: &Configuration) -> HarnessResult<Format> {
  match parsed.family.kind() {
    MediaKind::Video => {
      let video = video_config(parsed, config)?;
      if let Some(depth) = parsed.bit_depth.filter(|depth| *depth > 8) {
        return Err(HarnessError::Unsupported(format!(
          "{}-bit frames for {}",
          depth,
          parsed.family.key()
        )));
      }
      let pixel_format = match parsed.chroma_subsampling {
        Some(422) => "Y42B",
        Some(444) => "Y444",
        _ => "I420",
      };
      Ok(
        Format::new("video/x-raw")
          .with_str("format", pixel_format)
          .with_int("width", video.width as i64)
          .with_int("height", video.height as i64),
      )
    }
    _ => {
      let audio = audio_config(parsed, config)?;
      let sample_format = match parsed.family {
        CodecFamily::Pcm(pcm) => pcm.raw_format(),
        _ => "S16LE",
      };
      Ok(
        Format::new("audio/x-raw")
          .with_str("format", sample_format)
          .with_str("layout", "interleaved")
          .with_int("rate", audio.sample_rate as i64)
          .with_int("channels", audio.number_of_channels as i64),
      )
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::{AudioConfig, VideoConfig};

  fn video(width: u32, height: u32) -> Configuration {
    Configuration::Video(VideoConfig {
      width,
      height,
      ..Default::default()
    })
  }

  #[test]
  fn test_parse_vp9_fields() {
    let parsed = parse_codec_string("vp09.02.31.10.01").unwrap();
    assert_eq!(parsed.family, CodecFamily::Vp9);
    assert_eq!(parsed.profile, Some(2));
    assert_eq!(parsed.level_name().as_deref(), Some("3.1"));
    assert_eq!(parsed.bit_depth, Some(10));
    assert_eq!(parsed.chroma_subsampling, Some(420));
    assert_eq!(parse_codec_string("vp09.01.20.08.03").unwrap().chroma_subsampling, Some(444));
    assert_eq!(parse_codec_string("VP9").unwrap(), ParsedCodec::new(CodecFamily::Vp9));
  }

  #[test]
  fn test_parse_av1_fields() {
    let parsed = parse_codec_string("av01.1.09H.08.0.000").unwrap();
    assert_eq!(parsed.family, CodecFamily::Av1);
    assert_eq!(parsed.profile_name(), Some("high"));
    // seq_level_idx 9 is level 4.1
    assert_eq!(parsed.level_name().as_deref(), Some("4.1"));
    assert_eq!(parsed.bit_depth, Some(8));
    assert_eq!(parsed.chroma_subsampling, Some(444));
  }

  #[test]
  fn test_parse_avc_fields() {
    let parsed = parse_codec_string("avc3.4D401E").unwrap();
    assert_eq!(parsed.family, CodecFamily::H264);
    assert_eq!(parsed.profile_name(), Some("main"));
    assert_eq!(parsed.level_name().as_deref(), Some("3"));
    assert_eq!(parsed.bit_depth, Some(8));
    assert_eq!(parse_codec_string("avc1.7A0032").unwrap().chroma_subsampling, Some(422));
  }

  #[test]
  fn test_malformed_avc_fields_are_left_unset() {
    for codec in ["avc1.4\u{e9}001F", "avc1.+1001F", "avc1.42E0", "avc1"] {
      let parsed = parse_codec_string(codec).unwrap();
      assert_eq!(parsed.family, CodecFamily::H264, "{}", codec);
      assert_eq!(parsed.profile, None, "{}", codec);
    }
  }

  #[test]
  fn test_parse_hevc_fields() {
    let parsed = parse_codec_string("hvc1.A2.4.H153.B0").unwrap();
    assert_eq!(parsed.family, CodecFamily::H265);
    assert_eq!(parsed.profile_name(), Some("main-10"));
    assert_eq!(parsed.level_name().as_deref(), Some("5.1"));
    assert_eq!(parsed.bit_depth, Some(10));
    assert_eq!(parse_codec_string("hev1.\u{e9}.6.L93").unwrap().profile, None);
  }

  #[test]
  fn test_parse_unknown() {
    assert!(parse_codec_string("unknown-codec").is_none());
    assert!(parse_codec_string("").is_none());
  }

  #[test]
  fn test_parse_aac_object_type() {
    let parsed = parse_codec_string("mp4a.40.2").unwrap();
    assert_eq!(parsed.family, CodecFamily::Aac);
    assert_eq!(parsed.profile, Some(2));
    assert_eq!(parse_codec_string("mp4a.67").unwrap().family, CodecFamily::Aac);
  }

  #[test]
  fn test_parse_simple_audio() {
    assert_eq!(parse_codec_string("mp3").unwrap().family, CodecFamily::Mp3);
    assert_eq!(parse_codec_string("Opus").unwrap().family, CodecFamily::Opus);
    assert_eq!(parse_codec_string("ulaw").unwrap().family, CodecFamily::Ulaw);
    assert_eq!(
      parse_codec_string("pcm-f32").unwrap().family,
      CodecFamily::Pcm(PcmFormat::F32)
    );
  }

  #[test]
  fn test_invalid_lpcm_format() {
    let err = resolve_codec("pcm-s64").unwrap_err();
    assert!(err.to_string().contains("Invalid LPCM codec format"));
    assert_eq!(
      resolve_codec("bogus").unwrap_err(),
      HarnessError::Unsupported("bogus".to_string())
    );
  }

  #[test]
  fn test_aac_format_uses_description() {
    let parsed = parse_codec_string("mp4a.40.2").unwrap();
    let config = Configuration::Audio(AudioConfig {
      sample_rate: 44_100,
      number_of_channels: 2,
      description: Some(vec![0x12, 0x10]),
      ..Default::default()
    });
    let format = encoded_format(&parsed, &config).unwrap();
    assert_eq!(format.media_type(), "audio/mpeg");
    assert_eq!(format.get_int("mpegversion"), Some(4));
    assert_eq!(format.get_str("stream-format"), Some("raw"));
    assert_eq!(format.get_bytes("codec_data"), Some(&[0x12, 0x10][..]));
    assert_eq!(format.get_str("profile"), Some("lc"));
    assert_eq!(format.get_int("rate"), Some(44_100));
  }

  #[test]
  fn test_h264_without_description_is_byte_stream() {
    let parsed = parse_codec_string("avc1.42001f").unwrap();
    let config = video(640, 480);
    let format = encoded_format(&parsed, &config).unwrap();
    assert_eq!(format.media_type(), "video/x-h264");
    assert_eq!(format.get_str("stream-format"), Some("byte-stream"));
    assert_eq!(format.get_str("profile"), Some("baseline"));
    assert_eq!(format.get_str("level"), Some("3.1"));
    assert_eq!(format.get_int("width"), Some(640));

    let raw = raw_format(&parsed, &config).unwrap();
    assert_eq!(raw.get_str("format"), Some("I420"));
  }

  #[test]
  fn test_raw_format_follows_chroma_and_depth() {
    let config = video(64, 64);
    let i444 = parse_codec_string("vp09.01.10.08.03").unwrap();
    assert_eq!(raw_format(&i444, &config).unwrap().get_str("format"), Some("Y444"));

    let main10 = parse_codec_string("hev1.2.4.L120.B0").unwrap();
    assert!(matches!(
      raw_format(&main10, &config),
      Err(HarnessError::Unsupported(_))
    ));
    // Decoding 10-bit streams still negotiates
    let encoded = encoded_format(&main10, &config).unwrap();
    assert_eq!(encoded.get_str("profile"), Some("main-10"));
    assert_eq!(encoded.get_str("level"), Some("4"));
  }

  #[test]
  fn test_bare_family_has_no_profile_fields() {
    let parsed = parse_codec_string("av1").unwrap();
    let format = encoded_format(&parsed, &video(32, 32)).unwrap();
    assert_eq!(format.media_type(), "video/x-av1");
    assert_eq!(format.get_str("profile"), None);
    assert_eq!(format.get_str("level"), None);
  }

  #[test]
  fn test_kind_mismatch_is_unsupported() {
    let parsed = parse_codec_string("opus").unwrap();
    let config = video(16, 16);
    assert!(matches!(
      encoded_format(&parsed, &config),
      Err(HarnessError::Unsupported(_))
    ));
  }

  #[test]
  fn test_pcm_raw_format_matches_codec() {
    let parsed = parse_codec_string("pcm-s24").unwrap();
    let config = Configuration::Audio(AudioConfig::default());
    let raw = raw_format(&parsed, &config).unwrap();
    assert_eq!(raw.get_str("format"), Some("S24LE"));
    assert_eq!(encoded_format(&parsed, &config).unwrap(), raw);
  }
}
