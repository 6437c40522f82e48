//! RTP fixed header parsing (RFC 3550 section 5.1)

use super::{RtcError, RtcResult};

const FIXED_HEADER_LEN: usize = 12;
const RTP_VERSION: u8 = 2;

/// Sources identifying the sender of a frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpFrameMetadata {
  pub synchronization_source: u32,
  pub contributing_sources: Vec<u32>,
  pub payload_type: u8,
  pub sequence_number: u16,
}

/// Parsed RTP header; offsets index into the packet it was parsed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
  pub marker: bool,
  pub payload_type: u8,
  pub sequence_number: u16,
  pub timestamp: u32,
  pub ssrc: u32,
  pub csrcs: Vec<u32>,
  /// First payload byte
  pub payload_offset: usize,
  /// Trailing padding bytes, count byte included
  pub padding: usize,
}

fn be_u16(data: &[u8], at: usize) -> u16 {
  u16::from_be_bytes([data[at], data[at + 1]])
}

fn be_u32(data: &[u8], at: usize) -> u32 {
  u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

impl RtpHeader {
  pub fn parse(packet: &[u8]) -> RtcResult<Self> {
    if packet.len() < FIXED_HEADER_LEN {
      return Err(RtcError::InvalidPacket(format!(
        "{} bytes is shorter than the fixed header",
        packet.len()
      )));
    }
    let version = packet[0] >> 6;
    if version != RTP_VERSION {
      return Err(RtcError::InvalidPacket(format!("version {}", version)));
    }
    let has_padding = packet[0] & 0x20 != 0;
    let has_extension = packet[0] & 0x10 != 0;
    let csrc_count = (packet[0] & 0x0f) as usize;

    let mut offset = FIXED_HEADER_LEN + csrc_count * 4;
    if packet.len() < offset {
      return Err(RtcError::InvalidPacket("truncated CSRC list".to_string()));
    }
    let csrcs = (0..csrc_count)
      .map(|i| be_u32(packet, FIXED_HEADER_LEN + i * 4))
      .collect();

    if has_extension {
      if packet.len() < offset + 4 {
        return Err(RtcError::InvalidPacket("truncated header extension".to_string()));
      }
      let words = be_u16(packet, offset + 2) as usize;
      offset += 4 + words * 4;
      if packet.len() < offset {
        return Err(RtcError::InvalidPacket("truncated header extension".to_string()));
      }
    }

    let padding = if has_padding {
      let count = packet[packet.len() - 1] as usize;
      if count == 0 || offset + count > packet.len() {
        return Err(RtcError::InvalidPacket(format!("bad padding length {}", count)));
      }
      count
    } else {
      0
    };

    Ok(Self {
      marker: packet[1] & 0x80 != 0,
      payload_type: packet[1] & 0x7f,
      sequence_number: be_u16(packet, 2),
      timestamp: be_u32(packet, 4),
      ssrc: be_u32(packet, 8),
      csrcs,
      payload_offset: offset,
      padding,
    })
  }

  pub fn payload<'a>(&self, packet: &'a [u8]) -> &'a [u8] {
    &packet[self.payload_offset..packet.len() - self.padding]
  }

  /// Copy of `packet` with its payload replaced; padding is dropped
  pub fn with_payload(&self, packet: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(self.payload_offset + payload.len());
    out.extend_from_slice(&packet[..self.payload_offset]);
    out[0] &= !0x20;
    out.extend_from_slice(payload);
    out
  }

  pub fn metadata(&self) -> RtpFrameMetadata {
    RtpFrameMetadata {
      synchronization_source: self.ssrc,
      contributing_sources: self.csrcs.clone(),
      payload_type: self.payload_type,
      sequence_number: self.sequence_number,
    }
  }
}

/// Build a packet; used by tests and by senders without a payloader
pub fn build_packet(
  payload_type: u8,
  sequence_number: u16,
  timestamp: u32,
  ssrc: u32,
  csrcs: &[u32],
  payload: &[u8],
) -> Vec<u8> {
  let mut out = Vec::with_capacity(FIXED_HEADER_LEN + csrcs.len() * 4 + payload.len());
  out.push((RTP_VERSION << 6) | (csrcs.len().min(15) as u8));
  out.push(payload_type & 0x7f);
  out.extend_from_slice(&sequence_number.to_be_bytes());
  out.extend_from_slice(&timestamp.to_be_bytes());
  out.extend_from_slice(&ssrc.to_be_bytes());
  for csrc in csrcs.iter().take(15) {
    out.extend_from_slice(&csrc.to_be_bytes());
  }
  out.extend_from_slice(payload);
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_fixed_header() {
    let packet = build_packet(111, 513, 48_000, 0xdead_beef, &[7, 9], b"opus");
    let header = RtpHeader::parse(&packet).unwrap();
    assert_eq!(header.payload_type, 111);
    assert_eq!(header.sequence_number, 513);
    assert_eq!(header.timestamp, 48_000);
    assert_eq!(header.ssrc, 0xdead_beef);
    assert_eq!(header.csrcs, vec![7, 9]);
    assert_eq!(header.payload_offset, 20);
    assert_eq!(header.payload(&packet), b"opus");
    assert!(!header.marker);
  }

  #[test]
  fn test_extension_and_padding() {
    let mut packet = build_packet(96, 1, 2, 3, &[], &[]);
    packet[0] |= 0x30;
    packet[1] |= 0x80;
    // One-word extension
    packet.extend_from_slice(&[0xbe, 0xde, 0x00, 0x01, 1, 2, 3, 4]);
    packet.extend_from_slice(b"data");
    packet.extend_from_slice(&[0, 0, 3]);

    let header = RtpHeader::parse(&packet).unwrap();
    assert!(header.marker);
    assert_eq!(header.payload_offset, 20);
    assert_eq!(header.padding, 3);
    assert_eq!(header.payload(&packet), b"data");

    let replaced = header.with_payload(&packet, b"xy");
    assert_eq!(replaced[0] & 0x20, 0);
    let reparsed = RtpHeader::parse(&replaced).unwrap();
    assert_eq!(reparsed.payload(&replaced), b"xy");
    assert_eq!(reparsed.sequence_number, 1);
  }

  #[test]
  fn test_invalid_packets() {
    assert!(RtpHeader::parse(&[0x80; 4]).is_err());
    let mut packet = build_packet(96, 1, 2, 3, &[], b"x");
    packet[0] = 0x40;
    assert!(matches!(RtpHeader::parse(&packet), Err(RtcError::InvalidPacket(_))));
    // CSRC count past the end
    let mut packet = build_packet(96, 1, 2, 3, &[], b"x");
    packet[0] |= 0x04;
    assert!(RtpHeader::parse(&packet).is_err());
  }
}
