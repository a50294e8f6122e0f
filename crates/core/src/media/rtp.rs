//! RTP fixed header (RFC 3550 §5.1).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! |                           Timestamp                           |
//! |                             SSRC                              |
//! ```
//!
//! Padding, extension and CSRCs are never used, so the header is always
//! 12 bytes.

use rand::RngExt;

pub const RTP_HEADER_LEN: usize = 12;
const RTP_VERSION: u8 = 2;

/// Per-session header state: a fixed SSRC and a wrapping sequence counter.
///
/// The timestamp is supplied by the caller on each write because it is
/// shared by every session sending the same access unit.
#[derive(Debug)]
pub struct RtpHeader {
    payload_type: u8,
    ssrc: u32,
    sequence: u16,
}

impl RtpHeader {
    pub fn new(payload_type: u8, ssrc: u32) -> Self {
        Self {
            payload_type: payload_type & 0x7f,
            ssrc,
            sequence: 0,
        }
    }

    /// SSRC drawn at random so independent sessions do not collide (RFC 3550 §8.1).
    pub fn with_random_ssrc(payload_type: u8) -> Self {
        let header = Self::new(payload_type, rand::rng().random());
        tracing::trace!(ssrc = format_args!("{:#010x}", header.ssrc), "RTP SSRC chosen");
        header
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next [`write`](Self::write) will stamp.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Hand back the last `count` sequence numbers, stamped on packets that
    /// were never sent.
    pub fn rewind(&mut self, count: u16) {
        self.sequence = self.sequence.wrapping_sub(count);
    }

    /// Emit the next header and advance the sequence number.
    pub fn write(&mut self, marker: bool, timestamp: u32) -> [u8; RTP_HEADER_LEN] {
        let sequence = self.sequence;
        self.sequence = sequence.wrapping_add(1);

        let mut out = [0u8; RTP_HEADER_LEN];
        out[0] = RTP_VERSION << 6;
        out[1] = (u8::from(marker) << 7) | self.payload_type;
        out[2..4].copy_from_slice(&sequence.to_be_bytes());
        out[4..8].copy_from_slice(&timestamp.to_be_bytes());
        out[8..].copy_from_slice(&self.ssrc.to_be_bytes());
        out
    }
}

/// Decoded view of a received packet's fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacketInfo {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpPacketInfo {
    /// `None` for packets shorter than a fixed header or not version 2.
    pub fn parse(packet: &[u8]) -> Option<Self> {
        let header: &[u8; RTP_HEADER_LEN] = packet.get(..RTP_HEADER_LEN)?.try_into().ok()?;
        if header[0] >> 6 != RTP_VERSION {
            return None;
        }
        Some(Self {
            marker: header[1] & 0x80 != 0,
            payload_type: header[1] & 0x7f,
            sequence: u16::from_be_bytes([header[2], header[3]]),
            timestamp: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
            ssrc: u32::from_be_bytes([header[8], header[9], header[10], header[11]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields_are_packed() {
        let mut h = RtpHeader::new(96, 0xAABB_CCDD);
        let bytes = h.write(true, 0x0102_0304);
        assert_eq!(bytes[0], 0x80);
        assert_eq!(
            RtpPacketInfo::parse(&bytes),
            Some(RtpPacketInfo {
                marker: true,
                payload_type: 96,
                sequence: 0,
                timestamp: 0x0102_0304,
                ssrc: 0xAABB_CCDD,
            })
        );
    }

    #[test]
    fn sequence_advances_and_wraps() {
        let mut h = RtpHeader::new(96, 1);
        h.sequence = u16::MAX - 1;
        let seqs: Vec<u16> = (0..3)
            .map(|_| RtpPacketInfo::parse(&h.write(false, 0)).unwrap().sequence)
            .collect();
        assert_eq!(seqs, vec![u16::MAX - 1, u16::MAX, 0]);
        assert_eq!(h.sequence(), 1);
    }

    #[test]
    fn rewind_reissues_unsent_numbers() {
        let mut h = RtpHeader::new(96, 1);
        h.write(false, 0);
        h.write(false, 0);
        h.rewind(2);
        assert_eq!(h.sequence(), 0);
        h.rewind(1);
        assert_eq!(h.sequence(), u16::MAX);
    }

    #[test]
    fn payload_type_is_seven_bits() {
        let mut h = RtpHeader::new(0xE0, 1);
        assert_eq!(h.payload_type(), 0x60);
        assert_eq!(h.write(false, 0)[1], 0x60);
    }

    #[test]
    fn parse_rejects_short_or_foreign_packets() {
        assert!(RtpPacketInfo::parse(&[0x80; 11]).is_none());
        assert!(RtpPacketInfo::parse(&[0x40; 12]).is_none());
    }

    #[test]
    fn random_ssrcs_differ() {
        let a = RtpHeader::with_random_ssrc(96);
        let b = RtpHeader::with_random_ssrc(96);
        assert_ne!(a.ssrc(), b.ssrc());
    }
}
