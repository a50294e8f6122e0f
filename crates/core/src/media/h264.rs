use super::Packetizer;
use super::clock::VIDEO_CLOCK_RATE;
use super::parameter_sets::ParameterSets;
use super::rtp::{RTP_HEADER_LEN, RtpHeader};

/// Default payload budget per RTP packet (header excluded).
pub const DEFAULT_MTU: usize = 1400;

pub const NAL_TYPE_IDR: u8 = 5;
pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_FU_A: u8 = 28;

/// FU indicator plus FU header.
const FU_A_OVERHEAD: usize = 2;
const FU_START: u8 = 0x80;
const FU_END: u8 = 0x40;

/// NAL unit type from the first header byte, `None` for an empty slice.
pub fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1f)
}

/// Split an Annex B byte stream into NAL units.
///
/// Recognizes both `00 00 01` and `00 00 00 01` start codes. Bytes before
/// the first start code are ignored, and trailing zero bytes are trimmed
/// from every unit.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut zeros = 0usize;
    for (i, &byte) in data.iter().enumerate() {
        match byte {
            0 => zeros += 1,
            1 if zeros >= 2 => {
                starts.push(i + 1);
                zeros = 0;
            }
            _ => zeros = 0,
        }
    }

    starts
        .iter()
        .enumerate()
        .filter_map(|(n, &start)| {
            let end = starts.get(n + 1).map_or(data.len(), |&next| next - 3);
            let unit = data.get(start..end)?;
            let len = unit.iter().rposition(|&b| b != 0)? + 1;
            Some(&unit[..len])
        })
        .collect()
}

/// H.264 RTP packetizer (RFC 6184), packetization-mode 1.
///
/// NAL units up to `mtu` bytes travel as Single NAL Unit packets (§5.6).
/// Larger ones are split into FU-A fragments (§5.8), each carrying
///
/// ```text
/// FU indicator: [F|NRI|28]   FU header: [S|E|R|type]   fragment bytes
/// ```
///
/// with the original NAL header byte rebuilt by the receiver from those two.
///
/// Sequence number and SSRC live in the caller's [`RtpHeader`], so one
/// packetizer serves every session.
#[derive(Debug, Clone)]
pub struct H264Packetizer {
    payload_type: u8,
    mtu: usize,
}

impl H264Packetizer {
    pub fn new(payload_type: u8) -> Self {
        Self::with_mtu(payload_type, DEFAULT_MTU)
    }

    pub fn with_mtu(payload_type: u8, mtu: usize) -> Self {
        Self {
            payload_type,
            // Room for the FU-A header bytes plus one byte of payload.
            mtu: mtu.max(FU_A_OVERHEAD + 1),
        }
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }
}

fn rtp_packet(header: [u8; RTP_HEADER_LEN], prefix: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(RTP_HEADER_LEN + prefix.len() + payload.len());
    packet.extend_from_slice(&header);
    packet.extend_from_slice(prefix);
    packet.extend_from_slice(payload);
    packet
}

impl Packetizer for H264Packetizer {
    fn packetize(
        &self,
        nal_unit: &[u8],
        end_of_access_unit: bool,
        header: &mut RtpHeader,
        timestamp: u32,
    ) -> Vec<Vec<u8>> {
        let Some((&nal_header, body)) = nal_unit.split_first() else {
            return Vec::new();
        };

        if nal_unit.len() <= self.mtu {
            let rtp = header.write(end_of_access_unit, timestamp);
            return vec![rtp_packet(rtp, &[], nal_unit)];
        }

        // F and NRI carry over into the indicator.
        let indicator = (nal_header & 0xe0) | NAL_TYPE_FU_A;
        let kind = nal_header & 0x1f;
        let fragments: Vec<&[u8]> = body.chunks(self.mtu - FU_A_OVERHEAD).collect();
        let last = fragments.len() - 1;

        let packets: Vec<Vec<u8>> = fragments
            .iter()
            .enumerate()
            .map(|(i, fragment)| {
                let mut fu_header = kind;
                if i == 0 {
                    fu_header |= FU_START;
                }
                if i == last {
                    fu_header |= FU_END;
                }
                let rtp = header.write(end_of_access_unit && i == last, timestamp);
                rtp_packet(rtp, &[indicator, fu_header], fragment)
            })
            .collect();

        tracing::trace!(
            nal_type = kind,
            nal_size = nal_unit.len(),
            fragments = packets.len(),
            "FU-A fragmented NAL unit"
        );

        packets
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }

    fn clock_rate(&self) -> u32 {
        VIDEO_CLOCK_RATE as u32
    }

    fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// `a=rtpmap` first, since `a=fmtp` refers to its payload type
    /// (RFC 6184 §8.2.1).
    fn sdp_attributes(&self, parameter_sets: Option<&ParameterSets>) -> Vec<String> {
        let pt = self.payload_type;
        let mut fmtp = format!("a=fmtp:{} packetization-mode=1", pt);
        if let Some(sets) = parameter_sets {
            if let Some(profile) = sets.profile_level_id() {
                fmtp.push_str(";profile-level-id=");
                fmtp.push_str(&profile);
            }
            fmtp.push_str(";sprop-parameter-sets=");
            fmtp.push_str(&sets.sprop_parameter_sets());
        }

        vec![
            format!("a=rtpmap:{} {}/{}", pt, self.codec_name(), self.clock_rate()),
            fmtp,
            "a=control:track1".to_string(),
        ]
    }
}
