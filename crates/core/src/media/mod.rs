//! Media codecs and RTP packetization.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded NAL unit is split into one or more RTP packets.
//! Every RTP packet carries a 12-byte fixed header ([`rtp::RtpHeader`])
//! containing:
//!
//! - **Sequence number** (16-bit, wrapping), per session.
//! - **Timestamp** (32-bit), 90 kHz clock derived from the frame index ([`clock`]).
//! - **SSRC** (32-bit), randomly chosen per session.
//! - **Marker bit**, set on the last packet of an access unit (frame).
//!
//! Codec configuration handed over by the encoder lives in [`parameter_sets`].

pub mod clock;
pub mod h264;
pub mod parameter_sets;
pub mod rtp;

use parameter_sets::ParameterSets;
use rtp::RtpHeader;

pub use clock::MediaClock;
pub use h264::H264Packetizer;
pub use parameter_sets::ParameterSetStore;

/// Codec-specific RTP packetizer.
///
/// Packetizers are stateless per call: the caller supplies the session's
/// [`RtpHeader`] (sequence + SSRC) and the frame's timestamp, so a single
/// packetizer instance can serve every session concurrently.
pub trait Packetizer: Send + Sync {
    /// Packetize one NAL unit into complete RTP packets
    /// (12-byte header followed by the codec payload).
    ///
    /// `end_of_access_unit` requests the marker bit on the final packet.
    fn packetize(
        &self,
        nal_unit: &[u8],
        end_of_access_unit: bool,
        header: &mut RtpHeader,
        timestamp: u32,
    ) -> Vec<Vec<u8>>;

    /// Codec name for the SDP `a=rtpmap` attribute (e.g. `"H264"`).
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number. Dynamic types use 96–127.
    fn payload_type(&self) -> u8;

    /// SDP media-level attribute lines, including the `a=` prefix.
    fn sdp_attributes(&self, parameter_sets: Option<&ParameterSets>) -> Vec<String>;
}
