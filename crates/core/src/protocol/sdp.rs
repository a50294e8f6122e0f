//! Session description returned by DESCRIBE (RFC 8866, RFC 6184 §8.2).
//!
//! One live H.264 video track:
//!
//! ```text
//! v=0
//! o=- 0 0 IN IP4 192.168.1.10
//! s=Live
//! c=IN IP4 192.168.1.10
//! t=0 0
//! a=tool:livecast
//! a=sendonly
//! m=video 0 RTP/AVP 96
//! a=rtpmap:96 H264/90000
//! a=fmtp:96 packetization-mode=1;profile-level-id=42001e;sprop-parameter-sets=Z0IAHg==,aM44gA==
//! a=control:track1
//! ```

use std::fmt::Write;

use crate::config::ServerConfig;
use crate::media::Packetizer;
use crate::media::parameter_sets::ParameterSets;

/// Render the SDP body for `host`, which may be an IPv4 or IPv6 literal
/// or a hostname.
pub fn generate_sdp(
    packetizer: &dyn Packetizer,
    parameter_sets: &ParameterSets,
    host: &str,
    config: &ServerConfig,
) -> String {
    let family = if host.contains(':') { "IP6" } else { "IP4" };

    let mut lines = vec![
        "v=0".to_string(),
        format!(
            "o={} {} {} IN {} {}",
            config.sdp_username, config.sdp_session_id, config.sdp_session_version, family, host
        ),
        format!("s={}", config.sdp_session_name),
        format!("c=IN {} {}", family, host),
        "t=0 0".to_string(),
        "a=tool:livecast".to_string(),
        "a=sendonly".to_string(),
        format!("m=video 0 RTP/AVP {}", packetizer.payload_type()),
    ];
    lines.extend(packetizer.sdp_attributes(Some(parameter_sets)));

    let mut body = String::new();
    for line in &lines {
        // Writing to a String cannot fail.
        let _ = write!(body, "{}\r\n", line);
    }
    tracing::trace!(sdp = %body, "generated SDP");
    body
}
