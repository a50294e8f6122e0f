//! Sockets. RTSP control runs over TCP ([`tcp`], one thread per
//! connection); RTP media goes out over a per-session UDP socket pair
//! ([`udp`]) bound at SETUP and closed at TEARDOWN or disconnect.

pub mod tcp;
pub mod udp;

pub use udp::UdpTransport;
