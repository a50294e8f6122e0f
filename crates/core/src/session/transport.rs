use std::io;
use std::net::{IpAddr, SocketAddr};

use crate::error::{Result, RtspError};
use crate::transport::UdpTransport;

/// Negotiated RTP/RTCP transport for a session (RFC 2326 §12.39).
///
/// Created during SETUP from the client's `Transport` header and the
/// pair of UDP sockets the server bound for this session.
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP;unicast;client_port=8000-8001
///
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=40112-40113
/// ```
#[derive(Debug)]
pub struct Transport {
    /// Where RTP packets go (`client_ip:client_rtp_port`).
    pub client_rtp: SocketAddr,
    /// Where RTCP would go (`client_ip:client_rtcp_port`).
    pub client_rtcp: SocketAddr,
    sockets: UdpTransport,
}

impl Transport {
    /// Bind server sockets for a client at `client_ip` that asked for `requested` ports.
    pub fn negotiate(client_ip: IpAddr, requested: &TransportHeader) -> Result<Self> {
        let sockets = UdpTransport::bind_pair(client_ip)?;
        Ok(Self {
            client_rtp: SocketAddr::new(client_ip, requested.client_rtp_port),
            client_rtcp: SocketAddr::new(client_ip, requested.client_rtcp_port),
            sockets,
        })
    }

    pub fn server_rtp_port(&self) -> u16 {
        self.sockets.rtp_port()
    }

    pub fn server_rtcp_port(&self) -> u16 {
        self.sockets.rtcp_port()
    }

    /// Send one RTP packet to the client's RTP port.
    pub fn send_rtp(&self, packet: &[u8]) -> io::Result<usize> {
        self.sockets.send_rtp(packet, self.client_rtp)
    }

    /// Value for the `Transport` response header.
    pub fn header_value(&self) -> String {
        format!(
            "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
            self.client_rtp.port(),
            self.client_rtcp.port(),
            self.server_rtp_port(),
            self.server_rtcp_port()
        )
    }
}

/// Client-side transport request from the RTSP `Transport` header.
///
/// Only `RTP/AVP` over UDP unicast is served. `RTP/AVP/TCP` and
/// `interleaved=` requests are refused with
/// [`RtspError::UnsupportedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    /// Client's requested RTP port.
    pub client_rtp_port: u16,
    /// Client's requested RTCP port.
    pub client_rtcp_port: u16,
}

impl TransportHeader {
    /// Parse the `Transport` header value (RFC 2326 §12.39).
    ///
    /// Looks for `client_port=RTP-RTCP` among semicolon-separated parameters.
    /// A lone `client_port=RTP` implies `RTCP = RTP + 1`.
    ///
    /// ```
    /// use livecast::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th.client_rtp_port, 8000);
    /// assert_eq!(th.client_rtcp_port, 8001);
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_err());
    /// assert!(TransportHeader::parse("RTP/AVP/TCP;interleaved=0-1").is_err());
    /// ```
    pub fn parse(header: &str) -> Result<Self> {
        // Clients may offer several alternatives separated by commas; take the first.
        let offer = header.split(',').next().unwrap_or(header).trim();

        if offer.contains("RTP/AVP/TCP") || offer.contains("interleaved=") {
            return Err(RtspError::UnsupportedTransport(offer.to_string()));
        }

        for part in offer.split(';') {
            let part = part.trim();
            if let Some(ports) = part.strip_prefix("client_port=") {
                return Self::parse_ports(ports)
                    .ok_or_else(|| RtspError::InvalidTransport(header.to_string()));
            }
        }

        Err(RtspError::InvalidTransport(header.to_string()))
    }

    fn parse_ports(ports: &str) -> Option<Self> {
        let (rtp, rtcp) = match ports.split_once('-') {
            Some((rtp, rtcp)) => {
                let rtp: u16 = rtp.trim().parse().ok()?;
                let rtcp: u16 = rtcp.trim().parse().ok()?;
                (rtp, rtcp)
            }
            None => {
                let rtp: u16 = ports.trim().parse().ok()?;
                (rtp, rtp.checked_add(1)?)
            }
        };

        if rtp == 0 || rtcp == 0 {
            return None;
        }

        Some(TransportHeader {
            client_rtp_port: rtp,
            client_rtcp_port: rtcp,
        })
    }
}
