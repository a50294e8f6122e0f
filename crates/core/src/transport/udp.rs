use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use crate::error::Result;

/// The pair of UDP sockets bound for one session (RTP, RTCP).
///
/// Both are ephemeral (`port 0`) on the wildcard address of the client's
/// address family. Dropping the value closes both sockets.
///
/// This layer is address-only: it does not know about sessions. The
/// caller passes the client address to [`send_rtp`](Self::send_rtp).
#[derive(Debug)]
pub struct UdpTransport {
    rtp: UdpSocket,
    rtcp: UdpSocket,
}

impl UdpTransport {
    /// Bind an RTP socket and an RTCP socket suitable for reaching `client_ip`.
    pub fn bind_pair(client_ip: IpAddr) -> Result<Self> {
        let wildcard = match client_ip {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let rtp = UdpSocket::bind(SocketAddr::new(wildcard, 0))?;
        let rtcp = UdpSocket::bind(SocketAddr::new(wildcard, 0))?;
        tracing::trace!(
            rtp_port = port_of(&rtp),
            rtcp_port = port_of(&rtcp),
            "bound session UDP sockets"
        );
        Ok(Self { rtp, rtcp })
    }

    pub fn rtp_port(&self) -> u16 {
        port_of(&self.rtp)
    }

    pub fn rtcp_port(&self) -> u16 {
        port_of(&self.rtcp)
    }

    /// Send one RTP packet from the RTP socket.
    pub fn send_rtp(&self, packet: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.rtp.send_to(packet, addr)
    }
}

fn port_of(socket: &UdpSocket) -> u16 {
    socket.local_addr().map(|a| a.port()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sends_from_rtp_socket() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let target = receiver.local_addr().unwrap();

        let pair = UdpTransport::bind_pair(target.ip()).unwrap();
        pair.send_rtp(b"rtp", target).unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"rtp");
        assert_eq!(from.port(), pair.rtp_port());
    }
}
