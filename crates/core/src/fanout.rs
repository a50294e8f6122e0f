//! RTP fan-out: one encoded access unit in, packets out to every PLAYING session.
//!
//! Runs synchronously on the caller's thread (the encoder's output-drain
//! path). The session set is snapshotted once per access unit, so the
//! registry lock is never held while sending.
//!
//! Delivery is best-effort. A send failure is logged and ends delivery of
//! that access unit to that session only; nothing is retried or buffered.

use std::io;
use std::sync::Arc;

use crate::media::h264::{NAL_TYPE_SPS, nal_type, split_annex_b};
use crate::media::{MediaClock, Packetizer, ParameterSetStore};
use crate::session::{Session, SessionManager};

/// Outcome of one fan-out call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Sessions that were PLAYING when the access unit was sent.
    pub sessions: usize,
    /// Packets handed to the OS across all sessions.
    pub packets_sent: usize,
    /// Sessions for which at least one send failed.
    pub failed_sessions: usize,
    /// RTP timestamp stamped on this access unit.
    pub timestamp: u32,
}

/// Turns NAL units into RTP packets and sends them to every PLAYING session.
#[derive(Clone)]
pub struct RtpFanout {
    sessions: SessionManager,
    packetizer: Arc<dyn Packetizer>,
    clock: MediaClock,
    parameter_sets: ParameterSetStore,
}

impl RtpFanout {
    pub fn new(
        sessions: SessionManager,
        packetizer: Arc<dyn Packetizer>,
        clock: MediaClock,
        parameter_sets: ParameterSetStore,
    ) -> Self {
        Self {
            sessions,
            packetizer,
            clock,
            parameter_sets,
        }
    }

    pub fn clock(&self) -> &MediaClock {
        &self.clock
    }

    /// Send a single NAL unit as a complete access unit.
    ///
    /// Fits-in-one-packet NALs go out as one packet with the marker bit
    /// set; larger ones are FU-A fragmented with the marker on the last
    /// fragment only.
    pub fn send_nal_unit(&self, nal: &[u8], keyframe: bool) -> FanoutReport {
        self.deliver(&[nal], keyframe)
    }

    /// Send an Annex B access unit (one or more start-code delimited NALs).
    ///
    /// All NAL units share one timestamp; only the final packet carries
    /// the marker bit.
    pub fn send_access_unit(&self, annex_b: &[u8], keyframe: bool) -> FanoutReport {
        let nals = split_annex_b(annex_b);
        self.deliver(&nals, keyframe)
    }

    fn deliver(&self, nals: &[&[u8]], keyframe: bool) -> FanoutReport {
        let nals: Vec<&[u8]> = nals.iter().copied().filter(|n| !n.is_empty()).collect();
        if nals.is_empty() {
            return FanoutReport::default();
        }

        let mut carries_sps = false;
        for nal in &nals {
            if self.parameter_sets.observe(nal) && nal_type(nal) == Some(NAL_TYPE_SPS) {
                carries_sps = true;
            }
        }

        // Repeat SPS/PPS ahead of keyframes so late joiners can decode.
        let in_band = if keyframe && !carries_sps {
            self.parameter_sets.get()
        } else {
            None
        };
        let mut units: Vec<&[u8]> = Vec::with_capacity(nals.len() + 2);
        if let Some(sets) = &in_band {
            units.push(&sets.sps);
            units.push(&sets.pps);
        }
        units.extend(nals);

        let frame_index = self.clock.advance();
        let timestamp = self.clock.timestamp_for(frame_index);

        let playing = self.sessions.get_playing_sessions();
        let mut report = FanoutReport {
            sessions: playing.len(),
            timestamp,
            ..FanoutReport::default()
        };

        for session in &playing {
            match self.deliver_to(session, &units, timestamp) {
                Ok(sent) => report.packets_sent += sent,
                Err(e) => {
                    report.failed_sessions += 1;
                    tracing::warn!(session_id = %session.id, error = %e, "RTP send failed");
                }
            }
        }

        tracing::trace!(
            frame_index,
            timestamp,
            keyframe,
            nal_count = units.len(),
            sessions = report.sessions,
            packets = report.packets_sent,
            "access unit delivered"
        );

        report
    }

    fn deliver_to(&self, session: &Session, units: &[&[u8]], timestamp: u32) -> io::Result<usize> {
        let mut header = session.rtp_header();
        session
            .with_transport(|transport| -> io::Result<usize> {
                let mut sent = 0;
                for (i, nal) in units.iter().enumerate() {
                    let last = i + 1 == units.len();
                    let packets = self.packetizer.packetize(nal, last, &mut header, timestamp);
                    for (n, packet) in packets.iter().enumerate() {
                        if let Err(e) = transport.send_rtp(packet) {
                            // Unsent packets must not leave a gap in the sequence.
                            header.rewind((packets.len() - n) as u16);
                            return Err(e);
                        }
                        sent += 1;
                    }
                }
                Ok(sent)
            })
            // Torn down between the snapshot and now.
            .unwrap_or(Ok(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::h264::H264Packetizer;
    use crate::session::{Transport, TransportHeader};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
    use std::time::Duration;

    struct Viewer {
        socket: UdpSocket,
        session: Arc<Session>,
    }

    impl Viewer {
        fn recv(&self) -> Vec<u8> {
            let mut buf = [0u8; 2048];
            let n = self.socket.recv(&mut buf).unwrap();
            buf[..n].to_vec()
        }
    }

    fn fanout(mtu: usize) -> (RtpFanout, SessionManager, ParameterSetStore) {
        let sessions = SessionManager::default();
        let params = ParameterSetStore::new();
        let fanout = RtpFanout::new(
            sessions.clone(),
            Arc::new(H264Packetizer::with_mtu(96, mtu)),
            MediaClock::new(30),
            params.clone(),
        );
        (fanout, sessions, params)
    }

    /// A PLAYING session whose client address the OS refuses to send to.
    fn unreachable_viewer(sessions: &SessionManager) -> Arc<Session> {
        let broadcast = IpAddr::V4(Ipv4Addr::BROADCAST);
        let session = sessions.create_session("rtsp://h/stream", SocketAddr::new(broadcast, 1));
        let requested = TransportHeader {
            client_rtp_port: 9,
            client_rtcp_port: 10,
        };
        session
            .setup(Transport::negotiate(broadcast, &requested).unwrap())
            .unwrap();
        session.play().unwrap();
        session
    }

    fn viewer(sessions: &SessionManager, play: bool) -> Viewer {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let session = sessions.create_session("rtsp://h/stream", SocketAddr::new(localhost, 1));
        let requested = TransportHeader {
            client_rtp_port: port,
            client_rtcp_port: port + 1,
        };
        session
            .setup(Transport::negotiate(localhost, &requested).unwrap())
            .unwrap();
        if play {
            session.play().unwrap();
        }
        Viewer { socket, session }
    }

    fn seq(p: &[u8]) -> u16 {
        u16::from_be_bytes([p[2], p[3]])
    }

    fn ts(p: &[u8]) -> u32 {
        u32::from_be_bytes([p[4], p[5], p[6], p[7]])
    }

    #[test]
    fn only_playing_sessions_receive() {
        let (fanout, sessions, _) = fanout(1400);
        let watching = viewer(&sessions, true);
        let _idle = viewer(&sessions, false);

        let report = fanout.send_nal_unit(&[0x65, 1, 2, 3], true);
        assert_eq!(report.sessions, 1);
        assert_eq!(report.packets_sent, 1);
        assert_eq!(report.failed_sessions, 0);

        let packet = watching.recv();
        assert_eq!(&packet[12..], &[0x65, 1, 2, 3]);
        assert_eq!(packet[1] & 0x80, 0x80);
        let ssrc = u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]);
        assert_eq!(ssrc, watching.session.ssrc());
    }

    #[test]
    fn sequence_numbers_are_contiguous_per_session() {
        let (fanout, sessions, _) = fanout(100);
        let v = viewer(&sessions, true);

        let mut big = vec![0x41];
        big.extend(vec![0xAB; 450]);
        let r1 = fanout.send_nal_unit(&big, false);
        let r2 = fanout.send_nal_unit(&[0x41, 9], false);

        let total = r1.packets_sent + r2.packets_sent;
        let packets: Vec<Vec<u8>> = (0..total).map(|_| v.recv()).collect();
        for pair in packets.windows(2) {
            assert_eq!(seq(&pair[1]), seq(&pair[0]).wrapping_add(1));
        }
        assert_eq!(ts(&packets[0]), 0);
        assert_eq!(ts(packets.last().unwrap()), 3000);
    }

    #[test]
    fn access_unit_shares_timestamp_and_marks_last_packet() {
        let (fanout, sessions, params) = fanout(1400);
        let v = viewer(&sessions, true);

        let au = [
            &[0u8, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e][..],
            &[0, 0, 0, 1, 0x68, 0xce, 0x38, 0x80][..],
            &[0, 0, 1, 0x65, 0x88, 0x84][..],
        ]
        .concat();
        let report = fanout.send_access_unit(&au, true);
        assert_eq!(report.packets_sent, 3);
        assert!(params.get().is_some());

        let packets: Vec<Vec<u8>> = (0..3).map(|_| v.recv()).collect();
        assert!(packets.iter().all(|p| ts(p) == ts(&packets[0])));
        assert_eq!(packets[0][1] & 0x80, 0);
        assert_eq!(packets[1][1] & 0x80, 0);
        assert_eq!(packets[2][1] & 0x80, 0x80);
    }

    #[test]
    fn keyframe_repeats_known_parameter_sets() {
        let (fanout, sessions, params) = fanout(1400);
        params.publish(&[0x67, 0x42, 0x00, 0x1e], &[0x68, 0xce]);
        let v = viewer(&sessions, true);

        let report = fanout.send_nal_unit(&[0x65, 0x88], true);
        assert_eq!(report.packets_sent, 3);
        assert_eq!(v.recv()[12], 0x67);
        assert_eq!(v.recv()[12], 0x68);
        let idr = v.recv();
        assert_eq!(idr[12], 0x65);
        assert_eq!(idr[1] & 0x80, 0x80);

        let report = fanout.send_nal_unit(&[0x41, 0x9a], false);
        assert_eq!(report.packets_sent, 1);
    }

    #[test]
    fn failing_session_does_not_block_the_others() {
        let (fanout, sessions, _) = fanout(1400);
        let broken = unreachable_viewer(&sessions);
        let healthy = viewer(&sessions, true);

        let report = fanout.send_nal_unit(&[0x65, 4, 5, 6], true);
        assert_eq!(report.sessions, 2);
        assert_eq!(report.failed_sessions, 1);
        assert_eq!(report.packets_sent, 1);
        assert_eq!(&healthy.recv()[12..], &[0x65, 4, 5, 6]);
        assert!(broken.is_playing());
    }

    #[test]
    fn failed_send_gives_back_sequence_numbers() {
        let (fanout, sessions, _) = fanout(100);
        let broken = unreachable_viewer(&sessions);

        let mut big = vec![0x41];
        big.extend(vec![0xCD; 450]);
        let report = fanout.send_nal_unit(&big, false);
        assert_eq!(report.failed_sessions, 1);
        assert_eq!(broken.next_sequence(), 0);
    }

    #[test]
    fn torn_down_session_is_skipped() {
        let (fanout, sessions, _) = fanout(1400);
        let v = viewer(&sessions, true);
        sessions.remove_session(&v.session.id);
        let report = fanout.send_nal_unit(&[0x41, 1], false);
        assert_eq!(report.sessions, 0);
        assert_eq!(report.packets_sent, 0);
    }

    #[test]
    fn empty_input_does_not_advance_clock() {
        let (fanout, _, _) = fanout(1400);
        assert_eq!(fanout.send_access_unit(&[], false), FanoutReport::default());
        assert_eq!(fanout.clock().frame_index(), 0);
    }
}
