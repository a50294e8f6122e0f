use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::config::{Config, PoolConfig, QualityConfig, ServerConfig};
use crate::error::{Result, RtspError};
use crate::fanout::{FanoutReport, RtpFanout};
use crate::media::h264::H264Packetizer;
use crate::media::{MediaClock, Packetizer, ParameterSetStore};
use crate::pool::FrameBufferPool;
use crate::quality::QualityController;
use crate::session::SessionManager;
use crate::transport::tcp;

/// State shared between the control connections and the media path.
///
/// Cheap to clone; every field is reference counted.
#[derive(Clone)]
pub struct StreamContext {
    pub sessions: SessionManager,
    pub parameter_sets: ParameterSetStore,
    pub packetizer: Arc<dyn Packetizer>,
    pub clock: MediaClock,
    pub quality: Arc<QualityController>,
    pub config: Arc<ServerConfig>,
}

impl StreamContext {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_quality(config, QualityConfig::default())
    }

    pub fn with_quality(config: ServerConfig, quality: QualityConfig) -> Self {
        Self {
            sessions: SessionManager::new(config.payload_type, config.session_timeout_secs),
            parameter_sets: ParameterSetStore::new(),
            packetizer: Arc::new(H264Packetizer::with_mtu(config.payload_type, config.mtu)),
            clock: MediaClock::new(config.fps),
            quality: Arc::new(QualityController::new(quality)),
            config: Arc::new(config),
        }
    }

    pub fn fanout(&self) -> RtpFanout {
        RtpFanout::new(
            self.sessions.clone(),
            self.packetizer.clone(),
            self.clock.clone(),
            self.parameter_sets.clone(),
        )
    }
}

/// Live H.264 RTSP server.
///
/// Owns the session registry, codec-config store, quality controller and
/// the frame buffer pool shared with the capture path. Delegates TCP connection handling to [`transport::tcp`](crate::transport::tcp)
/// and RTP delivery to [`RtpFanout`].
pub struct Server {
    ctx: StreamContext,
    fanout: RtpFanout,
    frame_pool: Arc<FrameBufferPool>,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(ServerConfig {
            bind: bind_addr.to_string(),
            ..ServerConfig::default()
        })
    }

    /// Create a server with custom protocol/SDP configuration.
    pub fn with_config(config: ServerConfig) -> Self {
        Self::from_context(StreamContext::new(config), PoolConfig::default())
    }

    /// Create a server from a loaded [`Config`] file.
    pub fn from_config(config: &Config) -> Self {
        Self::from_context(
            StreamContext::with_quality(config.server.clone(), config.quality.clone()),
            config.pool.clone(),
        )
    }

    fn from_context(ctx: StreamContext, pool: PoolConfig) -> Self {
        Self {
            fanout: ctx.fanout(),
            frame_pool: Arc::new(FrameBufferPool::new(pool)),
            ctx,
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.ctx.config.bind)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let ctx = self.ctx.clone();

        tracing::info!(addr = %local_addr, fps = self.ctx.config.fps, "RTSP server listening");

        thread::spawn(move || {
            tcp::accept_loop(listener, ctx, running);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the RTSP listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Publish SPS/PPS from the encoder's output format, waking any
    /// DESCRIBE waiting for them.
    pub fn publish_parameter_sets(&self, sps: &[u8], pps: &[u8]) {
        self.ctx.parameter_sets.publish(sps, pps);
    }

    /// Send one encoded NAL unit (without start code) to every PLAYING viewer.
    pub fn send_nal_unit(&self, nal: &[u8], keyframe: bool) -> Result<FanoutReport> {
        if !self.is_running() {
            return Err(RtspError::NotStarted);
        }
        Ok(self.fanout.send_nal_unit(nal, keyframe))
    }

    /// Send one Annex B access unit to every PLAYING viewer.
    pub fn send_access_unit(&self, annex_b: &[u8], keyframe: bool) -> Result<FanoutReport> {
        if !self.is_running() {
            return Err(RtspError::NotStarted);
        }
        Ok(self.fanout.send_access_unit(annex_b, keyframe))
    }

    pub fn viewers(&self) -> Vec<Viewer> {
        self.ctx
            .sessions
            .get_playing_sessions()
            .iter()
            .filter_map(|session| {
                session.with_transport(|transport| Viewer {
                    session_id: session.id.clone(),
                    uri: session.uri.clone(),
                    client_rtp: transport.client_rtp,
                    client_rtcp: transport.client_rtcp,
                    ssrc: session.ssrc(),
                })
            })
            .collect()
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.ctx.sessions
    }

    pub fn quality(&self) -> &QualityController {
        &self.ctx.quality
    }

    pub fn fanout(&self) -> &RtpFanout {
        &self.fanout
    }

    /// Buffer pool for raw frames on their way to the encoder, sized by the
    /// `[pool]` config section. Clone the handle into capture threads.
    pub fn frame_pool(&self) -> Arc<FrameBufferPool> {
        self.frame_pool.clone()
    }

    /// Returns the server's protocol configuration.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.ctx.config.clone()
    }
}

/// Information about a connected viewer (client in PLAY state).
#[derive(Debug, Clone)]
pub struct Viewer {
    pub session_id: String,
    pub uri: String,
    pub client_rtp: SocketAddr,
    pub client_rtcp: SocketAddr,
    pub ssrc: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PixelFormat, ReleaseOutcome};

    #[test]
    fn send_requires_running_server() {
        let server = Server::new("127.0.0.1:0");
        assert!(matches!(
            server.send_nal_unit(&[0x65, 0x88], true),
            Err(RtspError::NotStarted)
        ));
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut server = Server::new("127.0.0.1:0");
        server.start().unwrap();
        assert!(server.local_addr().unwrap().port() != 0);
        assert!(matches!(server.start(), Err(RtspError::AlreadyRunning)));
        server.stop();
        assert!(!server.is_running());
    }

    #[test]
    fn running_server_without_viewers_sends_nothing() {
        let mut server = Server::new("127.0.0.1:0");
        server.start().unwrap();
        let report = server.send_nal_unit(&[0x65, 0x88, 0x84], true).unwrap();
        assert_eq!(report.sessions, 0);
        assert_eq!(report.packets_sent, 0);
        assert!(server.viewers().is_empty());
        server.stop();
    }

    #[test]
    fn from_config_applies_sections() {
        let config = Config::from_toml_str(
            "[server]\nbind = \"127.0.0.1:0\"\nfps = 25\n[quality]\ncontrol_interval_ms = 500\n\
             [pool]\nmax_bytes = 4096\n",
        )
        .unwrap();
        let server = Server::from_config(&config);
        assert_eq!(server.config().fps, 25);
        assert_eq!(server.fanout().clock().fps(), 25);
        assert_eq!(server.quality().config().control_interval_ms, 500);
        assert_eq!(server.frame_pool().stats().max_bytes, 4096);
    }

    #[test]
    fn frame_pool_respects_configured_byte_cap() {
        let config = Config::from_toml_str("[pool]\nmax_bytes = 300\n").unwrap();
        let pool = Server::from_config(&config).frame_pool();

        let small = pool.get(8, 8, PixelFormat::Rgba8888).unwrap();
        let large = pool.get(16, 16, PixelFormat::Rgba8888).unwrap();
        assert_eq!(pool.release(small), ReleaseOutcome::Pooled);
        assert_eq!(pool.release(large), ReleaseOutcome::Discarded);
        assert_eq!(pool.stats().resident_bytes, 256);
    }
}
