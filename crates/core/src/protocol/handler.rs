use std::net::SocketAddr;

use crate::error::{Result, RtspError};
use crate::protocol::request::{Method, RtspRequest};
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp;
use crate::server::StreamContext;
use crate::session::{Session, Transport, TransportHeader};

/// Handles RTSP method requests for a single TCP connection.
///
/// Tracks which sessions were created on this connection so they
/// can be cleaned up when the connection drops.
pub struct MethodHandler {
    ctx: StreamContext,
    client_addr: SocketAddr,
    /// Session IDs created during this connection, for cleanup on disconnect.
    session_ids: Vec<String>,
}

impl MethodHandler {
    pub fn new(ctx: StreamContext, client_addr: SocketAddr) -> Self {
        MethodHandler {
            ctx,
            client_addr,
            session_ids: Vec::new(),
        }
    }

    /// Returns session IDs owned by this connection (for cleanup on disconnect).
    pub fn session_ids(&self) -> &[String] {
        &self.session_ids
    }

    /// Answer one request. Errors become status responses; every response
    /// echoes `CSeq`.
    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0");

        let result = match &request.method {
            Method::Options => Ok(self.handle_options()),
            Method::Describe => self.handle_describe(request),
            Method::Setup => self.handle_setup(request),
            Method::Play => self.handle_play(request),
            Method::Pause => self.handle_pause(request),
            Method::Teardown => self.handle_teardown(request),
            Method::GetParameter => Ok(self.handle_get_parameter(request)),
            Method::Other(method) => {
                tracing::warn!(%method, %cseq, "unsupported RTSP method");
                Ok(RtspResponse::new(405, "Method Not Allowed")
                    .add_header("Allow", &Method::supported_list()))
            }
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(method = %request.method, %cseq, error = %e, "request rejected");
                let mut response = RtspResponse::from_error(&e);
                if let Some(id) = request.session_id()
                    && self.ctx.sessions.get_session(id).is_some()
                {
                    response = response.add_header("Session", id);
                }
                response
            }
        };

        response.add_header("CSeq", cseq)
    }

    fn handle_options(&self) -> RtspResponse {
        tracing::debug!("OPTIONS");
        RtspResponse::ok().add_header("Public", &Method::supported_list())
    }

    /// Parses host from an RTSP URI (e.g. rtsp://host:8554/path -> host). Falls back to client IP if invalid.
    fn host_from_uri_or_client(&self, uri: &str) -> String {
        if let Some(host) = &self.ctx.config.public_host {
            return host.clone();
        }

        if let Some(after_scheme) = uri
            .strip_prefix("rtsp://")
            .or_else(|| uri.strip_prefix("rtsps://"))
        {
            let authority = after_scheme.split('/').next().unwrap_or("");
            let host = match authority.strip_prefix('[') {
                // [v6addr]:port
                Some(rest) => rest.split(']').next().unwrap_or(""),
                None => authority.split(':').next().unwrap_or(""),
            }
            .trim();
            if !host.is_empty() {
                return host.to_string();
            }
        }
        self.client_addr.ip().to_string()
    }

    fn handle_describe(&self, request: &RtspRequest) -> Result<RtspResponse> {
        tracing::debug!(uri = %request.uri, "DESCRIBE");

        let timeout = self.ctx.config.describe_timeout();
        let parameter_sets = self
            .ctx
            .parameter_sets
            .wait(timeout)
            .ok_or(RtspError::EncoderUnavailable(timeout))?;

        let host = self.host_from_uri_or_client(&request.uri);
        let sdp = sdp::generate_sdp(
            self.ctx.packetizer.as_ref(),
            &parameter_sets,
            &host,
            &self.ctx.config,
        );

        Ok(RtspResponse::ok()
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &request.uri)
            .with_body(sdp))
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        if let Some(id) = request.session_id() {
            // Aggregate control is not offered, so a session never needs a second SETUP.
            let session = self.lookup(id)?;
            return Err(RtspError::InvalidState {
                method: "SETUP",
                state: session.state(),
            });
        }

        let transport_header = request
            .get_header("Transport")
            .ok_or(RtspError::MissingHeader("Transport"))?;
        let requested = TransportHeader::parse(transport_header)?;

        let transport = Transport::negotiate(self.client_addr.ip(), &requested).map_err(|e| {
            tracing::error!(error = %e, "failed to allocate session sockets");
            e
        })?;

        let session = self
            .ctx
            .sessions
            .create_session(&request.uri, self.client_addr);
        let transport_response = transport.header_value();
        let client_rtp = transport.client_rtp;
        let server_rtp_port = transport.server_rtp_port();

        if let Err(e) = session.setup(transport) {
            self.ctx.sessions.remove_session(&session.id);
            return Err(e);
        }
        self.session_ids.push(session.id.clone());

        tracing::info!(
            session_id = %session.id,
            uri = %request.uri,
            %client_rtp,
            server_rtp_port,
            "session created via SETUP"
        );

        Ok(RtspResponse::ok()
            .add_header("Transport", &transport_response)
            .add_header("Session", &session.session_header_value()))
    }

    fn handle_play(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        let session = self.session_for(request)?;
        session.play()?;
        tracing::info!(session_id = %session.id, "session started playing");

        let rtp_info = format!(
            "url={};seq={};rtptime={}",
            session.uri,
            session.next_sequence(),
            self.ctx.clock.current_timestamp()
        );

        Ok(RtspResponse::ok()
            .add_header("Session", &session.session_header_value())
            .add_header("Range", "npt=0.000-")
            .add_header("RTP-Info", &rtp_info))
    }

    fn handle_pause(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        let session = self.session_for(request)?;
        session.pause()?;
        tracing::info!(session_id = %session.id, "session paused");
        Ok(RtspResponse::ok().add_header("Session", &session.session_header_value()))
    }

    fn handle_teardown(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        let id = request
            .session_id()
            .ok_or(RtspError::MissingHeader("Session"))?;
        self.ctx
            .sessions
            .remove_session(id)
            .ok_or_else(|| RtspError::SessionNotFound(id.to_string()))?;
        self.ctx.quality.remove(id);
        self.session_ids.retain(|owned| owned != id);
        tracing::info!(session_id = %id, "session terminated via TEARDOWN");
        Ok(RtspResponse::ok().add_header("Session", id))
    }

    /// GET_PARAMETER is used by clients (e.g. VLC) as a keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&self, request: &RtspRequest) -> RtspResponse {
        tracing::trace!("GET_PARAMETER keepalive");

        let mut resp = RtspResponse::ok();
        if let Some(id) = request.session_id()
            && self.ctx.sessions.get_session(id).is_some()
        {
            resp = resp.add_header("Session", id);
        }
        resp
    }

    fn session_for(&self, request: &RtspRequest) -> Result<std::sync::Arc<Session>> {
        let id = request
            .session_id()
            .ok_or(RtspError::MissingHeader("Session"))?;
        self.lookup(id)
    }

    fn lookup(&self, id: &str) -> Result<std::sync::Arc<Session>> {
        self.ctx
            .sessions
            .get_session(id)
            .ok_or_else(|| RtspError::SessionNotFound(id.to_string()))
    }
}
