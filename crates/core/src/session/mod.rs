//! RTSP session management (RFC 2326 §3, §12.37).
//!
//! A session is created by the first SETUP on a control connection and
//! destroyed by TEARDOWN or by the connection closing. It tracks:
//!
//! - An opaque session ID (hex string, returned in the `Session` header).
//! - The playback state.
//! - The UDP sockets and client ports negotiated during SETUP.
//! - Its own RTP sequence counter and SSRC, fixed for the session's lifetime.
//!
//! ## Session lifecycle
//!
//! ```text
//! (created)        -> Init
//! SETUP            -> Ready     (from Init)
//! PLAY             -> Playing   (from Ready)
//! PAUSE            -> Ready     (from Playing)
//! TEARDOWN         -> (removed, sockets closed)   from any state
//! TCP disconnect   -> (removed, via cleanup)
//! ```

pub mod transport;

use parking_lot::{Mutex, MutexGuard, RwLock};
use rand::RngExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::{Result, RtspError};
use crate::media::rtp::RtpHeader;
pub use transport::{Transport, TransportHeader};

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// RTSP session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered, no transport negotiated yet.
    Init,
    /// Transport negotiated; not receiving media.
    Ready,
    /// Receiving RTP fan-out.
    Playing,
}

/// A single RTSP session.
///
/// Holds only its own state: transport, counters and SSRC. Interior
/// mutability lets the control handler and the RTP fan-out share it.
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier (16-char hex string).
    pub id: String,
    /// The RTSP URI this session was created for (from the SETUP request).
    pub uri: String,
    /// Peer address of the control connection that owns this session.
    pub peer: SocketAddr,
    state: RwLock<SessionState>,
    transport: RwLock<Option<Transport>>,
    rtp: Mutex<RtpHeader>,
    /// Copy of the header's SSRC, readable without taking `rtp`.
    ssrc: u32,
    timeout_secs: u64,
}

impl Session {
    fn new(id: String, uri: &str, peer: SocketAddr, payload_type: u8, timeout_secs: u64) -> Self {
        let header = RtpHeader::with_random_ssrc(payload_type);
        Session {
            id,
            uri: uri.to_string(),
            peer,
            state: RwLock::new(SessionState::Init),
            transport: RwLock::new(None),
            ssrc: header.ssrc(),
            rtp: Mutex::new(header),
            timeout_secs,
        }
    }

    /// Returns the current playback state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether this session is actively receiving media.
    pub fn is_playing(&self) -> bool {
        *self.state.read() == SessionState::Playing
    }

    /// INIT → READY, installing the negotiated transport.
    pub fn setup(&self, transport: Transport) -> Result<()> {
        let mut state = self.state.write();
        if *state != SessionState::Init {
            return Err(RtspError::InvalidState {
                method: "SETUP",
                state: *state,
            });
        }
        tracing::debug!(session_id = %self.id, client_rtp = %transport.client_rtp, "transport configured");
        *self.transport.write() = Some(transport);
        *state = SessionState::Ready;
        tracing::debug!(session_id = %self.id, old_state = ?SessionState::Init, new_state = ?SessionState::Ready, "state transition");
        Ok(())
    }

    /// READY → PLAYING.
    pub fn play(&self) -> Result<()> {
        self.advance("PLAY", SessionState::Ready, SessionState::Playing)
    }

    /// PLAYING → READY. Sockets stay open.
    pub fn pause(&self) -> Result<()> {
        self.advance("PAUSE", SessionState::Playing, SessionState::Ready)
    }

    fn advance(&self, method: &'static str, from: SessionState, to: SessionState) -> Result<()> {
        let mut state = self.state.write();
        if *state != from {
            return Err(RtspError::InvalidState {
                method,
                state: *state,
            });
        }
        *state = to;
        tracing::debug!(session_id = %self.id, old_state = ?from, new_state = ?to, "state transition");
        Ok(())
    }

    /// Close the session's sockets. Further fan-out to it is a no-op.
    pub fn close(&self) {
        let transport = self.transport.write().take();
        if transport.is_some() {
            tracing::debug!(session_id = %self.id, "session sockets closed");
        }
    }

    /// Run `f` with the negotiated transport, if any.
    pub fn with_transport<T>(&self, f: impl FnOnce(&Transport) -> T) -> Option<T> {
        self.transport.read().as_ref().map(f)
    }

    /// Lock this session's RTP header state.
    ///
    /// Holding the guard for a whole access unit keeps the session's
    /// sequence numbers in send order. The fan-out takes this lock before
    /// the transport lock; nothing may take them the other way round.
    pub fn rtp_header(&self) -> MutexGuard<'_, RtpHeader> {
        self.rtp.lock()
    }

    /// Lock-free: safe to call while holding the transport or RTP lock.
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn next_sequence(&self) -> u16 {
        self.rtp.lock().sequence()
    }

    /// Format the `Session` response header value per RFC 2326 §12.37.
    ///
    /// Example: `"3F2A9C0D11E4B7A0;timeout=60"`
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout_secs)
    }
}

/// Thread-safe registry of active sessions.
///
/// Backed by `parking_lot::RwLock`: lookups happen on every RTP delivery
/// cycle, so read performance matters. Owned by the [`Server`](crate::Server)
/// and handed by clone to each connection handler and to the fan-out.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    payload_type: u8,
    timeout_secs: u64,
}

impl SessionManager {
    pub fn new(payload_type: u8, timeout_secs: u64) -> Self {
        SessionManager {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            payload_type,
            timeout_secs,
        }
    }

    /// Create a new session in the `Init` state and register it.
    pub fn create_session(&self, uri: &str, peer: SocketAddr) -> Arc<Session> {
        let mut sessions = self.sessions.write();
        let id = loop {
            let candidate = format!("{:016X}", rand::rng().random::<u64>());
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let session = Arc::new(Session::new(
            id.clone(),
            uri,
            peer,
            self.payload_type,
            self.timeout_secs,
        ));
        sessions.insert(id.clone(), session.clone());

        tracing::debug!(session_id = %id, uri, %peer, total_sessions = sessions.len(), "session created");

        session
    }

    /// Look up a session by ID.
    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove a session and close its sockets (used by TEARDOWN).
    pub fn remove_session(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(id);
        if let Some(session) = &removed {
            session.close();
            tracing::debug!(session_id = %id, total_sessions = self.len(), "session removed");
        }
        removed
    }

    /// Remove multiple sessions at once (used during TCP disconnect cleanup).
    pub fn remove_sessions(&self, ids: &[String]) -> usize {
        let removed: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for session in &removed {
            session.close();
        }
        if !removed.is_empty() {
            tracing::debug!(removed = removed.len(), remaining = self.len(), "batch session cleanup");
        }
        removed.len()
    }

    /// Returns all sessions currently in the [`SessionState::Playing`] state.
    pub fn get_playing_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_playing())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(96, DEFAULT_SESSION_TIMEOUT_SECS)
    }
}
