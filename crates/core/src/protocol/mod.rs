//! RTSP/1.0 control plane (RFC 2326).
//!
//! A control connection moves each of its sessions through three states:
//!
//! ```text
//!          SETUP            PLAY
//!   Init ---------> Ready --------> Playing
//!                     ^                |
//!                     +----- PAUSE ----+
//!
//!   TEARDOWN (any state) removes the session.
//! ```
//!
//! | Method | Effect |
//! |--------|--------|
//! | OPTIONS | lists methods in `Public` |
//! | DESCRIBE | waits for SPS/PPS, returns SDP; 503 when the encoder never delivers them |
//! | SETUP | binds a UDP socket pair for the client's `client_port`; TCP interleaving gets 461 |
//! | PLAY / PAUSE | Ready to Playing and back; 455 from any other state |
//! | TEARDOWN | closes the sockets and drops the session |
//! | GET_PARAMETER | keepalive, no state change |
//!
//! Anything else is answered 405 with an `Allow` header. Every response
//! echoes the request's `CSeq`.

pub mod handler;
pub mod request;
pub mod response;
pub mod sdp;

pub use handler::MethodHandler;
pub use request::{Method, RtspRequest};
pub use response::RtspResponse;
