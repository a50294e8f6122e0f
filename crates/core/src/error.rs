//! Error types for the streaming engine.

use std::fmt;
use std::time::Duration;

use crate::session::SessionState;

/// Errors raised while serving RTSP requests or delivering RTP.
///
/// Variants fall into two groups:
///
/// - **Protocol**: [`Parse`](Self::Parse), [`MissingHeader`](Self::MissingHeader),
///   [`InvalidTransport`](Self::InvalidTransport),
///   [`UnsupportedTransport`](Self::UnsupportedTransport),
///   [`SessionNotFound`](Self::SessionNotFound),
///   [`InvalidState`](Self::InvalidState) and
///   [`EncoderUnavailable`](Self::EncoderUnavailable). These resolve into an
///   RTSP status line via [`status`](Self::status); the control connection
///   stays open.
/// - **Transport / lifecycle**: [`Io`](Self::Io), [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// A header the method requires was absent.
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    /// The `Transport` header had no usable `client_port=RTP-RTCP` pair.
    #[error("malformed transport header: {0}")]
    InvalidTransport(String),

    /// The client asked for TCP-interleaved delivery.
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// No session with the given ID exists in the [`SessionManager`](crate::session::SessionManager).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The method is not allowed from the session's current state.
    #[error("{method} not valid in state {state:?}")]
    InvalidState {
        method: &'static str,
        state: SessionState,
    },

    /// Codec configuration (SPS/PPS) did not arrive within the DESCRIBE wait budget.
    #[error("encoder parameter sets not available after {0:?}")]
    EncoderUnavailable(Duration),

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

impl RtspError {
    /// RTSP status code and reason phrase reported for this error.
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            Self::Parse { .. } | Self::MissingHeader(_) | Self::InvalidTransport(_) => {
                (400, "Bad Request")
            }
            Self::SessionNotFound(_) => (454, "Session Not Found"),
            Self::InvalidState { .. } => (455, "Method Not Valid in This State"),
            Self::UnsupportedTransport(_) => (461, "Unsupported Transport"),
            Self::EncoderUnavailable(_) => (503, "Service Unavailable"),
            Self::Io(_) | Self::NotStarted | Self::AlreadyRunning => {
                (500, "Internal Server Error")
            }
        }
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// The request head was not valid UTF-8.
    NotUtf8,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::NotUtf8 => write!(f, "request is not valid UTF-8"),
        }
    }
}

/// Failure returned by the [`FrameBufferPool`](crate::pool::FrameBufferPool).
///
/// The caller is expected to skip the frame, not abort.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Allocation failed even after the pool was cleared and the request retried.
    #[error("frame buffer allocation of {bytes} bytes failed")]
    AllocationFailed { bytes: usize },
}

/// Errors raised while loading a [`Config`](crate::config::Config).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_map_to_client_statuses() {
        let err = RtspError::Parse {
            kind: ParseErrorKind::InvalidHeader,
        };
        assert_eq!(err.status().0, 400);
        assert_eq!(RtspError::SessionNotFound("x".into()).status().0, 454);
        assert_eq!(
            RtspError::InvalidState {
                method: "PLAY",
                state: SessionState::Init,
            }
            .status(),
            (455, "Method Not Valid in This State")
        );
        assert_eq!(
            RtspError::UnsupportedTransport("RTP/AVP/TCP".into())
                .status()
                .0,
            461
        );
    }

    #[test]
    fn encoder_unavailable_is_server_error() {
        let (code, _) = RtspError::EncoderUnavailable(Duration::from_millis(10)).status();
        assert!((500..600).contains(&code));
    }
}
