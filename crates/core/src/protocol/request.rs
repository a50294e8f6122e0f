use std::fmt;

use crate::error::{ParseErrorKind, Result, RtspError};

/// RTSP request method. Anything the server does not route is kept
/// verbatim in [`Method::Other`] so it can be answered with 405.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Pause,
    Teardown,
    GetParameter,
    Other(String),
}

impl Method {
    /// Every method the server answers, in `Public`/`Allow` order.
    pub const SUPPORTED: [Method; 7] = [
        Method::Options,
        Method::Describe,
        Method::Setup,
        Method::Play,
        Method::Pause,
        Method::Teardown,
        Method::GetParameter,
    ];

    fn from_token(token: &str) -> Self {
        // Method names are case-sensitive (RFC 2326 §6.1).
        match token {
            "OPTIONS" => Self::Options,
            "DESCRIBE" => Self::Describe,
            "SETUP" => Self::Setup,
            "PLAY" => Self::Play,
            "PAUSE" => Self::Pause,
            "TEARDOWN" => Self::Teardown,
            "GET_PARAMETER" => Self::GetParameter,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
            Self::GetParameter => "GET_PARAMETER",
            Self::Other(token) => token,
        }
    }

    /// Comma separated list for `Public` and `Allow` headers.
    pub fn supported_list() -> String {
        Self::SUPPORTED
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed RTSP request head: request line and headers (RFC 2326 §6).
///
/// None of the routed methods carry a body, so the body is never read.
#[derive(Debug)]
pub struct RtspRequest {
    pub method: Method,
    pub uri: String,
    pub version: String,
    /// Headers in arrival order; see [`get_header`](Self::get_header).
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    /// Parse a request head terminated by an empty line.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines().skip_while(|l| l.trim().is_empty());

        let request_line = lines
            .next()
            .ok_or_else(|| parse_error(ParseErrorKind::EmptyRequest))?;

        let mut tokens = request_line.split_whitespace();
        let (Some(method), Some(uri), Some(version), None) =
            (tokens.next(), tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(parse_error(ParseErrorKind::InvalidRequestLine));
        };

        if !version.starts_with("RTSP/") {
            return Err(parse_error(ParseErrorKind::InvalidRequestLine));
        }
        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let headers = lines
            .take_while(|line| !line.is_empty())
            .map(|line| {
                line.split_once(':')
                    .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                    .ok_or_else(|| parse_error(ParseErrorKind::InvalidHeader))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RtspRequest {
            method: Method::from_token(method),
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// Header value by name, ignoring case (RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find_map(|(key, value)| key.eq_ignore_ascii_case(name).then_some(value.as_str()))
    }

    /// `CSeq` value, echoed verbatim in the response (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Session ID from the `Session` header, without any `;timeout=` suffix.
    pub fn session_id(&self) -> Option<&str> {
        let value = self.get_header("Session")?;
        let id = value.split(';').next().unwrap_or(value).trim();
        (!id.is_empty()).then_some(id)
    }
}

fn parse_error(kind: ParseErrorKind) -> RtspError {
    RtspError::Parse { kind }
}
