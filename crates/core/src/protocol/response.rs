use std::fmt;

use crate::error::RtspError;

/// Identifies the server in every response (RFC 2326 §12.36).
pub const SERVER_AGENT: &str = concat!("livecast/", env!("CARGO_PKG_VERSION"));

/// An RTSP response under construction.
///
/// Built by chaining [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body); [`serialize`](Self::serialize) (or
/// `Display`) produces the wire text with `Content-Length` filled in.
#[must_use]
#[derive(Debug)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &'static str) -> Self {
        RtspResponse {
            status_code,
            status_text,
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// Status response for a request that failed with `err`.
    pub fn from_error(err: &RtspError) -> Self {
        let (code, reason) = err.status();
        Self::new(code, reason)
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// First header named `name`, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find_map(|(key, value)| key.eq_ignore_ascii_case(name).then_some(value.as_str()))
    }

    pub fn serialize(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RtspResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RTSP/1.0 {} {}\r\n", self.status_code, self.status_text)?;
        for (name, value) in &self.headers {
            write!(f, "{}: {}\r\n", name, value)?;
        }
        match &self.body {
            Some(body) => write!(f, "Content-Length: {}\r\n\r\n{}", body.len(), body),
            None => f.write_str("\r\n"),
        }
    }
}
