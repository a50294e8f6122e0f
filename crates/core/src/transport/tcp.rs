use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{ParseErrorKind, RtspError};
use crate::protocol::{MethodHandler, RtspRequest, RtspResponse};
use crate::server::StreamContext;

/// Upper bound on a request head; anything longer closes the connection.
const MAX_REQUEST_HEAD: usize = 16 * 1024;
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Accept control connections until `running` is cleared, one thread each.
///
/// The listener is non-blocking and polled so that
/// [`Server::stop`](crate::server::Server::stop) takes effect promptly.
pub fn accept_loop(listener: TcpListener, ctx: StreamContext, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
                continue;
            }
        };

        if let Err(e) = stream.set_nonblocking(false) {
            tracing::warn!(%peer, error = %e, "dropping connection");
            continue;
        }

        let ctx = ctx.clone();
        let running = running.clone();
        let spawned = thread::Builder::new()
            .name(format!("rtsp-{}", peer))
            .spawn(move || serve(stream, peer, ctx, &running));
        if let Err(e) = spawned {
            tracing::error!(%peer, error = %e, "failed to spawn connection thread");
        }
    }
    tracing::debug!("accept loop exited");
}

fn serve(stream: TcpStream, peer: SocketAddr, ctx: StreamContext, running: &AtomicBool) {
    tracing::info!(%peer, "client connected");

    let mut conn = match Connection::new(stream, peer, ctx.clone()) {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "could not set up connection");
            return;
        }
    };
    let reason = conn.run(running);
    conn.release_sessions(&ctx);

    tracing::info!(%peer, reason, "client disconnected");
}

enum Incoming {
    Request(String),
    /// A complete head that is not valid UTF-8.
    NotUtf8(Vec<u8>),
    Closed,
    Oversized,
}

/// Read one request head (through the blank line that ends it).
///
/// No single read may take the head past [`MAX_REQUEST_HEAD`], so a line
/// without a newline cannot grow the buffer unbounded. A body announced by
/// `Content-Length` is read and discarded.
fn read_head(reader: &mut impl BufRead) -> io::Result<Incoming> {
    let mut head = Vec::new();
    loop {
        let budget = (MAX_REQUEST_HEAD + 1 - head.len()) as u64;
        let read = reader.by_ref().take(budget).read_until(b'\n', &mut head)?;
        if read == 0 {
            return Ok(Incoming::Closed);
        }
        if head.len() > MAX_REQUEST_HEAD {
            return Ok(Incoming::Oversized);
        }
        if !head.ends_with(b"\n") {
            // EOF in the middle of a line.
            return Ok(Incoming::Closed);
        }
        // Bare CRLFs between requests are keepalive noise.
        if head.iter().all(u8::is_ascii_whitespace) {
            head.clear();
            continue;
        }
        if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
            break;
        }
    }

    let body_len = raw_header(&head, "Content-Length")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    if body_len > 0 {
        let skipped = io::copy(&mut reader.by_ref().take(body_len), &mut io::sink())?;
        if skipped < body_len {
            return Ok(Incoming::Closed);
        }
    }

    Ok(match String::from_utf8(head) {
        Ok(head) => Incoming::Request(head),
        Err(e) => Incoming::NotUtf8(e.into_bytes()),
    })
}

/// One RTSP control connection and the sessions it created.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    handler: MethodHandler,
    peer: SocketAddr,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr, ctx: StreamContext) -> io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
            handler: MethodHandler::new(ctx, peer),
            peer,
        })
    }

    /// Answer requests until the peer leaves or the server stops.
    fn run(&mut self, running: &AtomicBool) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let response = match read_head(&mut self.reader) {
                Ok(Incoming::Request(head)) => self.respond(&head),
                Ok(Incoming::NotUtf8(raw)) => {
                    tracing::warn!(peer = %self.peer, "request is not valid UTF-8");
                    reject(
                        &raw,
                        &RtspError::Parse {
                            kind: ParseErrorKind::NotUtf8,
                        },
                    )
                }
                Ok(Incoming::Closed) => return "connection closed by client",
                Ok(Incoming::Oversized) => return "request head too large",
                Err(_) => return "read error",
            };
            tracing::debug!(peer = %self.peer, status = response.status_code, "response");

            if let Err(e) = self.writer.write_all(response.serialize().as_bytes()) {
                tracing::debug!(peer = %self.peer, error = %e, "write failed");
                return "write error";
            }
        }
        "server shutting down"
    }

    fn respond(&mut self, head: &str) -> RtspResponse {
        match RtspRequest::parse(head) {
            Ok(request) => {
                tracing::debug!(
                    peer = %self.peer,
                    method = %request.method,
                    uri = %request.uri,
                    cseq = request.cseq().unwrap_or("-"),
                    "request"
                );
                self.handler.handle(&request)
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "unparseable request");
                reject(head.as_bytes(), &e)
            }
        }
    }

    /// Tear down sessions owned by this connection and drop their quality profiles.
    fn release_sessions(&self, ctx: &StreamContext) {
        let owned = self.handler.session_ids();
        if owned.is_empty() {
            return;
        }
        for id in owned {
            ctx.quality.remove(id);
        }
        let removed = ctx.sessions.remove_sessions(owned);
        tracing::info!(peer = %self.peer, removed, "cleaned up sessions on disconnect");
    }
}

/// Error response for a head that never made it to a handler, echoing its CSeq if one is readable.
fn reject(raw: &[u8], error: &RtspError) -> RtspResponse {
    let cseq = raw_header(raw, "CSeq").unwrap_or("0");
    RtspResponse::from_error(error).add_header("CSeq", cseq)
}

/// Best-effort header lookup in an unparsed head. Lines that are not
/// valid UTF-8 are skipped.
fn raw_header<'a>(raw: &'a [u8], name: &str) -> Option<&'a str> {
    raw.split(|&b| b == b'\n')
        .skip(1)
        .filter_map(|line| std::str::from_utf8(line).ok())
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn heads(raw: &str) -> Vec<String> {
        let mut reader = Cursor::new(raw.as_bytes().to_vec());
        let mut out = Vec::new();
        while let Ok(Incoming::Request(head)) = read_head(&mut reader) {
            out.push(head);
        }
        out
    }

    #[test]
    fn pipelined_requests_are_split() {
        let got = heads(
            "OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n\r\nDESCRIBE rtsp://h/live RTSP/1.0\r\nCSeq: 2\r\n\r\n",
        );
        assert_eq!(got.len(), 2);
        assert!(got[0].starts_with("OPTIONS"));
        assert!(got[1].starts_with("DESCRIBE"));
    }

    #[test]
    fn truncated_head_reports_closed() {
        let mut reader = Cursor::new(b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n".to_vec());
        assert!(matches!(read_head(&mut reader), Ok(Incoming::Closed)));
    }

    #[test]
    fn oversized_head_is_refused() {
        let raw = format!("OPTIONS * RTSP/1.0\r\nX-Pad: {}\r\n\r\n", "a".repeat(MAX_REQUEST_HEAD));
        let mut reader = Cursor::new(raw.into_bytes());
        assert!(matches!(read_head(&mut reader), Ok(Incoming::Oversized)));
    }

    #[test]
    fn unterminated_line_stops_at_the_cap() {
        let mut reader = Cursor::new(vec![b'a'; 8 * 1024 * 1024]);
        assert!(matches!(read_head(&mut reader), Ok(Incoming::Oversized)));
        assert!(reader.position() <= MAX_REQUEST_HEAD as u64 + 1);
    }

    #[test]
    fn non_utf8_head_is_returned_for_rejection() {
        let mut raw = b"OPTIONS * RTSP/1.0\r\nCSeq: 5\r\nX-Junk: ".to_vec();
        raw.extend_from_slice(&[0xff, 0xfe]);
        raw.extend_from_slice(b"\r\n\r\nOPTIONS * RTSP/1.0\r\nCSeq: 6\r\n\r\n");
        let mut reader = Cursor::new(raw);

        let Ok(Incoming::NotUtf8(head)) = read_head(&mut reader) else {
            panic!("expected a non-UTF-8 head");
        };
        let response = reject(
            &head,
            &RtspError::Parse {
                kind: ParseErrorKind::NotUtf8,
            },
        );
        assert_eq!(response.status_code, 400);
        assert_eq!(response.header("CSeq"), Some("5"));

        // The stream stays usable for the next request.
        assert!(matches!(read_head(&mut reader), Ok(Incoming::Request(h)) if h.contains("CSeq: 6")));
    }

    #[test]
    fn request_body_is_skipped() {
        let got = heads(
            "GET_PARAMETER rtsp://h/live RTSP/1.0\r\nCSeq: 3\r\nContent-Length: 8\r\n\r\nposition\
             OPTIONS * RTSP/1.0\r\nCSeq: 4\r\n\r\n",
        );
        assert_eq!(got.len(), 2);
        assert!(got[0].starts_with("GET_PARAMETER"));
        assert!(got[1].starts_with("OPTIONS"));
    }

    #[test]
    fn truncated_body_reports_closed() {
        let mut reader = Cursor::new(
            b"SET_PARAMETER * RTSP/1.0\r\nContent-Length: 50\r\n\r\nshort".to_vec(),
        );
        assert!(matches!(read_head(&mut reader), Ok(Incoming::Closed)));
    }

    #[test]
    fn cseq_recovered_from_malformed_request() {
        assert_eq!(raw_header(b"BROKEN\r\nCSeq: 12\r\n\r\n", "CSeq"), Some("12"));
        assert_eq!(raw_header(b"BROKEN\r\n\r\n", "CSeq"), None);
    }
}
