//! Incremental HTTP/1.1 request-line and header parsing.
//!
//! The reader operates one byte at a time against a non-blocking stream and
//! reports status rather than failing on partial input: a `WouldBlock`
//! mid-line is [`LineStatus::Incomplete`], an empty line is
//! [`LineStatus::Finished`] (end of headers), and EOF with nothing buffered
//! is [`LineStatus::PeerClosed`]. Only genuine I/O failures surface as
//! errors.
//!
//! Parsing is not resumable across readiness wakeups: a request's header
//! block must arrive within the drain of a single wakeup. Partial line data
//! discarded by an `Incomplete` is lost, and [`parse_request`] bounds
//! consecutive failed line reads before giving up on the request.

use std::io::{self, Read};

use bytes::{BufMut, BytesMut};
use tracing::warn;

use crate::error::ParseError;

/// Header line that marks a connection as reusable. Matched case-sensitively.
pub const KEEP_ALIVE_HEADER: &str = "Connection: keep-alive";

/// Bounds for request parsing.
#[derive(Debug, Clone)]
pub struct ParseLimits {
    /// Maximum length of a single header line, CRLF excluded.
    pub max_line: usize,
    /// Maximum length of the method token.
    pub max_method: usize,
    /// Maximum length of the URI token.
    pub max_uri: usize,
    /// Consecutive failed line reads tolerated before the parse aborts.
    pub max_line_errors: u32,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_line: 1024,
            max_method: 16,
            max_uri: 128,
            max_line_errors: 12,
        }
    }
}

/// Method and URI of a request, copied out of the socket buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMsg {
    /// Request method token (`GET`, `POST`, ...).
    pub method: String,
    /// Request URI as it appeared on the wire.
    pub uri: String,
}

/// Ordered collection of header lines.
///
/// Lines are stored in arrival order with the CRLF terminator stripped; the
/// response builder re-appends it when a `Headers` is used as extra response
/// headers.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    lines: Vec<String>,
}

impl Headers {
    /// Creates an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header line, stripping a trailing CRLF if present.
    pub fn push(&mut self, line: impl Into<String>) {
        let mut line = line.into();
        if line.ends_with("\r\n") {
            line.truncate(line.len() - 2);
        }
        self.lines.push(line);
    }

    /// Iterates header lines in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Number of header lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns true if no headers were collected.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Headers {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut headers = Self::new();
        for line in iter {
            headers.push(line);
        }
        headers
    }
}

/// Outcome of reading one line from a non-blocking stream.
#[derive(Debug, PartialEq, Eq)]
pub enum LineStatus {
    /// A complete line, CRLF stripped.
    Line(String),
    /// The socket would have blocked before a full line was seen.
    Incomplete,
    /// An empty line was read: end of headers.
    Finished,
    /// The line exceeded the length limit.
    Overflow,
    /// Zero-byte read with no partial data: the peer is gone.
    PeerClosed,
}

/// A fully parsed request: request line, headers, and the keep-alive flag.
#[derive(Debug)]
pub struct ParsedRequest {
    /// Method and URI from the request line.
    pub msg: HttpMsg,
    /// Header lines in arrival order.
    pub headers: Headers,
    /// True if any header contained [`KEEP_ALIVE_HEADER`].
    pub keep_alive: bool,
}

/// Reads one CRLF-terminated line, one byte at a time.
///
/// A line of exactly `max_line - 1` bytes is the longest that parses;
/// `max_line` bytes yields [`LineStatus::Overflow`]. EOF with partial data
/// buffered terminates the line early and returns it.
pub fn read_line<R: Read>(stream: &mut R, max_line: usize) -> io::Result<LineStatus> {
    let mut buf = BytesMut::with_capacity(max_line.min(256));
    let mut byte = [0u8; 1];
    let mut prev = 0u8;

    loop {
        match stream.read(&mut byte) {
            Ok(0) => {
                if buf.is_empty() {
                    return Ok(LineStatus::PeerClosed);
                }
                // EOF terminates the partial line
                return Ok(LineStatus::Line(line_string(&buf)));
            }
            Ok(_) => {
                let b = byte[0];
                if prev == b'\r' && b == b'\n' {
                    buf.truncate(buf.len() - 1); // drop the CR
                    if buf.is_empty() {
                        return Ok(LineStatus::Finished);
                    }
                    return Ok(LineStatus::Line(line_string(&buf)));
                }
                if buf.len() >= max_line {
                    return Ok(LineStatus::Overflow);
                }
                buf.put_u8(b);
                prev = b;
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(LineStatus::Incomplete);
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn line_string(buf: &BytesMut) -> String {
    String::from_utf8_lossy(buf).into_owned()
}

/// Splits a request line into method and URI.
///
/// The method is everything before the first space; runs of spaces are
/// skipped; the URI is everything up to the next space. Both tokens are
/// bounded copies.
pub fn parse_request_line(line: &str, limits: &ParseLimits) -> Result<HttpMsg, ParseError> {
    let (method, rest) = line
        .split_once(' ')
        .ok_or(ParseError::MalformedRequestLine)?;
    if method.is_empty() {
        return Err(ParseError::MalformedRequestLine);
    }
    if method.len() > limits.max_method {
        return Err(ParseError::FieldTooLong);
    }

    let rest = rest.trim_start_matches(' ');
    let (uri, _) = rest.split_once(' ').ok_or(ParseError::MalformedRequestLine)?;
    if uri.is_empty() {
        return Err(ParseError::MalformedRequestLine);
    }
    if uri.len() > limits.max_uri {
        return Err(ParseError::FieldTooLong);
    }

    Ok(HttpMsg {
        method: method.to_owned(),
        uri: uri.to_owned(),
    })
}

/// Parses a full request: request line, then header lines until the empty
/// line.
///
/// Any failure on the request line aborts the request. In the header loop,
/// non-fatal outcomes (`Incomplete`, `Overflow`, transient read errors) are
/// tolerated up to `limits.max_line_errors` consecutive occurrences, which
/// bounds pathological clients without looping forever. EOF mid-headers
/// aborts with [`ParseError::PeerClosed`].
pub fn parse_request<R: Read>(
    stream: &mut R,
    limits: &ParseLimits,
) -> Result<ParsedRequest, ParseError> {
    let msg = match read_line(stream, limits.max_line)? {
        LineStatus::Line(line) => parse_request_line(&line, limits)?,
        LineStatus::Finished => return Err(ParseError::MalformedRequestLine),
        LineStatus::Incomplete => return Err(ParseError::Incomplete),
        LineStatus::Overflow => return Err(ParseError::LineOverflow(limits.max_line)),
        LineStatus::PeerClosed => return Err(ParseError::PeerClosed),
    };

    let mut headers = Headers::new();
    let mut keep_alive = false;
    let mut error_count = 0u32;

    loop {
        if error_count >= limits.max_line_errors {
            return Err(ParseError::TooManyLineErrors(limits.max_line_errors));
        }

        match read_line(stream, limits.max_line) {
            Ok(LineStatus::Finished) => break,
            Ok(LineStatus::Line(line)) => {
                if line.contains(KEEP_ALIVE_HEADER) {
                    keep_alive = true;
                }
                headers.push(line);
                error_count = 0;
            }
            Ok(LineStatus::PeerClosed) => return Err(ParseError::PeerClosed),
            Ok(LineStatus::Incomplete | LineStatus::Overflow) => {
                error_count += 1;
            }
            Err(e) => {
                warn!("header line read error: {e}");
                error_count += 1;
            }
        }
    }

    Ok(ParsedRequest {
        msg,
        headers,
        keep_alive,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that always reports `WouldBlock`.
    struct Blocked;

    impl Read for Blocked {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "would block"))
        }
    }

    fn limits() -> ParseLimits {
        ParseLimits::default()
    }

    #[test]
    fn read_line_strips_crlf() {
        let mut stream = Cursor::new(b"Host: x\r\n".to_vec());
        let status = read_line(&mut stream, 1024).unwrap();
        assert_eq!(status, LineStatus::Line("Host: x".to_owned()));
    }

    #[test]
    fn read_line_empty_line_is_finished() {
        let mut stream = Cursor::new(b"\r\n".to_vec());
        assert_eq!(read_line(&mut stream, 1024).unwrap(), LineStatus::Finished);
    }

    #[test]
    fn read_line_eof_without_data_is_peer_closed() {
        let mut stream = Cursor::new(Vec::new());
        assert_eq!(
            read_line(&mut stream, 1024).unwrap(),
            LineStatus::PeerClosed
        );
    }

    #[test]
    fn read_line_eof_terminates_partial_line() {
        let mut stream = Cursor::new(b"GET".to_vec());
        assert_eq!(
            read_line(&mut stream, 1024).unwrap(),
            LineStatus::Line("GET".to_owned())
        );
    }

    #[test]
    fn read_line_would_block_is_incomplete() {
        let mut stream = Cursor::new(b"partial".to_vec()).chain(Blocked);
        assert_eq!(read_line(&mut stream, 1024).unwrap(), LineStatus::Incomplete);
    }

    #[test]
    fn read_line_boundary_max_minus_one_parses() {
        let line = "a".repeat(7);
        let mut stream = Cursor::new(format!("{line}\r\n").into_bytes());
        assert_eq!(read_line(&mut stream, 8).unwrap(), LineStatus::Line(line));
    }

    #[test]
    fn read_line_boundary_max_overflows() {
        let line = "a".repeat(8);
        let mut stream = Cursor::new(format!("{line}\r\n").into_bytes());
        assert_eq!(read_line(&mut stream, 8).unwrap(), LineStatus::Overflow);
    }

    #[test]
    fn parse_request_line_splits_method_and_uri() {
        let msg = parse_request_line("GET /foo HTTP/1.1", &limits()).unwrap();
        assert_eq!(msg.method, "GET");
        assert_eq!(msg.uri, "/foo");
    }

    #[test]
    fn parse_request_line_skips_extra_spaces() {
        let msg = parse_request_line("GET   /foo HTTP/1.1", &limits()).unwrap();
        assert_eq!(msg.uri, "/foo");
    }

    #[test]
    fn parse_request_line_missing_delimiter_is_malformed() {
        assert!(matches!(
            parse_request_line("GET/foo", &limits()),
            Err(ParseError::MalformedRequestLine)
        ));
    }

    #[test]
    fn parse_request_line_missing_version_is_malformed() {
        // no second delimiter after the URI
        assert!(matches!(
            parse_request_line("GET /foo", &limits()),
            Err(ParseError::MalformedRequestLine)
        ));
    }

    #[test]
    fn parse_request_line_long_method_is_too_long() {
        let line = format!("{} /foo HTTP/1.1", "M".repeat(17));
        assert!(matches!(
            parse_request_line(&line, &limits()),
            Err(ParseError::FieldTooLong)
        ));
    }

    #[test]
    fn parse_request_line_long_uri_is_too_long() {
        let line = format!("GET /{} HTTP/1.1", "u".repeat(129));
        assert!(matches!(
            parse_request_line(&line, &limits()),
            Err(ParseError::FieldTooLong)
        ));
    }

    #[test]
    fn parse_request_round_trip() {
        let mut stream = Cursor::new(b"GET /foo HTTP/1.1\r\nHost: x\r\n\r\n".to_vec());
        let request = parse_request(&mut stream, &limits()).unwrap();

        assert_eq!(request.msg.method, "GET");
        assert_eq!(request.msg.uri, "/foo");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.headers.iter().next(), Some("Host: x"));
        assert!(!request.keep_alive);
    }

    #[test]
    fn parse_request_detects_keep_alive() {
        let mut stream =
            Cursor::new(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n".to_vec());
        let request = parse_request(&mut stream, &limits()).unwrap();
        assert!(request.keep_alive);
    }

    #[test]
    fn parse_request_preserves_header_arrival_order() {
        let mut stream =
            Cursor::new(b"GET / HTTP/1.1\r\nHost: a\r\nAccept: b\r\nUser-Agent: c\r\n\r\n".to_vec());
        let request = parse_request(&mut stream, &limits()).unwrap();
        let lines: Vec<&str> = request.headers.iter().collect();
        assert_eq!(lines, vec!["Host: a", "Accept: b", "User-Agent: c"]);
    }

    #[test]
    fn parse_request_incomplete_request_line_aborts() {
        let mut stream = Blocked;
        assert!(matches!(
            parse_request(&mut stream, &limits()),
            Err(ParseError::Incomplete)
        ));
    }

    #[test]
    fn parse_request_gives_up_after_consecutive_errors() {
        // Request line arrives, then the socket blocks forever mid-headers.
        let mut stream = Cursor::new(b"GET / HTTP/1.1\r\n".to_vec()).chain(Blocked);
        assert!(matches!(
            parse_request(&mut stream, &limits()),
            Err(ParseError::TooManyLineErrors(12))
        ));
    }

    #[test]
    fn parse_request_peer_close_mid_headers_aborts() {
        let mut stream = Cursor::new(b"GET / HTTP/1.1\r\nHost: x\r\n".to_vec());
        assert!(matches!(
            parse_request(&mut stream, &limits()),
            Err(ParseError::PeerClosed)
        ));
    }

    #[test]
    fn headers_push_strips_crlf() {
        let mut headers = Headers::new();
        headers.push("Host: x\r\n");
        headers.push("Accept: y");
        let lines: Vec<&str> = headers.iter().collect();
        assert_eq!(lines, vec!["Host: x", "Accept: y"]);
    }
}
