//! HTTP response building and sending.
//!
//! The builder is a pure function from status, reason, body, and extra
//! header lines to a wire-ready byte buffer. It always emits
//! `Connection: keep-alive` — a deliberate default inherited from the
//! protocol's reuse-by-default posture; whether the connection is actually
//! kept open is decided by the reactor from the *request's* keep-alive
//! flag, not from this header.

use std::io::{self, Write};

use bytes::{BufMut, BytesMut};

use crate::http::Headers;

/// Fixed 503 sent when the connection pool is exhausted. The socket is
/// accepted, answered, and closed without ever being registered.
pub const CAPACITY_503: &[u8] =
    b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 20\r\n\r\nServer at capacity\r\n";

/// Fixed 500 sent on unrecoverable per-request parse failure.
pub const INTERNAL_ERROR_500: &[u8] = b"HTTP/1.1 500 Internal Server Error\r\n\
Content-Type: text/html; charset=UTF-8\r\n\
Content-Length: 21\r\n\
\r\n\
Internal Server Error";

/// Fixed 404 sent when no route matches. Carries keep-alive so a missing
/// route does not itself force connection teardown.
pub const NOT_FOUND_404: &[u8] = b"HTTP/1.1 404 NOT FOUND\r\n\
Content-Type: text/html; charset=UTF-8\r\n\
Content-Length: 9\r\n\
Connection: keep-alive\r\n\
\r\n\
NOT FOUND";

/// Builds a complete HTTP/1.1 response.
///
/// Layout: status line, `Content-Length`, `Connection: keep-alive`, the
/// extra header lines (CRLF re-appended to each), a blank line, then the
/// body.
pub fn build(status: u16, reason: &str, body: &str, extra: &Headers) -> BytesMut {
    let mut buf = BytesMut::with_capacity(128 + body.len());
    buf.put_slice(format!("HTTP/1.1 {status} {reason}\r\n").as_bytes());
    buf.put_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    buf.put_slice(b"Connection: keep-alive\r\n");
    for line in extra.iter() {
        buf.put_slice(line.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
    buf.put_slice(body.as_bytes());
    buf
}

/// Builds and writes a response onto the stream.
///
/// The write is best-effort on a non-blocking socket: a send failure is
/// connection-scoped and surfaces as the `Err` for the caller to tear the
/// connection down.
pub fn send<W: Write>(
    stream: &mut W,
    status: u16,
    reason: &str,
    body: &str,
    extra: &Headers,
) -> io::Result<()> {
    stream.write_all(&build(status, reason, body, extra))
}

/// Like [`send`], prepending a `Content-Type` header to the extras.
pub fn send_with_content_type<W: Write>(
    stream: &mut W,
    status: u16,
    reason: &str,
    content_type: &str,
    body: &str,
    extra: &Headers,
) -> io::Result<()> {
    let mut headers = Headers::new();
    headers.push(format!("Content-Type: {content_type}"));
    for line in extra.iter() {
        headers.push(line);
    }
    send(stream, status, reason, body, &headers)
}
