//! Server error types.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur during server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Bind failed.
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
}

/// Errors that abort parsing of a single request.
///
/// These are connection-scoped: the reactor answers with a best-effort 500
/// (where a peer is still there to read it), releases the slot, and keeps
/// serving other connections.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The request line was missing a delimiter or had an empty token.
    #[error("malformed request line")]
    MalformedRequestLine,

    /// A method or URI token exceeded its bounded buffer.
    #[error("request line field too long")]
    FieldTooLong,

    /// A header line exceeded the line length limit.
    #[error("header line exceeded {0} bytes")]
    LineOverflow(usize),

    /// The socket would have blocked before a full request line arrived.
    ///
    /// Parsing does not resume across readiness wakeups; see
    /// [`parse_request`](crate::http::parse_request).
    #[error("request line incomplete")]
    Incomplete,

    /// The peer closed the connection before a full request arrived.
    #[error("peer closed connection mid-request")]
    PeerClosed,

    /// Too many consecutive failed header line reads.
    #[error("more than {0} consecutive header line errors")]
    TooManyLineErrors(u32),

    /// Read failed mid-parse.
    #[error("read error: {0}")]
    Read(#[from] std::io::Error),
}
