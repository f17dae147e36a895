//! # scoria: minimal single-threaded HTTP/1.1 reactor
//!
//! This crate multiplexes many client connections over one readiness-based
//! poll, with a bounded pool of reusable connection slots, an incremental
//! request-line/header parser for non-blocking sockets, and an exact/prefix
//! endpoint router.
//!
//! ## Architecture
//!
//! The server uses `mio` for non-blocking I/O with a poll-based event loop.
//! This follows the project's design principle of explicit control flow
//! without async runtimes.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         scoria                           │
//! │  ┌──────────┐   ┌────────────────┐   ┌────────────────┐  │
//! │  │ Listener │ → │ ConnectionPool │ → │ Router         │  │
//! │  │ (TCP)    │   │ (mio poll)     │   │ (→ handlers)   │  │
//! │  └──────────┘   └────────────────┘   └────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on the thread that calls [`Server::poll`]: one wakeup
//! sweeps stale connections, accepts new ones into the pool (or sheds them
//! with a 503 when the pool is exhausted), parses whatever is readable,
//! dispatches through the router, and re-arms or releases each connection
//! depending on keep-alive.
//!
//! ## Usage
//!
//! ```no_run
//! use mio::net::TcpStream;
//! use scoria::{Headers, HttpMsg, Server, ServerConfig, response};
//!
//! # fn main() -> scoria::ServerResult<()> {
//! let mut server = Server::new(ServerConfig::loopback(8000))?;
//! server.bind_exact("/", |stream: &mut TcpStream, _msg: HttpMsg, _headers: Headers| {
//!     let _ = response::send_with_content_type(
//!         stream, 200, "OK", "text/plain", "hello\n", &Headers::new(),
//!     );
//! });
//! server.run()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
pub mod http;
pub mod pool;
pub mod response;
pub mod router;
mod server;

pub use config::ServerConfig;
pub use error::{ParseError, ServerError, ServerResult};
pub use http::{Headers, HttpMsg, ParseLimits, ParsedRequest};
pub use pool::ConnectionPool;
pub use router::{Handler, MatchMode, Router};
pub use server::{PollStatus, Server, ShutdownHandle};
