//! Endpoint registration and resolution.
//!
//! Registrations are kept in registration order but resolved most-recently-
//! registered-first (LIFO). This is intentional and load-bearing for
//! overlapping patterns: binding a prefix and later an exact route under it
//! means the exact route wins, and vice versa. Callers who want
//! most-specific-wins semantics must register in that order.

use mio::net::TcpStream;

use crate::http::{Headers, HttpMsg};

/// How a pattern is matched against a request URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// URI must equal the pattern byte-for-byte.
    Exact,
    /// URI must start with the pattern. Byte-exact prefix, no wildcard
    /// expansion.
    Prefix,
}

/// A request handler.
///
/// The handler owns the request line and header list it is given and is
/// solely responsible for writing a well-formed HTTP response onto the
/// stream before returning (the [`response`](crate::response) helpers cover
/// the common case).
pub trait Handler {
    /// Handles one parsed request.
    fn handle(&self, stream: &mut TcpStream, msg: HttpMsg, headers: Headers);
}

impl<F> Handler for F
where
    F: Fn(&mut TcpStream, HttpMsg, Headers),
{
    fn handle(&self, stream: &mut TcpStream, msg: HttpMsg, headers: Headers) {
        self(stream, msg, headers);
    }
}

/// One registered endpoint.
pub struct Registration {
    pattern: String,
    mode: MatchMode,
    handler: Box<dyn Handler>,
}

impl Registration {
    /// The registered pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The registered match mode.
    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// The handler to dispatch to.
    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }

    fn matches(&self, uri: &str) -> bool {
        match self.mode {
            MatchMode::Exact => uri == self.pattern,
            MatchMode::Prefix => uri.starts_with(&self.pattern),
        }
    }
}

/// Holds endpoint registrations and resolves URIs to handlers.
#[derive(Default)]
pub struct Router {
    routes: Vec<Registration>,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a pattern.
    pub fn register(
        &mut self,
        pattern: impl Into<String>,
        mode: MatchMode,
        handler: Box<dyn Handler>,
    ) {
        self.routes.push(Registration {
            pattern: pattern.into(),
            mode,
            handler,
        });
    }

    /// Resolves a URI to the most recently registered matching endpoint.
    ///
    /// Returns `None` when nothing matches; the reactor then synthesizes
    /// the fixed 404 response.
    pub fn resolve(&self, uri: &str) -> Option<&Registration> {
        self.routes.iter().rev().find(|route| route.matches(uri))
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Box<dyn Handler> {
        Box::new(|_: &mut TcpStream, _: HttpMsg, _: Headers| {})
    }

    #[test]
    fn exact_match_requires_equality() {
        let mut router = Router::new();
        router.register("/api/v1", MatchMode::Exact, noop());

        assert!(router.resolve("/api/v1").is_some());
        assert!(router.resolve("/api/v1/users").is_none());
        assert!(router.resolve("/api").is_none());
    }

    #[test]
    fn prefix_match_is_byte_exact_prefix() {
        let mut router = Router::new();
        router.register("/api", MatchMode::Prefix, noop());

        assert!(router.resolve("/api").is_some());
        assert!(router.resolve("/api/v1").is_some());
        // no path-segment awareness: any byte continuation matches
        assert!(router.resolve("/apiary").is_some());
        assert!(router.resolve("/ap").is_none());
    }

    #[test]
    fn resolution_is_most_recently_registered_first() {
        // Counter-intuitive on purpose: the LAST registration wins, not the
        // most specific one.
        let mut router = Router::new();
        router.register("/api", MatchMode::Prefix, noop());
        router.register("/api/v1", MatchMode::Exact, noop());

        let resolved = router.resolve("/api/v1").expect("route must resolve");
        assert_eq!(resolved.pattern(), "/api/v1");
        assert_eq!(resolved.mode(), MatchMode::Exact);
    }

    #[test]
    fn later_prefix_shadows_earlier_exact() {
        let mut router = Router::new();
        router.register("/api/v1", MatchMode::Exact, noop());
        router.register("/api", MatchMode::Prefix, noop());

        let resolved = router.resolve("/api/v1").expect("route must resolve");
        assert_eq!(resolved.pattern(), "/api");
        assert_eq!(resolved.mode(), MatchMode::Prefix);
    }

    #[test]
    fn no_match_returns_none() {
        let mut router = Router::new();
        router.register("/", MatchMode::Exact, noop());
        assert!(router.resolve("/missing").is_none());
    }

    #[test]
    fn empty_router_resolves_nothing() {
        let router = Router::new();
        assert!(router.is_empty());
        assert!(router.resolve("/").is_none());
    }
}
