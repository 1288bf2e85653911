//! Name resolution.
//!
//! Address resolution is pluggable. The resolver's duty is to take a
//! `host:port` string and translate it to socket addresses. This is done as
//! a separate step when a pool first looks up its authority; the resulting
//! endpoint set is kept for the lifetime of the pool.
//!
//! Overriding resolution is useful for testing and special cases like
//! DNS-based load balancing:
//!
//! ```
//! use std::net::ToSocketAddrs;
//!
//! let session = sreq::Session::builder()
//!     .resolver(|netloc: &str| match netloc {
//!         "example.com:80" => Ok(vec![([127, 0, 0, 1], 8096).into()]),
//!         netloc => netloc.to_socket_addrs().map(Iterator::collect),
//!     })
//!     .build();
//! ```

use std::fmt::{self, Debug};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::ops::Deref;
use std::sync::Arc;

/// Trait for name resolvers.
///
/// `netloc` is on the form `host:port`; the port is always present.
pub trait Resolver: Send + Sync + 'static {
    /// Resolve to one or more socket addresses.
    fn resolve(&self, netloc: &str) -> io::Result<Vec<SocketAddr>>;
}

impl<F> Resolver for F
where
    F: Fn(&str) -> io::Result<Vec<SocketAddr>> + Send + Sync + 'static,
{
    fn resolve(&self, netloc: &str) -> io::Result<Vec<SocketAddr>> {
        self(netloc)
    }
}

/// Default resolver using std::net [`ToSocketAddrs`].
#[derive(Debug, Default)]
pub(crate) struct StdResolver;

impl Resolver for StdResolver {
    fn resolve(&self, netloc: &str) -> io::Result<Vec<SocketAddr>> {
        trace!("Resolve: {}", netloc);
        netloc.to_socket_addrs().map(Iterator::collect)
    }
}

#[derive(Clone)]
pub(crate) struct ArcResolver(Arc<dyn Resolver>);

impl<R: Resolver> From<R> for ArcResolver {
    fn from(r: R) -> Self {
        ArcResolver(Arc::new(r))
    }
}

impl Default for ArcResolver {
    fn default() -> Self {
        StdResolver.into()
    }
}

impl Deref for ArcResolver {
    type Target = dyn Resolver;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl Debug for ArcResolver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ArcResolver").finish()
    }
}
