#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![deny(missing_docs)]
//! A session-centric HTTP/1.1 client.
//!
//! sreq drives plain HTTP/1.1 over pooled, keep-alive connections. A
//! [`Session`] owns one connection pool per host, a shared [`CookieJar`]
//! and the redirect policy; requests made through it reuse warm
//! connections and carry cookie state automatically.
//!
//! sreq is in pure Rust and [uses blocking I/O][blocking] instead of async
//! I/O, because that keeps the API simple and keeps dependencies to a
//! minimum. For TLS, sreq uses rustls.
//!
//! # Usage
//!
//! In its simplest form, sreq looks like this:
//!
//! ```no_run
//! let body: String = sreq::get("http://example.com")
//!     .set("Example-Header", "header value")
//!     .call()?
//!     .into_string()?;
//! # Ok::<(), sreq::Error>(())
//! ```
//!
//! For anything more than one-shot requests, create a [`Session`]. A
//! session holds the connection pools and a cookie jar. Sessions are cheap
//! to clone and all clones share state with each other.
//!
//! ```no_run
//! use sreq::{RedirectMode, Session};
//!
//! let session = Session::builder()
//!     .redirect(RedirectMode::SameDomain)
//!     .max_redirects(5)
//!     .build();
//!
//! let response = session.get("http://example.com/page").call()?;
//! println!("history: {}", response.history().len());
//!
//! // Reuses the connection from the previous request.
//! let response = session
//!     .put("http://example.com/upload")
//!     .set("Authorization", "example-token")
//!     .send("some body data")?;
//! # Ok::<(), sreq::Error>(())
//! ```
//!
//! # Streaming responses
//!
//! [`Session::ropen`] (or [`RequestBuilder::stream`]) hands back a
//! [`ResponseStream`] that implements [`std::io::Read`] and reads the body
//! directly off the connection. While the stream is alive, its connection
//! serves no other request; dropping the stream drains the rest of the
//! body and returns the connection to the pool.
//!
//! # Redirects
//!
//! Redirects (301, 302, 307, 308) are followed according to a
//! [`RedirectMode`], and each traversed hop's header and body are kept in
//! the response [`history`](Response::history). A redirect that the mode
//! does not permit fails with [`Error::ForbiddenRedirect`], carrying the
//! partial response collected so far.
//!
//! # Blocking I/O for simplicity
//!
//! Every operation suspends only in socket connect/read/write (and DNS
//! resolution). Cancellation is handled with socket timeouts; a timed out
//! read or write closes the connection, since the stream state is then
//! indeterminate.
//!
//! [blocking]: #blocking-io-for-simplicity

#[macro_use]
extern crate log;

use http::Method;

mod config;
mod conn;
mod error;
mod jar;
mod keep_alive;
mod pool;
mod query;
mod recv;
mod redirect;
mod request;
mod response;
mod session;
mod source;
mod stream;
mod util;

pub mod dates;
pub mod resolver;

#[cfg(feature = "rustls")]
mod tls;

#[cfg(test)]
mod testserver;

pub use config::Config;
pub use conn::ResponseStream;
pub use error::Error;
pub use jar::CookieJar;
pub use redirect::RedirectMode;
pub use request::RequestBuilder;
pub use resolver::Resolver;
pub use response::{Hop, Response};
pub use session::{Session, SessionBuilder};
pub use source::{from_reader, AsSource, Form, Source};

/// Re-exported http-crate.
pub use http;

/// Re-exported url type.
pub use url::Url;

macro_rules! mk_method {
    ($f:tt, $m:tt) => {
        #[doc = concat!("Make a ", stringify!($m), " request on a use-once [`Session`].")]
        #[must_use]
        pub fn $f(url: &str) -> RequestBuilder {
            RequestBuilder::new(Session::new(), Method::$m, url)
        }
    };
}

mk_method!(get, GET);
mk_method!(post, POST);
mk_method!(put, PUT);
mk_method!(delete, DELETE);
mk_method!(head, HEAD);
mk_method!(options, OPTIONS);
mk_method!(patch, PATCH);
mk_method!(trace, TRACE);

#[cfg(test)]
pub(crate) mod test {
    use once_cell::sync::Lazy;

    use super::*;

    pub fn init_test_log() {
        static INIT_LOG: Lazy<()> = Lazy::new(|| env_logger::init());
        *INIT_LOG
    }

    // This doesn't need to run, just compile.
    fn _ensure_send_sync() {
        fn is_send(_t: impl Send) {}
        fn is_sync(_t: impl Sync) {}

        is_send(Session::new());
        is_sync(Session::new());
        is_send(get("http://example.test"));
    }
}
