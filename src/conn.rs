//! Per-connection request arbiter.
//!
//! A [`Connection`] performs exactly one HTTP/1.1 request/response exchange
//! at a time over its stream. Exclusivity is enforced by the pool: a
//! connection is checked out to one caller, and a [`ResponseStream`] keeps
//! the checkout until the response body is complete.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use http::header::{
    ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST, SET_COOKIE,
    TRANSFER_ENCODING, USER_AGENT,
};
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use base64::prelude::{Engine, BASE64_STANDARD};

use crate::jar::CookieJar;
use crate::keep_alive::KeepAlive;
use crate::pool::{Checkout, ConnectContext};
use crate::recv::{body_mode, read_head, BodyState, RecvBuf, ResponseHead};
use crate::source::Source;
use crate::stream::{connect_tcp, Stream};
use crate::Error;

static CONN_ID: AtomicU64 = AtomicU64::new(0);

/// One TCP or TLS connection to an endpoint of a host.
pub(crate) struct Connection {
    id: u64,
    host: String,
    endpoint: Option<SocketAddr>,
    stream: Option<Stream>,
    rbuf: RecvBuf,
    keep_alive: KeepAlive,
    ongoing: Arc<AtomicUsize>,
}

/// Everything the connection needs to write one request head.
pub(crate) struct RequestParts<'a> {
    pub method: &'a Method,
    /// Path plus query, as it goes on the request line.
    pub target: &'a str,
    /// Decoded path, for cookie matching.
    pub path: &'a str,
    /// `host` or `host:port` for the Host header.
    pub host_header: &'a str,
    pub headers: &'a HeaderMap,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    pub jar: Option<&'a CookieJar>,
    pub user_agent: &'a str,
}

impl Connection {
    pub fn new(host: String) -> Self {
        Connection {
            id: CONN_ID.fetch_add(1, Ordering::Relaxed),
            host,
            endpoint: None,
            stream: None,
            rbuf: RecvBuf::new(),
            keep_alive: KeepAlive::default(),
            ongoing: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connect(&mut self, endpoint: SocketAddr, ctx: &ConnectContext) -> Result<(), Error> {
        if self.stream.is_some() {
            return Err(Error::AlreadyOpen);
        }

        let sock = connect_tcp(&endpoint, ctx.config.timeout_connect)?;

        #[cfg(feature = "rustls")]
        let stream = if ctx.secure {
            crate::tls::wrap(sock, &self.host, ctx.tls.expect("tls config for https"))?
        } else {
            Stream::Http(sock)
        };

        #[cfg(not(feature = "rustls"))]
        let stream = {
            if ctx.secure {
                return Err(Error::UnknownScheme("https".to_string()));
            }
            Stream::Http(sock)
        };

        stream.set_read_timeout(ctx.config.timeout_read).ok();
        stream.set_write_timeout(ctx.config.timeout_write).ok();

        debug!("Connection[{}] open {} -> {}", self.id, self.host, endpoint);

        self.stream = Some(stream);
        self.endpoint = Some(endpoint);
        Ok(())
    }

    /// Graceful shutdown; idempotent.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            debug!("Connection[{}] close", self.id);
            stream.shutdown();
        }
        self.rbuf.clear();
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_secure(&self) -> bool {
        self.stream.as_ref().map(|s| s.is_secure()).unwrap_or(false)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        !self.is_open() || self.keep_alive.is_expired(now)
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    /// Deadline of the keep-alive grant, if the server announced one.
    pub fn timeout(&self) -> Option<Instant> {
        self.keep_alive.deadline()
    }

    pub fn working_requests(&self) -> usize {
        self.ongoing.load(Ordering::SeqCst)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    #[allow(dead_code)]
    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    /// Reserve space in the receive buffer.
    #[allow(dead_code)]
    pub fn reserve(&mut self, size: usize) {
        self.rbuf.reserve(size);
    }

    /// Write `parts` + body, read the full response into memory.
    pub fn single_request(
        &mut self,
        parts: &RequestParts,
        body: &mut dyn Source,
    ) -> Result<(ResponseHead, Vec<u8>), Error> {
        let (mut head, mut state, tracker) = self.single_header_request(parts, body)?;

        let mut out = Vec::new();
        let mut buf = [0_u8; 16 * 1024];
        while !state.is_done() {
            let n = self.read_body(&mut state, &mut buf, &mut head.headers)?;
            out.extend_from_slice(&buf[..n]);
        }

        drop(tracker);
        Ok((head, out))
    }

    /// Write `parts` + body, read status line and headers only. The body is
    /// left on the wire; the returned [`BodyState`] and tracker must be
    /// driven to completion (or handed to a [`ResponseStream`]).
    pub fn single_header_request(
        &mut self,
        parts: &RequestParts,
        body: &mut dyn Source,
    ) -> Result<(ResponseHead, BodyState, Tracker), Error> {
        if self.stream.is_none() {
            return Err(Error::NotConnected);
        }

        let tracker = Tracker::new(&self.ongoing);

        match self.exchange(parts, body) {
            Ok((head, state)) => Ok((head, state, tracker)),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn exchange(
        &mut self,
        parts: &RequestParts,
        body: &mut dyn Source,
    ) -> Result<(ResponseHead, BodyState), Error> {
        let user_chunked = parts
            .headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case("chunked"));
        let user_length = parts.headers.contains_key(CONTENT_LENGTH);

        // Content-Length when the source knows its size, chunked otherwise.
        // A caller-set framing header is obeyed as is.
        let (chunked, declared) = if user_chunked {
            (true, None)
        } else if user_length {
            (false, None)
        } else {
            match body.size() {
                Some(n) => (false, Some(n)),
                None => (true, None),
            }
        };

        let default_type = body.default_content_type().to_string();
        let prelude = self.build_prelude(parts, chunked && !user_chunked, declared, &default_type);

        trace!(
            "Connection[{}] {} {} ({} header bytes)",
            self.id,
            parts.method,
            parts.target,
            prelude.len()
        );

        let stream = self.stream.as_mut().expect("open stream");
        stream.write_all(&prelude)?;

        send_body(stream, body, chunked, declared)?;

        // 1xx informational responses are consumed silently.
        let head = loop {
            let head = read_head(stream, &mut self.rbuf)?;
            if head.status.is_informational() {
                trace!("Connection[{}] consume {}", self.id, head.status);
                continue;
            }
            break head;
        };

        self.keep_alive
            .update(&head.headers, head.version, Instant::now());

        if let Some(jar) = parts.jar {
            let now = SystemTime::now();
            for value in head.headers.get_all(SET_COOKIE) {
                let Ok(value) = value.to_str() else {
                    continue;
                };
                if let Err(e) = jar.set(value, &self.host, parts.path, now) {
                    warn!("Ignoring cookie from {}: {}", self.host, e);
                }
            }
        }

        let mode = body_mode(parts.method, head.status, &head.headers)?;
        Ok((head, BodyState::new(mode)))
    }

    fn build_prelude(
        &self,
        parts: &RequestParts,
        auto_chunked: bool,
        declared: Option<u64>,
        default_type: &str,
    ) -> Vec<u8> {
        let headers = parts.headers;
        let mut prelude: Vec<u8> = Vec::with_capacity(256);

        // Request line.
        let _ = write!(prelude, "{} {} HTTP/1.1\r\n", parts.method, parts.target);

        if !headers.contains_key(HOST) {
            let _ = write!(prelude, "Host: {}\r\n", parts.host_header);
        }
        if !headers.contains_key(USER_AGENT) && !parts.user_agent.is_empty() {
            let _ = write!(prelude, "User-Agent: {}\r\n", parts.user_agent);
        }
        if !headers.contains_key(ACCEPT) {
            let _ = write!(prelude, "Accept: */*\r\n");
        }

        if let Some(size) = declared {
            let _ = write!(prelude, "Content-Length: {}\r\n", size);
        } else if auto_chunked {
            let _ = write!(prelude, "Transfer-Encoding: chunked\r\n");
        }

        if !headers.contains_key(CONTENT_TYPE) && !default_type.is_empty() {
            let _ = write!(prelude, "Content-Type: {}\r\n", default_type);
        }

        // Cookies from the jar override a caller-set Cookie header.
        let jar_cookies = parts
            .jar
            .map(|jar| jar.get(&self.host, self.is_secure(), parts.path))
            .unwrap_or_default();
        if !jar_cookies.is_empty() {
            let _ = write!(prelude, "Cookie: {}\r\n", jar_cookies);
        }

        if let Some(username) = parts.username {
            if !headers.contains_key(AUTHORIZATION) {
                let creds = format!("{}:{}", username, parts.password.unwrap_or(""));
                let _ = write!(
                    prelude,
                    "Authorization: Basic {}\r\n",
                    BASE64_STANDARD.encode(creds)
                );
            }
        }

        for (name, value) in headers.iter() {
            if *name == COOKIE && !jar_cookies.is_empty() {
                continue;
            }
            let _ = write!(prelude, "{}: ", name);
            prelude.extend_from_slice(value.as_bytes());
            prelude.extend_from_slice(b"\r\n");
        }

        prelude.extend_from_slice(b"\r\n");
        prelude
    }

    /// Read some decoded body bytes. Closes the connection on any error.
    pub fn read_body(
        &mut self,
        state: &mut BodyState,
        buf: &mut [u8],
        trailers: &mut HeaderMap,
    ) -> Result<usize, Error> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        match state.read(stream, &mut self.rbuf, buf, trailers) {
            Ok(n) => {
                if state.is_done() && state.is_close_delimited() {
                    // The remote close that ended the body also ends the
                    // connection.
                    self.close();
                }
                Ok(n)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }
}

fn send_body(
    stream: &mut Stream,
    body: &mut dyn Source,
    chunked: bool,
    declared: Option<u64>,
) -> Result<(), Error> {
    let mut tmp = [0_u8; 16 * 1024];
    let mut total: u64 = 0;

    loop {
        let (n, more) = body.read_some(&mut tmp).map_err(Error::Source)?;
        if n > 0 {
            total += n as u64;
            if chunked {
                write!(stream, "{:X}\r\n", n)?;
                stream.write_all(&tmp[..n])?;
                stream.write_all(b"\r\n")?;
            } else {
                stream.write_all(&tmp[..n])?;
            }
        }
        if !more || n == 0 {
            break;
        }
    }

    if chunked {
        stream.write_all(b"0\r\n\r\n")?;
    }

    if let Some(declared) = declared {
        if total != declared {
            return Err(Error::Source(io::Error::new(
                io::ErrorKind::InvalidData,
                "body produced a different size than it declared",
            )));
        }
    }

    stream.flush()?;
    Ok(())
}

/// RAII counter for `working_requests()`. Rises when a request starts and
/// falls when the response body completes.
pub(crate) struct Tracker(Option<Arc<AtomicUsize>>);

impl Tracker {
    pub fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Tracker(Some(counter.clone()))
    }

    pub fn release(&mut self) {
        if let Some(counter) = self.0.take() {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.release();
    }
}

/// A caller-owned handle to one in-flight response body.
///
/// While the stream exists its connection cannot serve another request.
/// Dropping the stream drains the remaining body and returns the connection
/// to its pool; if draining fails the connection is closed instead.
pub struct ResponseStream {
    checkout: Option<Checkout>,
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    state: BodyState,
    tracker: Tracker,
}

impl ResponseStream {
    pub(crate) fn new(
        checkout: Checkout,
        head: ResponseHead,
        url: Url,
        state: BodyState,
        tracker: Tracker,
    ) -> Self {
        let mut stream = ResponseStream {
            checkout: Some(checkout),
            status: head.status,
            headers: head.headers,
            url,
            state,
            tracker,
        };
        if stream.state.is_done() {
            // Bodyless response (HEAD, 204, ...). Nothing to hold the
            // connection for.
            stream.release();
        }
        stream
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers. Chunked trailers are merged in once the body has
    /// been read to completion.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The url this response was served from, after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether the body has been fully read.
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    fn release(&mut self) {
        self.tracker.release();
        // Dropping the checkout returns the connection to the pool.
        self.checkout.take();
    }

    fn do_read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.state.is_done() {
            return Ok(0);
        }
        let Some(conn) = self.checkout.as_mut() else {
            return Ok(0);
        };

        match conn.read_body(&mut self.state, buf, &mut self.headers) {
            Ok(n) => {
                if self.state.is_done() {
                    self.release();
                }
                Ok(n)
            }
            Err(e) => {
                // The connection is already closed; give its slot back.
                self.release();
                Err(e)
            }
        }
    }
}

impl Read for ResponseStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.do_read(buf).map_err(|e| e.into_io())
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if self.checkout.is_some() && !self.state.is_done() {
            trace!("Drain dropped response stream");
            let mut buf = [0_u8; 8 * 1024];
            loop {
                match self.do_read(&mut buf) {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        }
        self.release();
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("done", &self.state.is_done())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::net::TcpListener;

    use crate::config::Config;
    use crate::resolver::ArcResolver;

    use super::*;

    #[test]
    fn unopened_connection_state() {
        let mut conn = Connection::new("example.com".to_string());

        assert!(!conn.is_open());
        // A connection that is not open is never handed out.
        assert!(conn.is_expired(Instant::now()));
        assert_eq!(conn.endpoint(), None);
        assert_eq!(conn.timeout(), None);
        assert_eq!(conn.working_requests(), 0);
        assert_eq!(conn.host(), "example.com");

        conn.set_host("example.org");
        assert_eq!(conn.host(), "example.org");
        conn.reserve(1024);

        conn.close();
        assert!(!conn.is_open());
    }

    #[test]
    fn tracker_counts_in_flight_requests() {
        let counter = Arc::new(AtomicUsize::new(0));

        let mut t1 = Tracker::new(&counter);
        let t2 = Tracker::new(&counter);
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        t1.release();
        t1.release(); // releasing twice must not double count
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        drop(t2);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn requesting_on_closed_connection_fails() {
        let mut conn = Connection::new("example.com".to_string());
        let headers = HeaderMap::new();
        let method = Method::GET;
        let parts = RequestParts {
            method: &method,
            target: "/",
            path: "/",
            host_header: "example.com",
            headers: &headers,
            username: None,
            password: None,
            jar: None,
            user_agent: "test",
        };

        let mut body = crate::source::Empty;
        let err = conn.single_request(&parts, &mut body).unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[test]
    fn connect_twice_is_already_open() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let config = Config::default();
        let resolver = ArcResolver::default();
        let ctx = ConnectContext {
            config: &config,
            secure: false,
            #[cfg(feature = "rustls")]
            tls: None,
            resolver: &resolver,
        };

        let mut conn = Connection::new("localhost".to_string());
        conn.connect(addr, &ctx).unwrap();
        assert!(conn.is_open());
        assert_eq!(conn.endpoint(), Some(addr));

        let err = conn.connect(addr, &ctx).unwrap_err();
        assert!(matches!(err, Error::AlreadyOpen));

        conn.close();
        conn.close(); // idempotent
        assert!(!conn.is_open());
    }
}
