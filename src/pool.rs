//! Per-host connection pools.
//!
//! A [`HostPool`] keeps a warm, bounded set of connections for one
//! `(scheme, host, port)` authority. The pool mutex is the arbiter that
//! guarantees a connection is never handed to two callers: `get()` moves the
//! connection out, and the [`Checkout`] guard moves it back on drop.
//! Waiters at capacity are served strictly in arrival order via tickets.

use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

#[cfg(feature = "rustls")]
use rustls::ClientConfig;

use crate::config::Config;
use crate::conn::Connection;
use crate::resolver::ArcResolver;
use crate::Error;

/// Dependencies for opening new connections, owned by the session.
pub(crate) struct ConnectContext<'a> {
    pub config: &'a Config,
    pub secure: bool,
    #[cfg(feature = "rustls")]
    pub tls: Option<&'a Arc<ClientConfig>>,
    pub resolver: &'a ArcResolver,
}

pub(crate) struct HostPool {
    host: String,
    port: u16,
    max: usize,
    initial: usize,
    inner: Mutex<Inner>,
    cond: Condvar,
}

#[derive(Default)]
struct Inner {
    resolved: bool,
    endpoints: Vec<SocketAddr>,
    idle: Vec<Connection>,
    /// idle + checked out.
    live: usize,
    /// Round-robin cursor for new connections.
    next_endpoint: usize,
    /// Ticket numbers for FIFO waiting.
    next_ticket: u64,
    serving: u64,
}

impl HostPool {
    pub fn new(host: String, port: u16, config: &Config) -> Self {
        HostPool {
            host,
            port,
            max: config.max_connections_per_host.max(1),
            initial: config.initial_pool_connections,
            inner: Mutex::new(Inner::default()),
            cond: Condvar::new(),
        }
    }

    /// Resolve the authority (once) and open the configured number of
    /// initial connections.
    pub fn lookup(self: &Arc<Self>, ctx: &ConnectContext) -> Result<(), Error> {
        {
            let mut inner = self.inner.lock().unwrap();
            self.ensure_resolved(&mut inner, ctx)?;
        }

        // Hold all checkouts until the end, otherwise every iteration
        // would just reuse the first connection.
        let mut warm = Vec::new();
        for _ in 0..self.initial.min(self.max) {
            warm.push(self.get(ctx)?);
        }
        // Dropping the checkouts parks the fresh connections as idle.
        drop(warm);

        Ok(())
    }

    fn ensure_resolved(&self, inner: &mut Inner, ctx: &ConnectContext) -> Result<(), Error> {
        if inner.resolved {
            return Ok(());
        }

        let netloc = format!("{}:{}", self.host, self.port);
        let addrs = ctx
            .resolver
            .resolve(&netloc)
            .map_err(|e| Error::Dns(format!("{}: {}", netloc, e)))?;

        if addrs.is_empty() {
            return Err(Error::Dns(format!("no addresses for {}", netloc)));
        }

        debug!("Resolved {} -> {:?}", netloc, addrs);

        inner.endpoints = addrs;
        inner.resolved = true;
        Ok(())
    }

    /// Check out a connection for one request.
    ///
    /// Prefers an idle, non-expired connection; opens a new one (round-robin
    /// over the endpoints) while below the limit; otherwise waits FIFO until
    /// a connection is returned.
    pub fn get(self: &Arc<Self>, ctx: &ConnectContext) -> Result<Checkout, Error> {
        let mut inner = self.inner.lock().unwrap();

        self.ensure_resolved(&mut inner, ctx)?;

        let ticket = inner.next_ticket;
        inner.next_ticket += 1;

        loop {
            if inner.serving == ticket {
                let now = Instant::now();

                // Expired idle connections are closed and dropped.
                while let Some(pos) = inner.idle.iter().position(|c| c.is_expired(now)) {
                    let mut conn = inner.idle.remove(pos);
                    debug!("Drop expired connection to {}", self.host);
                    conn.close();
                    inner.live -= 1;
                }

                if let Some(conn) = inner.idle.pop() {
                    self.advance(&mut inner);
                    return Ok(Checkout::new(self.clone(), conn));
                }

                if inner.live < self.max {
                    inner.live += 1;
                    let start = inner.next_endpoint;
                    inner.next_endpoint = inner.next_endpoint.wrapping_add(1);
                    let endpoints = inner.endpoints.clone();
                    self.advance(&mut inner);

                    // Connect with no pool lock held, so slow handshakes do
                    // not block the pool and callbacks can re-enter.
                    drop(inner);

                    return match open_new(&self.host, &endpoints, start, ctx) {
                        Ok(conn) => Ok(Checkout::new(self.clone(), conn)),
                        Err(e) => {
                            let mut inner = self.inner.lock().unwrap();
                            inner.live -= 1;
                            self.cond.notify_all();
                            Err(e)
                        }
                    };
                }

                // At capacity with nothing idle. Keep the ticket and wait.
            }

            inner = self.cond.wait(inner).unwrap();
        }
    }

    fn advance(&self, inner: &mut Inner) {
        inner.serving += 1;
        self.cond.notify_all();
    }

    fn checkin(&self, mut conn: Connection) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        if conn.is_open() && !conn.is_expired(now) {
            trace!("Return connection to pool {}", self.host);
            inner.idle.push(conn);
        } else {
            conn.close();
            inner.live -= 1;
        }

        self.cond.notify_all();
    }

    /// Number of requests currently holding a connection of this pool.
    pub fn working_requests(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.live - inner.idle.len()
    }

    #[cfg(test)]
    pub fn live_connections(&self) -> usize {
        self.inner.lock().unwrap().live
    }
}

fn open_new(
    host: &str,
    endpoints: &[SocketAddr],
    start: usize,
    ctx: &ConnectContext,
) -> Result<Connection, Error> {
    let mut last = None;

    for i in 0..endpoints.len() {
        let endpoint = endpoints[(start + i) % endpoints.len()];
        let mut conn = Connection::new(host.to_string());
        match conn.connect(endpoint, ctx) {
            Ok(()) => return Ok(conn),
            Err(e) => {
                debug!("Connect to {} failed: {}", endpoint, e);
                last = Some(e);
            }
        }
    }

    Err(last.unwrap_or_else(|| Error::ConnectFailed("no endpoints".to_string())))
}

/// Exclusive ownership of one pooled connection for the duration of one
/// request. Dropping returns the connection, or reclaims the slot if the
/// connection is closed or expired.
pub(crate) struct Checkout {
    pool: Arc<HostPool>,
    conn: Option<Connection>,
}

impl Checkout {
    fn new(pool: Arc<HostPool>, conn: Connection) -> Self {
        Checkout {
            pool,
            conn: Some(conn),
        }
    }
}

impl Deref for Checkout {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("checked out connection")
    }
}

impl DerefMut for Checkout {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("checked out connection")
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(conn);
        }
    }
}
