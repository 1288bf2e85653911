//! Session configuration.

use std::time::Duration;

use crate::RedirectMode;

/// Configuration for a [`Session`][crate::Session].
///
/// Values are set through [`SessionBuilder`][crate::SessionBuilder]; the
/// redirect-related ones can additionally be overridden per request on
/// [`RequestBuilder`][crate::RequestBuilder].
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) enforce_tls: bool,
    pub(crate) max_redirects: u32,
    pub(crate) redirect: RedirectMode,
    pub(crate) max_connections_per_host: usize,
    pub(crate) initial_pool_connections: usize,
    pub(crate) timeout_connect: Option<Duration>,
    pub(crate) timeout_read: Option<Duration>,
    pub(crate) timeout_write: Option<Duration>,
    pub(crate) user_agent: String,
}

pub(crate) static DEFAULT_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

impl Default for Config {
    fn default() -> Self {
        Config {
            enforce_tls: false,
            max_redirects: 10,
            redirect: RedirectMode::Any,
            max_connections_per_host: 4,
            initial_pool_connections: 0,
            timeout_connect: None,
            timeout_read: None,
            timeout_write: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Config {
    /// Whether requests (including redirect targets) must use https.
    pub fn enforce_tls(&self) -> bool {
        self.enforce_tls
    }

    /// Redirect budget; the chain fails with
    /// [`TooManyRedirects`][crate::Error::TooManyRedirects] once it is
    /// exhausted.
    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    /// Which redirect targets are followed.
    pub fn redirect(&self) -> RedirectMode {
        self.redirect
    }

    /// Max open connections per `(host, port)`.
    pub fn max_connections_per_host(&self) -> usize {
        self.max_connections_per_host
    }
}

/// Per-request effective options: the session [`Config`] with any
/// request-level overrides applied.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestOptions {
    pub enforce_tls: bool,
    pub max_redirects: u32,
    pub redirect: RedirectMode,
}

impl RequestOptions {
    pub fn from_config(config: &Config) -> Self {
        RequestOptions {
            enforce_tls: config.enforce_tls,
            max_redirects: config.max_redirects,
            redirect: config.redirect,
        }
    }
}
