//! Cookie storage.
//!
//! The jar stores cookies scoped by domain and path and serves them back to
//! matching requests per RFC 6265. `Set-Cookie` attribute parsing is done by
//! the `cookie` crate; validation, storage, matching and expiry live here.

use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use cookie::{Cookie, Expiration};

use crate::Error;

/// A domain/path-scoped cookie store.
///
/// Safe for concurrent use; reads take a shared lock, writes an exclusive
/// one.
#[derive(Debug, Default)]
pub struct CookieJar {
    inner: RwLock<Vec<StoredCookie>>,
}

#[derive(Debug, Clone)]
struct StoredCookie {
    name: String,
    value: String,
    domain: String,
    host_only: bool,
    path: String,
    expires: Option<SystemTime>,
    secure: bool,
    #[allow(dead_code)]
    http_only: bool,
}

impl CookieJar {
    /// An empty jar.
    pub fn new() -> Self {
        CookieJar::default()
    }

    /// Serialize the cookies matching `(host, is_secure, path)` into a
    /// `Cookie` header value, joined by `"; "` in insertion order.
    ///
    /// An empty string means no matching cookies.
    pub fn get(&self, host: &str, is_secure: bool, path: &str) -> String {
        self.get_at(host, is_secure, path, SystemTime::now())
    }

    pub(crate) fn get_at(
        &self,
        host: &str,
        is_secure: bool,
        path: &str,
        now: SystemTime,
    ) -> String {
        let inner = self.inner.read().unwrap();

        let mut out = String::new();
        for c in inner.iter() {
            if !c.is_fresh(now)
                || !c.domain_matches(host)
                || !c.path_matches(path)
                || (c.secure && !is_secure)
            {
                continue;
            }
            if !out.is_empty() {
                out.push_str("; ");
            }
            out.push_str(&c.name);
            out.push('=');
            out.push_str(&c.value);
        }
        out
    }

    /// Ingest one `Set-Cookie` header received from `request_host` for
    /// `request_path`.
    ///
    /// A cookie naming a `Domain` that does not cover the request host is
    /// rejected, so a response cannot plant cookies for foreign origins.
    pub fn set(
        &self,
        header: &str,
        request_host: &str,
        request_path: &str,
        now: SystemTime,
    ) -> Result<(), Error> {
        let parsed =
            Cookie::parse(header.trim()).map_err(|_| Error::InvalidCookie("malformed set-cookie"))?;

        if parsed.name().is_empty() {
            return Err(Error::InvalidCookie("empty cookie name"));
        }

        let (domain, host_only) = match parsed.domain() {
            Some(domain) => {
                let domain = domain.trim_start_matches('.').to_ascii_lowercase();
                if domain.is_empty() {
                    return Err(Error::InvalidCookie("empty domain"));
                }
                if !domain_suffix_matches(request_host, &domain) {
                    return Err(Error::InvalidCookie("domain does not cover request host"));
                }
                (domain, false)
            }
            None => (request_host.to_ascii_lowercase(), true),
        };

        let path = match parsed.path() {
            Some(p) if p.starts_with('/') => p.to_string(),
            _ => default_path(request_path),
        };

        // Max-Age takes precedence over Expires (RFC 6265 §5.3 step 3).
        let expires = if let Some(max_age) = parsed.max_age() {
            let secs = max_age.whole_seconds();
            if secs <= 0 {
                Some(now - Duration::from_secs(1))
            } else {
                Some(now + Duration::from_secs(secs as u64))
            }
        } else {
            match parsed.expires() {
                Some(Expiration::DateTime(dt)) => Some(dt.into()),
                _ => None,
            }
        };

        let cookie = StoredCookie {
            name: parsed.name().to_string(),
            value: parsed.value().to_string(),
            domain,
            host_only,
            path,
            expires,
            secure: parsed.secure().unwrap_or(false),
            http_only: parsed.http_only().unwrap_or(false),
        };

        let mut inner = self.inner.write().unwrap();

        let existing = inner.iter().position(|c| {
            c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path
        });

        let expired_now = cookie.expires.map(|e| e <= now).unwrap_or(false);

        match (existing, expired_now) {
            // An already-expired cookie is the server's way of deleting.
            (Some(i), true) => {
                inner.remove(i);
            }
            (None, true) => {}
            // Replacing keeps the original insertion position.
            (Some(i), false) => inner[i] = cookie,
            (None, false) => inner.push(cookie),
        }

        Ok(())
    }

    /// Drop every cookie whose expiry is at or before `now`.
    pub fn purge_expired(&self, now: SystemTime) {
        let mut inner = self.inner.write().unwrap();
        inner.retain(|c| c.is_fresh(now));
    }

    /// Number of stored cookies, including not-yet-purged expired ones.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    /// Whether the jar holds no cookies at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StoredCookie {
    fn is_fresh(&self, now: SystemTime) -> bool {
        match self.expires {
            Some(expires) => expires > now,
            None => true,
        }
    }

    /// RFC 6265 §5.1.3 domain matching.
    fn domain_matches(&self, host: &str) -> bool {
        if self.host_only {
            host.eq_ignore_ascii_case(&self.domain)
        } else {
            domain_suffix_matches(host, &self.domain)
        }
    }

    /// RFC 6265 §5.1.4 path matching.
    fn path_matches(&self, path: &str) -> bool {
        let cp = &self.path;
        if path == cp {
            return true;
        }
        path.starts_with(cp.as_str())
            && (cp.ends_with('/') || path[cp.len()..].starts_with('/'))
    }
}

fn domain_suffix_matches(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == domain
        || (host.len() > domain.len() + 1
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

/// Default cookie path from the request path (RFC 6265 §5.1.4).
fn default_path(request_path: &str) -> String {
    if !request_path.starts_with('/') {
        return "/".to_string();
    }
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => request_path[..i].to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn host_only_cookie_requires_exact_host() {
        let jar = CookieJar::new();
        jar.set("sid=abc", "example.com", "/", now()).unwrap();

        assert_eq!(jar.get_at("example.com", false, "/", now()), "sid=abc");
        assert_eq!(jar.get_at("api.example.com", false, "/", now()), "");
        assert_eq!(jar.get_at("other.org", false, "/", now()), "");
    }

    #[test]
    fn domain_cookie_matches_subdomains() {
        let jar = CookieJar::new();
        jar.set("sid=abc; Path=/; Domain=example.com", "example.com", "/", now())
            .unwrap();

        assert_eq!(jar.get_at("example.com", false, "/x", now()), "sid=abc");
        assert_eq!(jar.get_at("api.example.com", false, "/x", now()), "sid=abc");
        assert_eq!(jar.get_at("other.org", false, "/x", now()), "");
        assert_eq!(jar.get_at("notexample.com", false, "/x", now()), "");
    }

    #[test]
    fn cross_origin_domain_is_rejected() {
        let jar = CookieJar::new();
        let err = jar
            .set("sid=abc; Domain=other.org", "example.com", "/", now())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCookie(_)));
        assert!(jar.is_empty());
    }

    #[test]
    fn malformed_set_cookie_is_an_error() {
        let jar = CookieJar::new();
        assert!(jar.set("", "example.com", "/", now()).is_err());
        assert!(jar.set("no-equals-sign", "example.com", "/", now()).is_err());
    }

    #[test]
    fn path_prefix_matching() {
        let jar = CookieJar::new();
        jar.set("a=1; Path=/docs", "example.com", "/", now()).unwrap();

        assert_eq!(jar.get_at("example.com", false, "/docs", now()), "a=1");
        assert_eq!(jar.get_at("example.com", false, "/docs/page", now()), "a=1");
        assert_eq!(jar.get_at("example.com", false, "/docsother", now()), "");
        assert_eq!(jar.get_at("example.com", false, "/", now()), "");
    }

    #[test]
    fn default_path_is_request_directory() {
        let jar = CookieJar::new();
        jar.set("a=1", "example.com", "/dir/page", now()).unwrap();

        assert_eq!(jar.get_at("example.com", false, "/dir/other", now()), "a=1");
        assert_eq!(jar.get_at("example.com", false, "/elsewhere", now()), "");
    }

    #[test]
    fn secure_cookie_needs_secure_request() {
        let jar = CookieJar::new();
        jar.set("s=1; Secure", "example.com", "/", now()).unwrap();

        assert_eq!(jar.get_at("example.com", true, "/", now()), "s=1");
        assert_eq!(jar.get_at("example.com", false, "/", now()), "");
    }

    #[test]
    fn max_age_overrides_expires() {
        let jar = CookieJar::new();
        jar.set(
            "a=1; Max-Age=60; Expires=Sun, 06 Nov 1994 08:49:37 GMT",
            "example.com",
            "/",
            now(),
        )
        .unwrap();

        // The Expires date is long past, but Max-Age wins.
        assert_eq!(jar.get_at("example.com", false, "/", now()), "a=1");
        assert_eq!(
            jar.get_at("example.com", false, "/", now() + Duration::from_secs(61)),
            ""
        );
    }

    #[test]
    fn zero_max_age_deletes() {
        let jar = CookieJar::new();
        jar.set("a=1", "example.com", "/", now()).unwrap();
        assert_eq!(jar.len(), 1);

        jar.set("a=gone; Max-Age=0", "example.com", "/", now()).unwrap();
        assert!(jar.is_empty());
    }

    #[test]
    fn purge_expired_removes_old_cookies() {
        let jar = CookieJar::new();
        jar.set("a=1; Max-Age=10", "example.com", "/", now()).unwrap();
        jar.set("b=2", "example.com", "/", now()).unwrap();

        jar.purge_expired(now() + Duration::from_secs(11));
        assert_eq!(jar.len(), 1);
        assert_eq!(jar.get_at("example.com", false, "/", now()), "b=2");
    }

    #[test]
    fn insertion_order_is_preserved() {
        let jar = CookieJar::new();
        jar.set("a=1", "example.com", "/", now()).unwrap();
        jar.set("b=2", "example.com", "/", now()).unwrap();
        jar.set("a=3", "example.com", "/", now()).unwrap();

        assert_eq!(jar.get_at("example.com", false, "/", now()), "a=3; b=2");
    }
}
