use std::time::{Duration, Instant};

use http::header::CONNECTION;
use http::{HeaderMap, Version};

/// Connection-reuse state derived from response headers (RFC 7230 §6.3).
///
/// One record lives on each connection and is refreshed after every
/// response. A connection is expired once the deadline has passed, the
/// server announced `max=0`, or any response signalled close.
#[derive(Debug, Clone, Default)]
pub(crate) struct KeepAlive {
    deadline: Option<Instant>,
    max: Option<u32>,
    must_close: bool,
}

impl KeepAlive {
    /// Refresh from the headers of a completed response.
    ///
    /// Idempotent for the same `(headers, version, now)`.
    pub fn update(&mut self, headers: &HeaderMap, version: Version, now: Instant) {
        let mut explicit_keep_alive = false;

        for value in headers.get_all(CONNECTION) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for token in value.split(',') {
                let token = token.trim();
                if token.eq_ignore_ascii_case("close") {
                    self.must_close = true;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    explicit_keep_alive = true;
                }
            }
        }

        // HTTP/1.0 closes unless the server opts in.
        if version == Version::HTTP_10 && !explicit_keep_alive {
            self.must_close = true;
        }

        if let Some(value) = headers.get("keep-alive").and_then(|v| v.to_str().ok()) {
            for param in value.split(',') {
                let mut kv = param.splitn(2, '=');
                let (Some(key), Some(val)) = (kv.next(), kv.next()) else {
                    continue;
                };
                let key = key.trim();
                let val = val.trim();
                if key.eq_ignore_ascii_case("timeout") {
                    if let Ok(secs) = val.parse::<u64>() {
                        self.deadline = Some(now + Duration::from_secs(secs));
                    }
                } else if key.eq_ignore_ascii_case("max") {
                    if let Ok(max) = val.parse::<u32>() {
                        self.max = Some(max);
                    }
                }
            }
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        if self.must_close || self.max == Some(0) {
            return true;
        }
        match self.deadline {
            Some(deadline) => now > deadline,
            None => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
