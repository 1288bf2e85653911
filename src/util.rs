use std::io::{self, ErrorKind};

/// Windows causes kind `TimedOut` while unix does `WouldBlock` when a socket
/// timeout strikes. Since we are not using non-blocking streams, we
/// normalize `WouldBlock` -> `TimedOut`.
pub(crate) trait IoResultExt {
    fn normalize_would_block(self) -> Self;
}

impl<T> IoResultExt for io::Result<T> {
    fn normalize_would_block(self) -> Self {
        match self {
            Ok(v) => Ok(v),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                Err(io::Error::new(ErrorKind::TimedOut, e))
            }
            Err(e) => Err(e),
        }
    }
}

/// Default port for a url scheme this crate understands.
pub(crate) fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

pub(crate) fn port_or_default(url: &url::Url) -> u16 {
    url.port()
        .or_else(|| default_port(url.scheme()))
        .unwrap_or(0)
}
