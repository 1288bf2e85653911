use std::io::Error as IoError;
use std::{fmt, io};

use crate::response::Response;

/// Errors from this crate.
///
/// Redirect policy errors carry the partial [`Response`] accumulated so far,
/// so callers can inspect the header of the hop that stopped the chain and
/// the [`history`](Response::history) of the hops before it.
#[derive(Debug)]
pub enum Error {
    /// The url could not be understood or is missing scheme/host.
    BadUrl(String),
    /// The url scheme is neither `http` nor `https`.
    UnknownScheme(String),
    /// DNS lookup failed or produced no addresses.
    Dns(String),
    /// TCP connection to the server failed on every resolved endpoint.
    ConnectFailed(String),
    /// TLS handshake or certificate verification failed.
    #[cfg(feature = "rustls")]
    Tls(rustls::Error),
    /// Some unspecified `std::io::Error` on an established connection.
    Io(IoError),
    /// The server closed the connection in the middle of a response.
    UnexpectedEof,
    /// The response body violated its own framing.
    BadFraming(&'static str),
    /// A status line we don't understand.
    BadStatus,
    /// A header line that couldn't be parsed.
    BadHeader,
    /// `enforce_tls` is set and the url scheme is not `https`.
    Insecure,
    /// The redirect target is not permitted by the redirect mode.
    ForbiddenRedirect(Box<Response>),
    /// A redirect response without a resolvable `Location` header.
    InvalidRedirect(Box<Response>),
    /// The redirect chain exceeded `max_redirects`.
    TooManyRedirects(Box<Response>),
    /// A `Set-Cookie` header could not be parsed or validated.
    InvalidCookie(&'static str),
    /// The request body source failed while producing data.
    Source(IoError),
    /// The operation requires an open connection.
    NotConnected,
    /// `connect()` was called on an already open connection.
    AlreadyOpen,
}

impl Error {
    /// The partial response of a stopped redirect chain, if this error
    /// carries one.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Error::ForbiddenRedirect(r) => Some(r),
            Error::InvalidRedirect(r) => Some(r),
            Error::TooManyRedirects(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn into_io(self) -> IoError {
        match self {
            Error::Io(e) => e,
            Error::UnexpectedEof => io::ErrorKind::UnexpectedEof.into(),
            e => IoError::new(io::ErrorKind::Other, e),
        }
    }
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Error {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEof
        } else {
            Error::Io(err)
        }
    }
}

#[cfg(feature = "rustls")]
impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Error {
        Error::Tls(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BadUrl(v) => write!(f, "bad url: {}", v),
            Error::UnknownScheme(v) => write!(f, "unknown scheme: {}", v),
            Error::Dns(v) => write!(f, "dns lookup failed: {}", v),
            Error::ConnectFailed(v) => write!(f, "connection failed: {}", v),
            #[cfg(feature = "rustls")]
            Error::Tls(v) => write!(f, "tls: {}", v),
            Error::Io(v) => write!(f, "io: {}", v),
            Error::UnexpectedEof => write!(f, "connection closed mid-response"),
            Error::BadFraming(v) => write!(f, "bad response framing: {}", v),
            Error::BadStatus => write!(f, "bad status line"),
            Error::BadHeader => write!(f, "bad header line"),
            Error::Insecure => write!(f, "tls required but url is not https"),
            Error::ForbiddenRedirect(_) => write!(f, "redirect not permitted by redirect mode"),
            Error::InvalidRedirect(_) => write!(f, "redirect without usable location"),
            Error::TooManyRedirects(_) => write!(f, "too many redirects"),
            Error::InvalidCookie(v) => write!(f, "invalid cookie: {}", v),
            Error::Source(v) => write!(f, "request body source: {}", v),
            Error::NotConnected => write!(f, "connection is not open"),
            Error::AlreadyOpen => write!(f, "connection is already open"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) | Error::Source(e) => Some(e),
            #[cfg(feature = "rustls")]
            Error::Tls(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_is_stable() {
        assert_eq!(
            Error::Insecure.to_string(),
            "tls required but url is not https"
        );
        assert_eq!(
            Error::BadFraming("data after content-length").to_string(),
            "bad response framing: data after content-length"
        );
    }

    #[test]
    fn eof_io_error_becomes_unexpected_eof() {
        let io = IoError::from(io::ErrorKind::UnexpectedEof);
        assert!(matches!(Error::from(io), Error::UnexpectedEof));
    }
}
