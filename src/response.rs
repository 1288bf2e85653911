use std::fmt;
use std::path::{Path, PathBuf};

use http::{HeaderMap, StatusCode};
use url::Url;

use crate::Error;

/// A finished response: status, headers, a body and the redirect history
/// that led to it.
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) url: Url,
    pub(crate) body: BodyData,
    pub(crate) history: Vec<Hop>,
}

/// Where the response body ended up.
pub(crate) enum BodyData {
    Bytes(Vec<u8>),
    /// Body was streamed to this file by `download`.
    File(PathBuf),
}

/// One traversed redirect: the header and body of a prior hop.
pub struct Hop {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Vec<u8>,
}

impl Response {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, url: Url) -> Self {
        Response {
            status,
            headers,
            url,
            body: BodyData::Bytes(Vec::new()),
            history: Vec::new(),
        }
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A single header value as a string, if present and valid utf-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The url this response was served from, after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The redirect hops traversed before this response, oldest first.
    pub fn history(&self) -> &[Hop] {
        &self.history
    }

    /// The buffered body. Empty for downloads, whose body went to a file.
    pub fn body(&self) -> &[u8] {
        match &self.body {
            BodyData::Bytes(v) => v,
            BodyData::File(_) => &[],
        }
    }

    /// The file the body was written to, for `download` responses.
    pub fn file(&self) -> Option<&Path> {
        match &self.body {
            BodyData::Bytes(_) => None,
            BodyData::File(p) => Some(p),
        }
    }

    /// The buffered body as bytes.
    pub fn into_vec(self) -> Vec<u8> {
        match self.body {
            BodyData::Bytes(v) => v,
            BodyData::File(_) => Vec::new(),
        }
    }

    /// The body as a utf-8 string.
    pub fn into_string(self) -> Result<String, Error> {
        String::from_utf8(self.into_vec())
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }
}

impl Hop {
    /// Status of this hop.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Headers of this hop.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Body of this hop.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("history", &self.history.len())
            .finish()
    }
}

impl fmt::Debug for Hop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Hop").field("status", &self.status).finish()
    }
}
