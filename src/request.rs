use std::path::Path;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};

use crate::config::RequestOptions;
use crate::conn::ResponseStream;
use crate::source::AsSource;
use crate::{Error, RedirectMode, Response, Session};

/// A request under construction.
///
/// Created from the method helpers on [`Session`] (or the crate-level
/// shortcuts). Finish with [`call()`][RequestBuilder::call],
/// [`send()`][RequestBuilder::send], [`stream()`][RequestBuilder::stream]
/// or [`download()`][RequestBuilder::download].
///
/// ```no_run
/// let session = sreq::Session::new();
///
/// let response = session
///     .get("http://example.com/my-page")
///     .set("X-Api-Key", "foobar")
///     .query("q", "cats and dogs")
///     .call()?;
/// # Ok::<(), sreq::Error>(())
/// ```
pub struct RequestBuilder {
    session: Session,
    method: Method,
    url: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    redirect: Option<RedirectMode>,
    max_redirects: Option<u32>,
    enforce_tls: Option<bool>,
    error: Option<Error>,
}

impl RequestBuilder {
    pub(crate) fn new(session: Session, method: Method, url: impl Into<String>) -> Self {
        RequestBuilder {
            session,
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            redirect: None,
            max_redirects: None,
            enforce_tls: None,
            error: None,
        }
    }

    /// Set a header on this request, replacing any previous value.
    ///
    /// An invalid name or value surfaces as an error when the request runs.
    #[must_use]
    pub fn set(mut self, name: &str, value: &str) -> Self {
        let name = HeaderName::from_bytes(name.as_bytes());
        let value = HeaderValue::from_str(value);
        match (name, value) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => self.error = Some(Error::BadHeader),
        }
        self
    }

    /// Append a percent-encoded query pair, e.g. `?foo=bar%20baz`.
    #[must_use]
    pub fn query(mut self, param: &str, value: &str) -> Self {
        self.query.push((param.to_string(), value.to_string()));
        self
    }

    /// Override the session redirect mode for this request.
    #[must_use]
    pub fn redirect(mut self, mode: RedirectMode) -> Self {
        self.redirect = Some(mode);
        self
    }

    /// Override the session max redirect count for this request.
    #[must_use]
    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = Some(max);
        self
    }

    /// Override the session TLS enforcement for this request.
    #[must_use]
    pub fn enforce_tls(mut self, enforce: bool) -> Self {
        self.enforce_tls = Some(enforce);
        self
    }

    /// Run the request without a body, buffering the whole response.
    pub fn call(self) -> Result<Response, Error> {
        self.send(())
    }

    /// Run the request with a body, buffering the whole response.
    pub fn send(self, body: impl AsSource) -> Result<Response, Error> {
        let (session, method, url, headers, opts) = self.finish()?;
        session.run(method, url, body.as_source(), headers, opts)
    }

    /// Run the request without a body and return a streaming handle for
    /// reading the response body directly off the connection.
    pub fn stream(self) -> Result<ResponseStream, Error> {
        self.stream_send(())
    }

    /// Like [`stream()`][RequestBuilder::stream], with a request body.
    pub fn stream_send(self, body: impl AsSource) -> Result<ResponseStream, Error> {
        let (session, method, url, headers, opts) = self.finish()?;
        session.run_stream(method, url, body.as_source(), headers, opts)
    }

    /// HEAD to discover the final location, then GET the body into a file
    /// at `path`. An existing file is replaced.
    pub fn download(self, path: impl AsRef<Path>) -> Result<Response, Error> {
        let (session, _method, url, headers, opts) = self.finish()?;
        session.run_download(url, headers, opts, path.as_ref())
    }

    fn finish(self) -> Result<(Session, Method, url::Url, HeaderMap, RequestOptions), Error> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut url =
            url::Url::parse(&self.url).map_err(|e| Error::BadUrl(format!("{}: {}", self.url, e)))?;

        for (param, value) in &self.query {
            crate::query::append_pair(&mut url, param, value);
        }

        // Session level headers under request level ones.
        let mut headers = self.session.headers.clone();
        for (name, value) in self.headers.iter() {
            headers.insert(name, value.clone());
        }

        let mut opts = RequestOptions::from_config(self.session.config());
        if let Some(enforce_tls) = self.enforce_tls {
            opts.enforce_tls = enforce_tls;
        }
        if let Some(max_redirects) = self.max_redirects {
            opts.max_redirects = max_redirects;
        }
        if let Some(redirect) = self.redirect {
            opts.redirect = redirect;
        }

        Ok((self.session, self.method, url, headers, opts))
    }
}
