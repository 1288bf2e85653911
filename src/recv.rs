//! Response receiving: head parsing and body framing.
//!
//! The head is accumulated into the connection's flat buffer and parsed
//! with `httparse`. Body framing follows RFC 7230: `Content-Length`
//! delimited, chunked (§4.1, including trailers) or close-delimited.

use std::io::{self, Read};

use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};

use crate::Error;

/// Max size of a response head, from the status line up until the body.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Max length of a chunk size line or trailer line.
const MAX_LINE: usize = 16 * 1024;

const MAX_HEADERS: usize = 128;

/// Flat receive buffer with a consume offset, shared between head parsing
/// and body reading so bytes read past the head are not lost.
pub(crate) struct RecvBuf {
    buf: Vec<u8>,
    start: usize,
}

impl RecvBuf {
    pub fn new() -> Self {
        RecvBuf {
            buf: Vec::new(),
            start: 0,
        }
    }

    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }

    pub fn unconsumed(&self) -> &[u8] {
        &self.buf[self.start..]
    }

    pub fn consume(&mut self, amount: usize) {
        self.start += amount;
        assert!(self.start <= self.buf.len());
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.start = 0;
    }

    /// Read once from `r`, appending to the buffer. Returns bytes read.
    pub fn fill_from(&mut self, r: &mut impl Read) -> io::Result<usize> {
        if self.start == self.buf.len() {
            self.clear();
        } else if self.start > 8 * 1024 {
            self.buf.drain(..self.start);
            self.start = 0;
        }

        let mut tmp = [0_u8; 8 * 1024];
        let n = r.read(&mut tmp)?;
        self.buf.extend_from_slice(&tmp[..n]);
        Ok(n)
    }
}

/// Status line and headers of a response.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

/// Read and parse one response head off the stream.
pub(crate) fn read_head(
    stream: &mut impl Read,
    rbuf: &mut RecvBuf,
) -> Result<ResponseHead, Error> {
    loop {
        if let Some(end) = find_head_end(rbuf.unconsumed()) {
            let head = parse_head(&rbuf.unconsumed()[..end])?;
            rbuf.consume(end);
            return Ok(head);
        }

        if rbuf.unconsumed().len() > MAX_HEAD_SIZE {
            return Err(Error::BadHeader);
        }

        let n = rbuf.fill_from(stream)?;
        if n == 0 {
            return Err(Error::UnexpectedEof);
        }
    }
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn parse_head(data: &[u8]) -> Result<ResponseHead, Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut res = httparse::Response::new(&mut headers);

    match res.parse(data) {
        Ok(httparse::Status::Complete(_)) => {}
        // We only parse once the blank line is in the buffer.
        Ok(httparse::Status::Partial) => return Err(Error::BadHeader),
        Err(httparse::Error::Status) | Err(httparse::Error::Version) => {
            return Err(Error::BadStatus)
        }
        Err(_) => return Err(Error::BadHeader),
    }

    let status = res
        .code
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or(Error::BadStatus)?;

    let version = match res.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(Error::BadStatus),
    };

    let mut map = HeaderMap::with_capacity(res.headers.len());
    for h in res.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| Error::BadHeader)?;
        let value = HeaderValue::from_bytes(h.value).map_err(|_| Error::BadHeader)?;
        map.append(name, value);
    }

    Ok(ResponseHead {
        status,
        version,
        headers: map,
    })
}

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyMode {
    /// No body at all (HEAD, 1xx, 204, 304).
    None,
    /// Exactly this many bytes.
    Length(u64),
    /// Transfer-Encoding: chunked.
    Chunked,
    /// Read until the server closes.
    CloseDelimited,
}

pub(crate) fn body_mode(
    method: &Method,
    status: StatusCode,
    headers: &HeaderMap,
) -> Result<BodyMode, Error> {
    // HEAD responses never have a body, regardless of Content-Length.
    if *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(BodyMode::None);
    }

    let chunked = headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case("chunked"));

    if chunked {
        return Ok(BodyMode::Chunked);
    }

    if let Some(value) = headers.get(CONTENT_LENGTH) {
        let len = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or(Error::BadFraming("invalid content-length"))?;
        return Ok(BodyMode::Length(len));
    }

    Ok(BodyMode::CloseDelimited)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    /// Expecting a chunk-size line.
    Size,
    /// Inside chunk data.
    Data,
    /// Expecting the CRLF that terminates a chunk.
    DataEnd,
    /// After the last-chunk, reading the trailer section.
    Trailers,
}

/// Incremental body decoder. Holds only decoding state; bytes come from the
/// connection's stream and receive buffer on each call.
#[derive(Debug)]
pub(crate) struct BodyState {
    mode: BodyMode,
    remaining: u64,
    phase: ChunkPhase,
    chunk_left: u64,
    done: bool,
}

impl BodyState {
    pub fn new(mode: BodyMode) -> Self {
        BodyState {
            mode,
            remaining: match mode {
                BodyMode::Length(n) => n,
                _ => 0,
            },
            phase: ChunkPhase::Size,
            chunk_left: 0,
            done: matches!(mode, BodyMode::None),
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// A close-delimited body consumes the connection; it cannot be reused.
    pub fn is_close_delimited(&self) -> bool {
        matches!(self.mode, BodyMode::CloseDelimited)
    }

    /// Read some decoded body bytes into `buf`.
    ///
    /// Returns 0 only when the body is complete (or `buf` is empty). Chunked
    /// trailers are appended to `trailers` when the final chunk is reached.
    pub fn read(
        &mut self,
        stream: &mut impl Read,
        rbuf: &mut RecvBuf,
        buf: &mut [u8],
        trailers: &mut HeaderMap,
    ) -> Result<usize, Error> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }

        match self.mode {
            BodyMode::None => Ok(0),
            BodyMode::Length(_) => self.read_length(stream, rbuf, buf),
            BodyMode::Chunked => self.read_chunked(stream, rbuf, buf, trailers),
            BodyMode::CloseDelimited => self.read_close_delimited(stream, rbuf, buf),
        }
    }

    fn read_length(
        &mut self,
        stream: &mut impl Read,
        rbuf: &mut RecvBuf,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        if self.remaining == 0 {
            return self.finish_length(rbuf);
        }

        if rbuf.unconsumed().is_empty() {
            let n = rbuf.fill_from(stream)?;
            if n == 0 {
                return Err(Error::UnexpectedEof);
            }
        }

        let avail = rbuf.unconsumed();
        let n = (avail.len() as u64).min(self.remaining).min(buf.len() as u64) as usize;
        buf[..n].copy_from_slice(&avail[..n]);
        rbuf.consume(n);
        self.remaining -= n as u64;

        if self.remaining == 0 {
            self.finish_length(rbuf)?;
        }

        Ok(n)
    }

    fn finish_length(&mut self, rbuf: &mut RecvBuf) -> Result<usize, Error> {
        // Anything already buffered past the declared length is a framing
        // violation, since exactly one response is outstanding.
        if !rbuf.unconsumed().is_empty() {
            return Err(Error::BadFraming("data after content-length"));
        }
        self.done = true;
        Ok(0)
    }

    fn read_chunked(
        &mut self,
        stream: &mut impl Read,
        rbuf: &mut RecvBuf,
        buf: &mut [u8],
        trailers: &mut HeaderMap,
    ) -> Result<usize, Error> {
        loop {
            match self.phase {
                ChunkPhase::Size => {
                    let line = read_line(stream, rbuf)?;
                    let size = parse_chunk_size(&line)?;
                    if size == 0 {
                        self.phase = ChunkPhase::Trailers;
                    } else {
                        self.chunk_left = size;
                        self.phase = ChunkPhase::Data;
                    }
                }
                ChunkPhase::Data => {
                    if rbuf.unconsumed().is_empty() {
                        let n = rbuf.fill_from(stream)?;
                        if n == 0 {
                            return Err(Error::UnexpectedEof);
                        }
                    }
                    let avail = rbuf.unconsumed();
                    let n =
                        (avail.len() as u64).min(self.chunk_left).min(buf.len() as u64) as usize;
                    buf[..n].copy_from_slice(&avail[..n]);
                    rbuf.consume(n);
                    self.chunk_left -= n as u64;
                    if self.chunk_left == 0 {
                        self.phase = ChunkPhase::DataEnd;
                    }
                    return Ok(n);
                }
                ChunkPhase::DataEnd => {
                    let line = read_line(stream, rbuf)?;
                    if !line.is_empty() {
                        return Err(Error::BadFraming("missing chunk separator"));
                    }
                    self.phase = ChunkPhase::Size;
                }
                ChunkPhase::Trailers => {
                    let line = read_line(stream, rbuf)?;
                    if line.is_empty() {
                        self.done = true;
                        return Ok(0);
                    }
                    append_trailer(trailers, &line)?;
                }
            }
        }
    }

    fn read_close_delimited(
        &mut self,
        stream: &mut impl Read,
        rbuf: &mut RecvBuf,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        if rbuf.unconsumed().is_empty() {
            let n = rbuf.fill_from(stream)?;
            if n == 0 {
                // Clean end of a close-delimited body.
                self.done = true;
                return Ok(0);
            }
        }

        let avail = rbuf.unconsumed();
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        rbuf.consume(n);
        Ok(n)
    }
}

/// Read one CRLF-terminated line, returning it without the terminator.
fn read_line(stream: &mut impl Read, rbuf: &mut RecvBuf) -> Result<Vec<u8>, Error> {
    loop {
        let data = rbuf.unconsumed();
        if let Some(pos) = data.iter().position(|b| *b == b'\n') {
            if pos == 0 || data[pos - 1] != b'\r' {
                return Err(Error::BadFraming("lf without cr"));
            }
            let line = data[..pos - 1].to_vec();
            rbuf.consume(pos + 1);
            return Ok(line);
        }

        if data.len() > MAX_LINE {
            return Err(Error::BadFraming("line too long"));
        }

        let n = rbuf.fill_from(stream)?;
        if n == 0 {
            return Err(Error::UnexpectedEof);
        }
    }
}

/// Chunk size in hex, ignoring any chunk extension after `;`.
fn parse_chunk_size(line: &[u8]) -> Result<u64, Error> {
    let line = match line.iter().position(|b| *b == b';') {
        Some(i) => &line[..i],
        None => line,
    };
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::BadFraming("bad chunk size"))?
        .trim();
    if text.is_empty() {
        return Err(Error::BadFraming("bad chunk size"));
    }
    u64::from_str_radix(text, 16).map_err(|_| Error::BadFraming("bad chunk size"))
}

/// Merge a trailer line into the response header map (RFC 7230 §4.1.2).
fn append_trailer(headers: &mut HeaderMap, line: &[u8]) -> Result<(), Error> {
    let pos = line
        .iter()
        .position(|b| *b == b':')
        .ok_or(Error::BadHeader)?;
    let name = HeaderName::from_bytes(&line[..pos]).map_err(|_| Error::BadHeader)?;
    let value = std::str::from_utf8(&line[pos + 1..])
        .map_err(|_| Error::BadHeader)?
        .trim();
    let value = HeaderValue::from_str(value).map_err(|_| Error::BadHeader)?;
    headers.append(name, value);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn read_all(mode: BodyMode, wire: &[u8]) -> Result<(Vec<u8>, HeaderMap), Error> {
        let mut stream = Cursor::new(wire.to_vec());
        let mut rbuf = RecvBuf::new();
        let mut state = BodyState::new(mode);
        let mut trailers = HeaderMap::new();

        let mut out = Vec::new();
        let mut buf = [0_u8; 7]; // deliberately small to force re-entry
        while !state.is_done() {
            let n = state.read(&mut stream, &mut rbuf, &mut buf, &mut trailers)?;
            out.extend_from_slice(&buf[..n]);
        }
        Ok((out, trailers))
    }

    #[test]
    fn parses_head() {
        let wire = b"HTTP/1.1 302 Found\r\nLocation: /next\r\nContent-Length: 0\r\n\r\n";
        let mut rbuf = RecvBuf::new();
        let head = read_head(&mut Cursor::new(wire.to_vec()), &mut rbuf).unwrap();

        assert_eq!(head.status, StatusCode::FOUND);
        assert_eq!(head.version, Version::HTTP_11);
        assert_eq!(head.headers.get("location").unwrap(), "/next");
        assert!(rbuf.unconsumed().is_empty());
    }

    #[test]
    fn head_keeps_body_prefix_in_buffer() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let mut rbuf = RecvBuf::new();
        let head = read_head(&mut Cursor::new(wire.to_vec()), &mut rbuf).unwrap();

        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(rbuf.unconsumed(), b"hello");
    }

    #[test]
    fn truncated_head_is_eof() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-";
        let mut rbuf = RecvBuf::new();
        let err = read_head(&mut Cursor::new(wire.to_vec()), &mut rbuf).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof));
    }

    #[test]
    fn garbage_status_line() {
        let wire = b"ICY 200 OK\r\n\r\n";
        let mut rbuf = RecvBuf::new();
        let err = read_head(&mut Cursor::new(wire.to_vec()), &mut rbuf).unwrap_err();
        assert!(matches!(err, Error::BadStatus));
    }

    #[test]
    fn body_mode_rules() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, "42".parse().unwrap());

        assert_eq!(
            body_mode(&Method::GET, StatusCode::OK, &headers).unwrap(),
            BodyMode::Length(42)
        );
        assert_eq!(
            body_mode(&Method::HEAD, StatusCode::OK, &headers).unwrap(),
            BodyMode::None
        );
        assert_eq!(
            body_mode(&Method::GET, StatusCode::NO_CONTENT, &headers).unwrap(),
            BodyMode::None
        );

        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, "chunked".parse().unwrap());
        assert_eq!(
            body_mode(&Method::GET, StatusCode::OK, &headers).unwrap(),
            BodyMode::Chunked
        );

        assert_eq!(
            body_mode(&Method::GET, StatusCode::OK, &HeaderMap::new()).unwrap(),
            BodyMode::CloseDelimited
        );
    }

    #[test]
    fn length_delimited_body() {
        let (out, _) = read_all(BodyMode::Length(11), b"hello world").unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn length_truncation_is_eof() {
        let err = read_all(BodyMode::Length(11), b"hello").unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof));
    }

    #[test]
    fn excess_data_is_bad_framing() {
        let err = read_all(BodyMode::Length(5), b"hello EXTRA").unwrap_err();
        assert!(matches!(err, Error::BadFraming(_)));
    }

    #[test]
    fn chunked_body() {
        let wire = b"3\r\nhel\r\nb\r\nlo world!!!\r\n0\r\n\r\n";
        let (out, trailers) = read_all(BodyMode::Chunked, wire).unwrap();
        assert_eq!(out, b"hello world!!!");
        assert!(trailers.is_empty());
    }

    #[test]
    fn chunked_with_extension_and_trailers() {
        let wire = b"5;ext=1\r\nhello\r\n0\r\nExpires: never\r\nX-Sum: 99\r\n\r\n";
        let (out, trailers) = read_all(BodyMode::Chunked, wire).unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(trailers.get("expires").unwrap(), "never");
        assert_eq!(trailers.get("x-sum").unwrap(), "99");
    }

    #[test]
    fn chunked_bad_size() {
        let err = read_all(BodyMode::Chunked, b"xyz\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::BadFraming(_)));
    }

    #[test]
    fn chunked_missing_separator() {
        let wire = b"3\r\nhelXX\r\n0\r\n\r\n";
        let err = read_all(BodyMode::Chunked, wire).unwrap_err();
        assert!(matches!(err, Error::BadFraming(_)));
    }

    #[test]
    fn chunked_truncated_is_eof() {
        let err = read_all(BodyMode::Chunked, b"5\r\nhe").unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof));
    }

    #[test]
    fn close_delimited_reads_until_eof() {
        let (out, _) = read_all(BodyMode::CloseDelimited, b"anything goes").unwrap();
        assert_eq!(out, b"anything goes");
    }
}
