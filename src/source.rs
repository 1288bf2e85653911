//! Request body sources.
//!
//! A [`Source`] produces the bytes of a request body. It declares an
//! optional total size (no size means the body is sent with
//! `Transfer-Encoding: chunked`) and a default content type used when the
//! caller did not set one. Sources can be reset so a redirect retry can
//! re-send the body from the start.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use url::form_urlencoded;

/// A request body.
pub trait Source: Send {
    /// Total number of bytes this source will produce, if known.
    ///
    /// `None` makes the request use `Transfer-Encoding: chunked`.
    fn size(&self) -> Option<u64>;

    /// Content type to use when the caller did not set one.
    ///
    /// An empty string means no default.
    fn default_content_type(&self) -> &str {
        ""
    }

    /// Fill `buf` with body data.
    ///
    /// Returns the number of bytes written and whether more data remains.
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<(usize, bool)>;

    /// Restart from the beginning, before a redirect re-sends the body.
    fn reset(&mut self) -> io::Result<()>;
}

/// The empty body used by bodyless requests (GET, HEAD, ...).
pub(crate) struct Empty;

impl Source for Empty {
    fn size(&self) -> Option<u64> {
        Some(0)
    }

    fn read_some(&mut self, _buf: &mut [u8]) -> io::Result<(usize, bool)> {
        Ok((0, false))
    }

    fn reset(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An in-memory body.
pub(crate) struct Bytes {
    data: Vec<u8>,
    pos: usize,
    content_type: &'static str,
}

impl Bytes {
    pub fn new(data: Vec<u8>, content_type: &'static str) -> Self {
        Bytes {
            data,
            pos: 0,
            content_type,
        }
    }
}

impl Source for Bytes {
    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn default_content_type(&self) -> &str {
        self.content_type
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<(usize, bool)> {
        let left = &self.data[self.pos..];
        let n = left.len().min(buf.len());
        buf[..n].copy_from_slice(&left[..n]);
        self.pos += n;
        Ok((n, self.pos < self.data.len()))
    }

    fn reset(&mut self) -> io::Result<()> {
        self.pos = 0;
        Ok(())
    }
}

/// An `application/x-www-form-urlencoded` body built from key/value pairs.
///
/// ```
/// let form = sreq::Form::new()
///     .add("name", "martin")
///     .add("lang", "rust");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Form {
    pairs: Vec<(String, String)>,
    encoded: Option<Vec<u8>>,
    pos: usize,
}

impl Form {
    /// An empty form.
    pub fn new() -> Self {
        Form::default()
    }

    /// Add one key/value pair.
    #[must_use]
    pub fn add(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self.encoded = None;
        self
    }

    fn serialize(&self) -> Vec<u8> {
        let mut ser = form_urlencoded::Serializer::new(String::new());
        for (k, v) in &self.pairs {
            ser.append_pair(k, v);
        }
        ser.finish().into_bytes()
    }

    fn encoded(&mut self) -> &[u8] {
        if self.encoded.is_none() {
            self.encoded = Some(self.serialize());
        }
        self.encoded.as_deref().unwrap()
    }
}

impl Source for Form {
    fn size(&self) -> Option<u64> {
        let len = match &self.encoded {
            Some(e) => e.len(),
            None => self.serialize().len(),
        };
        Some(len as u64)
    }

    fn default_content_type(&self) -> &str {
        "application/x-www-form-urlencoded"
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<(usize, bool)> {
        let pos = self.pos;
        let data = self.encoded();
        let left = &data[pos..];
        let n = left.len().min(buf.len());
        buf[..n].copy_from_slice(&left[..n]);
        let total = data.len();
        self.pos += n;
        Ok((n, self.pos < total))
    }

    fn reset(&mut self) -> io::Result<()> {
        self.pos = 0;
        Ok(())
    }
}

/// A file body. Size comes from metadata, reset seeks back to the start.
pub(crate) struct FileSource {
    file: File,
    size: Option<u64>,
}

impl FileSource {
    pub fn new(file: File) -> Self {
        let size = file.metadata().ok().map(|m| m.len());
        FileSource { file, size }
    }
}

impl Source for FileSource {
    fn size(&self) -> Option<u64> {
        self.size
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<(usize, bool)> {
        let n = self.file.read(buf)?;
        Ok((n, n > 0))
    }

    fn reset(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

/// An arbitrary reader. Size is unknown, so the body is sent chunked.
/// Readers cannot rewind, which makes redirects that re-send the body fail.
pub(crate) struct ReaderSource {
    reader: Box<dyn Read + Send>,
    started: bool,
}

impl ReaderSource {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        ReaderSource {
            reader: Box::new(reader),
            started: false,
        }
    }
}

impl Source for ReaderSource {
    fn size(&self) -> Option<u64> {
        None
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<(usize, bool)> {
        self.started = true;
        let n = self.reader.read(buf)?;
        Ok((n, n > 0))
    }

    fn reset(&mut self) -> io::Result<()> {
        if self.started {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "reader body cannot be re-sent",
            ));
        }
        Ok(())
    }
}

/// Wrap an arbitrary reader as a request body.
///
/// The size is unknown, so the body is sent with
/// `Transfer-Encoding: chunked`. A redirect that needs to re-send the body
/// fails, since a reader cannot rewind.
///
/// ```no_run
/// let file = std::fs::File::open("upload.bin")?;
/// sreq::post("http://example.com/ingest").send(sreq::from_reader(file))?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn from_reader(reader: impl Read + Send + 'static) -> Box<dyn Source> {
    Box::new(ReaderSource::new(reader))
}

/// Conversion into a [`Source`], implemented for the common body types.
pub trait AsSource {
    /// Convert self into a boxed source.
    fn as_source(self) -> Box<dyn Source>;
}

impl AsSource for () {
    fn as_source(self) -> Box<dyn Source> {
        Box::new(Empty)
    }
}

impl AsSource for &str {
    fn as_source(self) -> Box<dyn Source> {
        Box::new(Bytes::new(self.as_bytes().to_vec(), "text/plain; charset=utf-8"))
    }
}

impl AsSource for String {
    fn as_source(self) -> Box<dyn Source> {
        Box::new(Bytes::new(self.into_bytes(), "text/plain; charset=utf-8"))
    }
}

impl AsSource for &String {
    fn as_source(self) -> Box<dyn Source> {
        self.as_str().as_source()
    }
}

impl AsSource for &[u8] {
    fn as_source(self) -> Box<dyn Source> {
        Box::new(Bytes::new(self.to_vec(), "application/octet-stream"))
    }
}

impl AsSource for Vec<u8> {
    fn as_source(self) -> Box<dyn Source> {
        Box::new(Bytes::new(self, "application/octet-stream"))
    }
}

impl AsSource for &Vec<u8> {
    fn as_source(self) -> Box<dyn Source> {
        self.as_slice().as_source()
    }
}

impl<const N: usize> AsSource for &[u8; N] {
    fn as_source(self) -> Box<dyn Source> {
        self.as_slice().as_source()
    }
}

impl AsSource for Form {
    fn as_source(self) -> Box<dyn Source> {
        Box::new(self)
    }
}

impl AsSource for File {
    fn as_source(self) -> Box<dyn Source> {
        Box::new(FileSource::new(self))
    }
}

impl AsSource for Box<dyn Source> {
    fn as_source(self) -> Box<dyn Source> {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bytes_source_reads_and_resets() {
        let mut s = Bytes::new(b"hello world".to_vec(), "text/plain");
        assert_eq!(s.size(), Some(11));

        let mut buf = [0u8; 5];
        assert!(matches!(s.read_some(&mut buf), Ok((5, true))));
        assert_eq!(&buf, b"hello");
        let mut buf = [0u8; 16];
        assert!(matches!(s.read_some(&mut buf), Ok((6, false))));

        s.reset().unwrap();
        let mut buf = [0u8; 16];
        assert!(matches!(s.read_some(&mut buf), Ok((11, false))));
    }

    #[test]
    fn form_encodes_pairs() {
        let mut form = Form::new().add("name", "foo bar").add("x", "1&2");
        assert_eq!(form.default_content_type(), "application/x-www-form-urlencoded");

        let mut buf = [0u8; 64];
        let (n, more) = form.read_some(&mut buf).unwrap();
        assert!(!more);
        assert_eq!(&buf[..n], b"name=foo+bar&x=1%262");
        assert_eq!(form.size(), Some(n as u64));
    }

    #[test]
    fn reader_source_is_chunked_and_cannot_rewind() {
        let mut s = ReaderSource::new(io::Cursor::new(b"abc".to_vec()));
        assert_eq!(s.size(), None);
        assert!(s.reset().is_ok());

        let mut buf = [0u8; 8];
        let (n, _) = s.read_some(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc");
        assert!(s.reset().is_err());
    }
}
