use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::fmt;
use std::time::Duration;

#[cfg(feature = "rustls")]
use rustls::{ClientConnection, StreamOwned};

use crate::util::IoResultExt;
use crate::Error;

/// Transport under a connection: plain TCP or TLS-over-TCP.
pub(crate) enum Stream {
    Http(TcpStream),
    #[cfg(feature = "rustls")]
    Https(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Stream {
    pub fn is_secure(&self) -> bool {
        match self {
            Stream::Http(_) => false,
            #[cfg(feature = "rustls")]
            Stream::Https(_) => true,
        }
    }

    fn socket(&self) -> &TcpStream {
        match self {
            Stream::Http(sock) => sock,
            #[cfg(feature = "rustls")]
            Stream::Https(stream) => &stream.sock,
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket().set_read_timeout(none_if_zero(timeout))
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket().set_write_timeout(none_if_zero(timeout))
    }

    /// Graceful shutdown. For TLS this also queues a close_notify.
    pub fn shutdown(&mut self) {
        #[cfg(feature = "rustls")]
        if let Stream::Https(stream) = self {
            stream.conn.send_close_notify();
            // Flushing the close_notify is best effort, the socket may
            // already be gone.
            let _ = stream.flush();
        }
        let _ = self.socket().shutdown(Shutdown::Both);
    }
}

/// Rust's socket api returns Err when setting a zero timeout.
fn none_if_zero(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|t| !t.is_zero())
}

/// Open the TCP leg of a connection.
pub(crate) fn connect_tcp(
    addr: &SocketAddr,
    timeout: Option<Duration>,
) -> Result<TcpStream, Error> {
    let stream = match none_if_zero(timeout) {
        Some(t) => TcpStream::connect_timeout(addr, t),
        None => TcpStream::connect(addr),
    }
    .map_err(|e| Error::ConnectFailed(format!("{}: {}", addr, e)))?;

    stream.set_nodelay(true).ok();

    Ok(stream)
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Http(sock) => sock.read(buf),
            #[cfg(feature = "rustls")]
            Stream::Https(stream) => stream.read(buf),
        }
        .normalize_would_block()
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Http(sock) => sock.write(buf),
            #[cfg(feature = "rustls")]
            Stream::Https(stream) => stream.write(buf),
        }
        .normalize_would_block()
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Http(sock) => sock.flush(),
            #[cfg(feature = "rustls")]
            Stream::Https(stream) => stream.flush(),
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Stream[{}, {:?}]",
            match self {
                Stream::Http(_) => "http",
                #[cfg(feature = "rustls")]
                Stream::Https(_) => "https",
            },
            self.socket().peer_addr().ok()
        )
    }
}
