//! In-process HTTP server for tests.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use crate::dates;
use crate::resolver::Resolver;

pub struct TestServer {
    pub port: u16,
    pub done: Arc<AtomicBool>,
}

impl TestServer {
    pub fn new(handler: fn(TcpStream) -> io::Result<()>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let done = Arc::new(AtomicBool::new(false));
        let done_clone = done.clone();

        thread::spawn(move || {
            for stream in listener.incoming() {
                if let Err(e) = stream {
                    eprintln!("testserver: accept: {}", e);
                    break;
                }
                if done.load(Ordering::SeqCst) {
                    break;
                } else {
                    thread::spawn(move || handler(stream.unwrap()));
                }
            }
        });

        // Ensure the server accepts connections before returning.
        while let Err(e) = TcpStream::connect(format!("127.0.0.1:{}", port)) {
            if e.kind() == io::ErrorKind::ConnectionRefused {
                thread::sleep(Duration::from_millis(10));
                continue;
            }
            eprintln!("testserver: pre-connect: {}", e);
        }

        TestServer {
            port,
            done: done_clone,
        }
    }

    /// A resolver that sends every host to this server.
    pub fn resolver(&self) -> impl Resolver {
        let port = self.port;
        move |_netloc: &str| -> io::Result<Vec<SocketAddr>> {
            Ok(vec![([127, 0, 0, 1], port).into()])
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.done.store(true, Ordering::SeqCst);
        // Connect once to unblock the listen loop.
        let _ = TcpStream::connect(format!("127.0.0.1:{}", self.port));
    }
}

/// One parsed request: the request line plus raw header lines.
pub struct TestRequest(Vec<String>);

impl TestRequest {
    pub fn method(&self) -> &str {
        self.0
            .first()
            .and_then(|l| l.split(' ').next())
            .unwrap_or("")
    }

    pub fn path(&self) -> &str {
        self.0
            .first()
            .and_then(|l| l.split(' ').nth(1))
            .unwrap_or("")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.0[1..]
            .iter()
            .find(|l| l.to_ascii_lowercase().starts_with(&prefix))
            .map(|l| l[prefix.len()..].trim())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Read one request head off the stream. Empty on closed connection.
pub fn read_request(reader: &mut BufReader<TcpStream>) -> TestRequest {
    let mut lines = vec![];
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        lines.push(line.to_string());
    }

    let request = TestRequest(lines);

    // Requests with a body carry Content-Length in these tests.
    if let Some(len) = request.header("content-length").and_then(|v| v.parse().ok()) {
        let mut body = vec![0_u8; len];
        let _ = reader.read_exact(&mut body);
    }

    request
}

/// Write a canned response with Content-Length framing and a Date header.
pub fn respond(
    stream: &mut TcpStream,
    status: &str,
    headers: &[&str],
    body: &[u8],
) -> io::Result<()> {
    write!(stream, "HTTP/1.1 {}\r\n", status)?;
    write!(stream, "Date: {}\r\n", dates::format(SystemTime::now()))?;
    for h in headers {
        write!(stream, "{}\r\n", h)?;
    }
    write!(stream, "Content-Length: {}\r\n\r\n", body.len())?;
    stream.write_all(body)?;
    stream.flush()
}
