//! Shared test fixtures: a minimal blocking HTTP upstream.
#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// A tiny single-purpose HTTP/1.1 upstream running on a background thread.
///
/// Serves a fixed status and body (or echoes the request target as JSON),
/// closes the connection after each response, and counts the requests it
/// received. The listener thread runs until the process exits, which is fine
/// for tests.
pub struct TestUpstream {
    address: String,
    hits: Arc<AtomicUsize>,
}

enum Mode {
    Fixed { status: u16, body: String },
    Echo,
}

impl TestUpstream {
    /// Serves `status` with a fixed JSON body.
    pub fn start(status: u16, body: &str) -> Self {
        Self::spawn(Mode::Fixed { status, body: body.to_string() })
    }

    /// Serves 200 with `{"path": "<path>", "query": "<query>"}`.
    pub fn start_echo() -> Self {
        Self::spawn(Mode::Echo)
    }

    fn spawn(mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind test upstream");
        let address = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));

        let thread_hits = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                thread_hits.fetch_add(1, Ordering::SeqCst);
                let _ = handle_connection(stream, &mode);
            }
        });

        Self { address, hits }
    }

    /// Base URL, e.g. `http://127.0.0.1:41234`.
    pub fn url(&self) -> &str {
        &self.address
    }

    /// Number of requests this upstream has received.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn handle_connection(stream: TcpStream, mode: &Mode) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line == "\r\n" || line.is_empty() {
            break;
        }
        if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }
    if content_length > 0 {
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body)?;
    }

    let (status, body) = match mode {
        Mode::Fixed { status, body } => (*status, body.clone()),
        Mode::Echo => {
            let target = request_line.split_whitespace().nth(1).unwrap_or("/");
            let (path, query) = match target.split_once('?') {
                Some((p, q)) => (p, q),
                None => (target, ""),
            };
            (200, format!("{{\"path\":\"{}\",\"query\":\"{}\"}}", path, query))
        }
    };

    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    };

    let mut stream = stream;
    write!(
        stream,
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    )?;
    stream.flush()
}
