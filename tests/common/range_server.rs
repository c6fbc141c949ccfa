//! Minimal HTTP/1.1 server supporting HEAD and Range GET, for integration
//! tests. Adapted from the pack's Debian Download Manager test helper of
//! the same name; extended with `etag`/`last_modified` headers and a
//! `fail_first_n_requests` knob so tests can exercise resume-validation
//! and retry-then-succeed paths without a mocking crate.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone)]
pub struct RangeServerOptions {
    pub head_allowed: bool,
    pub support_ranges: bool,
    pub advertise_ranges: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// The first N requests (HEAD or GET) return 503; afterwards the
    /// server behaves normally.
    pub fail_first_n_requests: usize,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            advertise_ranges: true,
            etag: None,
            last_modified: None,
            fail_first_n_requests: 0,
        }
    }
}

pub struct RangeServer {
    pub base_url: String,
    request_count: Arc<AtomicUsize>,
}

impl RangeServer {
    pub fn requests_seen(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }
}

pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let request_count = Arc::new(AtomicUsize::new(0));
    let counter = request_count.clone();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = opts.clone();
            let counter = counter.clone();
            thread::spawn(move || handle(stream, &body, &opts, &counter));
        }
    });
    RangeServer {
        base_url: format!("http://127.0.0.1:{port}/"),
        request_count,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    body: &[u8],
    opts: &RangeServerOptions,
    counter: &AtomicUsize,
) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, range) = parse_request(request);

    // Only GET attempts count against `fail_first_n_requests` so the HEAD
    // probe that precedes segment downloads always succeeds.
    if method.eq_ignore_ascii_case("GET") {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        if attempt < opts.fail_first_n_requests {
            let _ = stream.write_all(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n");
            return;
        }
    }

    let total = body.len() as u64;
    let mut extra_headers = String::new();
    if let Some(etag) = &opts.etag {
        extra_headers.push_str(&format!("ETag: {etag}\r\n"));
    }
    if let Some(last_modified) = &opts.last_modified {
        extra_headers.push_str(&format!("Last-Modified: {last_modified}\r\n"));
    }

    if method.eq_ignore_ascii_case("HEAD") {
        if !opts.head_allowed {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n");
            return;
        }
        let accept_ranges = if opts.advertise_ranges && opts.support_ranges {
            "Accept-Ranges: bytes\r\n"
        } else {
            ""
        };
        let response =
            format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\n{accept_ranges}{extra_headers}\r\n");
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if method.eq_ignore_ascii_case("GET") {
        let (status, range_header, slice) = if opts.support_ranges {
            if let Some((start, end_incl)) = range {
                let start = start.min(total);
                let end_incl = end_incl.min(total.saturating_sub(1));
                if start > end_incl {
                    ("416 Range Not Satisfiable", format!("bytes */{total}"), &body[0..0])
                } else {
                    let start = start as usize;
                    let end_excl = (end_incl + 1).min(total) as usize;
                    let slice = body.get(start..end_excl).unwrap_or(&body[0..0]);
                    (
                        "206 Partial Content",
                        format!("bytes {}-{}/{}", start, end_excl.saturating_sub(1), total),
                        slice,
                    )
                }
            } else {
                ("200 OK", format!("bytes 0-{}/{}", total.saturating_sub(1), total), body)
            }
        } else {
            ("200 OK", format!("bytes 0-{}/{}", total.saturating_sub(1), total), body)
        };
        let accept_ranges = if opts.advertise_ranges && opts.support_ranges {
            "Accept-Ranges: bytes\r\n"
        } else {
            ""
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Range: {}\r\n{}{}\r\n",
            status,
            slice.len(),
            range_header,
            accept_ranges,
            extra_headers
        );
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.write_all(slice);
        return;
    }

    let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n");
}

fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if value.to_lowercase().starts_with("bytes=") {
                    let part = value[6..].trim();
                    if let Some((a, b)) = part.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = b.trim();
                        let end_incl = if end.is_empty() { u64::MAX } else { end.parse::<u64>().unwrap_or(0) };
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, range)
}
