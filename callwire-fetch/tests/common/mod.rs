//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Mutex, mpsc};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use callwire_core::{DecodeFailure, TransportError, TransportErrorKind};
use callwire_fetch::{
    Decoder, EventSender, RequestDescriptor, Transport, TransportEvent, TransportReply,
};
use reqwest::header::HeaderMap;
use tracing_subscriber::EnvFilter;
use url::Url;

pub const API_URL: &str = "https://www.example.com/edam/note/s1";

/// Installs a test subscriber once. `RUST_LOG` controls the output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Decoders
// ============================================================================

pub fn parse_int() -> Decoder<i64> {
    Box::new(|body: Bytes| {
        let text = String::from_utf8_lossy(&body).into_owned();
        text.trim()
            .parse::<i64>()
            .map_err(|_| DecodeFailure::other(format!("{text} is not numeric")))
    })
}

// ============================================================================
// Scripted Transport
// ============================================================================

/// Events with the delay to wait before each one.
pub type Script = Vec<(Duration, TransportEvent)>;

pub fn finished(status: u16, body: &'static [u8]) -> TransportEvent {
    TransportEvent::Finished {
        status,
        body: Bytes::from_static(body),
    }
}

pub fn progress(transferred: u64) -> TransportEvent {
    TransportEvent::Progress {
        transferred,
        total: None,
    }
}

pub fn failed(kind: TransportErrorKind, message: &str) -> TransportEvent {
    TransportEvent::Failed(TransportError::new(kind, message))
}

/// A dispatch seen by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub url: Url,
    pub headers: HeaderMap,
    pub payload: Option<Bytes>,
}

/// In-memory transport replaying one script per dispatch.
///
/// A dispatch with no script left (or whose script runs out) keeps the
/// exchange open without further events, like a stalled server.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    dispatches: Mutex<Vec<Dispatch>>,
    senders: Mutex<Vec<EventSender>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, script: Script) -> Self {
        self.push_script(script);
        self
    }

    pub fn push_script(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatches.lock().unwrap().len()
    }

    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.dispatches.lock().unwrap().clone()
    }

    /// True when every exchange has been detached by its owner.
    pub fn all_detached(&self) -> bool {
        self.senders.lock().unwrap().iter().all(EventSender::is_closed)
    }
}

impl Transport for ScriptedTransport {
    fn dispatch(&self, request: &RequestDescriptor, payload: Option<Bytes>) -> TransportReply {
        self.dispatches.lock().unwrap().push(Dispatch {
            url: request.url().clone(),
            headers: request.headers().clone(),
            payload,
        });

        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        let (tx, mut reply) = TransportReply::channel();
        self.senders.lock().unwrap().push(tx.clone());

        reply.attach_task(tokio::spawn(async move {
            for (delay, event) in script {
                tokio::time::sleep(delay).await;
                if tx.send(event).is_err() {
                    return;
                }
            }
            std::future::pending::<()>().await;
        }));
        reply
    }
}

// ============================================================================
// Local HTTP Server
// ============================================================================

/// Minimal HTTP/1.1 responder on a background thread.
///
/// Serves `connections` requests with the same response and forwards each raw
/// request (head and body) through the returned channel.
pub fn serve(
    status: u16,
    body: &'static [u8],
    connections: usize,
) -> (SocketAddr, mpsc::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for _ in 0..connections {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let request = read_request(&mut stream);
            let _ = tx.send(request);

            let head = format!(
                "HTTP/1.1 {status} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                reason(status),
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(body);
            let _ = stream.flush();
        }
    });

    (addr, rx)
}

/// Accepts a single keep-alive connection and answers up to `requests`
/// requests on it. Further connection attempts are refused.
pub fn serve_keep_alive(status: u16, body: &'static [u8], requests: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        drop(listener);

        for _ in 0..requests {
            if read_request(&mut stream).is_empty() {
                return;
            }
            let head = format!(
                "HTTP/1.1 {status} {}\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
                reason(status),
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(body);
            let _ = stream.flush();
        }
    });

    addr
}

/// Accepts one connection, reads the request and then never answers.
pub fn serve_stalled(hold: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let _ = read_request(&mut stream);
            thread::sleep(hold);
        }
    });

    addr
}

/// An address nothing listens on.
pub fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub fn url_for(addr: SocketAddr, path: &str) -> Url {
    Url::parse(&format!("http://{addr}{path}")).unwrap()
}

fn read_request(stream: &mut TcpStream) -> Vec<u8> {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find(&data, b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return data,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    };

    let head = String::from_utf8_lossy(&data[..head_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while data.len() < head_end + content_length {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    }

    data
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

