//! reqwest transport against a local responder.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use callwire_core::{CallError, ProtocolError, RequestContext, TransportErrorKind, TransportSettings};
use callwire_fetch::{CompletionFuture, Fetcher, HttpTransport, RequestDescriptor, as_is};

use common::{closed_port, parse_int, serve, serve_stalled, url_for};

fn transport() -> HttpTransport {
    HttpTransport::new().unwrap()
}

#[tokio::test]
async fn test_get_returns_status_and_body() {
    common::init_tracing();
    let (addr, requests) = serve(200, b"hello", 1);
    let request = RequestDescriptor::new(url_for(addr, "/shard/s1"));

    let outcome = Fetcher::new()
        .start(&transport(), &request, Some(Duration::from_secs(5)), None)
        .fetched()
        .await;

    assert_eq!(outcome.status_code(), Some(200));
    assert_eq!(outcome.received_data(), b"hello");

    let raw = String::from_utf8(requests.recv().unwrap()).unwrap();
    assert!(raw.starts_with("GET /shard/s1 HTTP/1.1\r\n"), "{raw}");
}

#[tokio::test]
async fn test_post_sends_api_headers_and_payload() {
    let (addr, requests) = serve(200, b"", 1);
    let request = RequestDescriptor::for_api(url_for(addr, "/edam/note"));

    let outcome = Fetcher::new()
        .start(
            &transport(),
            &request,
            Some(Duration::from_secs(5)),
            Some(Bytes::from_static(b"thrift-bytes")),
        )
        .fetched()
        .await;
    assert!(!outcome.is_error());

    let raw = String::from_utf8(requests.recv().unwrap()).unwrap();
    let lowered = raw.to_ascii_lowercase();
    assert!(raw.starts_with("POST /edam/note HTTP/1.1\r\n"), "{raw}");
    assert!(lowered.contains("content-type: application/x-thrift\r\n"), "{raw}");
    assert!(lowered.contains("accept: application/x-thrift\r\n"), "{raw}");
    assert!(lowered.contains("user-agent: callwire/"), "{raw}");
    assert!(raw.ends_with("\r\n\r\nthrift-bytes"), "{raw}");
}

#[tokio::test]
async fn test_status_404_reaches_caller_as_protocol_error() {
    let (addr, _requests) = serve(404, b"missing", 1);
    let transport = Arc::new(transport());
    let context = Arc::new(RequestContext::new(""));

    let completion = CompletionFuture::builder(transport, context)
        .url(url_for(addr, "/missing").as_str(), parse_int())
        .finished()
        .await;

    assert_eq!(
        completion.result,
        Err(CallError::Protocol(ProtocolError::Status(404)))
    );
}

#[tokio::test]
async fn test_refused_connection_is_transport_error() {
    let addr = closed_port();
    let request = RequestDescriptor::new(url_for(addr, "/"));

    let outcome = Fetcher::new()
        .start(&transport(), &request, Some(Duration::from_secs(5)), None)
        .fetched()
        .await;

    let err = outcome.error().cloned().unwrap();
    assert!(
        matches!(
            err.kind,
            TransportErrorKind::ConnectionRefused | TransportErrorKind::ConnectionFailed
        ),
        "unexpected classification: {err}"
    );
}

#[tokio::test]
async fn test_stalled_server_hits_watchdog() {
    let addr = serve_stalled(Duration::from_secs(5));
    let request = RequestDescriptor::new(url_for(addr, "/slow"));

    let started = std::time::Instant::now();
    let outcome = Fetcher::new()
        .with_watchdog_interval(Duration::from_millis(50))
        .start(&transport(), &request, Some(Duration::from_millis(300)), None)
        .fetched()
        .await;

    assert!(outcome.error().is_some_and(|e| e.is_timeout()));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_settings_user_agent_override() {
    let (addr, requests) = serve(200, b"", 1);
    let settings = TransportSettings {
        user_agent: Some("notes-sync/2.1".to_string()),
        ..TransportSettings::default()
    };
    let transport = HttpTransport::with_settings(&settings).unwrap();

    let completion = CompletionFuture::builder(Arc::new(transport), Arc::new(RequestContext::default()))
        .request(RequestDescriptor::new(url_for(addr, "/")), as_is())
        .finished()
        .await;
    assert_eq!(completion.result, Ok(Bytes::new()));

    let raw = String::from_utf8(requests.recv().unwrap()).unwrap().to_ascii_lowercase();
    assert!(raw.contains("user-agent: notes-sync/2.1\r\n"), "{raw}");
}
