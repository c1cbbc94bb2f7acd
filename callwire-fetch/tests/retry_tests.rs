//! Retry orchestration over fresh attempts.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use callwire_core::{CallError, ProtocolError, RequestContext, TransportErrorKind};
use callwire_fetch::{CompletionFuture, RetryStrategy, call_with_retry};
use tokio::time::Instant;

use common::{API_URL, ScriptedTransport, failed, finished, parse_int};

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn refused() -> common::Script {
    vec![(ms(10), failed(TransportErrorKind::ConnectionRefused, "Connection refused"))]
}

#[tokio::test(start_paused = true)]
async fn test_retries_transport_failures_until_success() {
    common::init_tracing();
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_script(refused())
            .with_script(refused())
            .with_script(vec![(ms(10), finished(200, b"42"))]),
    );
    let context = Arc::new(RequestContext::new("token"));
    let first_id = context.request_id();

    let completion = call_with_retry(&RetryStrategy::default(), context, |ctx| {
        CompletionFuture::builder(transport.clone(), ctx).url(API_URL, parse_int())
    })
    .await;

    assert_eq!(completion.result, Ok(42));
    assert_eq!(transport.dispatch_count(), 3);
    assert_eq!(completion.context.request_id(), first_id);
}

#[tokio::test(start_paused = true)]
async fn test_protocol_error_is_final() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_script(vec![(ms(10), finished(500, b""))])
            .with_script(vec![(ms(10), finished(200, b"1"))]),
    );

    let completion = call_with_retry(
        &RetryStrategy::default(),
        Arc::new(RequestContext::new("token")),
        |ctx| CompletionFuture::builder(transport.clone(), ctx).url(API_URL, parse_int()),
    )
    .await;

    assert_eq!(
        completion.result,
        Err(CallError::Protocol(ProtocolError::Status(500)))
    );
    assert_eq!(transport.dispatch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_decode_error_is_final() {
    let transport = Arc::new(ScriptedTransport::new().with_script(vec![(ms(10), finished(200, b"x"))]));

    let completion = call_with_retry(
        &RetryStrategy::default(),
        Arc::new(RequestContext::new("token")),
        |ctx| CompletionFuture::builder(transport.clone(), ctx).url(API_URL, parse_int()),
    )
    .await;

    assert!(matches!(completion.result, Err(CallError::Decode(_))));
    assert_eq!(transport.dispatch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_retry_count() {
    let transport = ScriptedTransport::new();
    for _ in 0..10 {
        transport.push_script(refused());
    }
    let transport = Arc::new(transport);
    let context = Arc::new(RequestContext::builder().max_retry_count(2).build());

    let completion = call_with_retry(&RetryStrategy::default(), context, |ctx| {
        CompletionFuture::builder(transport.clone(), ctx).url(API_URL, parse_int())
    })
    .await;

    assert!(completion.result.unwrap_err().is_transport());
    assert_eq!(transport.dispatch_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_grow_up_to_ceiling() {
    let transport = Arc::new(ScriptedTransport::new());
    let context = Arc::new(
        RequestContext::builder()
            .request_timeout(Some(Duration::from_secs(1)))
            .grow_timeout_exponentially(true)
            .max_request_timeout(Duration::from_secs(3))
            .max_retry_count(3)
            .build(),
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let completion = call_with_retry(&RetryStrategy::default(), context, |ctx| {
        seen.lock().unwrap().push(ctx.request_timeout());
        CompletionFuture::builder(transport.clone(), ctx)
            .watchdog_interval(ms(100))
            .url(API_URL, parse_int())
    })
    .await;

    assert!(completion.result.unwrap_err().is_timeout());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            Some(Duration::from_secs(1)),
            Some(Duration::from_secs(2)),
            Some(Duration::from_secs(3)),
            Some(Duration::from_secs(3)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_between_attempts() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_script(refused())
            .with_script(refused())
            .with_script(vec![(ms(10), finished(200, b"5"))]),
    );
    let strategy = RetryStrategy::new(Duration::from_secs(1));

    let started = Instant::now();
    let completion = call_with_retry(&strategy, Arc::new(RequestContext::default()), |ctx| {
        CompletionFuture::builder(transport.clone(), ctx).url(API_URL, parse_int())
    })
    .await;

    assert_eq!(completion.result, Ok(5));
    // 1 s before the first retry, 2 s before the second
    assert!(started.elapsed() >= Duration::from_secs(3));
}
