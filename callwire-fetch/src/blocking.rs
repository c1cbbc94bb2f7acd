//! Synchronous adapter.
//!
//! Runs a single attempt to completion on the calling thread and surfaces
//! failures as `Err`. This bypasses [`CompletionFuture`](crate::CompletionFuture)
//! entirely and suits one-shot requests made outside any async context.
//!
//! Every call drives the same lazily built runtime, so a shared transport
//! keeps its pooled connections between calls. When the caller is already
//! inside a tokio runtime (where blocking on another one is not allowed) the
//! attempt runs on a scoped helper thread instead.

use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, instrument};
use url::Url;

use callwire_core::{CallError, ProtocolError, TransportError, TransportErrorKind};

use crate::fetcher::{FetchOutcome, Fetcher};
use crate::transport::{RequestDescriptor, Transport};

/// Runtime behind every blocking call.
static BLOCKING_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Gets or creates the runtime for blocking calls.
fn blocking_runtime() -> Result<&'static Runtime, TransportError> {
    if let Some(runtime) = BLOCKING_RUNTIME.get() {
        return Ok(runtime);
    }

    let runtime = Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("callwire-blocking")
        .enable_all()
        .build()
        .map_err(|e| {
            TransportError::new(
                TransportErrorKind::Other,
                format!("failed to start runtime: {e}"),
            )
        })?;

    // A racing caller may have won; its runtime is kept and ours dropped.
    Ok(BLOCKING_RUNTIME.get_or_init(|| runtime))
}

/// Performs one attempt and returns the body and status code.
///
/// Any status code counts as success here; only transport failures
/// (including the watchdog timeout) are errors.
#[instrument(skip(transport, request, payload), fields(url = %request.url()))]
pub fn fetch_blocking(
    transport: &dyn Transport,
    request: &RequestDescriptor,
    deadline: Option<Duration>,
    payload: Option<Bytes>,
) -> Result<(Bytes, u16), TransportError> {
    let run = move || run_attempt(transport, request, deadline, payload);

    let attempt = if Handle::try_current().is_ok() {
        thread::scope(|scope| match scope.spawn(run).join() {
            Ok(attempt) => attempt,
            Err(panic) => std::panic::resume_unwind(panic),
        })
    } else {
        run()
    };

    match attempt? {
        FetchOutcome::Succeeded { status, body } => Ok((body, status)),
        FetchOutcome::Failed(err) => {
            debug!(error = %err, "Blocking fetch failed");
            Err(err)
        }
    }
}

/// Performs one API call and returns the body of a 200 reply.
///
/// The request carries the API headers (see
/// [`RequestDescriptor::for_api`]). Any status other than 200 becomes
/// [`ProtocolError::Status`].
pub fn request(
    transport: &dyn Transport,
    url: &str,
    payload: Option<Bytes>,
    deadline: Option<Duration>,
) -> Result<Bytes, CallError> {
    let url = Url::parse(url).map_err(|e| {
        TransportError::new(
            TransportErrorKind::InvalidRequest,
            format!("invalid URL {url}: {e}"),
        )
    })?;

    let descriptor = RequestDescriptor::for_api(url);
    let (body, status) = fetch_blocking(transport, &descriptor, deadline, payload)?;

    if status != 200 {
        debug!(status, "API call returned unexpected status");
        return Err(ProtocolError::Status(status).into());
    }
    Ok(body)
}

fn run_attempt(
    transport: &dyn Transport,
    request: &RequestDescriptor,
    deadline: Option<Duration>,
    payload: Option<Bytes>,
) -> Result<FetchOutcome, TransportError> {
    Ok(blocking_runtime()?.block_on(async {
        Fetcher::new()
            .start(transport, request, deadline, payload)
            .fetched()
            .await
    }))
}
