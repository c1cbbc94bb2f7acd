//! reqwest-backed transport.
//!
//! Wraps a shared [`reqwest::Client`] and reports every exchange as a
//! stream of [`TransportEvent`]s:
//! - one progress event when the response head arrives
//! - one progress event per body chunk
//! - a terminal `Finished` or `Failed`
//!
//! The client is built without a total request timeout. Deadlines are owned
//! by the fetcher's inactivity watchdog, which must be able to tell a stalled
//! transfer from a long but active one.

use bytes::{Bytes, BytesMut};
use reqwest::{Client, RequestBuilder};
use tracing::{debug, instrument, trace};

use callwire_core::{TransportError, TransportErrorKind, TransportSettings};

use crate::transport::{EventSender, RequestDescriptor, Transport, TransportEvent, TransportReply};

// ============================================================================
// HTTP Transport
// ============================================================================

/// HTTP transport over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    inner: Client,
}

impl HttpTransport {
    /// Creates a transport with default settings.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_settings(&TransportSettings::default())
    }

    /// Creates a transport from explicit settings.
    pub fn with_settings(settings: &TransportSettings) -> Result<Self, TransportError> {
        let mut builder = Client::builder().user_agent(settings.effective_user_agent());

        if let Some(timeout) = settings.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }

        if let Some(ref proxy) = settings.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(|e| {
                TransportError::new(
                    TransportErrorKind::InvalidRequest,
                    format!("invalid proxy {proxy}: {e}"),
                )
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| {
            TransportError::new(
                TransportErrorKind::Other,
                format!("failed to create HTTP client: {e}"),
            )
        })?;

        Ok(Self { inner: client })
    }

    /// Wraps an already configured client.
    pub fn from_client(client: Client) -> Self {
        Self { inner: client }
    }

    /// Returns the inner reqwest client.
    pub fn inner(&self) -> &Client {
        &self.inner
    }
}

impl Transport for HttpTransport {
    #[instrument(skip(self, request, payload), fields(url = %request.url()))]
    fn dispatch(&self, request: &RequestDescriptor, payload: Option<Bytes>) -> TransportReply {
        let builder = match payload {
            Some(body) => {
                debug!(bytes = body.len(), "POST request");
                self.inner.post(request.url().clone()).body(body)
            }
            None => {
                debug!("GET request");
                self.inner.get(request.url().clone())
            }
        }
        .headers(request.headers().clone());

        let (tx, mut reply) = TransportReply::channel();
        reply.attach_task(tokio::spawn(run_exchange(builder, tx)));
        reply
    }
}

/// Drives one exchange to completion, reporting through `events`.
///
/// Returns early once the receiving side is gone.
async fn run_exchange(builder: RequestBuilder, events: EventSender) {
    let mut response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            let _ = events.send(TransportEvent::Failed(classify_error(&e)));
            return;
        }
    };

    let status = response.status().as_u16();
    let total = response.content_length();
    debug!(status, total = ?total, "Response received");

    if events
        .send(TransportEvent::Progress {
            transferred: 0,
            total,
        })
        .is_err()
    {
        return;
    }

    let mut body = BytesMut::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                body.extend_from_slice(&chunk);
                trace!(received = body.len(), "Body chunk");
                let progress = TransportEvent::Progress {
                    transferred: body.len() as u64,
                    total,
                };
                if events.send(progress).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = events.send(TransportEvent::Failed(classify_error(&e)));
                return;
            }
        }
    }

    let _ = events.send(TransportEvent::Finished {
        status,
        body: body.freeze(),
    });
}

// ============================================================================
// Error Classification
// ============================================================================

/// Maps a reqwest error onto the transport taxonomy.
///
/// reqwest exposes only coarse predicates, so the finer kinds are recovered
/// from the text of the error's source chain.
pub(crate) fn classify_error(error: &reqwest::Error) -> TransportError {
    let message = error_chain_text(error);
    let text = message.to_ascii_lowercase();

    let kind = if error.is_builder() {
        TransportErrorKind::InvalidRequest
    } else if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if text.contains("dns")
        || text.contains("failed to lookup address")
        || text.contains("name or service not known")
    {
        TransportErrorKind::HostNotFound
    } else if text.contains("certificate") || text.contains("tls") || text.contains("handshake") {
        TransportErrorKind::SslHandshakeFailed
    } else if text.contains("refused") {
        TransportErrorKind::ConnectionRefused
    } else if error.is_connect() {
        TransportErrorKind::ConnectionFailed
    } else if error.is_body()
        || text.contains("connection reset")
        || text.contains("connection closed")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        TransportErrorKind::RemoteHostClosed
    } else if error.is_decode() {
        TransportErrorKind::UnknownContent
    } else {
        TransportErrorKind::Other
    };

    TransportError::new(kind, message)
}

/// Joins an error and all its sources into one message.
fn error_chain_text(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

// ============================================================================
// Tests
// ============================================================================
