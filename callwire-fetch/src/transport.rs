//! Transport seam.
//!
//! The engine never talks to sockets itself. A [`Transport`] issues one HTTP
//! exchange per [`dispatch`](Transport::dispatch) call and reports what
//! happens through a [`TransportReply`]: zero or more progress events followed
//! by a terminal success or failure.

use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use callwire_core::TransportError;

/// Wire format used by API requests unless overridden.
pub const DEFAULT_WIRE_FORMAT: &str = "application/x-thrift";

// ============================================================================
// Request Descriptor
// ============================================================================

/// Target URL plus headers for a single exchange.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    url: Url,
    headers: HeaderMap,
}

impl RequestDescriptor {
    /// Creates a descriptor with no headers.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Creates a descriptor for an API call: content type and accept set to
    /// the default wire format, user agent set to the library's.
    pub fn for_api(url: Url) -> Self {
        let mut descriptor = Self::new(url).with_wire_format(DEFAULT_WIRE_FORMAT);
        if let Ok(agent) = HeaderValue::from_str(&callwire_core::user_agent()) {
            descriptor.headers.insert(USER_AGENT, agent);
        }
        descriptor
    }

    /// Sets both `Content-Type` and `Accept` to the given media type.
    ///
    /// An invalid media type leaves the headers untouched.
    pub fn with_wire_format(mut self, media_type: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(media_type) {
            self.headers.insert(CONTENT_TYPE, value.clone());
            self.headers.insert(ACCEPT, value);
        }
        self
    }

    /// Adds or replaces a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

// ============================================================================
// Transport Events
// ============================================================================

/// Notification emitted by a transport during one exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Bytes moved over the wire.
    Progress {
        /// Bytes transferred so far.
        transferred: u64,
        /// Expected total, when known.
        total: Option<u64>,
    },
    /// The exchange completed and the full body was received.
    Finished {
        /// HTTP status code.
        status: u16,
        /// Complete response body.
        body: Bytes,
    },
    /// The exchange failed.
    Failed(TransportError),
    /// TLS verification reported one or more errors.
    SslErrors(Vec<String>),
}

/// Sending half handed to transport implementations.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Subscription to the events of one exchange.
///
/// Dropping the reply (or calling [`detach`](Self::detach)) closes the event
/// channel and aborts the task driving the exchange, so no further event can
/// be observed.
#[derive(Debug)]
pub struct TransportReply {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    task: Option<JoinHandle<()>>,
}

impl TransportReply {
    /// Creates a connected sender/reply pair with no driving task.
    pub fn channel() -> (EventSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                events: rx,
                task: None,
            },
        )
    }

    /// Creates a reply whose exchange is driven by `task`.
    pub fn with_task(events: mpsc::UnboundedReceiver<TransportEvent>, task: JoinHandle<()>) -> Self {
        Self {
            events,
            task: Some(task),
        }
    }

    /// Attaches the task driving the exchange.
    pub fn attach_task(&mut self, task: JoinHandle<()>) {
        if let Some(previous) = self.task.replace(task) {
            previous.abort();
        }
    }

    /// Waits for the next event. `None` once the transport is gone.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Stops listening and cancels the exchange.
    pub fn detach(&mut self) {
        self.events.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TransportReply {
    fn drop(&mut self) {
        self.detach();
    }
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Issues HTTP exchanges.
///
/// Implementations are long-lived and shared between many concurrent
/// attempts; each dispatch is independent. A dispatch without payload is a
/// GET, with payload a POST.
///
/// `dispatch` is called from inside a tokio runtime, so implementations may
/// spawn the exchange onto it.
pub trait Transport: Send + Sync {
    /// Starts one exchange and returns its event subscription.
    fn dispatch(&self, request: &RequestDescriptor, payload: Option<Bytes>) -> TransportReply;
}

// ============================================================================
// Tests
// ============================================================================
