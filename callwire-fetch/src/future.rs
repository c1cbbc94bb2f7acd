//! One-shot completion of a call.
//!
//! A [`CompletionFuture`] bridges an in-flight or already known result to any
//! number of observers. Its terminal event fires exactly once, carrying a
//! [`Completion`] (result plus request context). Observers that attach after
//! the event still receive it.
//!
//! ```text
//! Idle --(spawned start)--> Started --(reply translated)--> Finished
//! Idle --(pre-known result / set_value)------------------> Finished
//! ```
//!
//! Construction never touches the network: every start and every pre-known
//! result is delivered from a task spawned on the current tokio runtime, so
//! observers attached right after construction cannot miss the event.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};
use url::Url;

use callwire_core::{CallError, RequestContext, TransportError, TransportErrorKind};

use crate::fetcher::{ActiveFetch, Fetcher};
use crate::transport::{RequestDescriptor, Transport};
use crate::translate::{Decoder, panic_message, translate};

// ============================================================================
// Completion
// ============================================================================

/// The terminal event of a call.
#[derive(Debug, Clone)]
pub struct Completion<T> {
    /// Decoded value or the error that ended the call.
    pub result: Result<T, CallError>,
    /// Context the call was issued with.
    pub context: Arc<RequestContext>,
}

impl<T> Completion<T> {
    /// Returns true if the call failed.
    pub fn is_error(&self) -> bool {
        self.result.is_err()
    }

    /// The error, if any.
    pub fn error(&self) -> Option<&CallError> {
        self.result.as_ref().err()
    }

    /// The value, if any.
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }
}

/// Lifecycle state of a [`CompletionFuture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// Nothing started; waiting for a start or an external value.
    Idle,
    /// A fetch is in flight.
    Started,
    /// The terminal event has fired.
    Finished,
}

type Observer<T> = Box<dyn FnOnce(&Completion<T>) + Send>;

// ============================================================================
// Shared State
// ============================================================================

struct Slot<T> {
    state: CompletionState,
    completion: Option<Completion<T>>,
    observers: Vec<Observer<T>>,
    /// Set once every observer registered before the event has run.
    delivered: bool,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    delivered: Condvar,
    finished: watch::Sender<bool>,
    context: Arc<RequestContext>,
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn new(context: Arc<RequestContext>, state: CompletionState) -> Arc<Self> {
        let (finished, _) = watch::channel(false);
        Arc::new(Self {
            slot: Mutex::new(Slot {
                state,
                completion: None,
                observers: Vec::new(),
                delivered: false,
            }),
            delivered: Condvar::new(),
            finished,
            context,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves `Idle` to `Started`. Returns false if the call already finished.
    fn mark_started(&self) -> bool {
        let mut slot = self.lock();
        match slot.state {
            CompletionState::Idle => {
                slot.state = CompletionState::Started;
                true
            }
            CompletionState::Started => true,
            CompletionState::Finished => false,
        }
    }

    /// Stores the result and notifies every observer. Only the first call has
    /// any effect.
    ///
    /// A panicking observer is logged and skipped; the rest still run and
    /// waiters are still released.
    fn complete(&self, result: Result<T, CallError>) -> bool {
        let completion = Completion {
            result,
            context: self.context.clone(),
        };

        let observers = {
            let mut slot = self.lock();
            if slot.state == CompletionState::Finished {
                trace!(request_id = %self.context.request_id(), "Ignoring second completion");
                return false;
            }
            slot.state = CompletionState::Finished;
            slot.completion = Some(completion.clone());
            std::mem::take(&mut slot.observers)
        };

        debug!(
            request_id = %self.context.request_id(),
            is_error = completion.is_error(),
            observers = observers.len(),
            "Call finished"
        );

        for observer in observers {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| observer(&completion))) {
                warn!(
                    request_id = %self.context.request_id(),
                    panic = %panic_message(payload.as_ref()),
                    "Observer panicked"
                );
            }
        }

        self.lock().delivered = true;
        self.delivered.notify_all();
        self.finished.send_replace(true);
        true
    }

    /// Blocks the calling thread until observers have run or `timeout` ends.
    fn wait_delivered(&self, timeout: Option<Duration>) -> bool {
        let slot = self.lock();
        match timeout {
            Some(timeout) => {
                let (slot, _) = self
                    .delivered
                    .wait_timeout_while(slot, timeout, |slot| !slot.delivered)
                    .unwrap_or_else(PoisonError::into_inner);
                slot.delivered
            }
            None => {
                self.delivered
                    .wait_while(slot, |slot| !slot.delivered)
                    .unwrap_or_else(PoisonError::into_inner)
                    .delivered
            }
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Configures a network-backed [`CompletionFuture`].
pub struct CallBuilder<T> {
    transport: Arc<dyn Transport>,
    context: Arc<RequestContext>,
    payload: Option<Bytes>,
    auto_dispose: bool,
    fetcher: Fetcher,
    _value: PhantomData<fn() -> T>,
}

impl<T: Clone + Send + 'static> CallBuilder<T> {
    /// Sets the POST payload. Without one the call is a GET.
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Sets whether the call keeps running after its handle is dropped.
    pub fn auto_dispose(mut self, auto_dispose: bool) -> Self {
        self.auto_dispose = auto_dispose;
        self
    }

    /// Sets the fetch watchdog interval.
    pub fn watchdog_interval(mut self, interval: Duration) -> Self {
        self.fetcher = self.fetcher.with_watchdog_interval(interval);
        self
    }

    /// Builds a call against an API URL.
    ///
    /// An empty URL yields an idle future that only finishes through
    /// [`CompletionFuture::set_value`]. A URL that does not parse finishes
    /// with a [`TransportErrorKind::InvalidRequest`] error.
    pub fn url(self, url: &str, decoder: Decoder<T>) -> CompletionFuture<T> {
        if url.is_empty() {
            return CompletionFuture::idle(self.context, self.auto_dispose);
        }

        match Url::parse(url) {
            Ok(url) => self.request(RequestDescriptor::for_api(url), decoder),
            Err(e) => {
                let err = TransportError::new(
                    TransportErrorKind::InvalidRequest,
                    format!("invalid URL {url}: {e}"),
                );
                CompletionFuture::spawn_result(Err(err.into()), self.context, self.auto_dispose)
            }
        }
    }

    /// Builds a call from a complete request descriptor.
    pub fn request(self, request: RequestDescriptor, decoder: Decoder<T>) -> CompletionFuture<T> {
        let Self {
            transport,
            context,
            payload,
            auto_dispose,
            fetcher,
            ..
        } = self;

        let shared = Shared::new(context.clone(), CompletionState::Idle);
        let task_shared = shared.clone();

        let task = tokio::spawn(async move {
            if !task_shared.mark_started() {
                return;
            }
            let active = fetcher.start(
                transport.as_ref(),
                &request,
                context.request_timeout(),
                payload,
            );
            let outcome = active.fetched().await;
            debug!(request_id = %context.request_id(), "Received reply for request");
            task_shared.complete(translate(outcome, decoder));
        });

        CompletionFuture {
            shared,
            task: Some(task),
            auto_dispose,
        }
    }
}

// ============================================================================
// Completion Future
// ============================================================================

/// One-shot completion primitive.
///
/// Constructors that spawn must be called from within a tokio runtime.
pub struct CompletionFuture<T> {
    shared: Arc<Shared<T>>,
    task: Option<JoinHandle<()>>,
    auto_dispose: bool,
}

impl<T: Clone + Send + 'static> CompletionFuture<T> {
    /// Starts configuring a network-backed call.
    pub fn builder(transport: Arc<dyn Transport>, context: Arc<RequestContext>) -> CallBuilder<T> {
        CallBuilder {
            transport,
            context,
            payload: None,
            auto_dispose: true,
            fetcher: Fetcher::new(),
            _value: PhantomData,
        }
    }

    /// Wraps an attempt that is already running.
    pub fn from_fetch(active: ActiveFetch, context: Arc<RequestContext>, decoder: Decoder<T>) -> Self {
        let shared = Shared::new(context.clone(), CompletionState::Started);
        let task_shared = shared.clone();

        let task = tokio::spawn(async move {
            let outcome = active.fetched().await;
            debug!(request_id = %context.request_id(), "Received reply for request");
            task_shared.complete(translate(outcome, decoder));
        });

        Self {
            shared,
            task: Some(task),
            auto_dispose: true,
        }
    }

    /// Wraps an already known result. The terminal event still fires from a
    /// spawned task, never from inside this call.
    pub fn from_result(result: Result<T, CallError>, context: Arc<RequestContext>) -> Self {
        Self::spawn_result(result, context, true)
    }

    /// Creates an idle future that finishes only through
    /// [`set_value`](Self::set_value).
    pub fn pending(context: Arc<RequestContext>) -> Self {
        Self::idle(context, true)
    }

    fn idle(context: Arc<RequestContext>, auto_dispose: bool) -> Self {
        Self {
            shared: Shared::new(context, CompletionState::Idle),
            task: None,
            auto_dispose,
        }
    }

    fn spawn_result(
        result: Result<T, CallError>,
        context: Arc<RequestContext>,
        auto_dispose: bool,
    ) -> Self {
        let shared = Shared::new(context, CompletionState::Idle);
        let task_shared = shared.clone();
        let task = tokio::spawn(async move {
            task_shared.complete(result);
        });

        Self {
            shared,
            task: Some(task),
            auto_dispose,
        }
    }

    /// Current state.
    pub fn state(&self) -> CompletionState {
        self.shared.lock().state
    }

    /// Context the call was issued with.
    pub fn context(&self) -> &Arc<RequestContext> {
        &self.shared.context
    }

    /// The stored completion, once finished.
    pub fn completion(&self) -> Option<Completion<T>> {
        self.shared.lock().completion.clone()
    }

    /// Whether the call keeps running after this handle is dropped.
    pub fn is_auto_dispose(&self) -> bool {
        self.auto_dispose
    }

    /// Registers an observer for the terminal event.
    ///
    /// If the event already fired, the observer is invoked immediately on the
    /// calling thread with the stored completion.
    pub fn on_finished<F>(&self, observer: F)
    where
        F: FnOnce(&Completion<T>) + Send + 'static,
    {
        let stored = {
            let mut slot = self.shared.lock();
            match slot.completion {
                Some(ref completion) => completion.clone(),
                None => {
                    slot.observers.push(Box::new(observer));
                    return;
                }
            }
        };
        trace!(request_id = %self.shared.context.request_id(), "Replaying completion");
        observer(&stored);
    }

    /// Supplies the result from outside. Returns false if the call had
    /// already finished, in which case nothing changes.
    pub fn set_value(&self, result: Result<T, CallError>) -> bool {
        self.shared.complete(result)
    }

    /// Waits for the terminal event. Every observer registered before the
    /// event has run by the time this returns.
    pub async fn finished(&self) -> Completion<T> {
        let mut rx = self.shared.finished.subscribe();
        if rx.wait_for(|done| *done).await.is_ok() {
            if let Some(completion) = self.completion() {
                return completion;
            }
        }

        // Unreachable while `shared` holds the sender.
        Completion {
            result: Err(TransportError::new(
                TransportErrorKind::Disconnected,
                "completion channel closed",
            )
            .into()),
            context: self.shared.context.clone(),
        }
    }

    /// Waits for the terminal event for at most `timeout` (`None` waits
    /// indefinitely). Returns whether the event fired in time.
    ///
    /// Running out of time does not cancel the call.
    #[instrument(skip(self), fields(request_id = %self.shared.context.request_id()))]
    pub async fn wait_for_finished(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.shared.finished.subscribe();
        let wait = rx.wait_for(|done| *done);

        let fired = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .is_ok_and(|changed| changed.is_ok()),
            None => wait.await.is_ok(),
        };

        if !fired {
            debug!(timeout = ?timeout, "Stopped waiting before the call finished");
        }
        fired
    }

    /// Blocking variant of [`wait_for_finished`](Self::wait_for_finished)
    /// for threads that are not driving a tokio runtime. Calling it on a
    /// runtime worker can stall the task it waits for.
    pub fn blocking_wait_for_finished(&self, timeout: Option<Duration>) -> bool {
        let fired = self.shared.wait_delivered(timeout);
        if !fired {
            debug!(
                request_id = %self.shared.context.request_id(),
                timeout = ?timeout,
                "Stopped waiting before the call finished"
            );
        }
        fired
    }
}

impl<T> Drop for CompletionFuture<T> {
    fn drop(&mut self) {
        if self.auto_dispose {
            return;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T> std::fmt::Debug for CompletionFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionFuture")
            .field("request_id", &self.shared.context.request_id())
            .field("auto_dispose", &self.auto_dispose)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
