//! Single-attempt fetch state machine.
//!
//! A [`Fetcher`] performs exactly one network attempt through a
//! [`Transport`] and resolves to exactly one [`FetchOutcome`].
//!
//! # States
//!
//! ```text
//! Idle --start()--> Active --+--> Succeeded
//!                            +--> Failed (transport error, TLS error, timeout)
//! ```
//!
//! There is no way out of a terminal state. Starting consumes the idle
//! [`Fetcher`], so an attempt cannot be started twice.
//!
//! # Watchdog
//!
//! While active, a watchdog ticks on a fixed interval (one second by
//! default). Each progress event resets the "last activity" instant; a tick
//! that finds more than `deadline` elapsed since the last activity fails the
//! attempt with [`TransportErrorKind::Timeout`]. The deadline therefore bounds
//! *inactivity*, not total duration.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, instrument, trace, warn};

use callwire_core::settings::DEFAULT_WATCHDOG_INTERVAL_MS;
use callwire_core::{TransportError, TransportErrorKind, TransportSettings};

use crate::transport::{RequestDescriptor, Transport, TransportEvent, TransportReply};

/// Default interval between watchdog checks.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_millis(DEFAULT_WATCHDOG_INTERVAL_MS);

// ============================================================================
// State & Outcome
// ============================================================================

/// Lifecycle state of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Not started yet.
    Idle,
    /// Waiting on the transport.
    Active,
    /// A complete reply was received.
    Succeeded,
    /// The attempt failed.
    Failed,
}

impl FetchState {
    /// Returns true for `Succeeded` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Terminal result of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The exchange completed. Any status code counts as success here.
    Succeeded {
        /// HTTP status code.
        status: u16,
        /// Complete response body.
        body: Bytes,
    },
    /// The exchange failed.
    Failed(TransportError),
}

impl FetchOutcome {
    /// Returns true if the attempt failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// HTTP status code, when a reply was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Succeeded { status, .. } => Some(*status),
            Self::Failed(_) => None,
        }
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<&TransportError> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Succeeded { .. } => None,
        }
    }

    /// Received body; empty on failure.
    pub fn received_data(&self) -> &[u8] {
        match self {
            Self::Succeeded { body, .. } => body,
            Self::Failed(_) => &[],
        }
    }

    fn state(&self) -> FetchState {
        if self.is_error() {
            FetchState::Failed
        } else {
            FetchState::Succeeded
        }
    }
}

// ============================================================================
// Fetch Machine
// ============================================================================

/// Pure transition logic of an active attempt.
///
/// Every input returns `Some(outcome)` only for the single transition into a
/// terminal state; inputs after that are ignored.
#[derive(Debug)]
pub(crate) struct FetchMachine {
    deadline: Option<Duration>,
    last_activity: Instant,
    state: FetchState,
}

impl FetchMachine {
    pub(crate) fn new(deadline: Option<Duration>, now: Instant) -> Self {
        Self {
            deadline,
            last_activity: now,
            state: FetchState::Active,
        }
    }

    pub(crate) fn state(&self) -> FetchState {
        self.state
    }

    pub(crate) fn on_event(&mut self, event: TransportEvent, now: Instant) -> Option<FetchOutcome> {
        if self.state.is_terminal() {
            return None;
        }

        match event {
            TransportEvent::Progress { transferred, total } => {
                trace!(transferred, total = ?total, "Transfer progress");
                self.last_activity = now;
                None
            }
            TransportEvent::Finished { status, body } => {
                self.terminate(FetchOutcome::Succeeded { status, body })
            }
            TransportEvent::Failed(err) if err.is_benign_ok_reply() => {
                debug!(message = %err.message, "Ignoring benign unknown-content error");
                None
            }
            TransportEvent::Failed(err) => self.terminate(FetchOutcome::Failed(err)),
            TransportEvent::SslErrors(errors) => {
                let mut message = String::from("SSL Errors:\n");
                for error in &errors {
                    message.push_str(error);
                    message.push('\n');
                }
                self.terminate(FetchOutcome::Failed(TransportError::new(
                    TransportErrorKind::SslHandshakeFailed,
                    message,
                )))
            }
        }
    }

    pub(crate) fn on_tick(&mut self, now: Instant) -> Option<FetchOutcome> {
        if self.state.is_terminal() {
            return None;
        }

        let deadline = self.deadline?;
        let idle = now.saturating_duration_since(self.last_activity);
        if idle > deadline {
            warn!(idle = ?idle, deadline = ?deadline, "Request timed out");
            return self.terminate(FetchOutcome::Failed(TransportError::timeout()));
        }
        None
    }

    pub(crate) fn on_disconnect(&mut self) -> Option<FetchOutcome> {
        if self.state.is_terminal() {
            return None;
        }
        self.terminate(FetchOutcome::Failed(TransportError::new(
            TransportErrorKind::Disconnected,
            "transport closed without a reply",
        )))
    }

    fn terminate(&mut self, outcome: FetchOutcome) -> Option<FetchOutcome> {
        self.state = outcome.state();
        Some(outcome)
    }
}

// ============================================================================
// Fetcher
// ============================================================================

/// An attempt that has not been started.
#[derive(Debug, Clone)]
pub struct Fetcher {
    watchdog_interval: Duration,
}

impl Fetcher {
    /// Creates a fetcher with the default watchdog interval.
    pub fn new() -> Self {
        Self {
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
        }
    }

    /// Creates a fetcher with the watchdog interval from `settings`.
    pub fn from_settings(settings: &TransportSettings) -> Self {
        Self::new().with_watchdog_interval(settings.watchdog_interval())
    }

    /// Sets the watchdog interval. Zero is raised to one millisecond.
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Starts the attempt.
    ///
    /// Issues a GET when `payload` is `None` and a POST otherwise, and arms
    /// the watchdog. `deadline = None` disables the inactivity deadline.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip(self, transport, request, payload), fields(url = %request.url()))]
    pub fn start(
        self,
        transport: &dyn Transport,
        request: &RequestDescriptor,
        deadline: Option<Duration>,
        payload: Option<Bytes>,
    ) -> ActiveFetch {
        debug!(
            method = if payload.is_some() { "POST" } else { "GET" },
            deadline = ?deadline,
            "Starting fetch"
        );

        let machine = FetchMachine::new(deadline, Instant::now());
        let reply = transport.dispatch(request, payload);
        let (state_tx, state_rx) = watch::channel(FetchState::Active);
        let (fetched_tx, fetched_rx) = oneshot::channel();

        let task = tokio::spawn(drive(
            machine,
            reply,
            self.watchdog_interval,
            state_tx,
            fetched_tx,
        ));

        ActiveFetch {
            state: state_rx,
            fetched: Some(fetched_rx),
            task,
        }
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the attempt until its single terminal transition.
async fn drive(
    mut machine: FetchMachine,
    mut reply: TransportReply,
    watchdog_interval: Duration,
    state: watch::Sender<FetchState>,
    fetched: oneshot::Sender<FetchOutcome>,
) {
    let mut ticker = time::interval_at(Instant::now() + watchdog_interval, watchdog_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        let step = tokio::select! {
            biased;
            event = reply.next_event() => match event {
                Some(event) => machine.on_event(event, Instant::now()),
                None => machine.on_disconnect(),
            },
            _ = ticker.tick() => machine.on_tick(Instant::now()),
        };
        if let Some(outcome) = step {
            break outcome;
        }
    };

    reply.detach();
    state.send_replace(machine.state());
    debug!(
        state = ?machine.state(),
        status = ?outcome.status_code(),
        "Fetch finished"
    );

    if fetched.send(outcome).is_err() {
        trace!("Fetch owner went away before the outcome was delivered");
    }
}

// ============================================================================
// Active Fetch
// ============================================================================

/// A running attempt.
///
/// Dropping it before completion cancels the attempt and detaches the
/// transport.
#[derive(Debug)]
pub struct ActiveFetch {
    state: watch::Receiver<FetchState>,
    fetched: Option<oneshot::Receiver<FetchOutcome>>,
    task: JoinHandle<()>,
}

impl ActiveFetch {
    /// Current state.
    pub fn state(&self) -> FetchState {
        *self.state.borrow()
    }

    /// Waits for the terminal notification.
    pub async fn fetched(mut self) -> FetchOutcome {
        let Some(rx) = self.fetched.take() else {
            return disconnected();
        };
        rx.await.unwrap_or_else(|_| disconnected())
    }
}

impl Drop for ActiveFetch {
    fn drop(&mut self) {
        // No-op once the driver has delivered its outcome.
        self.task.abort();
    }
}

fn disconnected() -> FetchOutcome {
    FetchOutcome::Failed(TransportError::new(
        TransportErrorKind::Disconnected,
        "fetch task ended without an outcome",
    ))
}

// ============================================================================
// Tests
// ============================================================================
