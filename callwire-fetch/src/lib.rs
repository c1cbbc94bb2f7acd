// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # Callwire Fetch
//!
//! Request completion engine: issues single HTTP requests and delivers
//! exactly one outcome per request.
//!
//! ## Layers
//!
//! - [`transport`] - The [`Transport`] seam: request descriptors and the
//!   event stream of one exchange
//! - [`host::http`] - reqwest-backed [`HttpTransport`]
//! - [`fetcher`] - One attempt with an inactivity watchdog ([`Fetcher`],
//!   [`ActiveFetch`], [`FetchOutcome`])
//! - [`translate`] - Outcome plus decoder to `Result<T, CallError>`
//! - [`future`] - [`CompletionFuture`], the one-shot bridge to observers
//! - [`blocking`] - Synchronous adapter ([`fetch_blocking`], [`request`])
//! - [`retry`] - [`call_with_retry`] orchestration on top of the engine
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use callwire_core::RequestContext;
//! use callwire_fetch::{CompletionFuture, HttpTransport, as_is};
//!
//! let transport = Arc::new(HttpTransport::new()?);
//! let ctx = Arc::new(RequestContext::new("S=s1:U=..."));
//!
//! let call = CompletionFuture::builder(transport, ctx)
//!     .payload(encoded_args)
//!     .url("https://api.example.com/edam/note/s1", as_is());
//!
//! call.on_finished(|completion| println!("{:?}", completion.result));
//! let completion = call.finished().await;
//! ```

// Core modules
pub mod blocking;
pub mod fetcher;
pub mod future;
pub mod host;
pub mod retry;
pub mod translate;
pub mod transport;

// Re-export key types at crate root

// Transport
pub use host::http::HttpTransport;
pub use transport::{
    DEFAULT_WIRE_FORMAT, EventSender, RequestDescriptor, Transport, TransportEvent, TransportReply,
};

// Engine
pub use fetcher::{ActiveFetch, DEFAULT_WATCHDOG_INTERVAL, FetchOutcome, FetchState, Fetcher};
pub use future::{CallBuilder, Completion, CompletionFuture, CompletionState};
pub use translate::{Decoder, as_is, translate};

// Adapters
pub use blocking::{fetch_blocking, request};
pub use retry::{RetryStrategy, call_with_retry};
