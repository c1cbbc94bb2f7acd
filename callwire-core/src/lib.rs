// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # Callwire Core
//!
//! Data and policy types shared by the callwire request engine.
//!
//! This crate has no async runtime dependency. It provides:
//!
//! - [`RequestContext`] - Immutable per-request configuration (identity,
//!   token, inactivity deadline, retry policy)
//! - [`RequestPolicy`] - Serializable form of the retry/deadline policy
//! - [`TransportSettings`] - Serializable HTTP transport configuration
//! - The error taxonomy: [`TransportError`], [`ProtocolError`],
//!   [`DecodeFailure`] and the caller-facing [`CallError`]

pub mod context;
pub mod error;
pub mod settings;

// Re-export key types at crate root
pub use context::{RequestContext, RequestContextBuilder, RequestPolicy};
pub use error::{CallError, DecodeFailure, ProtocolError, TransportError, TransportErrorKind};
pub use settings::{TransportSettings, VERSION, user_agent};
