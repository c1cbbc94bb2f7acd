//! Transport implementations backed by real network stacks.
//!
//! - [`http`] - HTTP transport over reqwest

pub mod http;

pub use http::HttpTransport;
