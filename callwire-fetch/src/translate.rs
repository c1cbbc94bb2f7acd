//! Translation of a fetch outcome into a call result.
//!
//! 1. A transport failure becomes [`CallError::Transport`].
//! 2. Any status other than 200 becomes [`ProtocolError::Status`]; the decoder
//!    is not invoked.
//! 3. Status 200 runs the decoder on the body. A [`DecodeFailure::Protocol`]
//!    is propagated unchanged, any other failure (or a panic) becomes
//!    [`CallError::Decode`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use tracing::debug;

use callwire_core::{CallError, DecodeFailure, ProtocolError};

use crate::fetcher::FetchOutcome;

/// Caller-supplied function turning a raw reply body into a value.
pub type Decoder<T> = Box<dyn FnOnce(Bytes) -> Result<T, DecodeFailure> + Send>;

/// Decoder that returns the body unchanged.
pub fn as_is() -> Decoder<Bytes> {
    Box::new(Ok::<Bytes, DecodeFailure>)
}

/// Converts a terminal fetch outcome into a call result.
pub fn translate<T>(outcome: FetchOutcome, decoder: Decoder<T>) -> Result<T, CallError> {
    let body = match outcome {
        FetchOutcome::Failed(err) => {
            debug!(error = %err, "Transport failure");
            return Err(CallError::Transport(err));
        }
        FetchOutcome::Succeeded { status, .. } if status != 200 => {
            debug!(status, "Unexpected HTTP status");
            return Err(ProtocolError::Status(status).into());
        }
        FetchOutcome::Succeeded { body, .. } => body,
    };

    match panic::catch_unwind(AssertUnwindSafe(move || decoder(body))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(DecodeFailure::Protocol(err))) => {
            debug!(error = %err, "Reply carried a remote error");
            Err(CallError::Protocol(err))
        }
        Ok(Err(DecodeFailure::Other(err))) => {
            debug!(error = %err, "Failed to decode reply");
            Err(CallError::Decode(err.to_string()))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            debug!(error = %message, "Decoder panicked");
            Err(CallError::Decode(message))
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Unknown exception".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
