use thiserror::Error;

use crate::RidePhase;

/// Failures of the HTTP backend calls, before they are classified into the
/// user-facing taxonomy.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request timed out")]
    Timeout,
    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{0} is unavailable")]
    Unavailable(&'static str),
}

/// User-facing failure taxonomy. Every variant resolves to a defined
/// controller state; none of them is retried automatically.
#[derive(Debug, PartialEq, Error)]
pub enum RideError {
    #[error("{0}")]
    Validation(String),
    #[error("fare quote unavailable: {0}")]
    QuoteUnavailable(String),
    #[error("no drivers are available nearby right now")]
    NoDriversAvailable,
    #[error("booking failed: {0}")]
    BookingFailed(String),
    #[error("payment failed: {0}")]
    PaymentFailed(String),
    #[error("request timed out")]
    RequestTimeout,
    #[error("another request is already in flight")]
    RequestInFlight,
    #[error("{action} is not available while the ride is {phase:?}")]
    OutOfPhase {
        action: &'static str,
        phase: RidePhase,
    },
}
