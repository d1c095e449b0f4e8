//! Outbound HTTP

pub mod client;
pub mod clock;

pub use client::{classify_status, FetchRequest, FetchResponse, Outcome, RetryingClient};
pub use clock::{Clock, ManualClock, TokioClock};
