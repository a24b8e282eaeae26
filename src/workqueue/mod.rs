//! Rate limited, delay capable, deduplicating FIFO work queue.
//!
//! Items are handed to one consumer at a time: an item added again while it
//! is being processed is parked and re-queued when the consumer calls `done`.
pub mod queue;
pub mod rate_limiter;

pub use queue::WorkQueue;
pub use rate_limiter::ItemExponentialRateLimiter;
