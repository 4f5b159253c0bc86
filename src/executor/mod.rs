//! Bounded worker pools for tile providers.
//!
//! Each provider tier (filesystem cache, network download, ...) gets its own
//! [`WorkerPool`]: a fixed set of worker tasks draining one bounded queue.
//! Submission never blocks the caller; overflow evicts the oldest
//! not-yet-started request. Workers skip cancelled requests without invoking
//! the provider and dispatch every produced [`Outcome`](crate::tile::Outcome)
//! to an [`OutcomeSink`] (normally the provider chain coordinator).

mod pool;
mod queue;

pub use pool::{OutcomeSink, PoolConfig, WorkerPool};
pub use queue::BoundedQueue;
