//! # Gateway Resilience
//!
//! The counter store backing the gateway's rate limiting, budget tracking, and
//! per-endpoint circuit-breaker state: a KV abstraction over an in-memory map for
//! tests and a Redis-backed implementation for production.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod counter_store;
pub mod error;

// Re-export main types
pub use counter_store::{CounterStore, MemoryCounterStore, RedisCounterStore, SharedCounterStore};
pub use error::{CounterError, CounterResult};
