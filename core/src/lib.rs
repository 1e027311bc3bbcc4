//! Concurrent HTTP batch execution.
//!
//! # Overview
//! Takes an ordered batch of request descriptors, dispatches them in
//! parallel over one shared `reqwest` client, and returns one outcome per
//! request in input order. A request that is malformed, unreachable or slow
//! only ever affects its own index.
//!
//! # Design
//! - `http`: `Request` / `Outcome` descriptors and validation.
//! - `wire`: the JSON array-in, array-out form used across the C boundary.
//! - `executor`: `BatchExecutor`, the async fan-out/fan-in engine with a
//!   concurrency cap, per-request timeout and optional batch deadline.
//! - `blocking`: `BlockingExecutor`, a synchronous front owning its runtime.
//! - `config`, `error`, `logging`: ambient concerns.

pub mod blocking;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod logging;
pub mod wire;

pub use blocking::BlockingExecutor;
pub use config::ExecutorConfig;
pub use error::{BatchError, DispatchError, RequestError};
pub use executor::BatchExecutor;
pub use http::{Headers, HttpMethod, Outcome, PreparedRequest, Request};
