//! Synchronous front for callers that are not async, such as the C ABI.

use tokio::runtime::Runtime;

use crate::config::ExecutorConfig;
use crate::error::BatchError;
use crate::executor::BatchExecutor;
use crate::http::{Outcome, Request};

/// A `BatchExecutor` paired with the multi-threaded runtime that drives it.
///
/// `execute` and `process` block the calling thread until the whole batch
/// has been fanned back in. They panic if called from inside an async
/// context; use `BatchExecutor` directly there.
#[derive(Debug)]
pub struct BlockingExecutor {
    runtime: Runtime,
    inner: BatchExecutor,
}

impl BlockingExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self, BatchError> {
        config.validate()?;
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all().thread_name("reqbatch-worker");
        if let Some(threads) = config.worker_threads {
            builder.worker_threads(threads);
        }
        let runtime = builder.build().map_err(BatchError::Runtime)?;

        let inner = {
            let _guard = runtime.enter();
            BatchExecutor::new(config)?
        };
        Ok(Self { runtime, inner })
    }

    pub fn execute(&self, requests: &[Request]) -> Vec<Outcome> {
        self.runtime.block_on(self.inner.execute(requests))
    }

    pub fn process(&self, payload: &str) -> Result<String, BatchError> {
        self.runtime.block_on(self.inner.process(payload))
    }

    pub fn executor(&self) -> &BatchExecutor {
        &self.inner
    }
}
