//! Concurrent batch executor.
//!
//! # Design
//! One `reqwest::Client` (an internally synchronized connection pool) is
//! built per executor and cloned into every dispatch unit. A FIFO
//! `Semaphore` caps the number of units in flight; permits are acquired in
//! input order by the fan-out loop, so admission follows submission order
//! even when completion does not.
//!
//! Results land in a slot vector sized to the batch before anything is
//! dispatched. Invalid entries fill their slot immediately without taking a
//! permit. Every other slot is written exactly once, from the join handle of
//! the unit spawned for that index, so the output is aligned with the input
//! no matter which unit finishes first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, debug_span, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::error::{BatchError, DispatchError, RequestError};
use crate::http::{collect_headers, Outcome, PreparedRequest, Request};
use crate::wire;

/// Executes batches of requests concurrently. Must be used from within a
/// tokio runtime; see `BlockingExecutor` for a synchronous front.
#[derive(Debug)]
pub struct BatchExecutor {
    client: Client,
    permits: Arc<Semaphore>,
    config: ExecutorConfig,
}

impl BatchExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self, BatchError> {
        config.validate()?;
        let client = build_client(&config)?;
        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            config,
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Number of dispatch slots currently free.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run every request and return one outcome per request, in input order.
    /// Returns only once every request has completed, failed or timed out.
    pub async fn execute(&self, requests: &[Request]) -> Vec<Outcome> {
        let entries = requests.iter().map(Request::prepare).collect();
        self.run(entries).await
    }

    /// Decode a JSON request array, execute it and encode the JSON result
    /// array. Fails only when the payload is not an array or the results
    /// cannot be encoded.
    pub async fn process(&self, payload: &str) -> Result<String, BatchError> {
        let decoded = wire::decode_requests(payload)?;
        let entries = decoded
            .iter()
            .map(|entry| entry.as_ref().map_err(Clone::clone).and_then(Request::prepare))
            .collect();
        let outcomes = self.run(entries).await;

        if self.config.echo_request {
            let requests: Vec<Option<&Request>> =
                decoded.iter().map(|entry| entry.as_ref().ok()).collect();
            wire::encode_results_echoing(&outcomes, &requests)
        } else {
            wire::encode_results(&outcomes)
        }
    }

    async fn run(&self, entries: Vec<Result<PreparedRequest, RequestError>>) -> Vec<Outcome> {
        if entries.is_empty() {
            return Vec::new();
        }
        let span = info_span!("batch", id = %Uuid::new_v4(), size = entries.len());
        self.fan_out_in(entries).instrument(span).await
    }

    async fn fan_out_in(&self, entries: Vec<Result<PreparedRequest, RequestError>>) -> Vec<Outcome> {
        let started = Instant::now();
        let total = entries.len();
        let mut slots: Vec<Option<Outcome>> = vec![None; total];
        let mut units: Vec<(usize, JoinHandle<Outcome>)> = Vec::with_capacity(total);

        info!(max_in_flight = self.config.max_in_flight, "dispatching batch");

        let work = async {
            for (index, entry) in entries.into_iter().enumerate() {
                let prepared = match entry {
                    Ok(prepared) => prepared,
                    Err(err) => {
                        warn!(index, %err, "request rejected");
                        slots[index] = Some(Outcome::failure(err));
                        continue;
                    }
                };

                let permit = match Arc::clone(&self.permits).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        slots[index] = Some(Outcome::failure(DispatchError::Aborted(
                            "executor is shut down".to_string(),
                        )));
                        continue;
                    }
                };

                let client = self.client.clone();
                let limits = Limits {
                    request: self.config.request_timeout,
                    connect: self.config.connect_timeout,
                };
                let unit = async move {
                    let _permit = permit;
                    dispatch(&client, prepared, limits).await
                };
                units.push((index, tokio::spawn(unit.instrument(debug_span!("unit", index)))));
            }

            for (index, handle) in units.iter_mut() {
                slots[*index] = Some(join_outcome(handle.await));
            }
        };

        match self.config.batch_deadline {
            Some(deadline) => {
                if tokio::time::timeout(deadline, work).await.is_err() {
                    warn!(?deadline, "batch deadline exceeded");
                }
            }
            None => work.await,
        }

        // Only reached with unfilled slots when the deadline fired.
        for (index, handle) in units {
            if slots[index].is_some() {
                continue;
            }
            slots[index] = Some(if handle.is_finished() {
                join_outcome(handle.await)
            } else {
                handle.abort();
                Outcome::failure(DispatchError::Deadline)
            });
        }

        let outcomes: Vec<Outcome> = slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Outcome::failure(DispatchError::Deadline)))
            .collect();

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        info!(
            succeeded,
            failed = total - succeeded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch complete"
        );
        outcomes
    }
}

fn build_client(config: &ExecutorConfig) -> Result<Client, BatchError> {
    let redirect = if config.follow_redirects {
        reqwest::redirect::Policy::limited(config.max_redirects)
    } else {
        reqwest::redirect::Policy::none()
    };

    let mut builder = Client::builder()
        .redirect(redirect)
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .pool_max_idle_per_host(config.max_in_flight);
    if let Some(connect_timeout) = config.connect_timeout {
        builder = builder.connect_timeout(connect_timeout);
    }
    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }
    builder.build().map_err(BatchError::Transport)
}

/// Time budgets that apply to a single dispatch unit.
#[derive(Debug, Clone, Copy)]
struct Limits {
    request: Duration,
    connect: Option<Duration>,
}

/// Perform one HTTP exchange. Never fails: every error becomes a `Failure`.
async fn dispatch(client: &Client, request: PreparedRequest, limits: Limits) -> Outcome {
    let timeout = limits.request;
    let method = request.method;
    let url = request.url.clone();
    debug!(%method, %url, "sending");

    let exchange = async {
        let response = request.into_builder(client).send().await?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await?;
        Ok::<_, reqwest::Error>(Outcome::Success {
            status,
            headers,
            body: (!body.is_empty()).then_some(body),
        })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(outcome)) => {
            debug!(%url, status = ?outcome.status(), "received");
            outcome
        }
        Ok(Err(err)) => {
            let err = DispatchError::from_reqwest(err, timeout, limits.connect);
            warn!(%method, %url, %err, "request failed");
            Outcome::failure(err)
        }
        Err(_) => {
            warn!(%method, %url, ?timeout, "request timed out");
            Outcome::failure(DispatchError::Timeout(timeout))
        }
    }
}

fn join_outcome(joined: Result<Outcome, JoinError>) -> Outcome {
    match joined {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => {
            Outcome::failure(DispatchError::Aborted("dispatch unit panicked".to_string()))
        }
        Err(err) => Outcome::failure(DispatchError::Aborted(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> BatchExecutor {
        BatchExecutor::new(ExecutorConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn empty_batch_returns_empty() {
        let exec = executor();
        assert!(exec.execute(&[]).await.is_empty());
        assert_eq!(exec.available_slots(), exec.config().max_in_flight);
    }

    #[tokio::test]
    async fn invalid_requests_fail_in_place_without_permits() {
        let exec = executor();
        let requests = [
            Request::new("", "http://localhost/"),
            Request::get("not a uri"),
            Request::new("BREW", "http://localhost/"),
        ];
        let outcomes = exec.execute(&requests).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].cause(), Some("invalid request: method is empty"));
        assert!(outcomes[1].cause().unwrap().starts_with("invalid request: cannot parse uri"));
        assert!(outcomes[2].cause().unwrap().contains("unsupported method"));
        assert_eq!(exec.available_slots(), exec.config().max_in_flight);
    }

    #[tokio::test]
    async fn process_empty_array() {
        assert_eq!(executor().process("[]").await.unwrap(), "[]");
    }

    #[tokio::test]
    async fn process_rejects_non_array() {
        let err = executor().process(r#"{"method":"GET"}"#).await.unwrap_err();
        assert!(matches!(err, BatchError::Decode(_)));
    }

    #[tokio::test]
    async fn process_isolates_malformed_entries() {
        let out = executor().process(r#"[7, {"method":"GET","uri":""}]"#).await.unwrap();
        let outcomes = wire::decode_results(&out).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].cause().unwrap().contains("malformed entry"));
        assert!(outcomes[1].cause().unwrap().contains("cannot parse uri"));
    }

    #[test]
    fn oversized_concurrency_is_rejected_not_panicking() {
        let config = ExecutorConfig::default().with_max_in_flight(usize::MAX);
        let err = BatchExecutor::new(config).unwrap_err();
        assert!(matches!(err, BatchError::Config(_)));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = BatchExecutor::new(ExecutorConfig::default().with_max_in_flight(0)).unwrap_err();
        assert!(matches!(err, BatchError::Config(_)));
    }

    #[test]
    fn join_error_becomes_failure() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let joined = rt.block_on(async { tokio::spawn(async { panic!("boom") }).await });
        let outcome = join_outcome(joined);
        assert_eq!(outcome.cause(), Some("dispatch aborted: dispatch unit panicked"));
    }
}
