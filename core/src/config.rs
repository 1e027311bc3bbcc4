//! Executor configuration.
//!
//! Every field is optional on the wire; durations travel as milliseconds
//! (`request_timeout_ms`, ...) so the JSON stays language-neutral.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::BatchError;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Upper bound on simultaneously in-flight requests.
    pub max_in_flight: usize,
    /// Per-request budget covering connect, send and body read.
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    #[serde(rename = "connect_timeout_ms", with = "opt_millis")]
    pub connect_timeout: Option<Duration>,
    /// When set, slots still pending at expiry become failures.
    #[serde(rename = "batch_deadline_ms", with = "opt_millis")]
    pub batch_deadline: Option<Duration>,
    pub accept_invalid_certs: bool,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    /// Attach the originating request to each successful wire result.
    pub echo_request: bool,
    pub user_agent: Option<String>,
    /// Worker threads for the blocking executor's runtime. `None` uses the
    /// tokio default (one per core).
    pub worker_threads: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: None,
            batch_deadline: None,
            accept_invalid_certs: false,
            follow_redirects: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            echo_request: false,
            user_agent: None,
            worker_threads: None,
        }
    }
}

impl ExecutorConfig {
    /// Defaults overridden by `REQBATCH_*` environment variables. Unparseable
    /// values fall back to the default.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_in_flight: env_parse("REQBATCH_MAX_IN_FLIGHT").unwrap_or(default.max_in_flight),
            request_timeout: env_parse("REQBATCH_REQUEST_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.request_timeout),
            connect_timeout: env_parse("REQBATCH_CONNECT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .or(default.connect_timeout),
            batch_deadline: env_parse("REQBATCH_BATCH_DEADLINE_MS")
                .map(Duration::from_millis)
                .or(default.batch_deadline),
            accept_invalid_certs: env_parse("REQBATCH_ACCEPT_INVALID_CERTS")
                .unwrap_or(default.accept_invalid_certs),
            follow_redirects: env_parse("REQBATCH_FOLLOW_REDIRECTS").unwrap_or(default.follow_redirects),
            max_redirects: env_parse("REQBATCH_MAX_REDIRECTS").unwrap_or(default.max_redirects),
            echo_request: env_parse("REQBATCH_ECHO_REQUEST").unwrap_or(default.echo_request),
            user_agent: std::env::var("REQBATCH_USER_AGENT").ok().or(default.user_agent),
            worker_threads: env_parse("REQBATCH_WORKER_THREADS").or(default.worker_threads),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, BatchError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.max_in_flight == 0 {
            return Err(BatchError::Config("max_in_flight must be at least 1".to_string()));
        }
        if self.max_in_flight > Semaphore::MAX_PERMITS {
            return Err(BatchError::Config(format!(
                "max_in_flight must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(BatchError::Config("request_timeout_ms must be positive".to_string()));
        }
        if self.worker_threads == Some(0) {
            return Err(BatchError::Config("worker_threads must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_batch_deadline(mut self, deadline: Duration) -> Self {
        self.batch_deadline = Some(deadline);
        self
    }

    pub fn with_echo_request(mut self, echo: bool) -> Self {
        self.echo_request = echo;
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
