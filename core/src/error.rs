//! Error types for the batch executor.
//!
//! # Design
//! Errors come in two scopes. `BatchError` is the only error that escapes an
//! `execute`/`process` call: it means the batch as a whole could not be
//! attempted. `RequestError` and `DispatchError` belong to a single index and
//! are rendered into `Outcome::Failure { cause }` through their `Display`
//! impls, so they never abort sibling requests.

use std::time::Duration;

use thiserror::Error;

/// Call-level failure: the batch could not be decoded, encoded, or the
/// executor itself could not be set up.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The payload was not a JSON array of entries.
    #[error("malformed batch payload: {0}")]
    Decode(#[source] serde_json::Error),

    /// The result batch could not be serialized.
    #[error("could not encode result batch: {0}")]
    Encode(#[source] serde_json::Error),

    /// The HTTP transport could not be constructed.
    #[error("could not build HTTP transport: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("invalid executor configuration: {0}")]
    Config(String),

    /// The async runtime backing the blocking executor failed to start.
    #[error("could not start runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// A single request descriptor is malformed. Isolated to its own index.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("invalid request: method is empty")]
    EmptyMethod,

    #[error("invalid request: unsupported method {0:?}")]
    UnsupportedMethod(String),

    #[error("invalid request: cannot parse uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("invalid request: unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("invalid request: uri {0:?} has no host")]
    MissingHost(String),

    #[error("invalid request: bad header name {0:?}")]
    InvalidHeaderName(String),

    #[error("invalid request: bad value for header {0:?}")]
    InvalidHeaderValue(String),

    /// The wire entry was not a request object at all.
    #[error("invalid request: malformed entry: {0}")]
    Malformed(String),
}

/// The request was valid but could not be completed over the network.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("connection error: {0}")]
    Connect(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The connect phase ran past the configured connect timeout.
    #[error("connection error: connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    #[error("batch deadline exceeded")]
    Deadline,

    #[error("body error: {0}")]
    Body(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The dispatch task panicked or was cancelled before reporting.
    #[error("dispatch aborted: {0}")]
    Aborted(String),
}

impl DispatchError {
    /// Classify a transport error. `reqwest` surfaces DNS, refused
    /// connections and TLS handshakes all as connect errors.
    pub(crate) fn from_reqwest(
        err: reqwest::Error,
        request_timeout: Duration,
        connect_timeout: Option<Duration>,
    ) -> Self {
        if err.is_timeout() {
            Self::timed_out(err.is_connect(), request_timeout, connect_timeout)
        } else if err.is_connect() {
            DispatchError::Connect(error_chain(&err))
        } else if err.is_body() || err.is_decode() {
            DispatchError::Body(error_chain(&err))
        } else {
            DispatchError::Transport(error_chain(&err))
        }
    }

    /// Report the budget that actually expired: reqwest flags a
    /// `connect_timeout` expiry as both a timeout and a connect error.
    fn timed_out(
        during_connect: bool,
        request_timeout: Duration,
        connect_timeout: Option<Duration>,
    ) -> Self {
        match connect_timeout {
            Some(limit) if during_connect => DispatchError::ConnectTimeout(limit),
            _ => DispatchError::Timeout(request_timeout),
        }
    }
}

/// Join an error and its sources with `": "`, since reqwest keeps the useful
/// part ("Connection refused", "dns error") in the source chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_render_as_invalid_request() {
        let errors = [
            RequestError::EmptyMethod,
            RequestError::UnsupportedMethod("FETCH".to_string()),
            RequestError::MissingHost("file:///tmp".to_string()),
            RequestError::Malformed("expected object".to_string()),
        ];
        for err in errors {
            assert!(err.to_string().starts_with("invalid request"), "{err}");
        }
    }

    #[test]
    fn dispatch_error_prefixes() {
        assert_eq!(
            DispatchError::Connect("refused".to_string()).to_string(),
            "connection error: refused"
        );
        assert_eq!(
            DispatchError::Timeout(Duration::from_millis(250)).to_string(),
            "timeout after 250ms"
        );
        assert_eq!(DispatchError::Deadline.to_string(), "batch deadline exceeded");
    }

    #[test]
    fn connect_timeout_reports_connect_budget() {
        let err = DispatchError::timed_out(
            true,
            Duration::from_secs(30),
            Some(Duration::from_millis(100)),
        );
        assert_eq!(err.to_string(), "connection error: connect timeout after 100ms");
    }

    #[test]
    fn request_timeout_reports_request_budget() {
        let request = Duration::from_secs(30);
        let connect = Some(Duration::from_millis(100));
        assert_eq!(
            DispatchError::timed_out(false, request, connect).to_string(),
            "timeout after 30s"
        );
        assert_eq!(
            DispatchError::timed_out(true, request, None).to_string(),
            "timeout after 30s"
        );
    }

    #[test]
    fn error_chain_includes_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "inner");
        let err = BatchError::Runtime(io);
        assert_eq!(error_chain(&err), "could not start runtime: inner: inner");
    }

    #[test]
    fn decode_error_wraps_serde() {
        let err = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        let err = BatchError::Decode(err);
        assert!(err.to_string().starts_with("malformed batch payload"));
    }
}
