//! JSON wire form of a batch.
//!
//! # Design
//! A batch crosses the boundary as one JSON array in and one JSON array out,
//! element *i* of the output answering element *i* of the input.
//!
//! Only the outer shape is fatal: a payload that is not an array is a
//! `BatchError::Decode`. An element that is not a request object becomes
//! `RequestError::Malformed` for that index and is reported like any other
//! invalid request. The same isolation applies when decoding a result array.
//!
//! Header values are accepted as a single string or an array of strings and
//! always emitted as arrays. Bodies are UTF-8 strings on the wire; non-UTF-8
//! response bodies are converted lossily.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{BatchError, RequestError};
use crate::http::{Headers, Outcome, Request};

/// One header's value(s) as they may appear on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

impl HeaderValues {
    fn into_vec(self) -> Vec<String> {
        match self {
            HeaderValues::One(v) => vec![v],
            HeaderValues::Many(vs) => vs,
        }
    }
}

pub type WireHeaders = BTreeMap<String, HeaderValues>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    /// Missing method and uri decode as empty strings so they fail
    /// validation with a specific cause instead of as a malformed entry.
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub headers: Option<WireHeaders>,
    #[serde(default)]
    pub body: Option<String>,
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: WireHeaders,
    #[serde(default)]
    pub body: Option<String>,
    /// The originating request, when echo is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<WireRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFailure {
    pub error: String,
}

/// One element of a result array: `{status, headers, body}` or `{error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireResult {
    Success(WireResponse),
    Failure(WireFailure),
}

fn headers_to_wire(headers: &Headers) -> WireHeaders {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), HeaderValues::Many(v.clone())))
        .collect()
}

fn headers_from_wire(headers: WireHeaders) -> Headers {
    headers.into_iter().map(|(k, v)| (k, v.into_vec())).collect()
}

fn body_to_wire(body: Option<&Bytes>) -> Option<String> {
    body.map(|b| String::from_utf8_lossy(b).into_owned())
}

impl From<&Request> for WireRequest {
    fn from(req: &Request) -> Self {
        WireRequest {
            method: req.method().to_string(),
            uri: req.uri().to_string(),
            headers: Some(headers_to_wire(req.header_map())),
            body: body_to_wire(req.body_bytes()),
        }
    }
}

impl From<WireRequest> for Request {
    fn from(wire: WireRequest) -> Self {
        let req = Request::new(wire.method, wire.uri)
            .headers(headers_from_wire(wire.headers.unwrap_or_default()));
        match wire.body {
            Some(body) => req.body(body),
            None => req,
        }
    }
}

impl WireResult {
    pub fn from_outcome(outcome: &Outcome, request: Option<&Request>) -> Self {
        match outcome {
            Outcome::Success {
                status,
                headers,
                body,
            } => WireResult::Success(WireResponse {
                status: *status,
                headers: headers_to_wire(headers),
                body: body_to_wire(body.as_ref()),
                request: request.map(WireRequest::from),
            }),
            Outcome::Failure { cause } => WireResult::Failure(WireFailure {
                error: cause.clone(),
            }),
        }
    }
}

impl From<WireResult> for Outcome {
    fn from(wire: WireResult) -> Self {
        match wire {
            WireResult::Success(resp) => Outcome::Success {
                status: resp.status,
                headers: headers_from_wire(resp.headers),
                body: resp.body.map(Bytes::from),
            },
            WireResult::Failure(f) => Outcome::Failure { cause: f.error },
        }
    }
}

/// Decode a request array. Elements that are not request objects are kept
/// in place as `Err` so index alignment survives.
pub fn decode_requests(payload: &str) -> Result<Vec<Result<Request, RequestError>>, BatchError> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(payload).map_err(BatchError::Decode)?;
    Ok(entries
        .into_iter()
        .map(|entry| {
            serde_json::from_value::<WireRequest>(entry)
                .map(Request::from)
                .map_err(|e| RequestError::Malformed(e.to_string()))
        })
        .collect())
}

pub fn encode_requests(requests: &[Request]) -> Result<String, BatchError> {
    let wire: Vec<WireRequest> = requests.iter().map(WireRequest::from).collect();
    serde_json::to_string(&wire).map_err(BatchError::Encode)
}

pub fn encode_results(outcomes: &[Outcome]) -> Result<String, BatchError> {
    let wire: Vec<WireResult> = outcomes
        .iter()
        .map(|o| WireResult::from_outcome(o, None))
        .collect();
    serde_json::to_string(&wire).map_err(BatchError::Encode)
}

/// Like `encode_results`, attaching `requests[i]` to successful result *i*.
/// Indices whose request could not be decoded carry `None`.
pub fn encode_results_echoing(
    outcomes: &[Outcome],
    requests: &[Option<&Request>],
) -> Result<String, BatchError> {
    let wire: Vec<WireResult> = outcomes
        .iter()
        .enumerate()
        .map(|(i, o)| WireResult::from_outcome(o, requests.get(i).copied().flatten()))
        .collect();
    serde_json::to_string(&wire).map_err(BatchError::Encode)
}

/// Decode a result array. A non-conforming element becomes a `Failure` at
/// its index rather than failing the whole array.
pub fn decode_results(payload: &str) -> Result<Vec<Outcome>, BatchError> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(payload).map_err(BatchError::Decode)?;
    Ok(entries
        .into_iter()
        .map(|entry| match serde_json::from_value::<WireResult>(entry.clone()) {
            Ok(wire) => Outcome::from(wire),
            Err(_) => Outcome::failure(format!("malformed result entry: {entry}")),
        })
        .collect())
}
