//! Request and outcome descriptors.
//!
//! # Design
//! `Request` is plain owned data: the caller builds it, hands it to the
//! executor and may drop it right after. Nothing is validated at construction
//! so malformed input from the wire can still occupy its index; validation
//! happens in `Request::prepare`, which produces the transport-level form the
//! executor actually sends.
//!
//! `Outcome` is the per-index result. A received HTTP response is always
//! `Success`, whatever its status; `Failure` means no response was obtained.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;

use crate::error::RequestError;

/// Header name → one or more values, ordered by name.
pub type Headers = BTreeMap<String, Vec<String>>;

/// Standard HTTP verbs accepted by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Trace,
    Connect,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Connect => "CONNECT",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Options => reqwest::Method::OPTIONS,
            HttpMethod::Trace => reqwest::Method::TRACE,
            HttpMethod::Connect => reqwest::Method::CONNECT,
        }
    }
}

impl FromStr for HttpMethod {
    type Err = RequestError;

    /// Case-insensitive; `"get"` and `"GET"` are the same verb.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(RequestError::EmptyMethod);
        }
        match trimmed.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "OPTIONS" => Ok(HttpMethod::Options),
            "TRACE" => Ok(HttpMethod::Trace),
            "CONNECT" => Ok(HttpMethod::Connect),
            _ => Err(RequestError::UnsupportedMethod(s.to_string())),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request of a batch, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    uri: String,
    headers: Headers,
    body: Option<Bytes>,
}

impl Request {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new("GET", uri)
    }

    /// Append one value for `name`. Repeated calls accumulate values.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Replace all headers.
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn header_map(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Validate this descriptor and convert it into what the transport sends.
    pub fn prepare(&self) -> Result<PreparedRequest, RequestError> {
        let method: HttpMethod = self.method.parse()?;

        let url = Url::parse(&self.uri).map_err(|e| RequestError::InvalidUri {
            uri: self.uri.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RequestError::UnsupportedScheme(url.scheme().to_string()));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(RequestError::MissingHost(self.uri.clone()));
        }

        let mut headers = HeaderMap::new();
        for (name, values) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| RequestError::InvalidHeaderName(name.clone()))?;
            for value in values {
                let header_value = HeaderValue::from_str(value)
                    .map_err(|_| RequestError::InvalidHeaderValue(name.clone()))?;
                headers.append(header_name.clone(), header_value);
            }
        }

        Ok(PreparedRequest {
            method,
            url,
            headers,
            body: self.body.clone(),
        })
    }
}

/// A validated request, ready to hand to the transport.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl PreparedRequest {
    pub(crate) fn into_builder(self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let builder = client
            .request(self.method.to_reqwest(), self.url)
            .headers(self.headers);
        match self.body {
            Some(body) => builder.body(body),
            None => builder,
        }
    }
}

/// Result descriptor for one index of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// An HTTP response was received. Any status, including 4xx/5xx.
    Success {
        status: u16,
        headers: Headers,
        body: Option<Bytes>,
    },
    /// No response could be obtained.
    Failure { cause: String },
}

impl Outcome {
    pub fn failure(cause: impl fmt::Display) -> Self {
        Outcome::Failure {
            cause: cause.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Outcome::Success { status, .. } => Some(*status),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { cause } => Some(cause),
        }
    }

    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Outcome::Success { body, .. } => body.as_ref(),
            Outcome::Failure { .. } => None,
        }
    }

    /// Values for `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[String]> {
        match self {
            Outcome::Success { headers, .. } => headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_slice()),
            Outcome::Failure { .. } => None,
        }
    }
}

/// Collect a response header map into `Headers`, keeping repeated values.
pub(crate) fn collect_headers(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        headers
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    headers
}
