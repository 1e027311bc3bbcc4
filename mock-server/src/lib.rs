use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// What `/echo` saw on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
}

/// Counters for requests parked in `/delay/{ms}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
pub struct Stats {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    total: AtomicUsize,
    arrivals: Mutex<Vec<String>>,
}

impl Stats {
    fn enter(self: &Arc<Self>) -> InFlight {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        InFlight(Arc::clone(self))
    }

    fn arrive(&self, id: String) {
        self.arrivals.lock().unwrap_or_else(|e| e.into_inner()).push(id);
    }

    /// Ids seen by `/track/{id}`, in the order the server received them.
    pub fn arrivals(&self) -> Vec<String> {
        self.arrivals.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }
}

/// Decrements the in-flight counter on drop, including when the client gives
/// up and the handler future is cancelled.
struct InFlight(Arc<Stats>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub type SharedStats = Arc<Stats>;

pub fn app() -> Router {
    app_with_stats(Arc::new(Stats::default()))
}

/// Build the router around caller-owned counters so tests can inspect them
/// without going through `/stats`.
pub fn app_with_stats(stats: SharedStats) -> Router {
    Router::new()
        .route("/status/{code}", any(status))
        .route("/delay/{ms}", any(delay))
        .route("/track/{id}", any(track))
        .route("/hang", any(hang))
        .route("/echo", any(echo))
        .route("/redirect", any(redirect))
        .route("/stats", get(stats_handler))
        .with_state(stats)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with_stats(listener: TcpListener, stats: SharedStats) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_stats(stats)).await
}

async fn status(Path(code): Path<u16>) -> Result<(StatusCode, String), StatusCode> {
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok((status, format!("status {code}")))
}

async fn delay(State(stats): State<SharedStats>, Path(ms): Path<u64>) -> String {
    let _guard = stats.enter();
    tokio::time::sleep(Duration::from_millis(ms)).await;
    format!("slept {ms}ms")
}

/// Record arrival order, then hold the connection long enough for a second
/// request to overlap if the client lets one through.
async fn track(State(stats): State<SharedStats>, Path(id): Path<String>) -> String {
    stats.arrive(id.clone());
    let _guard = stats.enter();
    tokio::time::sleep(Duration::from_millis(20)).await;
    id
}

async fn hang() -> StatusCode {
    std::future::pending::<()>().await;
    StatusCode::OK
}

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let mut seen: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &headers {
        seen.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    let echo = Echo {
        method: method.as_str().to_string(),
        headers: seen,
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    ([(header::HeaderName::from_static("x-mock-server"), "echo")], Json(echo))
}

async fn redirect() -> Redirect {
    Redirect::to("/status/200")
}

async fn stats_handler(State(stats): State<SharedStats>) -> Json<StatsSnapshot> {
    Json(stats.snapshot())
}
