use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use http::StatusCode;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tracing::warn;

use crate::proxy::codec::{Method, Response, read_request_head};
use crate::proxy::listener::{accept_loop, bind};
use crate::proxy::respond::{send_response, shutdown_stream};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_total", "Total requests by method");
    let vec = IntCounterVec::new(opts, &["method"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_total");
    vec
});

static REQUEST_STATUS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_status_total", "Requests by status class");
    let vec = IntCounterVec::new(opts, &["status_class"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_status_total");
    vec
});

static REQUEST_LATENCY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new("request_duration_seconds", "Request latency")
        .buckets(latency_buckets());
    let histogram = Histogram::with_opts(opts).expect("create histogram");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("register request_duration_seconds");
    histogram
});

static CACHE_LOOKUP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_lookup_total", "Cache lookups by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_lookup_total");
    vec
});

static CACHE_STORE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_store_total", "Origin responses stored in the cache")
        .expect("create cache_store_total");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_store_total");
    counter
});

static CACHE_STORE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_store_errors_total", "Failed cache stores")
        .expect("create cache_store_errors_total");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_store_errors_total");
    counter
});

static CACHE_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter =
        IntCounter::new("cache_evictions_total", "FIFO cache evictions").expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_evictions_total");
    counter
});

static CACHE_INVALIDATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "cache_invalidations_total",
        "Cache entries dropped after an origin write",
    )
    .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_invalidations_total");
    counter
});

static CACHE_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("cache_entries", "Entries currently cached").expect("create gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register cache_entries");
    gauge
});

static ORIGIN_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let vec = IntCounterVec::new(
        Opts::new("origin_errors_total", "Origin errors by kind"),
        &["kind"],
    )
    .expect("create origin_errors_total");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register origin_errors_total");
    vec
});

fn latency_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

const METRICS_PATH: &str = "/metrics";
const METRICS_MAX_REQUEST_BYTES: usize = 8192;
const METRICS_TIMEOUT: Duration = Duration::from_secs(5);

fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

/// Unknown methods share one label so clients cannot grow the label set.
fn method_label(method: &str) -> &str {
    match method {
        "GET" | "HEAD" | "POST" | "PUT" => method,
        "" => "none",
        _ => "other",
    }
}

pub fn record_request(method: &str, status: u16, elapsed: Duration) {
    REQUESTS_TOTAL
        .with_label_values(&[method_label(method)])
        .inc();
    REQUEST_STATUS_TOTAL
        .with_label_values(&[status_class(status)])
        .inc();
    REQUEST_LATENCY_SECONDS.observe(elapsed.as_secs_f64());
}

pub fn record_cache_lookup(result: &str) {
    CACHE_LOOKUP_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_cache_store() {
    CACHE_STORE_TOTAL.inc();
}

pub fn record_cache_store_error() {
    CACHE_STORE_ERRORS_TOTAL.inc();
}

pub fn record_cache_eviction() {
    CACHE_EVICTIONS_TOTAL.inc();
}

pub fn record_cache_invalidation() {
    CACHE_INVALIDATIONS_TOTAL.inc();
}

pub fn set_cache_entries(entries: usize) {
    CACHE_ENTRIES.set(i64::try_from(entries).unwrap_or(i64::MAX));
}

pub fn record_origin_error(kind: &str) {
    ORIGIN_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn gather() -> Result<Vec<u8>> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metric_families, &mut buffer)
        .context("failed to encode metrics")?;
    Ok(buffer)
}

/// Serves `GET /metrics` in the Prometheus text format until the process exits.
pub async fn serve(addr: SocketAddr) -> Result<()> {
    let listener = bind(addr, "metrics").await?;
    accept_loop(listener, "metrics", |stream: TcpStream, peer| {
        handle_stream(stream, peer, METRICS_TIMEOUT, METRICS_MAX_REQUEST_BYTES)
    })
    .await
}

async fn handle_stream<S>(
    stream: S,
    peer: SocketAddr,
    timeout_dur: Duration,
    max_bytes: usize,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let request = match read_request_head(&mut reader, peer, timeout_dur, max_bytes).await {
        Ok(request) => request,
        Err(err) if err.is_no_data() => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    let response = match request {
        Some(request) if request.method == Method::Get && request.path == METRICS_PATH => {
            match gather() {
                Ok(body) => {
                    Response::build(StatusCode::OK, TextEncoder::new().format_type(), body)
                }
                Err(err) => {
                    warn!(error = ?err, "failed to render metrics");
                    Response::error(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        }
        Some(_) => Response::error(StatusCode::NOT_FOUND),
        None => Response::error(StatusCode::BAD_REQUEST),
    };

    let stream = reader.get_mut();
    send_response(stream, &response, true, timeout_dur).await?;
    shutdown_stream(stream, timeout_dur).await
}
