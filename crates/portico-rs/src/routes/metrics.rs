//! Metrics collection and text exposition.
//!
//! The collector is a set of atomic counters updated lock-free from every
//! worker; the exposition handler renders them in Prometheus text format at
//! the configured metrics endpoint. Recording is part of the request
//! pipeline; the exposition format is ambient glue.

use actix_web::{web, HttpResponse, Result};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Thread-safe metrics collector for gateway observability.
///
/// All counters use relaxed atomics; the collector clones cheaply and is
/// shared through actix app data.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// Total number of proxied requests
    pub requests_total: Arc<AtomicU64>,
    /// Requests answered with status < 400
    pub requests_success: Arc<AtomicU64>,
    /// Requests answered with status >= 400
    pub requests_error: Arc<AtomicU64>,
    /// Sum of response times in milliseconds
    pub response_time_sum: Arc<AtomicU64>,
    /// Requests currently in flight
    pub active_requests: Arc<AtomicU64>,
    /// Response-time histogram buckets (cumulative, le semantics)
    pub response_time_bucket_100ms: Arc<AtomicU64>,
    pub response_time_bucket_500ms: Arc<AtomicU64>,
    pub response_time_bucket_1s: Arc<AtomicU64>,
    pub response_time_bucket_5s: Arc<AtomicU64>,
    pub response_time_bucket_inf: Arc<AtomicU64>,
    /// 4xx responses
    pub http_4xx_errors: Arc<AtomicU64>,
    /// 5xx responses
    pub http_5xx_errors: Arc<AtomicU64>,
    /// Upstream deadline expiries
    pub timeout_errors: Arc<AtomicU64>,
    /// Upstream transport failures
    pub connection_errors: Arc<AtomicU64>,
    /// Requests rejected by an open circuit
    pub circuit_open_rejections: Arc<AtomicU64>,
    /// Circuit breaker state transitions
    pub breaker_transitions: Arc<AtomicU64>,
    /// Composite fan-out dispatches
    pub composite_requests: Arc<AtomicU64>,
    /// Dry-run dual dispatches
    pub dry_run_requests: Arc<AtomicU64>,
    /// Response cache hits
    pub cache_hits: Arc<AtomicU64>,
    /// Response cache misses
    pub cache_misses: Arc<AtomicU64>,
    /// Collector start time for uptime
    pub start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            requests_success: Arc::new(AtomicU64::new(0)),
            requests_error: Arc::new(AtomicU64::new(0)),
            response_time_sum: Arc::new(AtomicU64::new(0)),
            active_requests: Arc::new(AtomicU64::new(0)),
            response_time_bucket_100ms: Arc::new(AtomicU64::new(0)),
            response_time_bucket_500ms: Arc::new(AtomicU64::new(0)),
            response_time_bucket_1s: Arc::new(AtomicU64::new(0)),
            response_time_bucket_5s: Arc::new(AtomicU64::new(0)),
            response_time_bucket_inf: Arc::new(AtomicU64::new(0)),
            http_4xx_errors: Arc::new(AtomicU64::new(0)),
            http_5xx_errors: Arc::new(AtomicU64::new(0)),
            timeout_errors: Arc::new(AtomicU64::new(0)),
            connection_errors: Arc::new(AtomicU64::new(0)),
            circuit_open_rejections: Arc::new(AtomicU64::new(0)),
            breaker_transitions: Arc::new(AtomicU64::new(0)),
            composite_requests: Arc::new(AtomicU64::new(0)),
            dry_run_requests: Arc::new(AtomicU64::new(0)),
            cache_hits: Arc::new(AtomicU64::new(0)),
            cache_misses: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }
}

impl MetricsCollector {
    /// Records the completion of a proxied request.
    pub fn record_request(&self, status: u16, response_time: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.response_time_sum
            .fetch_add(response_time.as_millis() as u64, Ordering::Relaxed);

        if status < 400 {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_error.fetch_add(1, Ordering::Relaxed);
            if status < 500 {
                self.http_4xx_errors.fetch_add(1, Ordering::Relaxed);
            } else {
                self.http_5xx_errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        let ms = response_time.as_millis() as u64;
        if ms <= 100 {
            self.response_time_bucket_100ms.fetch_add(1, Ordering::Relaxed);
        }
        if ms <= 500 {
            self.response_time_bucket_500ms.fetch_add(1, Ordering::Relaxed);
        }
        if ms <= 1000 {
            self.response_time_bucket_1s.fetch_add(1, Ordering::Relaxed);
        }
        if ms <= 5000 {
            self.response_time_bucket_5s.fetch_add(1, Ordering::Relaxed);
        }
        self.response_time_bucket_inf.fetch_add(1, Ordering::Relaxed);
    }

    pub fn begin_request(&self) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn end_request(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
    }

    fn average_response_time_ms(&self) -> f64 {
        let total = self.requests_total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.response_time_sum.load(Ordering::Relaxed) as f64 / total as f64
    }
}

/// Renders the collector in Prometheus text exposition format.
pub async fn metrics_handler(metrics: web::Data<MetricsCollector>) -> Result<HttpResponse> {
    let m = metrics.get_ref();
    let load = |c: &Arc<AtomicU64>| c.load(Ordering::Relaxed);

    let body = format!(
        "# HELP portico_requests_total Total proxied requests\n\
         # TYPE portico_requests_total counter\n\
         portico_requests_total {}\n\
         # HELP portico_requests_success_total Requests answered below status 400\n\
         # TYPE portico_requests_success_total counter\n\
         portico_requests_success_total {}\n\
         # HELP portico_requests_error_total Requests answered with status 400 or above\n\
         # TYPE portico_requests_error_total counter\n\
         portico_requests_error_total {}\n\
         # HELP portico_response_time_avg_ms Average response time in milliseconds\n\
         # TYPE portico_response_time_avg_ms gauge\n\
         portico_response_time_avg_ms {:.2}\n\
         # HELP portico_active_requests Requests currently in flight\n\
         # TYPE portico_active_requests gauge\n\
         portico_active_requests {}\n\
         # HELP portico_response_time_bucket Response time histogram\n\
         # TYPE portico_response_time_bucket counter\n\
         portico_response_time_bucket{{le=\"100\"}} {}\n\
         portico_response_time_bucket{{le=\"500\"}} {}\n\
         portico_response_time_bucket{{le=\"1000\"}} {}\n\
         portico_response_time_bucket{{le=\"5000\"}} {}\n\
         portico_response_time_bucket{{le=\"+Inf\"}} {}\n\
         # HELP portico_http_4xx_errors_total Client error responses\n\
         # TYPE portico_http_4xx_errors_total counter\n\
         portico_http_4xx_errors_total {}\n\
         # HELP portico_http_5xx_errors_total Server error responses\n\
         # TYPE portico_http_5xx_errors_total counter\n\
         portico_http_5xx_errors_total {}\n\
         # HELP portico_timeout_errors_total Upstream deadline expiries\n\
         # TYPE portico_timeout_errors_total counter\n\
         portico_timeout_errors_total {}\n\
         # HELP portico_connection_errors_total Upstream transport failures\n\
         # TYPE portico_connection_errors_total counter\n\
         portico_connection_errors_total {}\n\
         # HELP portico_circuit_open_rejections_total Requests rejected by an open circuit\n\
         # TYPE portico_circuit_open_rejections_total counter\n\
         portico_circuit_open_rejections_total {}\n\
         # HELP portico_breaker_transitions_total Circuit breaker state transitions\n\
         # TYPE portico_breaker_transitions_total counter\n\
         portico_breaker_transitions_total {}\n\
         # HELP portico_composite_requests_total Composite fan-out dispatches\n\
         # TYPE portico_composite_requests_total counter\n\
         portico_composite_requests_total {}\n\
         # HELP portico_dry_run_requests_total Dry-run dual dispatches\n\
         # TYPE portico_dry_run_requests_total counter\n\
         portico_dry_run_requests_total {}\n\
         # HELP portico_cache_hits_total Response cache hits\n\
         # TYPE portico_cache_hits_total counter\n\
         portico_cache_hits_total {}\n\
         # HELP portico_cache_misses_total Response cache misses\n\
         # TYPE portico_cache_misses_total counter\n\
         portico_cache_misses_total {}\n\
         # HELP portico_uptime_seconds Seconds since collector start\n\
         # TYPE portico_uptime_seconds gauge\n\
         portico_uptime_seconds {}\n",
        load(&m.requests_total),
        load(&m.requests_success),
        load(&m.requests_error),
        m.average_response_time_ms(),
        load(&m.active_requests),
        load(&m.response_time_bucket_100ms),
        load(&m.response_time_bucket_500ms),
        load(&m.response_time_bucket_1s),
        load(&m.response_time_bucket_5s),
        load(&m.response_time_bucket_inf),
        load(&m.http_4xx_errors),
        load(&m.http_5xx_errors),
        load(&m.timeout_errors),
        load(&m.connection_errors),
        load(&m.circuit_open_rejections),
        load(&m.breaker_transitions),
        load(&m.composite_requests),
        load(&m.dry_run_requests),
        load(&m.cache_hits),
        load(&m.cache_misses),
        m.start_time.elapsed().as_secs(),
    );

    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}

/// Health of the metrics subsystem itself, served at `<endpoint>/health`.
pub async fn metrics_health_handler(metrics: web::Data<MetricsCollector>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "requests_total": metrics.requests_total.load(Ordering::Relaxed),
        "uptime_seconds": metrics.start_time.elapsed().as_secs(),
    })))
}
