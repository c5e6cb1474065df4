use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

fn render(registry: &Registry) -> Result<Response> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )
        .body(Body::from(buffer))?;
    Ok(response)
}

/// Location Service metrics: device reachability, per-endpoint request
/// outcomes, and auth/rate-limit results.
#[derive(Clone)]
pub struct LocationMetrics {
    registry: Registry,
    auth_outcomes: IntCounterVec,
    rate_limit_rejections: IntCounterVec,
    device_errors: IntCounterVec,
    attendance_query_seconds: Histogram,
}

impl LocationMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let auth_outcomes = IntCounterVec::new(
            Opts::new("location_auth_outcomes_total", "Authentication attempts by outcome"),
            &["outcome"],
        )?;
        let rate_limit_rejections = IntCounterVec::new(
            Opts::new("location_rate_limit_rejections_total", "Rate-limited requests"),
            &["path"],
        )?;
        let device_errors = IntCounterVec::new(
            Opts::new("location_device_errors_total", "Device adapter errors by device and kind"),
            &["device", "kind"],
        )?;
        let attendance_query_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "location_attendance_query_seconds",
                "Time spent serving an attendance or summary query",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        )?;

        registry.register(Box::new(auth_outcomes.clone()))?;
        registry.register(Box::new(rate_limit_rejections.clone()))?;
        registry.register(Box::new(device_errors.clone()))?;
        registry.register(Box::new(attendance_query_seconds.clone()))?;

        Ok(Self {
            registry,
            auth_outcomes,
            rate_limit_rejections,
            device_errors,
            attendance_query_seconds,
        })
    }

    pub fn record_auth_outcome(&self, outcome: &str) {
        self.auth_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_rate_limit_rejection(&self, path: &str) {
        self.rate_limit_rejections.with_label_values(&[path]).inc();
    }

    pub fn record_device_error(&self, device: &str, kind: &str) {
        self.device_errors.with_label_values(&[device, kind]).inc();
    }

    pub fn observe_attendance_query(&self, seconds: f64) {
        self.attendance_query_seconds.observe(seconds);
    }

    pub fn render(&self) -> Result<Response> {
        render(&self.registry)
    }
}

impl Default for LocationMetrics {
    fn default() -> Self {
        Self::new().expect("metric registration never fails with fixed option sets")
    }
}

/// Unified Gateway metrics: fan-out success/failure per Location, circuit
/// breaker trips, and fan-out latency, plus the same auth/rate-limit
/// counters as the Location Service.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    auth_outcomes: IntCounterVec,
    rate_limit_rejections: IntCounterVec,
    fan_out_results: IntCounterVec,
    circuit_breaker_trips: IntCounterVec,
    fan_out_seconds: Histogram,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let auth_outcomes = IntCounterVec::new(
            Opts::new("gateway_auth_outcomes_total", "Authentication attempts by outcome"),
            &["outcome"],
        )?;
        let rate_limit_rejections = IntCounterVec::new(
            Opts::new("gateway_rate_limit_rejections_total", "Rate-limited requests"),
            &["path"],
        )?;
        let fan_out_results = IntCounterVec::new(
            Opts::new(
                "gateway_fan_out_results_total",
                "Per-Location fan-out call results",
            ),
            &["location_id", "result"],
        )?;
        let circuit_breaker_trips = IntCounterVec::new(
            Opts::new(
                "gateway_circuit_breaker_trips_total",
                "Circuit breaker state transitions by Location",
            ),
            &["location_id", "transition"],
        )?;
        let fan_out_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "gateway_fan_out_seconds",
                "Time spent on a single Location's leg of a fan-out call",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(auth_outcomes.clone()))?;
        registry.register(Box::new(rate_limit_rejections.clone()))?;
        registry.register(Box::new(fan_out_results.clone()))?;
        registry.register(Box::new(circuit_breaker_trips.clone()))?;
        registry.register(Box::new(fan_out_seconds.clone()))?;

        Ok(Self {
            registry,
            auth_outcomes,
            rate_limit_rejections,
            fan_out_results,
            circuit_breaker_trips,
            fan_out_seconds,
        })
    }

    pub fn record_auth_outcome(&self, outcome: &str) {
        self.auth_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_rate_limit_rejection(&self, path: &str) {
        self.rate_limit_rejections.with_label_values(&[path]).inc();
    }

    pub fn record_fan_out_result(&self, location_id: &str, result: &str) {
        self.fan_out_results.with_label_values(&[location_id, result]).inc();
    }

    pub fn record_circuit_breaker_transition(&self, location_id: &str, transition: &str) {
        self.circuit_breaker_trips
            .with_label_values(&[location_id, transition])
            .inc();
    }

    pub fn observe_fan_out(&self, seconds: f64) {
        self.fan_out_seconds.observe(seconds);
    }

    pub fn render(&self) -> Result<Response> {
        render(&self.registry)
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new().expect("metric registration never fails with fixed option sets")
    }
}
