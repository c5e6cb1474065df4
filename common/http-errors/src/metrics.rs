use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, Opts, Registry};

static HTTP_ERROR_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static HTTP_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "http_errors_total",
            "Count of HTTP error responses emitted (status >= 400)",
        ),
        &["service", "code", "status"],
    )
    .expect("valid metric opts");
    HTTP_ERROR_REGISTRY
        .register(Box::new(counter.clone()))
        .ok();
    counter
});

/// `tower::Layer`-compatible middleware that tags every >=400 response with
/// a per-service, per-error-code counter, so every service in the fleet
/// reports under the same metric name with a `service` label.
pub fn http_error_metrics_layer(
    service: &'static str,
) -> impl Fn(Request<Body>, Next) -> futures_core_shim::BoxFuture<Response> + Clone {
    move |req: Request<Body>, next: Next| {
        futures_core_shim::boxed(async move {
            let response = next.run(req).await;
            let status = response.status();
            if status.as_u16() >= 400 {
                let code = response
                    .headers()
                    .get("X-Error-Code")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("unknown");
                HTTP_ERRORS_TOTAL
                    .with_label_values(&[service, code, status.as_str()])
                    .inc();
            }
            response
        })
    }
}

/// Minimal boxed-future helper so this crate does not need to pull in the
/// full `futures` crate just to name the `axum::middleware::from_fn` return
/// type.
mod futures_core_shim {
    use std::future::Future;
    use std::pin::Pin;

    pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

    pub fn boxed<T, F>(fut: F) -> BoxFuture<T>
    where
        F: Future<Output = T> + Send + 'static,
    {
        Box::pin(fut)
    }
}
