use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, Opts, Registry};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static SECURITY_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "security_rejections_total",
            "Requests rejected by the security middleware, by stage and reason",
        ),
        &["service", "reason"],
    )
    .expect("metric options are valid");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registers exactly once");
    counter
});

/// Increments the per-reason rejection counter; every rejection at any
/// pipeline stage goes through here.
pub fn record_rejection(service: &str, reason: &str) {
    SECURITY_REJECTIONS.with_label_values(&[service, reason]).inc();
}

pub fn registry() -> &'static Registry {
    &REGISTRY
}
