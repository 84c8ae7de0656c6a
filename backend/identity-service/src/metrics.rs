use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, TextEncoder};

static REGISTRATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "identity_registrations_total",
            "Registration attempts by requested role and outcome",
        ),
        &["role", "outcome"],
    )
    .expect("failed to create identity_registrations_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register identity_registrations_total");
    counter
});

static EVENT_PUBLISH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "identity_event_publish_total",
            "Integration event publishes by final outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create identity_event_publish_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register identity_event_publish_total");
    counter
});

/// `outcome` is `success` or a `RegistrationErrorKind` label
pub fn record_registration(role: &str, outcome: &str) {
    REGISTRATIONS_TOTAL.with_label_values(&[role, outcome]).inc();
}

pub fn record_event_publish(outcome: &str) {
    EVENT_PUBLISH_TOTAL.with_label_values(&[outcome]).inc();
}

/// Encode the default registry in the text exposition format.
/// Returns the content type alongside the body.
pub fn render() -> Result<(String, Vec<u8>), prometheus::Error> {
    // Touch the counters so they appear before the first increment
    Lazy::force(&REGISTRATIONS_TOTAL);
    Lazy::force(&EVENT_PUBLISH_TOTAL);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok((encoder.format_type().to_string(), buffer))
}
