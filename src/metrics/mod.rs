//! Metrics module
//!
//! Process-wide Prometheus counters for the pool operator. They live in the
//! default registry, which the metrics server exposes on `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

static EVENTS: Lazy<Option<IntCounterVec>> = Lazy::new(|| {
    register_int_counter_vec!(
        "pool_operator_events_total",
        "Events handled by the pool operator",
        &["source", "kind"]
    )
    .ok()
});

static POOL_OPERATIONS: Lazy<Option<IntCounterVec>> = Lazy::new(|| {
    register_int_counter_vec!(
        "pool_operator_pool_operations_total",
        "Pool create and destroy calls made to storage nodes",
        &["operation", "result"]
    )
    .ok()
});

static STORE_WRITE_FAILURES: Lazy<Option<IntCounterVec>> = Lazy::new(|| {
    register_int_counter_vec!(
        "pool_operator_store_write_failures_total",
        "Failed writes to pool resources",
        &["kind"]
    )
    .ok()
});

/// Register every counter with the default registry
pub fn init() {
    Lazy::force(&EVENTS);
    Lazy::force(&POOL_OPERATIONS);
    Lazy::force(&STORE_WRITE_FAILURES);
}

/// Count an event, e.g. `("pool", "new")`
pub fn record_event(source: &str, kind: &str) {
    if let Some(counter) = EVENTS.as_ref() {
        counter.with_label_values(&[source, kind]).inc();
    }
}

/// Count a pool operation, e.g. `("create", "success")`
pub fn record_pool_operation(operation: &str, success: bool) {
    if let Some(counter) = POOL_OPERATIONS.as_ref() {
        let result = if success { "success" } else { "failure" };
        counter.with_label_values(&[operation, result]).inc();
    }
}

/// Count a failed store write, `"status"` or `"finalizer"`
pub fn record_store_write_failure(kind: &str) {
    if let Some(counter) = STORE_WRITE_FAILURES.as_ref() {
        counter.with_label_values(&[kind]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_exported() {
        init();
        record_event("pool", "new");
        record_pool_operation("create", false);
        record_store_write_failure("status");

        let text = prometheus::TextEncoder::new()
            .encode_to_string(&prometheus::gather())
            .unwrap();
        assert!(text.contains("pool_operator_events_total"));
        assert!(text.contains("pool_operator_pool_operations_total"));
        assert!(text.contains("pool_operator_store_write_failures_total"));
    }
}
