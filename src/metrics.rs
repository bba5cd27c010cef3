//! Prometheus metrics for the bridge relayer
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::time::Duration;

lazy_static! {
    // Event intake
    pub static ref EVENTS_OBSERVED: IntCounterVec = register_int_counter_vec!(
        "relayer_events_observed_total",
        "Total number of bridge events delivered by chain subscriptions",
        &["chain", "kind"]
    ).unwrap();

    pub static ref DUPLICATE_EVENTS: IntCounterVec = register_int_counter_vec!(
        "relayer_duplicate_events_total",
        "Total number of redelivered events dropped by deduplication",
        &["kind"]
    ).unwrap();

    pub static ref SUBSCRIPTION_ERRORS: IntCounterVec = register_int_counter_vec!(
        "relayer_subscription_errors_total",
        "Total number of failed log polls",
        &["chain"]
    ).unwrap();

    // Dispatch and retry outcomes
    pub static ref ACTIONS: IntCounterVec = register_int_counter_vec!(
        "relayer_actions_total",
        "Total number of dispatched actions by outcome",
        &["action", "outcome"]
    ).unwrap();

    pub static ref RETRY_ATTEMPTS: IntCounterVec = register_int_counter_vec!(
        "relayer_retry_attempts_total",
        "Total number of retry attempts by outcome",
        &["action", "outcome"]
    ).unwrap();

    pub static ref CONFIRMATION_LATENCY: HistogramVec = register_histogram_vec!(
        "relayer_confirmation_seconds",
        "Time from submission to a final receipt",
        &["action"],
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0, 90.0, 180.0]
    ).unwrap();

    // Queue and store sizes
    pub static ref RETRY_QUEUE_DEPTH: IntGauge = register_int_gauge!(
        "relayer_retry_queue_depth",
        "Number of operations waiting in the retry queue"
    ).unwrap();

    pub static ref STATUS_ENTRIES: IntGauge = register_int_gauge!(
        "relayer_status_entries",
        "Number of tracked status records"
    ).unwrap();

    pub static ref STATUS_EVICTED: IntCounter = register_int_counter!(
        "relayer_status_evicted_total",
        "Total number of status records removed by the expiry sweep"
    ).unwrap();

    // Health
    pub static ref UP: IntGauge = register_int_gauge!(
        "relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();
}

/// Register every metric so the first scrape lists them all
pub fn init() {
    lazy_static::initialize(&EVENTS_OBSERVED);
    lazy_static::initialize(&DUPLICATE_EVENTS);
    lazy_static::initialize(&SUBSCRIPTION_ERRORS);
    lazy_static::initialize(&ACTIONS);
    lazy_static::initialize(&RETRY_ATTEMPTS);
    lazy_static::initialize(&CONFIRMATION_LATENCY);
    lazy_static::initialize(&RETRY_QUEUE_DEPTH);
    lazy_static::initialize(&STATUS_ENTRIES);
    lazy_static::initialize(&STATUS_EVICTED);
    lazy_static::initialize(&UP);
}

/// Record an event delivered by a subscription
pub fn record_event_observed(chain: &str, kind: &str) {
    EVENTS_OBSERVED.with_label_values(&[chain, kind]).inc();
}

pub fn record_duplicate_event(kind: &str) {
    DUPLICATE_EVENTS.with_label_values(&[kind]).inc();
}

pub fn record_subscription_error(chain: &str) {
    SUBSCRIPTION_ERRORS.with_label_values(&[chain]).inc();
}

/// Record the outcome of a first dispatch
pub fn record_action(action: &str, outcome: &str) {
    ACTIONS.with_label_values(&[action, outcome]).inc();
}

/// Record the outcome of one retry cycle
pub fn record_retry_attempt(action: &str, outcome: &str) {
    RETRY_ATTEMPTS.with_label_values(&[action, outcome]).inc();
}

pub fn record_confirmation_latency(action: &str, elapsed: Duration) {
    CONFIRMATION_LATENCY
        .with_label_values(&[action])
        .observe(elapsed.as_secs_f64());
}

pub fn set_retry_queue_depth(depth: usize) {
    RETRY_QUEUE_DEPTH.set(depth as i64);
}

pub fn set_status_entries(count: usize) {
    STATUS_ENTRIES.set(count as i64);
}

pub fn record_status_evicted(count: usize) {
    STATUS_EVICTED.inc_by(count as u64);
}

pub fn set_up(up: bool) {
    UP.set(if up { 1 } else { 0 });
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
