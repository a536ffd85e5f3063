//! Metrics emitted through the `metrics` facade.
//!
//! Nothing is recorded unless the application installs a recorder, either its own or the
//! Prometheus exporter behind the `prometheus` feature.

// std
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
use http::{Method, StatusCode};
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::{_prelude::*, breaker::state::CircuitState, cache::eviction::EvictionPolicy};

type LabelSet = SmallVec<[Label; 4]>;

const METRIC_TOKEN_CACHE_HITS: &str = "gcp_token_cache_hits_total";
const METRIC_TOKEN_REFRESH_TOTAL: &str = "gcp_token_refresh_total";
const METRIC_TOKEN_REFRESH_DURATION: &str = "gcp_token_refresh_duration_seconds";
const METRIC_API_ATTEMPTS_TOTAL: &str = "gcp_api_attempts_total";
const METRIC_API_ATTEMPT_DURATION: &str = "gcp_api_attempt_duration_seconds";
const METRIC_API_RETRIES_TOTAL: &str = "gcp_api_retries_total";
const METRIC_BREAKER_TRANSITIONS: &str = "gcp_circuit_transitions_total";
const METRIC_BREAKER_REJECTIONS: &str = "gcp_circuit_rejections_total";
const METRIC_CACHE_HITS: &str = "gcp_cache_hits_total";
const METRIC_CACHE_MISSES: &str = "gcp_cache_misses_total";
const METRIC_CACHE_EVICTIONS: &str = "gcp_cache_evictions_total";
const METRIC_CACHE_EXPIRATIONS: &str = "gcp_cache_expirations_total";

#[cfg(feature = "prometheus")]
static EXPORTER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder as the global `metrics` recorder and return its handle.
///
/// Later calls return the handle installed by the first one.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<&'static PrometheusHandle> {
	if let Some(handle) = EXPORTER.get() {
		return Ok(handle);
	}

	let recorder = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(format!("Failed to install Prometheus recorder: {err}.")))?;

	Ok(EXPORTER.get_or_init(|| recorder))
}

/// Handle of the installed Prometheus recorder, if any.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	EXPORTER.get()
}

/// Record a token served from the cache.
pub fn record_token_cache_hit() {
	metrics::counter!(METRIC_TOKEN_CACHE_HITS).increment(1);
}

/// Record a successful token exchange and its latency.
pub fn record_token_refresh_success(duration: Duration) {
	metrics::counter!(METRIC_TOKEN_REFRESH_TOTAL, status_labels("success").iter()).increment(1);
	metrics::histogram!(METRIC_TOKEN_REFRESH_DURATION).record(duration.as_secs_f64());
}

/// Record a failed token exchange.
pub fn record_token_refresh_error() {
	metrics::counter!(METRIC_TOKEN_REFRESH_TOTAL, status_labels("error").iter()).increment(1);
}

/// Record one HTTP attempt and its latency; `status` is `None` when no response arrived.
pub fn record_api_attempt(method: &Method, status: Option<StatusCode>, duration: Duration) {
	let mut labels = method_labels(method);

	labels.push(Label::new(
		"status",
		status.map(|status| status.as_u16().to_string()).unwrap_or_else(|| "none".into()),
	));

	metrics::counter!(METRIC_API_ATTEMPTS_TOTAL, labels.iter()).increment(1);
	metrics::histogram!(METRIC_API_ATTEMPT_DURATION, labels.iter()).record(duration.as_secs_f64());
}

/// Record a retry scheduled after a transient failure.
pub fn record_api_retry(method: &Method) {
	metrics::counter!(METRIC_API_RETRIES_TOTAL, method_labels(method).iter()).increment(1);
}

/// Record a circuit state change.
pub fn record_breaker_transition(service: &str, from: CircuitState, to: CircuitState) {
	let mut labels = service_labels(service);

	labels.push(Label::new("from", from.as_str()));
	labels.push(Label::new("to", to.as_str()));

	metrics::counter!(METRIC_BREAKER_TRANSITIONS, labels.iter()).increment(1);
}

/// Record a call rejected by an open circuit.
pub fn record_breaker_rejection(service: &str) {
	metrics::counter!(METRIC_BREAKER_REJECTIONS, service_labels(service).iter()).increment(1);
}

/// Record a cache read served from a live entry.
pub fn record_cache_hit(cache: &str) {
	metrics::counter!(METRIC_CACHE_HITS, cache_labels(cache).iter()).increment(1);
}

/// Record a cache read that found no live entry.
pub fn record_cache_miss(cache: &str) {
	metrics::counter!(METRIC_CACHE_MISSES, cache_labels(cache).iter()).increment(1);
}

/// Record an entry evicted to make room.
pub fn record_cache_eviction(cache: &str, policy: EvictionPolicy) {
	let mut labels = cache_labels(cache);

	labels.push(Label::new("policy", policy.as_str()));

	metrics::counter!(METRIC_CACHE_EVICTIONS, labels.iter()).increment(1);
}

/// Record entries removed because they expired.
pub fn record_cache_expiration(cache: &str, count: u64) {
	metrics::counter!(METRIC_CACHE_EXPIRATIONS, cache_labels(cache).iter()).increment(count);
}

fn status_labels(status: &'static str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("status", status));

	labels
}

fn method_labels(method: &Method) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("method", method.as_str().to_owned()));

	labels
}

fn service_labels(service: &str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("service", service.to_owned()));

	labels
}

fn cache_labels(cache: &str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("cache", cache.to_owned()));

	labels
}
