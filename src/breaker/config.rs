//! Circuit breaker configuration.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Thresholds and timers of a circuit breaker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
	/// Failures within `failure_window` that open the circuit.
	#[serde(default = "default_failure_threshold")]
	pub failure_threshold: u32,
	/// Consecutive half-open successes that close the circuit.
	#[serde(default = "default_success_threshold")]
	pub success_threshold: u32,
	/// Time the circuit stays open before admitting a probe.
	#[serde(default = "default_open_duration")]
	pub open_duration: Duration,
	/// Concurrent probes admitted while half-open.
	#[serde(default = "default_half_open_max_requests")]
	pub half_open_max_requests: u32,
	/// Sliding window over which failures are counted.
	#[serde(default = "default_failure_window")]
	pub failure_window: Duration,
	/// Optional deadline raced against every guarded operation.
	#[serde(default)]
	pub operation_timeout: Option<Duration>,
	/// Whether a timed-out operation counts toward the failure threshold.
	#[serde(default = "default_true")]
	pub count_timeouts_as_failures: bool,
}
impl CircuitBreakerConfig {
	/// Override the failure threshold.
	pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
		self.failure_threshold = threshold;

		self
	}

	/// Override the half-open success threshold.
	pub fn with_success_threshold(mut self, threshold: u32) -> Self {
		self.success_threshold = threshold;

		self
	}

	/// Override the open duration.
	pub fn with_open_duration(mut self, duration: Duration) -> Self {
		self.open_duration = duration;

		self
	}

	/// Race every operation against `timeout`.
	pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
		self.operation_timeout = Some(timeout);

		self
	}

	/// Validate thresholds and timers.
	pub fn validate(&self) -> Result<()> {
		if self.failure_threshold == 0 {
			return Err(Error::Validation {
				field: "circuit_breaker.failure_threshold",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.success_threshold == 0 {
			return Err(Error::Validation {
				field: "circuit_breaker.success_threshold",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.half_open_max_requests == 0 {
			return Err(Error::Validation {
				field: "circuit_breaker.half_open_max_requests",
				reason: "Must admit at least one probe.".into(),
			});
		}
		if self.failure_window.is_zero() {
			return Err(Error::Validation {
				field: "circuit_breaker.failure_window",
				reason: "Must be greater than zero.".into(),
			});
		}
		if matches!(self.operation_timeout, Some(timeout) if timeout.is_zero()) {
			return Err(Error::Validation {
				field: "circuit_breaker.operation_timeout",
				reason: "Must be greater than zero when set.".into(),
			});
		}

		Ok(())
	}
}
impl Default for CircuitBreakerConfig {
	fn default() -> Self {
		Self {
			failure_threshold: default_failure_threshold(),
			success_threshold: default_success_threshold(),
			open_duration: default_open_duration(),
			half_open_max_requests: default_half_open_max_requests(),
			failure_window: default_failure_window(),
			operation_timeout: None,
			count_timeouts_as_failures: true,
		}
	}
}

fn default_failure_threshold() -> u32 {
	5
}

fn default_success_threshold() -> u32 {
	2
}

fn default_open_duration() -> Duration {
	Duration::from_secs(30)
}

fn default_half_open_max_requests() -> u32 {
	1
}

fn default_failure_window() -> Duration {
	Duration::from_secs(60)
}

fn default_true() -> bool {
	true
}
