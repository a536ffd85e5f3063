//! Circuit breaker wrapping arbitrary async operations.

// std
use std::{
	future::Future,
	sync::{Mutex, MutexGuard, PoisonError},
};
// crates.io
use serde::Serialize;
use tokio::time;
// self
use crate::{
	_prelude::*,
	breaker::{
		config::CircuitBreakerConfig,
		state::{Admission, BreakerCore, CircuitState},
	},
	metrics,
};

/// Point-in-time counters of a circuit breaker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStatistics {
	/// Current state.
	pub state: CircuitState,
	/// Calls offered to the breaker.
	pub total_requests: u64,
	/// Calls that completed successfully.
	pub successful_requests: u64,
	/// Calls counted as failures.
	pub failed_requests: u64,
	/// Calls rejected without running.
	pub rejected_requests: u64,
	/// Calls that hit the operation timeout.
	pub timeouts: u64,
	/// State changes since creation or the last reset.
	pub state_transitions: u64,
	/// Failures currently inside the sliding window.
	pub recent_failures: usize,
}

#[derive(Debug, Default)]
struct Counters {
	total: u64,
	successes: u64,
	failures: u64,
	rejections: u64,
	timeouts: u64,
	transitions: u64,
}

#[derive(Debug, Default)]
struct Inner {
	core: BreakerCore,
	counters: Counters,
}

/// Outcome classification of a finished call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Verdict {
	Success,
	Failure,
	Neutral,
}

/// Guards one dependency, failing fast while it is unhealthy.
///
/// All transitions go through a single mutex that is never held across an await.
#[derive(Debug)]
pub struct CircuitBreaker {
	service: Arc<str>,
	config: CircuitBreakerConfig,
	inner: Mutex<Inner>,
}
impl CircuitBreaker {
	/// Create a closed breaker for `service`.
	pub fn new(service: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Result<Self> {
		config.validate()?;

		Ok(Self { service: service.into(), config, inner: Mutex::new(Inner::default()) })
	}

	/// Name of the guarded service.
	pub fn service(&self) -> &str {
		&self.service
	}

	/// Configuration in use.
	pub fn config(&self) -> &CircuitBreakerConfig {
		&self.config
	}

	/// Run `op` through the breaker; every error counts as a failure.
	pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		self.execute_with(op, |outcome| outcome.is_err()).await
	}

	/// Run `op` through the breaker, letting `is_failure` decide which outcomes count as failures.
	///
	/// The predicate sees the whole result, so a successful value carrying an error payload can
	/// trip the circuit while still being returned to the caller. Errors it rejects are returned
	/// unchanged without moving the circuit. While the circuit is open the call fails with
	/// [`Error::CircuitOpen`] and `op` is never invoked.
	#[tracing::instrument(skip_all, fields(service = %self.service))]
	pub async fn execute_with<F, Fut, T, P>(&self, op: F, is_failure: P) -> Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>>,
		P: Fn(&Result<T>) -> bool,
	{
		let mut permit = self.admit()?;
		let outcome = match self.config.operation_timeout {
			Some(limit) => match time::timeout(limit, op()).await {
				Ok(outcome) => outcome,
				Err(_) => Err(Error::Timeout { operation: self.service.to_string(), after: limit }),
			},
			None => op().await,
		};
		let flagged = is_failure(&outcome);
		let verdict = match &outcome {
			Ok(_) if flagged => Verdict::Failure,
			Ok(_) => Verdict::Success,
			Err(err) if err.is_timeout() => {
				self.lock().counters.timeouts += 1;

				if self.config.count_timeouts_as_failures && flagged {
					Verdict::Failure
				} else {
					Verdict::Neutral
				}
			},
			Err(_) if flagged => Verdict::Failure,
			Err(_) => Verdict::Neutral,
		};

		permit.settle(verdict);

		outcome
	}

	/// Current state, applying the open timer without admitting a call.
	pub fn state(&self) -> CircuitState {
		self.effective_state(&self.lock())
	}

	/// Snapshot of the breaker counters.
	pub fn statistics(&self) -> CircuitBreakerStatistics {
		let inner = self.lock();
		let counters = &inner.counters;

		CircuitBreakerStatistics {
			state: self.effective_state(&inner),
			total_requests: counters.total,
			successful_requests: counters.successes,
			failed_requests: counters.failures,
			rejected_requests: counters.rejections,
			timeouts: counters.timeouts,
			state_transitions: counters.transitions,
			recent_failures: inner.core.recent_failures(&self.config, Instant::now()),
		}
	}

	/// Close the circuit and zero all counters.
	///
	/// Emits a transition metric when the circuit was not already closed.
	pub fn reset(&self) {
		let mut inner = self.lock();
		let from = inner.core.state();

		inner.core.close();
		inner.counters = Counters::default();

		if from != CircuitState::Closed {
			metrics::record_breaker_transition(&self.service, from, CircuitState::Closed);
		}

		tracing::info!(service = %self.service, %from, "circuit manually reset");
	}

	/// Open the circuit immediately, restarting the open timer.
	pub fn force_open(&self) {
		let mut inner = self.lock();
		let from = inner.core.state();

		inner.core.trip(Instant::now());
		self.note_transition(&mut inner, from);

		tracing::warn!(service = %self.service, "circuit forced open");
	}

	fn admit(&self) -> Result<Permit<'_>> {
		let mut inner = self.lock();
		let from = inner.core.state();

		inner.counters.total += 1;

		let admission = inner.core.admit(&self.config, Instant::now());

		self.note_transition(&mut inner, from);

		match admission {
			Admission::Admitted { probe } => Ok(Permit { breaker: self, probe, settled: false }),
			Admission::Rejected { remaining } => {
				inner.counters.rejections += 1;

				metrics::record_breaker_rejection(&self.service);

				tracing::debug!(service = %self.service, ?remaining, "circuit open; call rejected");

				Err(Error::CircuitOpen { service: self.service.to_string(), remaining })
			},
		}
	}

	fn settle(&self, probe: Option<u64>, verdict: Verdict) {
		let mut inner = self.lock();
		let from = inner.core.state();

		match verdict {
			Verdict::Success => {
				inner.counters.successes += 1;
				inner.core.on_success(&self.config, probe);
			},
			Verdict::Failure => {
				inner.counters.failures += 1;
				inner.core.on_failure(&self.config, Instant::now(), probe);
			},
			Verdict::Neutral => {
				inner.core.release(probe);
			},
		}

		self.note_transition(&mut inner, from);
	}

	fn effective_state(&self, inner: &Inner) -> CircuitState {
		match (inner.core.state(), inner.core.opened_at()) {
			(CircuitState::Open, Some(at))
				if Instant::now().saturating_duration_since(at) >= self.config.open_duration =>
				CircuitState::HalfOpen,
			(state, _) => state,
		}
	}

	fn note_transition(&self, inner: &mut Inner, from: CircuitState) {
		let to = inner.core.state();

		if from == to {
			return;
		}

		inner.counters.transitions += 1;

		metrics::record_breaker_transition(&self.service, from, to);

		match to {
			CircuitState::Open => tracing::warn!(service = %self.service, %from, %to, "circuit opened"),
			_ => tracing::info!(service = %self.service, %from, %to, "circuit state changed"),
		}
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Admission handed to a running call; releases its half-open slot if the call is dropped.
struct Permit<'a> {
	breaker: &'a CircuitBreaker,
	probe: Option<u64>,
	settled: bool,
}
impl Permit<'_> {
	fn settle(&mut self, verdict: Verdict) {
		self.settled = true;
		self.breaker.settle(self.probe, verdict);
	}
}
impl Drop for Permit<'_> {
	fn drop(&mut self) {
		if !self.settled {
			self.breaker.settle(self.probe, Verdict::Neutral);
		}
	}
}
