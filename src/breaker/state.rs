//! Circuit breaker state machine.

// std
use std::collections::VecDeque;
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, breaker::config::CircuitBreakerConfig};

/// Lifecycle states of a circuit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
	/// Calls flow normally; failures are counted.
	#[default]
	Closed,
	/// Calls are rejected until the open duration elapses.
	Open,
	/// A bounded number of probes test whether the dependency recovered.
	HalfOpen,
}
impl CircuitState {
	/// Stable label used in logs and metrics.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Closed => "closed",
			Self::Open => "open",
			Self::HalfOpen => "half_open",
		}
	}
}
impl std::fmt::Display for CircuitState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Outcome of asking the circuit to let a call through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
	/// The call may run.
	///
	/// `probe` carries the half-open generation when the call was admitted as a probe; its outcome
	/// only counts while that generation is still current.
	Admitted {
		/// Half-open generation of the admission, if any.
		probe: Option<u64>,
	},
	/// The call must fail fast.
	Rejected {
		/// Time left before the circuit admits a probe.
		remaining: Duration,
	},
}

/// Mutable state of one circuit. Callers serialise access.
#[derive(Debug)]
pub struct BreakerCore {
	state: CircuitState,
	failures: VecDeque<Instant>,
	opened_at: Option<Instant>,
	generation: u64,
	half_open_in_flight: u32,
	half_open_successes: u32,
}
impl BreakerCore {
	/// Start closed with an empty failure window.
	pub fn new() -> Self {
		Self {
			state: CircuitState::Closed,
			failures: VecDeque::new(),
			opened_at: None,
			generation: 0,
			half_open_in_flight: 0,
			half_open_successes: 0,
		}
	}

	/// Current state, without applying any timer-driven transition.
	pub fn state(&self) -> CircuitState {
		self.state
	}

	/// Instant the circuit last opened.
	pub fn opened_at(&self) -> Option<Instant> {
		self.opened_at
	}

	/// Failures still inside the window at `now`.
	pub fn recent_failures(&self, config: &CircuitBreakerConfig, now: Instant) -> usize {
		self.failures.iter().filter(|at| now.saturating_duration_since(**at) < config.failure_window).count()
	}

	/// Decide whether a call may run at `now`, moving `Open` to `HalfOpen` once the timer elapsed.
	pub fn admit(&mut self, config: &CircuitBreakerConfig, now: Instant) -> Admission {
		match self.state {
			CircuitState::Closed => Admission::Admitted { probe: None },
			CircuitState::Open => {
				let elapsed = self
					.opened_at
					.map(|at| now.saturating_duration_since(at))
					.unwrap_or(config.open_duration);

				if elapsed >= config.open_duration {
					self.enter_half_open();

					self.admit_probe(config)
				} else {
					Admission::Rejected { remaining: config.open_duration - elapsed }
				}
			},
			CircuitState::HalfOpen => self.admit_probe(config),
		}
	}

	/// Record a successful call.
	pub fn on_success(&mut self, config: &CircuitBreakerConfig, probe: Option<u64>) {
		match self.state {
			CircuitState::Closed => self.failures.clear(),
			CircuitState::HalfOpen =>
				if self.release(probe) {
					self.half_open_successes = self.half_open_successes.saturating_add(1);

					if self.half_open_successes >= config.success_threshold {
						self.close();
					}
				},
			CircuitState::Open => {},
		}
	}

	/// Record a failed call at `now`.
	pub fn on_failure(&mut self, config: &CircuitBreakerConfig, now: Instant, probe: Option<u64>) {
		match self.state {
			CircuitState::Closed => {
				self.prune(config, now);
				self.failures.push_back(now);

				if self.failures.len() >= config.failure_threshold as usize {
					self.trip(now);
				}
			},
			CircuitState::HalfOpen =>
				if self.release(probe) {
					self.trip(now);
				},
			CircuitState::Open => {},
		}
	}

	/// Give back a half-open slot without counting an outcome.
	///
	/// Returns whether the admission belonged to the current half-open generation.
	pub fn release(&mut self, probe: Option<u64>) -> bool {
		match probe {
			Some(generation)
				if self.state == CircuitState::HalfOpen && generation == self.generation =>
			{
				self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);

				true
			},
			_ => false,
		}
	}

	/// Open the circuit at `now`.
	pub fn trip(&mut self, now: Instant) {
		self.state = CircuitState::Open;
		self.opened_at = Some(now);
		self.failures.clear();
		self.half_open_in_flight = 0;
		self.half_open_successes = 0;
	}

	/// Close the circuit and forget all failures.
	pub fn close(&mut self) {
		self.state = CircuitState::Closed;
		self.opened_at = None;
		self.failures.clear();
		self.half_open_in_flight = 0;
		self.half_open_successes = 0;
	}

	fn enter_half_open(&mut self) {
		self.state = CircuitState::HalfOpen;
		self.generation = self.generation.wrapping_add(1);
		self.half_open_in_flight = 0;
		self.half_open_successes = 0;
	}

	fn admit_probe(&mut self, config: &CircuitBreakerConfig) -> Admission {
		if self.half_open_in_flight >= config.half_open_max_requests {
			return Admission::Rejected { remaining: Duration::ZERO };
		}

		self.half_open_in_flight += 1;

		Admission::Admitted { probe: Some(self.generation) }
	}

	fn prune(&mut self, config: &CircuitBreakerConfig, now: Instant) {
		while let Some(front) = self.failures.front() {
			if now.saturating_duration_since(*front) < config.failure_window {
				break;
			}

			self.failures.pop_front();
		}
	}
}
impl Default for BreakerCore {
	fn default() -> Self {
		Self::new()
	}
}
