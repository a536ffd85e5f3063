//! Retry utilities for HTTP requests.

// crates.io
use tokio::time;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	config::RetryPolicy,
	error::{ApiError, AuthError},
};

/// Decision taken after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
	/// Sleep for the given delay, then attempt again.
	Retry {
		/// Backoff to wait before the next attempt.
		delay: Duration,
	},
	/// Transient failure on the final attempt; the budget is spent.
	Exhausted,
	/// Failure that retrying cannot fix.
	Fatal,
}

/// Controls retry backoff progression and attempt budgeting.
#[derive(Debug)]
pub struct RetryExecutor<'a> {
	policy: &'a RetryPolicy,
	attempt: u32,
	delays: Vec<Duration>,
}
impl<'a> RetryExecutor<'a> {
	/// Create a new executor respecting the supplied retry policy.
	pub fn new(policy: &'a RetryPolicy) -> Self {
		Self { policy, attempt: 0, delays: Vec::new() }
	}

	/// Zero-based index of the attempt currently in flight.
	pub fn attempt(&self) -> u32 {
		self.attempt
	}

	/// Number of attempts made so far, including the current one.
	pub fn attempts_made(&self) -> u32 {
		self.attempt + 1
	}

	/// Whether another retry is permitted under the policy.
	pub fn can_retry(&self) -> bool {
		self.attempt < self.policy.max_retries
	}

	/// Backoff delays slept so far.
	pub fn delays(&self) -> &[Duration] {
		&self.delays
	}

	/// Whether the policy treats the failure as transient.
	///
	/// An unreachable token endpoint is transient; any other token failure is not.
	pub fn is_transient(&self, err: &Error) -> bool {
		match err {
			Error::Api(ApiError::Timeout { .. }) => self.policy.retry_on_timeout,
			Error::Api(err) => err.is_retryable(),
			Error::Auth(AuthError::Network(_)) => true,
			Error::Auth(_) => false,
			other => other.is_retryable(),
		}
	}

	/// Classify a failed attempt and, when retrying, advance to the next attempt.
	pub fn on_failure(&mut self, err: &Error) -> RetryDecision {
		if !self.is_transient(err) {
			return RetryDecision::Fatal;
		}
		if !self.can_retry() {
			tracing::debug!(attempt = self.attempt, "retry budget exhausted");

			return RetryDecision::Exhausted;
		}

		let delay = self.policy.compute_backoff(self.attempt);

		self.attempt = self.attempt.saturating_add(1);
		self.delays.push(delay);

		tracing::debug!(attempt = self.attempt, ?delay, error = %err, "retry backoff computed");

		RetryDecision::Retry { delay }
	}

	/// Sleep for `delay`, returning early with [`ApiError::Cancelled`] when cancelled.
	pub async fn sleep(delay: Duration, cancel: &CancellationToken) -> Result<()> {
		if delay.is_zero() {
			return Ok(());
		}

		tokio::select! {
			biased;
			_ = cancel.cancelled() => Err(ApiError::Cancelled.into()),
			_ = time::sleep(delay) => Ok(()),
		}
	}
}
