//! Client configuration and validation.
//!
//! Every knob is a plain `serde` structure so applications can embed it in their own configuration
//! files; `validate` is called by the owning component before use.

// std
use std::cell::RefCell;
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, auth::scopes};

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default response size guard (10 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 10 * 1_048_576;
/// Upper bound accepted for the jitter factor.
pub const MAX_JITTER_FACTOR: f64 = 1.0;

/// Retry configuration for authenticated REST calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Maximum number of retry attempts to perform after the initial request.
	pub max_retries: u32,
	/// Delay before the first retry; doubled for every subsequent attempt.
	pub base_delay: Duration,
	/// Upper bound applied to exponential backoff growth before jitter.
	pub max_delay: Duration,
	/// Proportional jitter applied symmetrically around the computed delay.
	pub jitter_factor: f64,
	/// Whether per-request timeouts are treated as transient failures.
	#[serde(default = "default_true")]
	pub retry_on_timeout: bool,
}
impl RetryPolicy {
	/// Policy that never retries.
	pub fn none() -> Self {
		Self { max_retries: 0, ..Self::default() }
	}

	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.max_delay < self.base_delay {
			return Err(Error::Validation {
				field: "retry_policy.max_delay",
				reason: "Must be greater than or equal to base_delay.".into(),
			});
		}
		if !(0.0..=MAX_JITTER_FACTOR).contains(&self.jitter_factor) {
			return Err(Error::Validation {
				field: "retry_policy.jitter_factor",
				reason: format!("Must be within 0.0..={MAX_JITTER_FACTOR}."),
			});
		}

		Ok(())
	}

	/// Exponential delay for the given zero-based attempt, capped at `max_delay`, before jitter.
	pub fn base_backoff(&self, attempt: u32) -> Duration {
		let exponent = attempt.min(32);
		let base = self.base_delay.as_secs_f64() * 2f64.powi(exponent as i32);

		Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()).max(0.0))
	}

	/// Compute the jittered backoff for a retry attempt.
	pub fn compute_backoff(&self, attempt: u32) -> Duration {
		let bounded = self.base_backoff(attempt);

		if self.jitter_factor <= 0.0 || bounded.is_zero() {
			return bounded;
		}

		let spread = bounded.as_secs_f64() * self.jitter_factor;
		let offset = SMALL_RNG.with(|cell| cell.borrow_mut().random_range(-spread..=spread));

		Duration::from_secs_f64((bounded.as_secs_f64() + offset).max(0.0))
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 3,
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(30),
			jitter_factor: 0.2,
			retry_on_timeout: true,
		}
	}
}

/// Configuration for the service-account token client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
	/// OAuth2 scopes requested in the assertion.
	#[serde(default = "default_scopes")]
	pub scopes: Vec<String>,
	/// Optional user to impersonate through domain-wide delegation.
	#[serde(default)]
	pub subject: Option<String>,
	/// Whether the token endpoint must be reached over HTTPS.
	#[serde(default = "default_true")]
	pub require_https: bool,
	/// Timeout applied to the token exchange request.
	#[serde(default = "default_request_timeout")]
	pub request_timeout: Duration,
}
impl AuthConfig {
	/// Validate the token client configuration.
	pub fn validate(&self) -> Result<()> {
		if self.scopes.is_empty() {
			return Err(Error::Validation {
				field: "auth.scopes",
				reason: "At least one scope is required.".into(),
			});
		}
		if self.scopes.iter().any(|scope| scope.trim().is_empty() || scope.contains(' ')) {
			return Err(Error::Validation {
				field: "auth.scopes",
				reason: "Scopes must be non-empty and contain no whitespace.".into(),
			});
		}
		if self.request_timeout.is_zero() {
			return Err(Error::Validation {
				field: "auth.request_timeout",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(())
	}

	/// Replace the requested scopes.
	pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scopes = scopes.into_iter().map(Into::into).collect();

		self
	}

	/// Set HTTPS requirement to the desired value.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}
}
impl Default for AuthConfig {
	fn default() -> Self {
		Self {
			scopes: default_scopes(),
			subject: None,
			require_https: true,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
		}
	}
}

/// Configuration for the authenticated REST client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
	/// Base URL every request path is joined onto.
	pub base_url: Url,
	/// Whether the base URL must use HTTPS.
	#[serde(default = "default_true")]
	pub require_https: bool,
	/// Timeout applied to each individual HTTP attempt.
	#[serde(default = "default_request_timeout")]
	pub request_timeout: Duration,
	/// Maximum size allowed for response bodies in bytes.
	#[serde(default = "default_max_response_bytes")]
	pub max_response_bytes: u64,
	/// Retry policy applied to every call.
	#[serde(default)]
	pub retry_policy: RetryPolicy,
}
impl ClientConfig {
	/// Construct a configuration for the given base URL with default settings.
	pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
		let mut base_url = Url::parse(base_url.as_ref())?;

		// Relative joins drop the last segment unless the base ends with a slash.
		if !base_url.path().ends_with('/') {
			let path = format!("{}/", base_url.path());

			base_url.set_path(&path);
		}

		Ok(Self {
			base_url,
			require_https: true,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
			retry_policy: RetryPolicy::default(),
		})
	}

	/// Set HTTPS requirement to the desired value.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Replace the retry policy.
	pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
		self.retry_policy = retry_policy;

		self
	}

	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.require_https {
			crate::security::enforce_https(&self.base_url)?;
		}
		if self.base_url.host_str().is_none() {
			return Err(Error::Validation {
				field: "base_url",
				reason: "Must include a host component.".into(),
			});
		}
		if self.request_timeout < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "request_timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.max_response_bytes == 0 {
			return Err(Error::Validation {
				field: "max_response_bytes",
				reason: "Must be greater than zero.".into(),
			});
		}

		self.retry_policy.validate()
	}
}
fn default_true() -> bool {
	true
}

fn default_scopes() -> Vec<String> {
	vec![scopes::CLOUD_PLATFORM.to_owned()]
}

fn default_request_timeout() -> Duration {
	DEFAULT_REQUEST_TIMEOUT
}

fn default_max_response_bytes() -> u64 {
	DEFAULT_MAX_RESPONSE_BYTES
}
