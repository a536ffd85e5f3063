//! Registry of named circuit breakers shared across clients.

// std
use std::collections::HashMap;
// crates.io
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
// self
use crate::{
	_prelude::*,
	breaker::{
		circuit::{CircuitBreaker, CircuitBreakerStatistics},
		config::CircuitBreakerConfig,
		state::CircuitState,
	},
};

/// Builder for [`BreakerRegistry`].
#[derive(Debug, Default)]
pub struct BreakerRegistryBuilder {
	default_config: CircuitBreakerConfig,
}
impl BreakerRegistryBuilder {
	/// Create a builder with the default breaker configuration.
	pub fn new() -> Self {
		Self::default()
	}

	/// Configuration applied to breakers created by [`BreakerRegistry::get_or_create`].
	pub fn default_config(mut self, config: CircuitBreakerConfig) -> Self {
		self.default_config = config;

		self
	}

	/// Validate the configuration and construct a [`BreakerRegistry`].
	pub fn build(self) -> Result<BreakerRegistry> {
		self.default_config.validate()?;

		Ok(BreakerRegistry {
			inner: Arc::new(RwLock::new(RegistryState { breakers: HashMap::new() })),
			default_config: Arc::new(self.default_config),
		})
	}
}

/// Shares one [`CircuitBreaker`] per service name.
///
/// Clones share the same breakers.
#[derive(Clone, Debug)]
pub struct BreakerRegistry {
	inner: Arc<RwLock<RegistryState>>,
	default_config: Arc<CircuitBreakerConfig>,
}
impl BreakerRegistry {
	/// Create a registry using the default breaker configuration.
	pub fn new() -> Self {
		Self {
			inner: Arc::new(RwLock::new(RegistryState { breakers: HashMap::new() })),
			default_config: Arc::new(CircuitBreakerConfig::default()),
		}
	}

	/// Create a [`BreakerRegistryBuilder`].
	pub fn builder() -> BreakerRegistryBuilder {
		BreakerRegistryBuilder::new()
	}

	/// Register a breaker with its own configuration, replacing any existing one.
	pub async fn register(
		&self,
		service: &str,
		config: CircuitBreakerConfig,
	) -> Result<Arc<CircuitBreaker>> {
		validate_service(service)?;

		let breaker = Arc::new(CircuitBreaker::new(service, config)?);
		let replaced =
			self.inner.write().await.breakers.insert(service.to_owned(), breaker.clone()).is_some();

		tracing::debug!(service, replaced, "circuit breaker registered");

		Ok(breaker)
	}

	/// Return the breaker for `service`, creating it with the default configuration on first use.
	pub async fn get_or_create(&self, service: &str) -> Result<Arc<CircuitBreaker>> {
		if let Some(breaker) = self.get(service).await {
			return Ok(breaker);
		}

		validate_service(service)?;

		let mut state = self.inner.write().await;

		// Another caller may have inserted the breaker while we waited for the write lock.
		if let Some(breaker) = state.breakers.get(service) {
			return Ok(breaker.clone());
		}

		let breaker = Arc::new(CircuitBreaker::new(service, (*self.default_config).clone())?);

		state.breakers.insert(service.to_owned(), breaker.clone());

		Ok(breaker)
	}

	/// Look up a registered breaker.
	pub async fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
		self.inner.read().await.breakers.get(service).cloned()
	}

	/// Remove a breaker if present.
	pub async fn remove(&self, service: &str) -> bool {
		self.inner.write().await.breakers.remove(service).is_some()
	}

	/// Status of one registered breaker.
	pub async fn status(&self, service: &str) -> Result<BreakerStatus> {
		let breaker = self
			.get(service)
			.await
			.ok_or_else(|| Error::NotRegistered { service: service.to_owned() })?;

		Ok(BreakerStatus::from_breaker(&breaker))
	}

	/// Status of every registered breaker, sorted by service name.
	pub async fn all_statuses(&self) -> Vec<BreakerStatus> {
		let breakers: Vec<Arc<CircuitBreaker>> =
			{ self.inner.read().await.breakers.values().cloned().collect() };
		let mut statuses: Vec<_> =
			breakers.iter().map(|breaker| BreakerStatus::from_breaker(breaker)).collect();

		statuses.sort_by(|a, b| a.service.cmp(&b.service));

		statuses
	}

	/// Reset every registered breaker to closed.
	pub async fn reset_all(&self) {
		let breakers: Vec<Arc<CircuitBreaker>> =
			{ self.inner.read().await.breakers.values().cloned().collect() };

		for breaker in breakers {
			breaker.reset();
		}
	}
}
impl Default for BreakerRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// Status projection of one breaker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BreakerStatus {
	/// Guarded service name.
	pub service: String,
	/// Effective state, with the open timer applied.
	pub state: CircuitState,
	/// Calls offered to the breaker.
	pub total_requests: u64,
	/// Calls rejected while open.
	pub rejected_requests: u64,
	/// Calls counted as failures.
	pub failed_requests: u64,
	/// Failures currently inside the sliding window.
	pub recent_failures: usize,
	/// Wall-clock time the status was captured.
	pub captured_at: DateTime<Utc>,
}
impl BreakerStatus {
	fn from_breaker(breaker: &CircuitBreaker) -> Self {
		let CircuitBreakerStatistics {
			total_requests,
			rejected_requests,
			failed_requests,
			recent_failures,
			..
		} = breaker.statistics();

		Self {
			service: breaker.service().to_owned(),
			state: breaker.state(),
			total_requests,
			rejected_requests,
			failed_requests,
			recent_failures,
			captured_at: Utc::now(),
		}
	}
}

#[derive(Debug)]
struct RegistryState {
	breakers: HashMap<String, Arc<CircuitBreaker>>,
}

fn validate_service(value: &str) -> Result<()> {
	if value.is_empty() {
		return Err(Error::Validation { field: "service", reason: "Must not be empty.".into() });
	}
	if value.len() > 128 {
		return Err(Error::Validation {
			field: "service",
			reason: "Must be 128 characters or fewer.".into(),
		});
	}
	if !value.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'/')) {
		return Err(Error::Validation {
			field: "service",
			reason: "May only contain ASCII letters, numbers, '-', '_', '.', or '/'.".into(),
		});
	}

	Ok(())
}
