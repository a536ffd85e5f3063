//! Async Google Cloud REST core: service-account token exchange, a retrying authenticated client,
//! a circuit breaker, and an in-memory TTL cache.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod http;
pub mod metrics;
pub mod security;

mod error;
mod registry;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

pub use crate::{
	auth::{
		client::{AuthClient, StaticTokenSource, TokenSource},
		credentials::ServiceAccountCredentials,
		token::AccessToken,
	},
	breaker::{
		circuit::{CircuitBreaker, CircuitBreakerStatistics},
		config::CircuitBreakerConfig,
		state::CircuitState,
	},
	cache::{
		entry::CacheEntry,
		eviction::EvictionPolicy,
		store::{CacheConfig, CacheStatistics, TtlCache},
	},
	config::{AuthConfig, ClientConfig, RetryPolicy},
	error::{ApiError, AuthError, Error, Result},
	http::{
		dispatch::{GoogleApiError, GoogleApiErrorDetail},
		rest::{ApiRequest, ApiResponse, RestClient},
	},
	registry::{BreakerRegistry, BreakerRegistryBuilder, BreakerStatus},
};
#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
