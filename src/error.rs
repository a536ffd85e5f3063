//! Crate-wide error types and `Result` alias.

// crates.io
use http::StatusCode;
use url::Url;
// self
use crate::{_prelude::*, http::dispatch::GoogleApiError};

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the GCP core crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error(transparent)]
	Auth(#[from] AuthError),
	#[error(transparent)]
	Api(#[from] ApiError),

	#[error("Circuit for '{service}' is open; retry in {remaining:?}.")]
	CircuitOpen { service: String, remaining: Duration },
	#[error("Operation '{operation}' timed out after {after:?}.")]
	Timeout { operation: String, after: Duration },
	#[error("Security violation: {0}")]
	Security(String),
	#[error("Metrics exporter error: {0}")]
	Metrics(String),
	#[error("No circuit breaker registered for '{service}'.")]
	NotRegistered { service: String },
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Whether the failure is transient and the whole operation may be attempted again.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Api(err) => err.is_retryable(),
			Self::Auth(AuthError::Network(_)) => true,
			Self::Timeout { .. } => true,
			_ => false,
		}
	}

	/// Whether the failure was produced by a timeout rather than by the operation itself.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout { .. } | Self::Api(ApiError::Timeout { .. }))
	}

	/// Whether the failure was caused by caller cancellation.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Api(ApiError::Cancelled))
	}

	/// HTTP status attached to the failure, if any.
	pub fn status(&self) -> Option<StatusCode> {
		match self {
			Self::Auth(AuthError::HttpStatus { status, .. }) => Some(*status),
			Self::Api(ApiError::HttpStatus { status, .. }) => Some(*status),
			Self::Api(ApiError::MaxRetriesExceeded { last, .. }) => last.status(),
			_ => None,
		}
	}
}

/// Failures raised while loading credentials or exchanging them for an access token.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
	#[error("Invalid service account credentials: {0}")]
	InvalidCredentials(String),
	#[error("Invalid service account private key: {0}")]
	InvalidPrivateKey(String),
	#[error("Token request failed: {0}")]
	TokenRequestFailed(String),
	#[error("Token response could not be parsed: {0}")]
	TokenParsingFailed(String),
	#[error("Token endpoint returned HTTP {status}: {body:?}")]
	HttpStatus { status: StatusCode, body: Option<String> },
	#[error("Token endpoint unreachable: {0}")]
	Network(#[source] reqwest::Error),
}

/// Failures raised by the authenticated REST client.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
	#[error("Request could not be built: {0}")]
	RequestFailed(String),
	#[error("Invalid response: {0}")]
	InvalidResponse(String),
	#[error("HTTP {status} from {url}{}", envelope_suffix(.error))]
	HttpStatus { status: StatusCode, url: Url, error: Option<GoogleApiError> },
	#[error("Response body could not be decoded: {0}")]
	Decoding(#[source] serde_json::Error),
	#[error("Request body could not be encoded: {0}")]
	Encoding(#[source] serde_json::Error),
	#[error("Network error calling {url}: {source}")]
	Network {
		url: Url,
		#[source]
		source: reqwest::Error,
	},
	#[error("Request was cancelled.")]
	Cancelled,
	#[error("Gave up after {attempts} attempts: {last}")]
	MaxRetriesExceeded { attempts: u32, last: Box<Error> },
	#[error("Request to {url} timed out after {after:?}.")]
	Timeout { url: Url, after: Duration },
	#[error("Response size exceeds the configured guard of {limit} bytes.")]
	ResponseTooLarge { limit: u64 },
}
impl ApiError {
	/// HTTP status codes that are considered transient.
	pub const RETRYABLE_STATUSES: [StatusCode; 5] = [
		StatusCode::TOO_MANY_REQUESTS,
		StatusCode::INTERNAL_SERVER_ERROR,
		StatusCode::BAD_GATEWAY,
		StatusCode::SERVICE_UNAVAILABLE,
		StatusCode::GATEWAY_TIMEOUT,
	];

	/// Whether the failure is transient.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::HttpStatus { status, .. } => Self::RETRYABLE_STATUSES.contains(status),
			Self::Network { .. } | Self::Timeout { .. } => true,
			Self::MaxRetriesExceeded { last, .. } => last.is_retryable(),
			_ => false,
		}
	}
}

fn envelope_suffix(error: &Option<GoogleApiError>) -> String {
	error.as_ref().map(|e| format!(": {}", e.message)).unwrap_or_default()
}
