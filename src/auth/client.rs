//! Service-account token client with single-flight refresh.

// std
use std::future::Future;
// crates.io
use http::StatusCode;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use url::Url;
// self
use crate::{
	_prelude::*,
	auth::{
		credentials::ServiceAccountCredentials,
		jwt::JwtSigner,
		token::{AccessToken, TokenCache},
	},
	config::AuthConfig,
	error::AuthError,
	metrics, security,
};

/// Grant type of the OAuth2 JWT-bearer flow.
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Anything able to hand out bearer tokens for outgoing requests.
pub trait TokenSource: Send + Sync {
	/// Return a token that is valid for at least the expiry skew.
	fn access_token(&self) -> impl Future<Output = Result<AccessToken>> + Send;

	/// Drop any cached token so the next call obtains a fresh one.
	fn invalidate(&self) -> impl Future<Output = ()> + Send {
		async {}
	}
}
impl<T> TokenSource for Arc<T>
where
	T: TokenSource,
{
	fn access_token(&self) -> impl Future<Output = Result<AccessToken>> + Send {
		(**self).access_token()
	}

	fn invalidate(&self) -> impl Future<Output = ()> + Send {
		(**self).invalidate()
	}
}

/// Token source returning a fixed token; useful against emulators and in tests.
#[derive(Clone, Debug)]
pub struct StaticTokenSource {
	token: AccessToken,
}
impl StaticTokenSource {
	/// Wrap an existing token.
	pub fn new(token: AccessToken) -> Self {
		Self { token }
	}
}
impl TokenSource for StaticTokenSource {
	async fn access_token(&self) -> Result<AccessToken> {
		Ok(self.token.clone())
	}
}

/// Exchanges service-account assertions for access tokens and caches the result.
///
/// Clones share the cache; refreshes are serialised so concurrent callers never run parallel
/// exchanges and never observe a half-written token.
#[derive(Clone, Debug)]
pub struct AuthClient {
	credentials: Arc<ServiceAccountCredentials>,
	signer: Arc<JwtSigner>,
	config: Arc<AuthConfig>,
	token_url: Url,
	client: Client,
	cache: Arc<RwLock<TokenCache>>,
	single_flight: Arc<Mutex<()>>,
}
impl AuthClient {
	/// Build a token client with a default reqwest client.
	pub fn new(credentials: ServiceAccountCredentials, config: AuthConfig) -> Result<Self> {
		let client = Client::builder()
			.user_agent(format!("gcp-core/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()
			.map_err(|err| AuthError::TokenRequestFailed(err.to_string()))?;

		Self::with_client(credentials, config, client)
	}

	/// Build a token client around the supplied HTTP client.
	pub fn with_client(
		credentials: ServiceAccountCredentials,
		config: AuthConfig,
		client: Client,
	) -> Result<Self> {
		config.validate()?;
		credentials.validate()?;

		let token_url = credentials.token_url()?;

		if config.require_https {
			security::enforce_https(&token_url)?;
		}

		let signer = JwtSigner::new(&credentials, &config.scopes, config.subject.clone())?;

		Ok(Self {
			credentials: Arc::new(credentials),
			signer: Arc::new(signer),
			config: Arc::new(config),
			token_url,
			client,
			cache: Arc::new(RwLock::new(TokenCache::default())),
			single_flight: Arc::new(Mutex::new(())),
		})
	}

	/// Project owning the service account.
	pub fn project_id(&self) -> &str {
		&self.credentials.project_id
	}

	/// Service account email used as the assertion issuer.
	pub fn client_email(&self) -> &str {
		&self.credentials.client_email
	}

	/// Return a cached token, exchanging a new assertion when the cache is empty or expiring.
	#[tracing::instrument(skip(self), fields(client_email = %self.credentials.client_email))]
	pub async fn access_token(&self) -> Result<AccessToken> {
		if let Some(token) = self.cached().await {
			metrics::record_token_cache_hit();

			return Ok(token);
		}

		let _guard = self.single_flight.lock().await;

		// Another caller may have refreshed while we waited for the guard.
		if let Some(token) = self.cached().await {
			metrics::record_token_cache_hit();

			return Ok(token);
		}

		self.exchange_and_store().await
	}

	/// Force a new token exchange regardless of the cached token.
	#[tracing::instrument(skip(self), fields(client_email = %self.credentials.client_email))]
	pub async fn refresh(&self) -> Result<AccessToken> {
		let _guard = self.single_flight.lock().await;

		self.exchange_and_store().await
	}

	/// Drop the cached token.
	pub async fn invalidate(&self) {
		self.cache.write().await.clear();

		tracing::debug!(client_email = %self.credentials.client_email, "cached token dropped");
	}

	/// Seed the cache with an externally obtained token.
	pub async fn set_token(&self, token: AccessToken) {
		self.cache.write().await.store(token);
	}

	async fn cached(&self) -> Option<AccessToken> {
		self.cache.read().await.valid_at(Utc::now())
	}

	async fn exchange_and_store(&self) -> Result<AccessToken> {
		let started = Instant::now();

		match self.exchange().await {
			Ok(token) => {
				metrics::record_token_refresh_success(started.elapsed());

				self.cache.write().await.store(token.clone());

				tracing::debug!(
					token = %security::redact(token.secret()),
					expires_at = %token.expires_at,
					"access token refreshed"
				);

				Ok(token)
			},
			Err(err) => {
				metrics::record_token_refresh_error();

				tracing::warn!(error = %err, "token exchange failed");

				Err(err)
			},
		}
	}

	async fn exchange(&self) -> Result<AccessToken> {
		let assertion = self.signer.sign(Utc::now())?;
		let form = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];
		let response = self
			.client
			.post(self.token_url.clone())
			.form(&form)
			.timeout(self.config.request_timeout)
			.send()
			.await
			.map_err(map_transport_error)?;
		let status = response.status();

		if status != StatusCode::OK {
			let body = response.text().await.ok();

			return Err(AuthError::HttpStatus { status, body }.into());
		}

		let bytes = response.bytes().await.map_err(map_transport_error)?;
		let parsed: TokenResponse = serde_json::from_slice(&bytes)
			.map_err(|err| AuthError::TokenParsingFailed(err.to_string()))?;

		if parsed.access_token.is_empty() {
			return Err(AuthError::TokenParsingFailed("Empty access_token.".into()).into());
		}

		let expires_at = (parsed.expires_in > 0)
			.then_some(parsed.expires_in)
			.and_then(TimeDelta::try_seconds)
			.and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
			.ok_or_else(|| {
				AuthError::TokenParsingFailed(format!(
					"expires_in {} out of range.",
					parsed.expires_in
				))
			})?;

		Ok(AccessToken::new(parsed.access_token, parsed.token_type, expires_at))
	}
}
impl TokenSource for AuthClient {
	fn access_token(&self) -> impl Future<Output = Result<AccessToken>> + Send {
		AuthClient::access_token(self)
	}

	fn invalidate(&self) -> impl Future<Output = ()> + Send {
		AuthClient::invalidate(self)
	}
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
	access_token: String,
	#[serde(default = "default_token_type")]
	token_type: String,
	#[serde(default = "default_expires_in")]
	expires_in: i64,
}

fn map_transport_error(err: reqwest::Error) -> Error {
	if err.is_builder() {
		AuthError::TokenRequestFailed(err.to_string()).into()
	} else {
		AuthError::Network(err).into()
	}
}

fn default_token_type() -> String {
	"Bearer".into()
}

fn default_expires_in() -> i64 {
	DEFAULT_TOKEN_LIFETIME_SECS
}
