//! Authenticated REST client with retry, backoff, and cancellation.

// crates.io
use http::{HeaderMap, Method, StatusCode};
use reqwest::Client;
use serde::{Serialize, de::DeserializeOwned};
use tokio_util::sync::CancellationToken;
use url::Url;
// self
use crate::{
	_prelude::*,
	auth::client::{AuthClient, TokenSource},
	config::ClientConfig,
	error::ApiError,
	http::{
		dispatch::{self, Dispatch, RawResponse},
		retry::{RetryDecision, RetryExecutor},
	},
	metrics, security,
};

/// One logical API call, possibly spanning several attempts.
#[derive(Clone, Debug)]
pub struct ApiRequest {
	method: Method,
	path: String,
	query: Vec<(String, String)>,
	body: Option<Vec<u8>>,
	allow_empty_body: bool,
	cancel: Option<CancellationToken>,
}
impl ApiRequest {
	/// Start a request for `path`, resolved against the client's base URL.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			query: Vec::new(),
			body: None,
			allow_empty_body: false,
			cancel: None,
		}
	}

	/// Append a query parameter. Parameters are encoded sorted by key.
	pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Attach a JSON body.
	pub fn json<B>(mut self, body: &B) -> Result<Self>
	where
		B: ?Sized + Serialize,
	{
		self.body = Some(serde_json::to_vec(body).map_err(ApiError::Encoding)?);

		Ok(self)
	}

	/// Accept an empty success body, decoded as JSON `null`.
	pub fn allow_empty_body(mut self) -> Self {
		self.allow_empty_body = true;

		self
	}

	/// Abort the call, including any pending backoff, once `token` is cancelled.
	pub fn cancel_token(mut self, token: CancellationToken) -> Self {
		self.cancel = Some(token);

		self
	}

	/// HTTP verb of the request.
	pub fn method(&self) -> &Method {
		&self.method
	}

	/// Path as supplied by the caller.
	pub fn path(&self) -> &str {
		&self.path
	}

	fn sorted_query(&self) -> Vec<(&str, &str)> {
		let mut query: Vec<_> = self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

		// Stable, so repeated keys keep their insertion order.
		query.sort_by(|a, b| a.0.cmp(b.0));

		query
	}
}

/// Decoded response of a successful call.
#[derive(Clone, Debug)]
pub struct ApiResponse<T> {
	/// Final HTTP status.
	pub status: StatusCode,
	/// Headers of the final response.
	pub headers: HeaderMap,
	/// Decoded body.
	pub data: T,
	/// Number of retries performed before the call succeeded.
	pub retries: u32,
}

/// REST client that authenticates every attempt and retries transient failures.
pub struct RestClient<S = AuthClient> {
	client: Client,
	config: Arc<ClientConfig>,
	tokens: Arc<S>,
}
impl<S> RestClient<S>
where
	S: TokenSource,
{
	/// Build a client with a default reqwest client.
	pub fn new(config: ClientConfig, tokens: S) -> Result<Self> {
		let client = Client::builder()
			.user_agent(format!("gcp-core/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()
			.map_err(|err| ApiError::RequestFailed(err.to_string()))?;

		Self::with_client(config, tokens, client)
	}

	/// Build a client around the supplied reqwest client.
	pub fn with_client(config: ClientConfig, tokens: S, client: Client) -> Result<Self> {
		config.validate()?;

		Ok(Self { client, config: Arc::new(config), tokens: Arc::new(tokens) })
	}

	/// Configuration in use.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Token source used to authenticate attempts.
	pub fn token_source(&self) -> &S {
		&self.tokens
	}

	/// `GET path?query`.
	pub async fn get<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<ApiResponse<T>>
	where
		T: DeserializeOwned,
	{
		let request = query
			.iter()
			.fold(ApiRequest::new(Method::GET, path), |request, (k, v)| request.query(*k, *v));

		self.send(request).await
	}

	/// `POST path` with a JSON body.
	pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<ApiResponse<T>>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		self.send(ApiRequest::new(Method::POST, path).json(body)?).await
	}

	/// `PUT path` with a JSON body.
	pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<ApiResponse<T>>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		self.send(ApiRequest::new(Method::PUT, path).json(body)?).await
	}

	/// `PATCH path` with a JSON body.
	pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<ApiResponse<T>>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		self.send(ApiRequest::new(Method::PATCH, path).json(body)?).await
	}

	/// `DELETE path`; an empty response body is accepted.
	pub async fn delete<T>(&self, path: &str) -> Result<ApiResponse<T>>
	where
		T: DeserializeOwned,
	{
		self.send(ApiRequest::new(Method::DELETE, path).allow_empty_body()).await
	}

	/// Execute `request`, retrying transient failures under the configured policy.
	///
	/// A transient failure on the final attempt is wrapped in [`ApiError::MaxRetriesExceeded`];
	/// any other failure is returned as is. A `401` drops the cached token so the next call
	/// re-authenticates, but is not retried.
	#[tracing::instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
	pub async fn send<T>(&self, request: ApiRequest) -> Result<ApiResponse<T>>
	where
		T: DeserializeOwned,
	{
		let url = self.resolve(&request)?;
		let cancel = request.cancel.clone().unwrap_or_default();
		let mut executor = RetryExecutor::new(&self.config.retry_policy);

		loop {
			if cancel.is_cancelled() {
				return Err(ApiError::Cancelled.into());
			}

			let started = Instant::now();
			let outcome = tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(ApiError::Cancelled.into()),
				outcome = self.attempt(&request, &url) => outcome,
			};

			match outcome {
				Ok(raw) => {
					metrics::record_api_attempt(&request.method, Some(raw.status), raw.elapsed);

					let data = raw.decode(request.allow_empty_body)?;

					return Ok(ApiResponse {
						status: raw.status,
						headers: raw.headers,
						data,
						retries: executor.attempt(),
					});
				},
				Err(err) => {
					metrics::record_api_attempt(&request.method, err.status(), started.elapsed());

					if err.status() == Some(StatusCode::UNAUTHORIZED) {
						self.tokens.invalidate().await;
					}

					match executor.on_failure(&err) {
						RetryDecision::Retry { delay } => {
							metrics::record_api_retry(&request.method);

							tracing::warn!(
								attempt = executor.attempt(),
								?delay,
								error = %err,
								"transient api failure; retrying"
							);

							RetryExecutor::sleep(delay, &cancel).await?;
						},
						RetryDecision::Exhausted => {
							let attempts = executor.attempts_made();

							tracing::warn!(attempts, error = %err, "api retries exhausted");

							return Err(ApiError::MaxRetriesExceeded { attempts, last: Box::new(err) }
								.into());
						},
						RetryDecision::Fatal => return Err(err),
					}
				},
			}
		}
	}

	async fn attempt(&self, request: &ApiRequest, url: &Url) -> Result<RawResponse> {
		let token = self.tokens.access_token().await?;

		dispatch::dispatch(
			&self.client,
			Dispatch {
				method: request.method.clone(),
				url,
				token: &token,
				body: request.body.as_deref(),
				timeout: self.config.request_timeout,
				max_response_bytes: self.config.max_response_bytes,
			},
		)
		.await
	}

	fn resolve(&self, request: &ApiRequest) -> Result<Url> {
		let base = &self.config.base_url;
		let mut url = base.join(request.path.trim_start_matches('/'))?;

		// The bearer token must only ever reach the configured host.
		if url.origin() != base.origin() {
			return Err(Error::Security(format!(
				"Request path {} resolves outside {}.",
				request.path,
				base.origin().ascii_serialization()
			)));
		}
		if self.config.require_https {
			security::enforce_https(&url)?;
		}

		let query = request.sorted_query();

		if !query.is_empty() {
			url.query_pairs_mut().extend_pairs(query);
		}

		Ok(url)
	}
}
impl<S> Clone for RestClient<S> {
	fn clone(&self) -> Self {
		Self { client: self.client.clone(), config: self.config.clone(), tokens: self.tokens.clone() }
	}
}
impl<S> std::fmt::Debug for RestClient<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RestClient").field("config", &self.config).finish_non_exhaustive()
	}
}
