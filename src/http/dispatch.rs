//! Single authenticated HTTP attempt: headers, bounded body read, and error mapping.

// crates.io
use http::{
	HeaderMap, HeaderValue, Method, StatusCode,
	header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE},
};
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use url::Url;
// self
use crate::{_prelude::*, auth::token::AccessToken, error::ApiError};

const APPLICATION_JSON: &str = "application/json";

/// Standard Google API error payload found under the top-level `error` key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleApiError {
	/// HTTP status code repeated by the API.
	pub code: u16,
	/// Human-readable message.
	pub message: String,
	/// Canonical status name such as `NOT_FOUND` or `PERMISSION_DENIED`.
	#[serde(default)]
	pub status: Option<String>,
	/// Legacy per-error details.
	#[serde(default)]
	pub errors: Vec<GoogleApiErrorDetail>,
}

/// One entry of the legacy `errors` array.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleApiErrorDetail {
	/// Error domain, e.g. `global`.
	#[serde(default)]
	pub domain: String,
	/// Machine-readable reason, e.g. `notFound`.
	#[serde(default)]
	pub reason: String,
	/// Human-readable message.
	#[serde(default)]
	pub message: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
	error: GoogleApiError,
}

/// One outgoing request, fully resolved.
#[derive(Debug)]
pub struct Dispatch<'a> {
	/// HTTP verb.
	pub method: Method,
	/// Absolute URL including the encoded query string.
	pub url: &'a Url,
	/// Bearer token attached to the request.
	pub token: &'a AccessToken,
	/// Pre-encoded JSON body.
	pub body: Option<&'a [u8]>,
	/// Timeout applied to the whole attempt.
	pub timeout: Duration,
	/// Upper bound on the response body size.
	pub max_response_bytes: u64,
}

/// Successful response with its body read into memory.
#[derive(Clone, Debug)]
pub struct RawResponse {
	/// HTTP status in the 2xx range.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Raw response body.
	pub body: Vec<u8>,
	/// Round-trip duration of the attempt.
	pub elapsed: Duration,
}
impl RawResponse {
	/// Decode the body into `T`.
	///
	/// When `allow_empty` is set an empty body is decoded from JSON `null`, so `()`, `Option<_>`,
	/// and `serde_json::Value` callers receive an empty sentinel instead of a decoding error.
	pub fn decode<T>(&self, allow_empty: bool) -> Result<T>
	where
		T: DeserializeOwned,
	{
		if allow_empty && self.body.iter().all(u8::is_ascii_whitespace) {
			return T::deserialize(serde_json::Value::Null)
				.map_err(|err| ApiError::Decoding(err).into());
		}

		serde_json::from_slice(&self.body).map_err(|err| ApiError::Decoding(err).into())
	}
}

/// Execute one authenticated attempt.
///
/// Non-2xx statuses become [`ApiError::HttpStatus`] carrying the parsed error envelope when the
/// body contains one.
pub async fn dispatch(client: &Client, request: Dispatch<'_>) -> Result<RawResponse> {
	let url = request.url;
	let authorization = HeaderValue::from_str(&request.token.authorization_header())
		.map_err(|err| ApiError::RequestFailed(format!("Invalid bearer token: {err}.")))?;
	let mut builder = client
		.request(request.method.clone(), url.clone())
		.header(AUTHORIZATION, authorization)
		.header(ACCEPT, APPLICATION_JSON)
		.header(CONTENT_TYPE, APPLICATION_JSON)
		.timeout(request.timeout);

	if let Some(body) = request.body {
		builder = builder.body(body.to_vec());
	}

	let start = Instant::now();
	let mut response =
		builder.send().await.map_err(|err| map_transport_error(err, url, request.timeout))?;
	let status = response.status();
	let headers = response.headers().clone();

	if let Some(length) = declared_length(&headers)
		&& length > request.max_response_bytes
	{
		return Err(ApiError::ResponseTooLarge { limit: request.max_response_bytes }.into());
	}

	let mut body = Vec::new();

	while let Some(chunk) =
		response.chunk().await.map_err(|err| map_transport_error(err, url, request.timeout))?
	{
		if (body.len() + chunk.len()) as u64 > request.max_response_bytes {
			return Err(ApiError::ResponseTooLarge { limit: request.max_response_bytes }.into());
		}

		body.extend_from_slice(&chunk);
	}

	let elapsed = start.elapsed();

	tracing::debug!(method = %request.method, %url, %status, ?elapsed, "api attempt complete");

	if !status.is_success() {
		let error = parse_error_envelope(&body);

		return Err(ApiError::HttpStatus { status, url: url.clone(), error }.into());
	}

	Ok(RawResponse { status, headers, body, elapsed })
}

/// Best-effort parse of the standard `{"error": {...}}` envelope.
pub fn parse_error_envelope(body: &[u8]) -> Option<GoogleApiError> {
	serde_json::from_slice::<ErrorEnvelope>(body).ok().map(|envelope| envelope.error)
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
	headers.get(CONTENT_LENGTH).and_then(|value| value.to_str().ok()).and_then(|s| s.parse().ok())
}

fn map_transport_error(err: reqwest::Error, url: &Url, timeout: Duration) -> Error {
	if err.is_timeout() {
		ApiError::Timeout { url: url.clone(), after: timeout }.into()
	} else if err.is_builder() {
		ApiError::RequestFailed(err.to_string()).into()
	} else {
		ApiError::Network { url: url.clone(), source: err }.into()
	}
}
