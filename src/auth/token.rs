//! OAuth2 access tokens and the single-slot cache holding them.

// crates.io
use secrecy::{ExposeSecret, SecretString};
// self
use crate::_prelude::*;

/// Tokens are treated as expired this long before their advertised expiry.
pub const EXPIRY_SKEW: TimeDelta = TimeDelta::seconds(60);

/// OAuth2 bearer token returned by the token endpoint.
#[derive(Clone, Debug)]
pub struct AccessToken {
	token: SecretString,
	/// Token type advertised by the endpoint (normally `Bearer`).
	pub token_type: String,
	/// UTC timestamp after which the token is rejected upstream.
	pub expires_at: DateTime<Utc>,
}
impl AccessToken {
	/// Construct a token from its raw parts.
	pub fn new(
		token: impl Into<String>,
		token_type: impl Into<String>,
		expires_at: DateTime<Utc>,
	) -> Self {
		Self { token: SecretString::new(token.into()), token_type: token_type.into(), expires_at }
	}

	/// Construct a token valid for `lifetime` from now.
	pub fn expiring_in(token: impl Into<String>, lifetime: TimeDelta) -> Self {
		Self::new(token, "Bearer", Utc::now() + lifetime)
	}

	/// Raw bearer value.
	pub fn secret(&self) -> &str {
		self.token.expose_secret()
	}

	/// Whether the token is within [`EXPIRY_SKEW`] of expiry at `now`.
	pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
		now + EXPIRY_SKEW >= self.expires_at
	}

	/// Whether the token must be refreshed before use.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(Utc::now())
	}

	/// Remaining lifetime, saturating at zero.
	pub fn remaining(&self) -> Duration {
		(self.expires_at - Utc::now()).to_std().unwrap_or_default()
	}

	/// Value for the `Authorization` header.
	pub fn authorization_header(&self) -> String {
		format!("Bearer {}", self.secret())
	}
}

/// Single-slot token cache; the owning client serialises every mutation.
#[derive(Debug, Default)]
pub struct TokenCache {
	current: Option<AccessToken>,
}
impl TokenCache {
	/// Return the cached token when it is still usable at `now`.
	pub fn valid_at(&self, now: DateTime<Utc>) -> Option<AccessToken> {
		self.current.as_ref().filter(|token| !token.is_expired_at(now)).cloned()
	}

	/// Replace the cached token wholesale.
	pub fn store(&mut self, token: AccessToken) {
		self.current = Some(token);
	}

	/// Drop the cached token.
	pub fn clear(&mut self) {
		self.current = None;
	}

	/// Peek at the cached token regardless of expiry.
	pub fn current(&self) -> Option<&AccessToken> {
		self.current.as_ref()
	}
}
