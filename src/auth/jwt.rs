//! RS256 JWT assertions for the OAuth2 JWT-bearer grant.

// crates.io
use base64::prelude::*;
use jsonwebtoken::{Algorithm, EncodingKey, crypto};
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, auth::credentials::ServiceAccountCredentials, error::AuthError};

/// Lifetime requested for every assertion.
pub const ASSERTION_LIFETIME: TimeDelta = TimeDelta::seconds(3600);

/// JOSE header of the assertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtHeader {
	/// Signing algorithm; always `RS256`.
	pub alg: String,
	/// Token type; always `JWT`.
	pub typ: String,
	/// Identifier of the service-account key that signed the assertion.
	pub kid: String,
}

/// Claim set of the assertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
	/// Issuer: the service account email.
	pub iss: String,
	/// Space-delimited scopes.
	pub scope: String,
	/// Audience: the token endpoint.
	pub aud: String,
	/// Issued-at, seconds since the epoch.
	pub iat: i64,
	/// Expiry, seconds since the epoch.
	pub exp: i64,
	/// Impersonated user for domain-wide delegation.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sub: Option<String>,
}

/// Builds and signs service-account assertions.
pub struct JwtSigner {
	key: EncodingKey,
	key_id: String,
	issuer: String,
	audience: String,
	scope: String,
	subject: Option<String>,
}
impl JwtSigner {
	/// Parse the credentials' private key and prepare a signer for the given scopes.
	pub fn new(
		credentials: &ServiceAccountCredentials,
		scopes: &[String],
		subject: Option<String>,
	) -> Result<Self> {
		let pem = credentials.private_key_pem()?;
		let key = EncodingKey::from_rsa_pem(pem.as_bytes())
			.map_err(|err| AuthError::InvalidPrivateKey(err.to_string()))?;

		Ok(Self {
			key,
			key_id: credentials.private_key_id.clone(),
			issuer: credentials.client_email.clone(),
			audience: credentials.token_uri.clone(),
			scope: scopes.join(" "),
			subject,
		})
	}

	/// Header emitted with every assertion.
	pub fn header(&self) -> JwtHeader {
		JwtHeader { alg: "RS256".into(), typ: "JWT".into(), kid: self.key_id.clone() }
	}

	/// Claims for an assertion issued at `now`.
	pub fn claims(&self, now: DateTime<Utc>) -> JwtClaims {
		JwtClaims {
			iss: self.issuer.clone(),
			scope: self.scope.clone(),
			aud: self.audience.clone(),
			iat: now.timestamp(),
			exp: (now + ASSERTION_LIFETIME).timestamp(),
			sub: self.subject.clone(),
		}
	}

	/// Produce a compact `header.claims.signature` assertion issued at `now`.
	pub fn sign(&self, now: DateTime<Utc>) -> Result<String> {
		let header = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&self.header())?);
		let claims = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&self.claims(now))?);
		let signing_input = format!("{header}.{claims}");
		let signature = crypto::sign(signing_input.as_bytes(), &self.key, Algorithm::RS256)
			.map_err(|err| AuthError::InvalidPrivateKey(err.to_string()))?;

		Ok(format!("{signing_input}.{signature}"))
	}
}
impl std::fmt::Debug for JwtSigner {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("JwtSigner")
			.field("key_id", &self.key_id)
			.field("issuer", &self.issuer)
			.field("audience", &self.audience)
			.field("scope", &self.scope)
			.finish_non_exhaustive()
	}
}
