//! Token exchange and caching against a mock token endpoint.

// std
use std::time::Duration;
// crates.io
use chrono::TimeDelta;
use gcp_core::{AccessToken, AuthClient, AuthError, Error, Result};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{body_string_contains, header, method, path},
};
// self
use crate::common::{self, TOKEN_PATH};

const GRANT: &str = "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer";

async fn client(server: &MockServer) -> AuthClient {
	AuthClient::new(common::credentials(server), common::auth_config()).expect("auth client")
}

#[tokio::test]
async fn cached_token_outside_skew_is_served_without_exchange() -> Result<()> {
	common::init_tracing();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(TOKEN_PATH))
		.respond_with(ResponseTemplate::new(200).set_body_json(common::token_body("unused", 3600)))
		.expect(0)
		.mount(&server)
		.await;

	let auth = client(&server).await;

	auth.set_token(AccessToken::expiring_in("ya29.cached", TimeDelta::seconds(120))).await;

	let token = auth.access_token().await?;

	assert_eq!(token.secret(), "ya29.cached");

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn token_within_skew_is_refreshed_once() -> Result<()> {
	common::init_tracing();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(TOKEN_PATH))
		.and(header("content-type", "application/x-www-form-urlencoded"))
		.and(body_string_contains(GRANT))
		.and(body_string_contains("assertion="))
		.respond_with(ResponseTemplate::new(200).set_body_json(common::token_body("ya29.fresh", 3600)))
		.expect(1)
		.mount(&server)
		.await;

	let auth = client(&server).await;

	auth.set_token(AccessToken::expiring_in("ya29.stale", TimeDelta::seconds(30))).await;

	let first = auth.access_token().await?;
	let second = auth.access_token().await?;

	assert_eq!(first.secret(), "ya29.fresh");
	assert_eq!(second.secret(), "ya29.fresh");
	assert!(first.remaining() > Duration::from_secs(3500));

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn concurrent_callers_share_one_exchange() -> Result<()> {
	common::init_tracing();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(TOKEN_PATH))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(common::token_body("ya29.shared", 3600))
				.set_delay(Duration::from_millis(100)),
		)
		.expect(1)
		.mount(&server)
		.await;

	let auth = client(&server).await;
	let tasks: Vec<_> = (0..8)
		.map(|_| {
			let auth = auth.clone();

			tokio::spawn(async move { auth.access_token().await })
		})
		.collect();

	for task in tasks {
		let token = task.await.expect("join")?;

		assert_eq!(token.secret(), "ya29.shared");
	}

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn missing_expires_in_defaults_to_one_hour() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(TOKEN_PATH))
		.respond_with(
			ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "ya29.x"})),
		)
		.mount(&server)
		.await;

	let token = client(&server).await.access_token().await?;

	assert_eq!(token.token_type, "Bearer");
	assert!(token.remaining() > Duration::from_secs(3500));

	Ok(())
}

#[tokio::test]
async fn rejected_exchange_surfaces_status_and_body() {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(TOKEN_PATH))
		.respond_with(
			ResponseTemplate::new(400)
				.set_body_string(r#"{"error":"invalid_grant","error_description":"Invalid JWT"}"#),
		)
		.expect(1)
		.mount(&server)
		.await;

	let err = client(&server).await.access_token().await.unwrap_err();

	match err {
		Error::Auth(AuthError::HttpStatus { status, body }) => {
			assert_eq!(status.as_u16(), 400);
			assert!(body.unwrap_or_default().contains("invalid_grant"));
		},
		other => panic!("expected token HTTP error, got {other:?}"),
	}

	server.verify().await;
}

#[tokio::test]
async fn malformed_token_response_is_a_parsing_error() {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(TOKEN_PATH))
		.respond_with(ResponseTemplate::new(200).set_body_string("not json"))
		.mount(&server)
		.await;

	let err = client(&server).await.access_token().await.unwrap_err();

	assert!(matches!(err, Error::Auth(AuthError::TokenParsingFailed(_))));
}

#[tokio::test]
async fn out_of_range_lifetimes_are_parsing_errors() {
	for expires_in in [0_i64, -30, 1_000_000_000_000_000] {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path(TOKEN_PATH))
			.respond_with(
				ResponseTemplate::new(200).set_body_json(common::token_body("ya29.odd", expires_in)),
			)
			.expect(1)
			.mount(&server)
			.await;

		let err = client(&server).await.access_token().await.unwrap_err();

		assert!(
			matches!(err, Error::Auth(AuthError::TokenParsingFailed(_))),
			"expires_in {expires_in}: {err:?}"
		);

		server.verify().await;
	}
}

#[tokio::test]
async fn invalidate_forces_next_exchange() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(TOKEN_PATH))
		.respond_with(ResponseTemplate::new(200).set_body_json(common::token_body("ya29.n", 3600)))
		.expect(2)
		.mount(&server)
		.await;

	let auth = client(&server).await;

	auth.access_token().await?;
	auth.invalidate().await;
	auth.access_token().await?;

	server.verify().await;

	Ok(())
}

#[test]
fn https_token_endpoint_is_required_by_default() {
	let json = serde_json::json!({
		"type": "service_account",
		"project_id": "demo-project",
		"private_key_id": "key-1",
		"private_key": common::PRIVATE_KEY,
		"client_email": "runner@demo-project.iam.gserviceaccount.com",
		"token_uri": "http://oauth2.example.test/token",
	});
	let credentials =
		gcp_core::ServiceAccountCredentials::from_json(&json.to_string()).expect("credentials");
	let err = AuthClient::new(credentials, gcp_core::AuthConfig::default()).unwrap_err();

	assert!(matches!(err, Error::Security(_)));
}
