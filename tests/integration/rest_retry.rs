//! Authenticated REST calls with retries, cancellation, and resilience wrappers.

// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicU32, Ordering},
	},
	time::Duration,
};
// crates.io
use chrono::TimeDelta;
use gcp_core::{
	AccessToken, ApiError, ApiRequest, AuthClient, AuthError, CacheConfig, CircuitBreaker,
	CircuitBreakerConfig, ClientConfig, Error, Result, RestClient, RetryPolicy, StaticTokenSource,
	TokenSource, TtlCache,
};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{body_json, header, method, path, query_param},
};
// self
use crate::common::{self, TOKEN_PATH};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagedZone {
	name: String,
	dns_name: String,
}

/// Token source counting invalidations.
#[derive(Debug, Default)]
struct CountingTokens {
	invalidations: AtomicU32,
}
impl TokenSource for CountingTokens {
	async fn access_token(&self) -> Result<AccessToken> {
		Ok(AccessToken::expiring_in("ya29.counting", TimeDelta::hours(1)))
	}

	async fn invalidate(&self) {
		self.invalidations.fetch_add(1, Ordering::SeqCst);
	}
}

/// Token source whose first fetch fails with a refused connection.
#[derive(Debug, Default)]
struct FlakyTokens {
	fetches: AtomicU32,
}
impl TokenSource for FlakyTokens {
	async fn access_token(&self) -> Result<AccessToken> {
		if self.fetches.fetch_add(1, Ordering::SeqCst) == 0 {
			let refused = reqwest::Client::new()
				.post("http://127.0.0.1:1/token")
				.send()
				.await
				.expect_err("nothing listens on port 1");

			return Err(AuthError::Network(refused).into());
		}

		Ok(AccessToken::expiring_in("ya29.flaky", TimeDelta::hours(1)))
	}
}

fn fast_retries(max_retries: u32) -> RetryPolicy {
	RetryPolicy {
		max_retries,
		base_delay: Duration::from_millis(10),
		max_delay: Duration::from_millis(50),
		jitter_factor: 0.0,
		retry_on_timeout: true,
	}
}

fn config(server: &MockServer, max_retries: u32) -> ClientConfig {
	ClientConfig::new(format!("{}/dns/v1", server.uri()))
		.expect("config")
		.with_require_https(false)
		.with_retry_policy(fast_retries(max_retries))
}

fn static_client(config: ClientConfig) -> RestClient<StaticTokenSource> {
	let token = AccessToken::expiring_in("ya29.static", TimeDelta::hours(1));

	RestClient::new(config, StaticTokenSource::new(token)).expect("client")
}

fn transient<T>(outcome: &Result<T>) -> bool {
	outcome.as_ref().is_err_and(Error::is_retryable)
}

fn zone_json() -> serde_json::Value {
	serde_json::json!({ "name": "zone-a", "dnsName": "example.com." })
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() -> Result<()> {
	common::init_tracing();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/dns/v1/projects/p/managedZones/zone-a"))
		.respond_with(ResponseTemplate::new(503))
		.up_to_n_times(2)
		.expect(2)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/dns/v1/projects/p/managedZones/zone-a"))
		.and(header("authorization", "Bearer ya29.static"))
		.and(header("accept", "application/json"))
		.respond_with(ResponseTemplate::new(200).set_body_json(zone_json()))
		.expect(1)
		.mount(&server)
		.await;

	let client = static_client(config(&server, 3));
	let response = client.get::<ManagedZone>("projects/p/managedZones/zone-a", &[]).await?;

	assert_eq!(response.status, StatusCode::OK);
	assert_eq!(response.retries, 2);
	assert_eq!(response.data.dns_name, "example.com.");

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn client_errors_fail_without_retry() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/dns/v1/projects/p/managedZones/missing"))
		.respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
			"error": {
				"code": 404,
				"message": "The 'parameters.managedZone' resource named 'missing' does not exist.",
				"status": "NOT_FOUND",
				"errors": [{ "domain": "global", "reason": "notFound", "message": "not found" }]
			}
		})))
		.expect(1)
		.mount(&server)
		.await;

	let client = static_client(config(&server, 3));
	let err =
		client.get::<ManagedZone>("projects/p/managedZones/missing", &[]).await.unwrap_err();

	match err {
		Error::Api(ApiError::HttpStatus { status, error: Some(envelope), .. }) => {
			assert_eq!(status, StatusCode::NOT_FOUND);
			assert_eq!(envelope.status.as_deref(), Some("NOT_FOUND"));
			assert_eq!(envelope.errors[0].reason, "notFound");
		},
		other => panic!("expected 404 with envelope, got {other:?}"),
	}

	server.verify().await;
}

#[tokio::test]
async fn exhausted_budget_wraps_last_error() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/dns/v1/projects/p/managedZones"))
		.respond_with(ResponseTemplate::new(503))
		.expect(3)
		.mount(&server)
		.await;

	let client = static_client(config(&server, 2));
	let err = client.get::<serde_json::Value>("projects/p/managedZones", &[]).await.unwrap_err();

	match &err {
		Error::Api(ApiError::MaxRetriesExceeded { attempts, last }) => {
			assert_eq!(*attempts, 3);
			assert_eq!(last.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
		},
		other => panic!("expected exhausted retries, got {other:?}"),
	}

	assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));

	server.verify().await;
}

#[tokio::test]
async fn cancellation_interrupts_backoff() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(503))
		.mount(&server)
		.await;

	let policy = RetryPolicy {
		max_retries: 5,
		base_delay: Duration::from_secs(30),
		max_delay: Duration::from_secs(60),
		jitter_factor: 0.0,
		retry_on_timeout: true,
	};
	let client = static_client(config(&server, 0).with_retry_policy(policy));
	let cancel = CancellationToken::new();
	let trigger = cancel.clone();

	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(200)).await;
		trigger.cancel();
	});

	let request = ApiRequest::new(Method::GET, "projects/p/managedZones").cancel_token(cancel);
	let outcome =
		tokio::time::timeout(Duration::from_secs(5), client.send::<serde_json::Value>(request))
			.await
			.expect("cancellation observed promptly");

	assert!(outcome.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn cancelled_request_never_dispatches() {
	let server = MockServer::start().await;

	Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

	let client = static_client(config(&server, 0));
	let cancel = CancellationToken::new();

	cancel.cancel();

	let err = client
		.send::<serde_json::Value>(ApiRequest::new(Method::GET, "x").cancel_token(cancel))
		.await
		.unwrap_err();

	assert!(matches!(err, Error::Api(ApiError::Cancelled)));

	server.verify().await;
}

#[tokio::test]
async fn unauthorized_invalidates_token_without_retry() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(header("authorization", "Bearer ya29.counting"))
		.respond_with(ResponseTemplate::new(401))
		.expect(1)
		.mount(&server)
		.await;

	let client = RestClient::new(config(&server, 3), CountingTokens::default()).expect("client");
	let err = client.get::<serde_json::Value>("projects/p", &[]).await.unwrap_err();

	assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
	assert_eq!(client.token_source().invalidations.load(Ordering::SeqCst), 1);

	server.verify().await;
}

#[tokio::test]
async fn unreachable_token_endpoint_is_retried() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(header("authorization", "Bearer ya29.flaky"))
		.respond_with(ResponseTemplate::new(200).set_body_json(zone_json()))
		.expect(1)
		.mount(&server)
		.await;

	let client = RestClient::new(config(&server, 2), FlakyTokens::default())?;
	let response = client.get::<ManagedZone>("projects/p/managedZones/zone-a", &[]).await?;

	assert_eq!(response.retries, 1);
	assert_eq!(response.data.name, "zone-a");
	assert_eq!(client.token_source().fetches.load(Ordering::SeqCst), 2);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn unreachable_token_endpoint_exhausts_retry_budget() {
	let json = serde_json::json!({
		"type": "service_account",
		"project_id": "demo-project",
		"private_key_id": "key-1",
		"private_key": common::PRIVATE_KEY,
		"client_email": "runner@demo-project.iam.gserviceaccount.com",
		"token_uri": "http://127.0.0.1:1/token",
	});
	let credentials =
		gcp_core::ServiceAccountCredentials::from_json(&json.to_string()).expect("credentials");
	let auth = AuthClient::new(credentials, common::auth_config()).expect("auth client");
	let config = ClientConfig::new("http://127.0.0.1:1/dns/v1")
		.expect("config")
		.with_require_https(false)
		.with_retry_policy(fast_retries(2));
	let err = RestClient::new(config, auth)
		.expect("client")
		.get::<serde_json::Value>("projects/p", &[])
		.await
		.unwrap_err();

	match err {
		Error::Api(ApiError::MaxRetriesExceeded { attempts, last }) => {
			assert_eq!(attempts, 3);
			assert!(matches!(*last, Error::Auth(AuthError::Network(_))));
		},
		other => panic!("expected exhausted retries, got {other:?}"),
	}
}

#[tokio::test]
async fn timeouts_follow_retry_policy() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
		.expect(1)
		.mount(&server)
		.await;

	let mut config = config(&server, 3);

	config.request_timeout = Duration::from_millis(200);
	config.retry_policy.retry_on_timeout = false;

	let err = static_client(config).get::<serde_json::Value>("slow", &[]).await.unwrap_err();

	assert!(matches!(err, Error::Api(ApiError::Timeout { .. })));
	assert!(err.is_timeout());

	server.verify().await;
}

#[tokio::test]
async fn verbs_send_json_bodies_and_sorted_queries() -> Result<()> {
	let server = MockServer::start().await;
	let zone = ManagedZone { name: "zone-b".into(), dns_name: "b.example.com.".into() };

	Mock::given(method("POST"))
		.and(path("/dns/v1/projects/p/managedZones"))
		.and(header("content-type", "application/json"))
		.and(body_json(serde_json::json!({ "name": "zone-b", "dnsName": "b.example.com." })))
		.respond_with(ResponseTemplate::new(200).set_body_json(&zone))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/dns/v1/projects/p/managedZones"))
		.and(query_param("maxResults", "10"))
		.and(query_param("dnsName", "b.example.com."))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "managedZones": [] })))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("DELETE"))
		.and(path("/dns/v1/projects/p/managedZones/zone-b"))
		.respond_with(ResponseTemplate::new(204))
		.expect(1)
		.mount(&server)
		.await;

	let client = static_client(config(&server, 0));
	let created: ManagedZone = client.post("projects/p/managedZones", &zone).await?.data;
	let listed = client
		.get::<serde_json::Value>(
			"projects/p/managedZones",
			&[("maxResults", "10"), ("dnsName", "b.example.com.")],
		)
		.await?;
	let deleted = client.delete::<()>("projects/p/managedZones/zone-b").await?;

	assert_eq!(created, zone);
	assert_eq!(listed.data["managedZones"], serde_json::json!([]));
	assert_eq!(deleted.status, StatusCode::NO_CONTENT);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(4_096)))
		.mount(&server)
		.await;

	let mut config = config(&server, 0);

	config.max_response_bytes = 1_024;

	let err = static_client(config).get::<serde_json::Value>("big", &[]).await.unwrap_err();

	assert!(matches!(err, Error::Api(ApiError::ResponseTooLarge { limit: 1_024 })));
}

#[tokio::test]
async fn service_account_flow_authenticates_api_calls() -> Result<()> {
	common::init_tracing();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(TOKEN_PATH))
		.respond_with(ResponseTemplate::new(200).set_body_json(common::token_body("ya29.sa", 3600)))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/dns/v1/projects/demo-project/managedZones/zone-a"))
		.and(header("authorization", "Bearer ya29.sa"))
		.respond_with(ResponseTemplate::new(200).set_body_json(zone_json()))
		.expect(2)
		.mount(&server)
		.await;

	let auth = AuthClient::new(common::credentials(&server), common::auth_config())?;
	let zone_path = format!("projects/{}/managedZones/zone-a", auth.project_id());
	let client = RestClient::new(config(&server, 0), auth)?;

	client.get::<ManagedZone>(&zone_path, &[]).await?;
	client.get::<ManagedZone>(&zone_path, &[]).await?;

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn breaker_and_cache_compose_around_calls() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/dns/v1/projects/p/managedZones/zone-a"))
		.respond_with(ResponseTemplate::new(200).set_body_json(zone_json()))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/dns/v1/projects/p/managedZones/down"))
		.respond_with(ResponseTemplate::new(500))
		.expect(2)
		.mount(&server)
		.await;

	let client = static_client(config(&server, 0));
	let breaker = CircuitBreaker::new(
		"dns",
		CircuitBreakerConfig::default()
			.with_failure_threshold(2)
			.with_open_duration(Duration::from_secs(60)),
	)?;
	let cache = TtlCache::<String, Arc<ManagedZone>>::new(CacheConfig::default().with_name("zones"))?;
	let (client, breaker) = (&client, &breaker);

	for _ in 0..3 {
		let zone = cache
			.get_or_fetch("zone-a".into(), None, move || async move {
				breaker
					.execute_with(
						move || async move {
							client.get::<ManagedZone>("projects/p/managedZones/zone-a", &[]).await
						},
						transient,
					)
					.await
					.map(|response| Arc::new(response.data))
			})
			.await?;

		assert_eq!(zone.name, "zone-a");
	}

	for _ in 0..3 {
		let err = breaker
			.execute_with(
				move || async move {
					client.get::<serde_json::Value>("projects/p/managedZones/down", &[]).await
				},
				transient,
			)
			.await
			.unwrap_err();

		assert!(matches!(
			err,
			Error::Api(ApiError::MaxRetriesExceeded { .. }) | Error::CircuitOpen { .. }
		));
	}

	assert_eq!(breaker.statistics().rejected_requests, 1);
	assert_eq!(cache.statistics().hits, 2);

	server.verify().await;

	Ok(())
}
