//! Shared fixtures.

// crates.io
use gcp_core::{AuthConfig, ServiceAccountCredentials};
use wiremock::MockServer;

pub const PRIVATE_KEY: &str = include_str!("../fixtures/service_account_key.pem");
pub const TOKEN_PATH: &str = "/token";

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_env_filter("gcp_core=debug").with_test_writer().try_init();
}

pub fn credentials(server: &MockServer) -> ServiceAccountCredentials {
	let json = serde_json::json!({
		"type": "service_account",
		"project_id": "demo-project",
		"private_key_id": "key-1",
		"private_key": PRIVATE_KEY,
		"client_email": "runner@demo-project.iam.gserviceaccount.com",
		"client_id": "1234567890",
		"auth_uri": "https://accounts.google.com/o/oauth2/auth",
		"token_uri": format!("{}{TOKEN_PATH}", server.uri()),
	});

	ServiceAccountCredentials::from_json(&json.to_string()).expect("credentials")
}

pub fn auth_config() -> AuthConfig {
	AuthConfig::default().with_require_https(false)
}

pub fn token_body(token: &str, expires_in: i64) -> serde_json::Value {
	serde_json::json!({ "access_token": token, "token_type": "Bearer", "expires_in": expires_in })
}
