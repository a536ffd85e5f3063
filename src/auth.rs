//! Service-account authentication: credentials, JWT assertions, and access-token caching.

pub mod client;
pub mod credentials;
pub mod jwt;
pub mod token;

/// Frequently used OAuth2 scopes for Google Cloud APIs.
pub mod scopes {
	/// Full access to every Google Cloud API the service account is authorised for.
	pub const CLOUD_PLATFORM: &str = "https://www.googleapis.com/auth/cloud-platform";
	/// Read-only access across Google Cloud APIs.
	pub const CLOUD_PLATFORM_READ_ONLY: &str =
		"https://www.googleapis.com/auth/cloud-platform.read-only";
	/// Cloud DNS read/write.
	pub const NDEV_CLOUDDNS_READ_WRITE: &str =
		"https://www.googleapis.com/auth/ndev.clouddns.readwrite";
	/// Cloud Storage full control.
	pub const DEVSTORAGE_FULL_CONTROL: &str =
		"https://www.googleapis.com/auth/devstorage.full_control";
	/// Cloud Monitoring read/write.
	pub const MONITORING: &str = "https://www.googleapis.com/auth/monitoring";
	/// Cloud Tasks and other App Engine-hosted APIs.
	pub const CLOUD_TASKS: &str = "https://www.googleapis.com/auth/cloud-tasks";
}
