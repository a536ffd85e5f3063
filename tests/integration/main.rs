//! Integration tests against mock Google endpoints.

mod auth_flow;
mod common;
mod rest_retry;
