//! HTTP plumbing for authenticated Google Cloud REST calls.

pub mod dispatch;
pub mod rest;
pub mod retry;
