//! Circuit breaker guarding calls to a failing dependency.

pub mod circuit;
pub mod config;
pub mod state;
