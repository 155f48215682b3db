//! Integration tests for the LLM Inference Gateway.
//!
//! Exercises the full request pipeline (auth -> quota -> budget -> resolve ->
//! select -> forward -> reconcile) through the real Axum router, against a
//! migrated in-memory database and a `wiremock`-mocked OpenAI-compatible upstream.

pub mod fixtures;
pub mod helpers;
pub mod mock_upstream;

#[cfg(test)]
mod e2e_tests;
