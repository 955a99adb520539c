//! Purpose: Typed client library for the pipeline manager v0 REST API.
//! Exports: `api` (client handle, models, endpoint calls) and `core` (errors).
//! Role: Library backing the `feldera-client` binary and integration tests.
//! Invariants: Endpoint calls never retry; transport policy lives in `api::Client`.
pub mod api;
pub mod core;
