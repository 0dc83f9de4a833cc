//! trackgit — realtime token sync and request time-series aggregation.
//!
//! Library crate; the `trackgit` binary and the integration tests in
//! `tests/` build on it.

pub mod codec;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod id;
pub mod models;
pub mod query;
pub mod session;
pub mod store;
pub mod subscription;
