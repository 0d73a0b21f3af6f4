//! Asynchronous job processing core for product image data extraction.
//!
//! A durable Postgres-backed job queue, a background worker that drains
//! it, and a connection pool gating concurrency and throughput against a
//! rate-limited vision-language model API, with retry, cancellation and
//! per-attempt metrics recording.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
