//! Lead Scout API Library
//!
//! Finds local businesses for a search query and location, scores them for
//! lead quality, and streams the ones worth contacting back to the caller
//! while persisting them and charging the user's day pass.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core business logic.
//! - `integrations`: External service integrations.
//! - `circuit_breaker`: Circuit breaker in front of the remote scorer.
//! - `config`: Configuration management.
//! - `db`: Database connection, pool management and migrations.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers and routes.
//! - `models`: Core data models.
//! - `pipeline`: Scan orchestration.
//! - `providers`: Acquisition providers and the fallback chain.
//! - `quota`: Day pass enforcement.
//! - `scorer`: Remote and fallback lead scoring.
//! - `session`: Request authentication.
//! - `storage`: Lead persistence and the deduplication gate.
//! - `stream`: Newline-delimited JSON result stream.

pub mod api;
pub mod core;
pub mod integrations;

pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod quota;
pub mod scorer;
pub mod session;
pub mod storage;
pub mod stream;
