/// Identity Service Library
///
/// Multi-tenant account self-registration for the marketplace backend.
///
/// ## Modules
///
/// - `broker`: Message broker seam (Kafka and in-memory transports)
/// - `config`: Service configuration
/// - `db`: Credential stores (PostgreSQL and in-memory)
/// - `error`: Error types
/// - `http`: REST surface
/// - `metrics`: Prometheus counters
/// - `models`: Data models
/// - `registration`: Validator, per-role strategies, selector and coordinator
/// - `security`: JWT issuance, password hashing
/// - `services`: Integration event publisher
/// - `validators`: Input validation
pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod metrics;
pub mod models;
pub mod registration;
pub mod security;
pub mod services;
pub mod validators;

// Re-export commonly used types
pub use error::{RegistrationError, Result};
pub use registration::RegistrationCoordinator;
