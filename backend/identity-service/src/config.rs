//! Configuration management for Identity Service
//!
//! Loads settings from environment variables, with a `.env` file honoured in
//! debug builds. Each component receives its own section at construction;
//! nothing reads the environment after startup.
//!
//! # Example
//!
//! ```no_run
//! use identity_service::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("JWT issuer: {}", settings.jwt.issuer);
//!     Ok(())
//! }
//! ```

use anyhow::{bail, Context, Result};
use resilience::{presets, RetryConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// `None` runs against the in-memory credential store
    pub database: Option<DatabaseSettings>,
    /// `None` runs against the in-memory broker
    pub broker: Option<BrokerSettings>,
    pub jwt: JwtSettings,
    pub server: ServerSettings,
}

impl Settings {
    pub fn load() -> Result<Self> {
        // Load .env file in development
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }

        Ok(Settings {
            database: DatabaseSettings::from_env()?,
            broker: BrokerSettings::from_env()?,
            jwt: JwtSettings::from_env()?,
            server: ServerSettings::from_env()?,
        })
    }
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: u64,
}

impl DatabaseSettings {
    fn from_env() -> Result<Option<Self>> {
        let Ok(url) = env::var("DATABASE_URL") else {
            return Ok(None);
        };

        Ok(Some(Self {
            url,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid DATABASE_MAX_CONNECTIONS")?,
            acquire_timeout: env::var("DATABASE_ACQUIRE_TIMEOUT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid DATABASE_ACQUIRE_TIMEOUT")?,
        }))
    }
}

/// Minimum TLS protocol version accepted for broker connections
///
/// librdkafka has no minimum-protocol setting, so the floor is not applied by
/// the client. Versions below 1.2 are refused here at load time. A 1.3 floor
/// only holds where the system OpenSSL policy sets `MinProtocol = TLSv1.3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

impl TlsVersion {
    /// Protocol name as OpenSSL reports it
    pub fn as_openssl_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }

    /// Whether enforcing this floor is left to the system OpenSSL policy
    /// rather than the distribution default (TLSv1.2)
    pub fn requires_system_policy(&self) -> bool {
        matches!(self, TlsVersion::Tls13)
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_openssl_str())
    }
}

impl FromStr for TlsVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let version = normalized
            .trim_start_matches("tlsv")
            .trim_start_matches("tls");
        match version {
            "1.2" | "12" => Ok(TlsVersion::Tls12),
            "1.3" | "13" => Ok(TlsVersion::Tls13),
            "1.0" | "1.1" | "10" | "11" => {
                bail!("TLS {} is below the minimum supported version 1.2", s.trim())
            }
            _ => bail!("Unrecognized TLS version '{}'", s.trim()),
        }
    }
}

/// TLS settings for the broker connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerTlsSettings {
    /// `BROKER_TLS_MIN_VERSION`; see [`TlsVersion`] for how it is enforced
    pub min_version: TlsVersion,
    /// Name the broker certificate must be issued for
    pub server_name: Option<String>,
    pub ca_location: Option<String>,
}

/// Message broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sasl_mechanism: String,
    pub tls: Option<BrokerTlsSettings>,
    pub publish_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_secs: u64,
}

impl BrokerSettings {
    fn from_env() -> Result<Option<Self>> {
        let Ok(host) = env::var("BROKER_HOST") else {
            return Ok(None);
        };

        let defaults = presets::broker_publish_config();
        let default_retry = defaults.retry.unwrap_or_default();

        let tls_enabled: bool = env::var("BROKER_TLS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .context("Invalid BROKER_TLS_ENABLED")?;

        let tls = if tls_enabled {
            Some(BrokerTlsSettings {
                min_version: env::var("BROKER_TLS_MIN_VERSION")
                    .unwrap_or_else(|_| "1.2".to_string())
                    .parse()
                    .context("Invalid BROKER_TLS_MIN_VERSION")?,
                server_name: env::var("BROKER_TLS_SERVER_NAME").ok(),
                ca_location: env::var("BROKER_TLS_CA_LOCATION").ok(),
            })
        } else {
            None
        };

        Ok(Some(Self {
            host,
            port: env::var("BROKER_PORT")
                .unwrap_or_else(|_| "5672".to_string())
                .parse()
                .context("Invalid BROKER_PORT")?,
            username: env::var("BROKER_USERNAME").context("BROKER_USERNAME must be set")?,
            password: env::var("BROKER_PASSWORD").context("BROKER_PASSWORD must be set")?,
            sasl_mechanism: env::var("BROKER_SASL_MECHANISM")
                .unwrap_or_else(|_| "PLAIN".to_string()),
            tls,
            publish_timeout_secs: env::var("BROKER_PUBLISH_TIMEOUT_SECS")
                .unwrap_or_else(|_| defaults.timeout.duration.as_secs().to_string())
                .parse()
                .context("Invalid BROKER_PUBLISH_TIMEOUT_SECS")?,
            max_retries: env::var("BROKER_MAX_RETRIES")
                .unwrap_or_else(|_| default_retry.max_retries.to_string())
                .parse()
                .context("Invalid BROKER_MAX_RETRIES")?,
            retry_base_secs: env::var("BROKER_RETRY_BASE_SECS")
                .unwrap_or_else(|_| default_retry.initial_backoff.as_secs().to_string())
                .parse()
                .context("Invalid BROKER_RETRY_BASE_SECS")?,
        }))
    }

    /// `host:port` bootstrap address
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    /// Broker publish preset with the configured retry count and base delay
    pub fn retry_config(&self) -> RetryConfig {
        let base = presets::broker_publish_config().retry.unwrap_or_default();
        RetryConfig {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_secs(self.retry_base_secs),
            ..base
        }
    }
}

/// JWT signing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    pub signing_key: String,
    pub validation_key: Option<String>,
    pub algorithm: String,
    pub issuer: String,
    pub audience: String,
    pub expiry_seconds: u64,
}

impl JwtSettings {
    fn from_env() -> Result<Self> {
        let issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "identity-service".to_string());
        let audience = env::var("JWT_AUDIENCE").unwrap_or_else(|_| "marketplace-api".to_string());
        let expiry_seconds = env::var("JWT_EXPIRY_SECONDS")
            .unwrap_or_else(|_| "604800".to_string())
            .parse()
            .context("Invalid JWT_EXPIRY_SECONDS")?;

        // Prefer PEM-based RSA keys when available
        if let Ok(private_pem) = env::var("JWT_PRIVATE_KEY") {
            return Ok(Self {
                signing_key: private_pem,
                validation_key: env::var("JWT_PUBLIC_KEY").ok(),
                algorithm: "RS256".to_string(),
                issuer,
                audience,
                expiry_seconds,
            });
        }

        // Fallback: symmetric secret
        let signing_key = env::var("JWT_SECRET")
            .context("JWT_SECRET must be set when no PEM keys are configured")?;

        Ok(Self {
            signing_key,
            validation_key: None,
            algorithm: env::var("JWT_ALGORITHM").unwrap_or_else(|_| "HS256".to_string()),
            issuer,
            audience,
            expiry_seconds,
        })
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid SERVER_PORT")?,
        })
    }
}
