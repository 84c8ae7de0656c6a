/// Role-aware access token issuance
///
/// Tokens carry the standard registered claims plus the account's email,
/// role, a fresh `jti` per token and, for tenant-owning roles, the tenant id.
/// Keys are parsed once when the issuer is built and owned by it; there is no
/// process-wide key state.
use anyhow::{anyhow, Context};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::config::JwtSettings;
use crate::error::{RegistrationError, Result};
use crate::models::{Account, Role};

/// JWT claims issued at registration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (account ID as UUID string)
    pub sub: String,
    pub email: String,
    pub role: String,
    /// Unique per issued token
    pub jti: String,
    /// Present iff the account owns a tenant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub iss: String,
    pub aud: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

pub struct TokenIssuer {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Build an issuer from settings, parsing the configured keys
    ///
    /// HMAC algorithms use `signing_key` as the shared secret. RSA and EC
    /// algorithms expect PEM keys and require `validation_key`.
    pub fn from_settings(settings: &JwtSettings) -> anyhow::Result<Self> {
        let algorithm = Algorithm::from_str(&settings.algorithm)
            .map_err(|e| anyhow!("Unsupported JWT algorithm '{}': {}", settings.algorithm, e))?;

        let (encoding_key, decoding_key) = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => (
                EncodingKey::from_secret(settings.signing_key.as_bytes()),
                DecodingKey::from_secret(settings.signing_key.as_bytes()),
            ),
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => {
                let public_pem = settings
                    .validation_key
                    .as_deref()
                    .context("JWT_PUBLIC_KEY must be set for RSA signing")?;
                (
                    EncodingKey::from_rsa_pem(settings.signing_key.as_bytes())
                        .context("Failed to parse RSA private key")?,
                    DecodingKey::from_rsa_pem(public_pem.as_bytes())
                        .context("Failed to parse RSA public key")?,
                )
            }
            Algorithm::ES256 | Algorithm::ES384 => {
                let public_pem = settings
                    .validation_key
                    .as_deref()
                    .context("JWT_PUBLIC_KEY must be set for EC signing")?;
                (
                    EncodingKey::from_ec_pem(settings.signing_key.as_bytes())
                        .context("Failed to parse EC private key")?,
                    DecodingKey::from_ec_pem(public_pem.as_bytes())
                        .context("Failed to parse EC public key")?,
                )
            }
            Algorithm::EdDSA => {
                return Err(anyhow!("EdDSA signing is not supported"));
            }
        };

        let expiry_seconds = i64::try_from(settings.expiry_seconds)
            .context("JWT_EXPIRY_SECONDS is out of range")?;

        Ok(Self {
            algorithm,
            encoding_key,
            decoding_key,
            issuer: settings.issuer.clone(),
            audience: settings.audience.clone(),
            expiry: Duration::seconds(expiry_seconds),
        })
    }

    /// Validity window applied to every issued token
    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Issue a signed token for a freshly registered account
    pub fn generate_token(&self, account: &Account, role: Role) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: account.id.to_string(),
            email: account.email.clone(),
            role: role.as_str().to_string(),
            jti: Uuid::new_v4().to_string(),
            tenant_id: account.tenant_id.map(|id| id.to_string()),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + self.expiry).timestamp(),
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Decode and verify signature, issuer, audience and expiry
    pub fn validate(&self, token: &str) -> Result<TokenData<Claims>> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            RegistrationError::Token(format!("Token validation failed: {}", e))
        })
    }
}
