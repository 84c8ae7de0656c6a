//! Integration event schemas published by the identity service
//!
//! Downstream consumers depend on this crate for both the payload shape and
//! the broker topology the events are routed through. Field names on the wire
//! are camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Broker topology for identity integration events
pub mod topology {
    /// Durable exchange all identity events are published to
    pub const EXCHANGE: &str = "identity-events";
    /// Durable queue bound to [`EXCHANGE`] for account registrations
    pub const ACCOUNT_REGISTERED_QUEUE: &str = "account-registered";
    /// Routing key binding [`ACCOUNT_REGISTERED_QUEUE`] to [`EXCHANGE`]
    pub const ACCOUNT_REGISTERED_ROUTING_KEY: &str = "account.registered";
    /// Content type of every serialized event
    pub const CONTENT_TYPE: &str = "application/json";
}

/// Event type names carried in message headers
pub mod event_types {
    pub const ACCOUNT_REGISTERED: &str = "identity.account.registered";
}

/// Emitted once per successful registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRegisteredEvent {
    pub account_id: Uuid,
    pub email: String,
    pub role: String,
    /// Serialized as `null` for roles that do not own a tenant
    pub tenant_id: Option<Uuid>,
    pub registered_at: DateTime<Utc>,
}

impl AccountRegisteredEvent {
    pub fn new(
        account_id: Uuid,
        email: impl Into<String>,
        role: impl Into<String>,
        tenant_id: Option<Uuid>,
    ) -> Self {
        Self {
            account_id,
            email: email.into(),
            role: role.into(),
            tenant_id,
            registered_at: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        event_types::ACCOUNT_REGISTERED
    }

    pub fn routing_key(&self) -> &'static str {
        topology::ACCOUNT_REGISTERED_ROUTING_KEY
    }

    /// Wire payload
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
