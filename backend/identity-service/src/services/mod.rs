/// Service layer for identity-service
///
/// - Integration event publisher (AccountRegistered over the message broker)
pub mod event_publisher;

pub use event_publisher::{DeliveryStatus, EventPublisher, IntegrationEventPublisher};
