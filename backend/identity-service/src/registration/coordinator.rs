use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::selector::StrategySelector;
use crate::metrics;
use crate::models::{RegistrationRequest, RegistrationResponse};

/// Entry point for self-registration
pub struct RegistrationCoordinator {
    selector: StrategySelector,
}

impl RegistrationCoordinator {
    pub fn new(selector: StrategySelector) -> Self {
        Self { selector }
    }

    pub async fn register_user(
        &self,
        request: RegistrationRequest,
        cancel: &CancellationToken,
    ) -> RegistrationResponse {
        let strategy = match self.selector.get_strategy_by_name(&request.role) {
            Ok(strategy) => strategy,
            Err(err) => {
                warn!(
                    role = %request.role,
                    kind = err.kind().as_str(),
                    reason = %err,
                    "No registration strategy for role"
                );
                // Free-form role names stay out of metric labels
                metrics::record_registration("unsupported", err.kind().as_str());
                return RegistrationResponse::failed(&err);
            }
        };

        let role = strategy.role();
        let response = strategy.register(request, cancel).await;

        info!(
            role = %role,
            success = response.success,
            account_id = ?response.account_id,
            "Registration finished"
        );
        response
    }
}
