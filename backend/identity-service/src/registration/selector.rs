use std::sync::Arc;

use super::strategy::{
    CustomerRegistrationStrategy, RegistrationContext, RegistrationStrategy,
    SellerAdminRegistrationStrategy,
};
use crate::error::{RegistrationError, Result};
use crate::models::Role;

/// Fixed role -> strategy table
#[derive(Clone)]
pub struct StrategySelector {
    customer: Arc<dyn RegistrationStrategy>,
    seller_admin: Arc<dyn RegistrationStrategy>,
}

impl StrategySelector {
    pub fn new(context: RegistrationContext) -> Self {
        Self {
            customer: Arc::new(CustomerRegistrationStrategy::new(context.clone())),
            seller_admin: Arc::new(SellerAdminRegistrationStrategy::new(context)),
        }
    }

    pub fn with_strategies(
        customer: Arc<dyn RegistrationStrategy>,
        seller_admin: Arc<dyn RegistrationStrategy>,
    ) -> Self {
        Self {
            customer,
            seller_admin,
        }
    }

    /// Roles that are provisioned at startup have no strategy
    pub fn get_strategy(&self, role: Role) -> Result<Arc<dyn RegistrationStrategy>> {
        match role {
            Role::Customer => Ok(Arc::clone(&self.customer)),
            Role::SellerAdmin => Ok(Arc::clone(&self.seller_admin)),
            Role::Admin => Err(RegistrationError::UnsupportedRole(role)),
        }
    }

    /// Parse then look up; unparseable names are `UnknownRole`
    pub fn get_strategy_by_name(&self, role: &str) -> Result<Arc<dyn RegistrationStrategy>> {
        self.get_strategy(role.parse()?)
    }
}
