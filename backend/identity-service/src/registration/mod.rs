/// Self-registration orchestration
///
/// - `validator`: request validation against field rules and the store
/// - `strategy`: per-role registration pipelines
/// - `selector`: role -> strategy lookup
/// - `coordinator`: entry point used by the HTTP layer
pub mod coordinator;
pub mod selector;
pub mod strategy;
pub mod validator;

pub use coordinator::RegistrationCoordinator;
pub use selector::StrategySelector;
pub use strategy::{
    CustomerRegistrationStrategy, RegistrationContext, RegistrationStrategy,
    SellerAdminRegistrationStrategy,
};
pub use validator::{RequestValidator, StoreBackedValidator};
