// /shop-platform/services/payment-service/src/core/mod.rs

pub mod coordinator;
pub mod events;
pub mod momo;
pub mod provider;

// Re-export untuk kemudahan akses
pub mod services {
    pub use super::coordinator::{CoordinatorConfig, PaymentCoordinator};
    pub use super::momo::MomoProvider;
    pub use super::provider::{PaymentGateway, ProviderRegistry};
}
