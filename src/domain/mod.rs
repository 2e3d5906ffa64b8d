//! Domain layer: entities, value objects, pure policies and the ports the
//! application layer depends on.

pub mod chargeback;
pub mod dunning;
pub mod event;
pub mod fees;
pub mod money;
pub mod payment;
pub mod payout;
pub mod ports;
pub mod provider;
pub mod risk;
pub mod subscription;
pub mod wallet;

/// Platform user identifier (fans, creators and admins alike).
pub type UserId = uuid::Uuid;
