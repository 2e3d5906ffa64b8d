use crate::config::{ConfigHandle, EngineConfig};
use crate::domain::UserId;
use crate::domain::ports::{Clock, KycDirectory, KycStatus, Notification, Notifier, Stores};
use crate::domain::provider::{Provider, ProviderGateway};
use crate::error::{PaymentError, Result};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::notifier::{StaticKycDirectory, TracingNotifier};
use crate::infrastructure::sandbox::SandboxProvider;
use std::collections::HashMap;
use std::sync::Arc;

/// Who is performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(UserId),
    Admin(UserId),
}

impl Actor {
    pub fn id(&self) -> UserId {
        match self {
            Actor::User(id) | Actor::Admin(id) => *id,
        }
    }

    pub fn require_admin(&self, action: &str) -> Result<UserId> {
        match self {
            Actor::Admin(id) => Ok(*id),
            Actor::User(id) => Err(PaymentError::Forbidden(format!(
                "User {} may not {}",
                id, action
            ))),
        }
    }
}

/// Provider integrations by provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    gateways: HashMap<Provider, Arc<dyn ProviderGateway>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sandbox gateways for every provider.
    pub fn sandbox() -> Self {
        let mut registry = Self::new();
        for provider in Provider::ALL {
            registry.register(Arc::new(SandboxProvider::new(provider)));
        }
        registry
    }

    pub fn register(&mut self, gateway: Arc<dyn ProviderGateway>) {
        self.gateways.insert(gateway.provider(), gateway);
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn ProviderGateway>> {
        self.gateways.get(&provider).cloned().ok_or_else(|| {
            PaymentError::ProviderUnavailable(format!("No gateway registered for {}", provider))
        })
    }
}

/// Everything a service needs: repositories, collaborators and configuration.
#[derive(Clone)]
pub struct Context {
    pub stores: Stores,
    pub providers: ProviderRegistry,
    pub notifier: Arc<dyn Notifier>,
    pub kyc: Arc<dyn KycDirectory>,
    pub clock: Arc<dyn Clock>,
    pub config: ConfigHandle,
}

impl Context {
    /// Logs notifications, reports every user as unverified and reads the system clock.
    pub fn new(stores: Stores, providers: ProviderRegistry, config: EngineConfig) -> Self {
        Self {
            stores,
            providers,
            notifier: Arc::new(TracingNotifier),
            kyc: Arc::new(StaticKycDirectory::new(KycStatus::None)),
            clock: Arc::new(SystemClock),
            config: ConfigHandle::new(config),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_kyc(mut self, kyc: Arc<dyn KycDirectory>) -> Self {
        self.kyc = kyc;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sends a notification. Failures are logged and otherwise ignored.
    pub async fn notify(&self, notification: Notification) {
        let user_id = notification.user_id;
        let kind = notification.kind;
        if let Err(e) = self.notifier.notify(notification).await {
            tracing::warn!(user_id = %user_id, kind = ?kind, error = %e, "notification failed");
        }
    }
}
