use crate::domain::provider::{
    Provider, ProviderGateway, ProviderSession, Redirect, SessionRequest, Transfer,
    TransferRequest, TransferStatus, VerificationStatus,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct SandboxState {
    outcomes: RwLock<HashMap<String, VerificationStatus>>,
    fail_sessions: AtomicBool,
    fail_transfers: AtomicBool,
    issue_references: AtomicBool,
    transfer_latency_ms: AtomicU64,
    session_calls: AtomicUsize,
    transfer_calls: AtomicUsize,
    verify_calls: AtomicUsize,
}

/// In-process stand-in for a provider integration.
///
/// Verification answers come from a per-reference table, falling back to
/// `default_status`. Clones share state, so a test can keep a handle while the
/// engine owns another.
#[derive(Debug, Clone)]
pub struct SandboxProvider {
    provider: Provider,
    default_status: VerificationStatus,
    state: Arc<SandboxState>,
}

impl SandboxProvider {
    pub fn new(provider: Provider) -> Self {
        Self::with_default(provider, VerificationStatus::Successful)
    }

    pub fn with_default(provider: Provider, default_status: VerificationStatus) -> Self {
        Self {
            provider,
            default_status,
            state: Arc::new(SandboxState::default()),
        }
    }

    pub async fn set_outcome(&self, reference: &str, status: VerificationStatus) {
        self.state
            .outcomes
            .write()
            .await
            .insert(reference.to_string(), status);
    }

    pub fn fail_sessions(&self, fail: bool) {
        self.state.fail_sessions.store(fail, Ordering::SeqCst);
    }

    pub fn fail_transfers(&self, fail: bool) {
        self.state.fail_transfers.store(fail, Ordering::SeqCst);
    }

    /// Hand out the sandbox's own session ids instead of echoing the caller's reference.
    pub fn issue_references(&self, on: bool) {
        self.state.issue_references.store(on, Ordering::SeqCst);
    }

    pub fn set_transfer_latency(&self, latency: Duration) {
        self.state
            .transfer_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn session_calls(&self) -> usize {
        self.state.session_calls.load(Ordering::SeqCst)
    }

    pub fn transfer_calls(&self) -> usize {
        self.state.transfer_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.state.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderGateway for SandboxProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn create_session(&self, request: SessionRequest) -> Result<ProviderSession> {
        self.state.session_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_sessions.load(Ordering::SeqCst) {
            return Err(PaymentError::ProviderUnavailable(format!(
                "{} sandbox rejected session {}",
                self.provider, request.reference
            )));
        }
        let redirect = match self.provider {
            Provider::Stripe => Redirect::ClientSecret(format!("cs_test_{}", request.reference)),
            other => Redirect::Url(format!(
                "https://checkout.{}.sandbox/{}",
                other, request.reference
            )),
        };
        let reference = if self.state.issue_references.load(Ordering::SeqCst) {
            format!("{}_{}", self.provider.as_str(), request.reference)
        } else {
            request.reference
        };
        Ok(ProviderSession { reference, redirect })
    }

    async fn verify(&self, reference: &str) -> Result<VerificationStatus> {
        self.state.verify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .state
            .outcomes
            .read()
            .await
            .get(reference)
            .copied()
            .unwrap_or(self.default_status))
    }

    async fn initiate_transfer(&self, request: TransferRequest) -> Result<Transfer> {
        self.state.transfer_calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.state.transfer_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.state.fail_transfers.load(Ordering::SeqCst) {
            return Err(PaymentError::ProviderUnavailable(format!(
                "{} sandbox rejected transfer for payout {}",
                self.provider, request.payout_id
            )));
        }
        Ok(Transfer {
            payout_id: format!("trf_{}", request.payout_id.simple()),
            status: TransferStatus::Processing,
        })
    }
}
