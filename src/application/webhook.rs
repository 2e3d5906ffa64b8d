use crate::application::chargeback::{ChargebackHandler, DisputeOutcome};
use crate::application::context::Context;
use crate::application::settlement::PaymentSettlement;
use crate::domain::event::{ProviderEvent, normalize};
use crate::domain::payment::PaymentStatus;
use crate::domain::provider::{Provider, VerificationStatus};
use crate::error::Result;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The payment moved to `status` because of this delivery.
    Processed { payment_id: Uuid, status: PaymentStatus },
    /// Replay of an outcome that was already applied.
    AlreadyProcessed { payment_id: Uuid, status: PaymentStatus },
    /// The provider has not settled the payment yet.
    Pending { payment_id: Uuid },
    /// No payment carries this reference.
    Unresolved { reference: String },
    Dispute(DisputeOutcome),
    Ignored { event_type: String },
}

/// Turns provider deliveries into state changes.
///
/// Payloads only say which payment to look at; the outcome always comes from
/// the provider's verify call, so a late or forged failure cannot undo a success.
#[derive(Clone)]
pub struct WebhookIngestor {
    ctx: Context,
    settlement: PaymentSettlement,
    chargebacks: ChargebackHandler,
}

impl WebhookIngestor {
    pub fn new(ctx: Context, settlement: PaymentSettlement, chargebacks: ChargebackHandler) -> Self {
        Self {
            ctx,
            settlement,
            chargebacks,
        }
    }

    /// Normalizes and applies a raw webhook body.
    pub async fn ingest(&self, provider: Provider, payload: &Value) -> Result<WebhookOutcome> {
        let event = normalize(provider, payload)?;
        self.ingest_event(event).await
    }

    pub async fn ingest_event(&self, event: ProviderEvent) -> Result<WebhookOutcome> {
        match event {
            ProviderEvent::Payment {
                provider,
                reference,
                status,
            } => {
                tracing::debug!(provider = %provider, reference = %reference, reported = ?status, "payment event received");
                self.verify(provider, &reference).await
            }
            ProviderEvent::Dispute(dispute) => {
                let outcome = self.chargebacks.handle_dispute(dispute).await?;
                Ok(WebhookOutcome::Dispute(outcome))
            }
            ProviderEvent::Ignored {
                provider,
                event_type,
            } => {
                tracing::debug!(provider = %provider, event_type = %event_type, "event ignored");
                Ok(WebhookOutcome::Ignored { event_type })
            }
        }
    }

    /// Re-checks a payment with its provider and applies the authoritative status.
    pub async fn verify(&self, provider: Provider, reference: &str) -> Result<WebhookOutcome> {
        let Some(payment) = self.ctx.stores.payments.find_by_reference(reference).await? else {
            tracing::warn!(provider = %provider, reference = %reference, "event for unknown reference acknowledged");
            return Ok(WebhookOutcome::Unresolved {
                reference: reference.to_string(),
            });
        };
        if payment.provider != provider {
            tracing::warn!(
                payment_id = %payment.id,
                expected = %payment.provider,
                received = %provider,
                "event from a provider that does not own the payment"
            );
            return Ok(WebhookOutcome::Unresolved {
                reference: reference.to_string(),
            });
        }

        let gateway = self.ctx.providers.get(payment.provider)?;
        let payment_id = payment.id;
        match gateway.verify(payment.verification_reference()).await? {
            VerificationStatus::Successful => {
                let settled = self.settlement.confirm(payment).await?;
                Ok(if settled.transitioned {
                    WebhookOutcome::Processed {
                        payment_id,
                        status: PaymentStatus::Success,
                    }
                } else {
                    WebhookOutcome::AlreadyProcessed {
                        payment_id,
                        status: PaymentStatus::Success,
                    }
                })
            }
            VerificationStatus::Failed => {
                let previous = payment.status;
                if self.settlement.reject(payment, "provider reported failure").await? {
                    Ok(WebhookOutcome::Processed {
                        payment_id,
                        status: PaymentStatus::Failed,
                    })
                } else {
                    Ok(WebhookOutcome::AlreadyProcessed {
                        payment_id,
                        status: previous,
                    })
                }
            }
            VerificationStatus::Pending => Ok(WebhookOutcome::Pending { payment_id }),
        }
    }
}
