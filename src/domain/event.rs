//! Normalization of provider webhook payloads.
//!
//! Every provider speaks its own JSON dialect; the ingestor only ever sees
//! [`ProviderEvent`]. Payload status is advisory: handlers re-verify with the
//! provider before acting on it.

use crate::domain::money::{Currency, minor_to_major};
use crate::domain::provider::{Provider, VerificationStatus};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeEvent {
    pub provider: Provider,
    pub transaction_id: String,
    pub reference: Option<String>,
    pub payment_id: Option<Uuid>,
    /// Disputed amount in major units, when the provider reports it.
    pub amount: Option<Decimal>,
    pub currency: Option<Currency>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProviderEvent {
    Payment {
        provider: Provider,
        reference: String,
        status: VerificationStatus,
    },
    Dispute(DisputeEvent),
    Ignored {
        provider: Provider,
        event_type: String,
    },
}

fn str_at<'a>(payload: &'a Value, pointer: &str) -> Option<&'a str> {
    payload.pointer(pointer).and_then(Value::as_str)
}

fn first_str(payload: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .find_map(|p| str_at(payload, p))
        .map(str::to_string)
}

fn currency_at(payload: &Value, pointer: &str) -> Option<Currency> {
    str_at(payload, pointer).and_then(|c| c.parse().ok())
}

fn decimal_at(payload: &Value, pointer: &str) -> Option<Decimal> {
    match payload.pointer(pointer)? {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn minor_amount_at(payload: &Value, pointer: &str, currency: Option<Currency>) -> Option<Decimal> {
    let minor = payload.pointer(pointer).and_then(Value::as_i64)?;
    currency.map(|c| minor_to_major(minor, c))
}

fn missing(provider: Provider, what: &str) -> PaymentError {
    PaymentError::ValidationError(format!("{} event is missing {}", provider, what))
}

/// Maps a raw webhook body to a [`ProviderEvent`].
pub fn normalize(provider: Provider, payload: &Value) -> Result<ProviderEvent> {
    match provider {
        Provider::Stripe => normalize_stripe(payload),
        Provider::Paystack => normalize_paystack(payload),
        Provider::Flutterwave => normalize_flutterwave(payload),
    }
}

fn normalize_stripe(payload: &Value) -> Result<ProviderEvent> {
    let provider = Provider::Stripe;
    let event_type = str_at(payload, "/type").ok_or_else(|| missing(provider, "type"))?;
    let reference = || {
        first_str(
            payload,
            &[
                "/data/object/client_reference_id",
                "/data/object/metadata/reference",
            ],
        )
        .ok_or_else(|| missing(provider, "reference"))
    };

    let status = match event_type {
        "checkout.session.completed" => match str_at(payload, "/data/object/payment_status") {
            Some("paid") | None => VerificationStatus::Successful,
            Some(_) => VerificationStatus::Pending,
        },
        "checkout.session.async_payment_succeeded" | "payment_intent.succeeded" => {
            VerificationStatus::Successful
        }
        "checkout.session.async_payment_failed"
        | "checkout.session.expired"
        | "payment_intent.payment_failed" => VerificationStatus::Failed,
        "charge.dispute.created" => {
            let currency = currency_at(payload, "/data/object/currency");
            return Ok(ProviderEvent::Dispute(DisputeEvent {
                provider,
                transaction_id: str_at(payload, "/data/object/id")
                    .ok_or_else(|| missing(provider, "dispute id"))?
                    .to_string(),
                reference: first_str(payload, &["/data/object/metadata/reference"]),
                payment_id: str_at(payload, "/data/object/metadata/payment_id")
                    .and_then(|id| Uuid::parse_str(id).ok()),
                amount: minor_amount_at(payload, "/data/object/amount", currency),
                currency,
                reason: first_str(payload, &["/data/object/reason"]),
            }));
        }
        other => {
            return Ok(ProviderEvent::Ignored {
                provider,
                event_type: other.to_string(),
            });
        }
    };

    Ok(ProviderEvent::Payment {
        provider,
        reference: reference()?,
        status,
    })
}

fn normalize_paystack(payload: &Value) -> Result<ProviderEvent> {
    let provider = Provider::Paystack;
    let event_type = str_at(payload, "/event").ok_or_else(|| missing(provider, "event"))?;
    match event_type {
        "charge.success" | "charge.failed" => {
            let reference =
                first_str(payload, &["/data/reference"]).ok_or_else(|| missing(provider, "reference"))?;
            let status = match (event_type, str_at(payload, "/data/status")) {
                (_, Some("success")) => VerificationStatus::Successful,
                (_, Some("failed")) | ("charge.failed", _) => VerificationStatus::Failed,
                ("charge.success", None) => VerificationStatus::Successful,
                _ => VerificationStatus::Pending,
            };
            Ok(ProviderEvent::Payment {
                provider,
                reference,
                status,
            })
        }
        "charge.dispute.create" => {
            let currency = currency_at(payload, "/data/currency");
            let transaction_id = match payload.pointer("/data/id") {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) => s.clone(),
                _ => return Err(missing(provider, "dispute id")),
            };
            Ok(ProviderEvent::Dispute(DisputeEvent {
                provider,
                transaction_id,
                reference: first_str(payload, &["/data/transaction/reference", "/data/reference"]),
                payment_id: None,
                amount: minor_amount_at(payload, "/data/amount", currency),
                currency,
                reason: first_str(payload, &["/data/category", "/data/reason"]),
            }))
        }
        other => Ok(ProviderEvent::Ignored {
            provider,
            event_type: other.to_string(),
        }),
    }
}

fn normalize_flutterwave(payload: &Value) -> Result<ProviderEvent> {
    let provider = Provider::Flutterwave;
    let event_type = str_at(payload, "/event").ok_or_else(|| missing(provider, "event"))?;
    match event_type {
        "charge.completed" => {
            let reference =
                first_str(payload, &["/data/tx_ref"]).ok_or_else(|| missing(provider, "tx_ref"))?;
            let status = match str_at(payload, "/data/status") {
                Some("successful") => VerificationStatus::Successful,
                Some("failed") | Some("cancelled") => VerificationStatus::Failed,
                _ => VerificationStatus::Pending,
            };
            Ok(ProviderEvent::Payment {
                provider,
                reference,
                status,
            })
        }
        "chargeback.created" | "charge.dispute" => {
            let transaction_id = match payload.pointer("/data/id") {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) => s.clone(),
                _ => return Err(missing(provider, "chargeback id")),
            };
            Ok(ProviderEvent::Dispute(DisputeEvent {
                provider,
                transaction_id,
                reference: first_str(payload, &["/data/tx_ref"]),
                payment_id: None,
                amount: decimal_at(payload, "/data/amount"),
                currency: currency_at(payload, "/data/currency"),
                reason: first_str(payload, &["/data/comment", "/data/reason"]),
            }))
        }
        other => Ok(ProviderEvent::Ignored {
            provider,
            event_type: other.to_string(),
        }),
    }
}
