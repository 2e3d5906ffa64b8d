//! Application layer orchestrating the payment flows.
//!
//! Each service owns one workflow and shares a [`context::Context`] holding
//! the stores, provider gateways, configuration and the outbound ports.
//! [`engine::PaymentEngine`] wires them together for callers.

pub mod chargeback;
pub mod checkout;
pub mod context;
pub mod dunning;
pub mod engine;
pub mod ledger;
pub mod payout;
pub mod risk;
pub mod router;
pub mod settlement;
pub mod webhook;
