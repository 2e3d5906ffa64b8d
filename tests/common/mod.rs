#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use creator_ledger::application::checkout::{OneTimePaymentRequest, PayerDetails};
use creator_ledger::application::context::{Context, ProviderRegistry};
use creator_ledger::application::engine::PaymentEngine;
use creator_ledger::config::EngineConfig;
use creator_ledger::domain::UserId;
use creator_ledger::domain::money::{CountryCode, Currency};
use creator_ledger::domain::payment::PaymentKind;
use creator_ledger::domain::ports::KycStatus;
use creator_ledger::domain::provider::{PaymentMethod, Provider};
use creator_ledger::infrastructure::clock::ManualClock;
use creator_ledger::infrastructure::in_memory::in_memory_stores;
use creator_ledger::infrastructure::notifier::{RecordingNotifier, StaticKycDirectory};
use creator_ledger::infrastructure::sandbox::SandboxProvider;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Engine over in-memory stores with handles on every test double.
pub struct Harness {
    pub engine: PaymentEngine,
    pub clock: ManualClock,
    pub notifier: RecordingNotifier,
    pub kyc: StaticKycDirectory,
    pub stripe: SandboxProvider,
    pub paystack: SandboxProvider,
    pub flutterwave: SandboxProvider,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let stripe = SandboxProvider::new(Provider::Stripe);
    let paystack = SandboxProvider::new(Provider::Paystack);
    let flutterwave = SandboxProvider::new(Provider::Flutterwave);
    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(stripe.clone()));
    providers.register(Arc::new(paystack.clone()));
    providers.register(Arc::new(flutterwave.clone()));

    let clock = ManualClock::new(start_time());
    let notifier = RecordingNotifier::new();
    let kyc = StaticKycDirectory::new(KycStatus::Approved);
    let ctx = Context::new(in_memory_stores(), providers, config)
        .with_clock(Arc::new(clock.clone()))
        .with_notifier(Arc::new(notifier.clone()))
        .with_kyc(Arc::new(kyc.clone()));

    Harness {
        engine: PaymentEngine::new(ctx),
        clock,
        notifier,
        kyc,
        stripe,
        paystack,
        flutterwave,
    }
}

pub fn card_payer(country: &str) -> PayerDetails {
    PayerDetails {
        email: "fan@example.com".into(),
        country: CountryCode::new(country).unwrap(),
        method: PaymentMethod::Card,
        phone_number: None,
        preferences: Vec::new(),
    }
}

pub fn tip(fan: UserId, creator: UserId, amount_minor: i64) -> OneTimePaymentRequest {
    OneTimePaymentRequest {
        user_id: fan,
        creator_id: Some(creator),
        amount_minor,
        currency: Currency::Usd,
        kind: PaymentKind::Tip { message: None },
        payer: card_payer("US"),
    }
}

impl Harness {
    /// Tips `creator` and confirms the payment, returning its reference.
    pub async fn fund(&self, creator: UserId, amount_minor: i64) -> String {
        let outcome = self
            .engine
            .start_one_time_payment(tip(Uuid::new_v4(), creator, amount_minor))
            .await;
        assert!(outcome.success, "{:?}", outcome.error);
        let reference = outcome.reference.unwrap();
        self.engine
            .verify_payment(Provider::Stripe, &reference)
            .await
            .unwrap();
        reference
    }
}

pub fn generate_operations_csv(path: &Path, tips: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record([
        "op", "user", "counterparty", "reference", "amount", "currency", "country", "method", "tier",
        "account",
    ])?;

    for i in 1..=tips {
        wtr.write_record([
            "tip",
            &format!("fan{}", i % 7),
            "creator",
            &format!("t{}", i),
            "1.00",
            "USD",
            "US",
            "card",
            "",
            "",
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
