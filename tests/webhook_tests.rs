mod common;

use common::{harness, tip};
use creator_ledger::application::webhook::WebhookOutcome;
use creator_ledger::domain::payment::PaymentStatus;
use creator_ledger::domain::provider::{Provider, VerificationStatus};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

fn stripe_completed(reference: &str) -> serde_json::Value {
    json!({
        "type": "checkout.session.completed",
        "data": { "object": { "client_reference_id": reference, "payment_status": "paid" } }
    })
}

#[tokio::test]
async fn test_replayed_webhook_credits_once() {
    let h = harness();
    let creator = Uuid::new_v4();
    let outcome = h.engine.start_one_time_payment(tip(Uuid::new_v4(), creator, 1000)).await;
    let reference = outcome.reference.unwrap();

    let first = h
        .engine
        .handle_webhook(Provider::Stripe, &stripe_completed(&reference))
        .await
        .unwrap();
    assert!(matches!(
        first,
        WebhookOutcome::Processed {
            status: PaymentStatus::Success,
            ..
        }
    ));
    for _ in 0..3 {
        let again = h
            .engine
            .handle_webhook(Provider::Stripe, &stripe_completed(&reference))
            .await
            .unwrap();
        assert!(matches!(again, WebhookOutcome::AlreadyProcessed { .. }));
    }

    assert_eq!(h.engine.wallet(creator).await.unwrap().balance, dec!(9.50));
    assert_eq!(h.engine.ledger_entries(creator).await.unwrap().len(), 1);
    assert_eq!(h.notifier.sent_to(creator).await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_deliveries_credit_once() {
    let h = harness();
    let creator = Uuid::new_v4();
    let outcome = h.engine.start_one_time_payment(tip(Uuid::new_v4(), creator, 2500)).await;
    let reference = outcome.reference.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = h.engine.clone();
        let payload = stripe_completed(&reference);
        handles.push(tokio::spawn(async move {
            engine.handle_webhook(Provider::Stripe, &payload).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.engine.wallet(creator).await.unwrap().balance, dec!(23.75));
}

#[tokio::test]
async fn test_payload_status_is_not_trusted() {
    let h = harness();
    let creator = Uuid::new_v4();
    let outcome = h.engine.start_one_time_payment(tip(Uuid::new_v4(), creator, 1000)).await;
    let reference = outcome.reference.unwrap();
    h.stripe.set_outcome(&reference, VerificationStatus::Failed).await;

    // Claims success, but the provider says otherwise.
    let result = h
        .engine
        .handle_webhook(Provider::Stripe, &stripe_completed(&reference))
        .await
        .unwrap();
    assert!(matches!(
        result,
        WebhookOutcome::Processed {
            status: PaymentStatus::Failed,
            ..
        }
    ));
    assert_eq!(h.engine.wallet(creator).await.unwrap().balance, dec!(0));
    assert_eq!(h.stripe.verify_calls(), 1);
}

#[tokio::test]
async fn test_late_failure_cannot_undo_success() {
    let h = harness();
    let creator = Uuid::new_v4();
    let reference = h.fund(creator, 1000).await;

    h.stripe.set_outcome(&reference, VerificationStatus::Failed).await;
    let failed = json!({
        "type": "payment_intent.payment_failed",
        "data": { "object": { "metadata": { "reference": reference } } }
    });
    let result = h.engine.handle_webhook(Provider::Stripe, &failed).await.unwrap();
    assert!(matches!(
        result,
        WebhookOutcome::AlreadyProcessed {
            status: PaymentStatus::Success,
            ..
        }
    ));
    assert_eq!(h.engine.wallet(creator).await.unwrap().balance, dec!(9.50));
}

#[tokio::test]
async fn test_pending_verification_changes_nothing() {
    let h = harness();
    let creator = Uuid::new_v4();
    let outcome = h.engine.start_one_time_payment(tip(Uuid::new_v4(), creator, 1000)).await;
    let reference = outcome.reference.unwrap();
    h.stripe.set_outcome(&reference, VerificationStatus::Pending).await;

    let result = h.engine.verify_payment(Provider::Stripe, &reference).await.unwrap();
    assert!(matches!(result, WebhookOutcome::Pending { .. }));
    assert!(h.engine.wallets().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_reference_is_acknowledged() {
    let h = harness();
    let payload = json!({
        "event": "charge.success",
        "data": { "reference": "pay_missing", "status": "success" }
    });
    let result = h.engine.handle_webhook(Provider::Paystack, &payload).await.unwrap();
    assert_eq!(
        result,
        WebhookOutcome::Unresolved {
            reference: "pay_missing".into()
        }
    );
    assert_eq!(h.paystack.verify_calls(), 0);
}

#[tokio::test]
async fn test_event_from_wrong_provider_is_ignored() {
    let h = harness();
    let creator = Uuid::new_v4();
    let outcome = h.engine.start_one_time_payment(tip(Uuid::new_v4(), creator, 1000)).await;
    let reference = outcome.reference.unwrap();

    let payload = json!({
        "event": "charge.completed",
        "data": { "tx_ref": reference, "status": "successful" }
    });
    let result = h.engine.handle_webhook(Provider::Flutterwave, &payload).await.unwrap();
    assert!(matches!(result, WebhookOutcome::Unresolved { .. }));
    assert!(h.engine.wallets().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unrelated_events_are_ignored() {
    let h = harness();
    let payload = json!({ "type": "customer.created", "data": { "object": {} } });
    let result = h.engine.handle_webhook(Provider::Stripe, &payload).await.unwrap();
    assert_eq!(
        result,
        WebhookOutcome::Ignored {
            event_type: "customer.created".into()
        }
    );
}

#[tokio::test]
async fn test_provider_issued_reference_resolves_payment() {
    let h = harness();
    h.stripe.issue_references(true);
    let creator = Uuid::new_v4();
    let outcome = h.engine.start_one_time_payment(tip(Uuid::new_v4(), creator, 1000)).await;
    let provider_reference = outcome.reference.unwrap();

    let stores = h.engine.context().stores.clone();
    let payment = stores
        .payments
        .find_by_reference(&provider_reference)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(payment.reference, provider_reference);
    assert_eq!(payment.provider_reference.as_deref(), Some(provider_reference.as_str()));
    // The provider only knows its own id.
    h.stripe.set_outcome(&payment.reference, VerificationStatus::Failed).await;

    let first = h
        .engine
        .handle_webhook(Provider::Stripe, &stripe_completed(&provider_reference))
        .await
        .unwrap();
    assert!(matches!(
        first,
        WebhookOutcome::Processed {
            status: PaymentStatus::Success,
            ..
        }
    ));
    let again = h
        .engine
        .verify_payment(Provider::Stripe, &payment.reference)
        .await
        .unwrap();
    assert!(matches!(again, WebhookOutcome::AlreadyProcessed { .. }));
    assert_eq!(h.engine.wallet(creator).await.unwrap().balance, dec!(9.50));
}
