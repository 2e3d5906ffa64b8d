mod common;

use common::{Harness, harness};
use creator_ledger::application::context::Actor;
use creator_ledger::application::ledger::LedgerManager;
use creator_ledger::application::payout::PayoutInput;
use creator_ledger::domain::UserId;
use creator_ledger::domain::money::{Amount, CountryCode, Currency};
use creator_ledger::domain::payout::{AccountDetails, PayoutStatus};
use creator_ledger::domain::ports::{KycStatus, NotificationKind};
use creator_ledger::domain::provider::{PayoutMethod, Provider};
use creator_ledger::domain::wallet::EntryKind;
use creator_ledger::error::PaymentError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn bank_payout(user_id: UserId, amount: Decimal) -> PayoutInput {
    PayoutInput {
        user_id,
        amount,
        currency: Currency::Usd,
        method: PayoutMethod::BankTransfer,
        account_details: AccountDetails {
            account_name: Some("Creator".into()),
            account_number: Some("000123456".into()),
            bank_code: Some("110000000".into()),
            country: Some(CountryCode::new("US").unwrap()),
            ..Default::default()
        },
    }
}

fn ledger(h: &Harness) -> LedgerManager {
    LedgerManager::new(h.engine.context().clone())
}

#[tokio::test]
async fn test_concurrent_payouts_cannot_overdraw() {
    let h = harness();
    let creator = Uuid::new_v4();
    ledger(&h)
        .credit_earnings(creator, EntryKind::Earning, Amount::new(dec!(100)).unwrap(), "payment:seed")
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        h.engine.request_payout(bank_payout(creator, dec!(60))),
        h.engine.request_payout(bank_payout(creator, dec!(60))),
    );
    let results = [a, b];
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let overdrawn = results
        .iter()
        .filter(|r| matches!(r, Err(PaymentError::InsufficientBalance { .. })))
        .count();
    assert_eq!(accepted, 1);
    assert_eq!(overdrawn, 1);

    let wallet = h.engine.wallet(creator).await.unwrap();
    assert_eq!(wallet.pending_payouts, dec!(60));
    wallet.check_invariants().unwrap();
}

#[tokio::test]
async fn test_frozen_wallet_cannot_withdraw() {
    let h = harness();
    let creator = Uuid::new_v4();
    h.fund(creator, 10000).await;
    ledger(&h).freeze(creator, "manual review").await.unwrap();

    let guard = h.engine.withdrawal_guard(creator, dec!(20), Currency::Usd).await;
    assert_eq!(guard.unwrap().code, "wallet_frozen");
    let err = h.engine.request_payout(bank_payout(creator, dec!(20))).await.unwrap_err();
    assert!(matches!(err, PaymentError::WalletFrozen { .. }));

    let unfreeze = h.engine.unfreeze_wallet(Actor::User(creator), creator).await;
    assert!(matches!(unfreeze, Err(PaymentError::Forbidden(_))));
    h.engine
        .unfreeze_wallet(Actor::Admin(Uuid::new_v4()), creator)
        .await
        .unwrap();
    assert!(h.engine.request_payout(bank_payout(creator, dec!(20))).await.is_ok());
}

#[tokio::test]
async fn test_mobile_money_without_phone_never_reaches_provider() {
    let h = harness();
    let creator = Uuid::new_v4();
    h.fund(creator, 10000).await;

    let input = PayoutInput {
        method: PayoutMethod::MobileMoney,
        account_details: AccountDetails {
            country: Some(CountryCode::new("KE").unwrap()),
            ..Default::default()
        },
        ..bank_payout(creator, dec!(20))
    };
    let route = h.engine.route_payout(input).await;
    assert!(!route.success);
    assert_eq!(route.error.unwrap().code, "validation_error");
    assert_eq!(h.flutterwave.transfer_calls(), 0);
    assert_eq!(h.engine.wallet(creator).await.unwrap().pending_payouts, dec!(0));
}

#[tokio::test]
async fn test_unroutable_payout_reserves_nothing() {
    let h = harness();
    let creator = Uuid::new_v4();
    h.fund(creator, 10000).await;

    let input = PayoutInput {
        method: PayoutMethod::MobileMoney,
        account_details: AccountDetails {
            phone_number: Some("+15550000000".into()),
            country: Some(CountryCode::new("US").unwrap()),
            ..Default::default()
        },
        ..bank_payout(creator, dec!(50))
    };
    let route = h.engine.route_payout(input).await;
    assert!(!route.success);
    assert_eq!(route.error.unwrap().code, "routing_error");
    assert!(route.payout_id.is_none());

    let wallet = h.engine.wallet(creator).await.unwrap();
    assert_eq!(wallet.pending_payouts, dec!(0));
    assert_eq!(wallet.available(), dec!(95));
    let stored = h.engine.context().stores.payouts.list_by_wallet(creator).await.unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn test_mobile_money_payout_goes_through_flutterwave() {
    let h = harness();
    let creator = Uuid::new_v4();
    h.fund(creator, 10000).await;

    let input = PayoutInput {
        method: PayoutMethod::MobileMoney,
        account_details: AccountDetails {
            phone_number: Some("+254700000000".into()),
            country: Some(CountryCode::new("KE").unwrap()),
            ..Default::default()
        },
        ..bank_payout(creator, dec!(20))
    };
    let route = h.engine.route_payout(input).await;
    assert!(route.success, "{:?}", route.error);
    assert_eq!(route.provider, Some(Provider::Flutterwave));

    let admin = Actor::Admin(Uuid::new_v4());
    let payout_id = route.payout_id.unwrap();
    h.engine.start_payout_processing(admin, payout_id).await.unwrap();
    assert_eq!(h.flutterwave.transfer_calls(), 1);
    let done = h.engine.complete_payout(admin, payout_id).await.unwrap();
    assert_eq!(done.status, PayoutStatus::Completed);
    assert_eq!(h.engine.wallet(creator).await.unwrap().balance, dec!(75));

    let updates = h
        .notifier
        .sent_to(creator)
        .await
        .into_iter()
        .filter(|n| n.kind == NotificationKind::PayoutUpdated)
        .count();
    assert_eq!(updates, 2);
}

#[tokio::test]
async fn test_transfer_failure_keeps_payout_pending() {
    let h = harness();
    let creator = Uuid::new_v4();
    h.fund(creator, 10000).await;
    let payout = h.engine.request_payout(bank_payout(creator, dec!(30))).await.unwrap();

    h.stripe.fail_transfers(true);
    let admin = Actor::Admin(Uuid::new_v4());
    let err = h.engine.start_payout_processing(admin, payout.id).await.unwrap_err();
    assert!(matches!(err, PaymentError::ProviderUnavailable(_)));
    let stored = h.engine.context().stores.payouts.get(payout.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PayoutStatus::Pending);

    let failed = h
        .engine
        .fail_payout(admin, payout.id, Some("transfer rejected".into()))
        .await
        .unwrap();
    assert_eq!(failed.status, PayoutStatus::Failed);
    assert_eq!(failed.admin_notes.as_deref(), Some("transfer rejected"));
    let wallet = h.engine.wallet(creator).await.unwrap();
    assert_eq!(wallet.pending_payouts, dec!(0));
    assert_eq!(wallet.balance, dec!(95));
}

#[tokio::test]
async fn test_completed_payout_cannot_be_cancelled() {
    let h = harness();
    let creator = Uuid::new_v4();
    h.fund(creator, 10000).await;
    let admin = Actor::Admin(Uuid::new_v4());
    let payout = h.engine.request_payout(bank_payout(creator, dec!(30))).await.unwrap();
    h.engine.start_payout_processing(admin, payout.id).await.unwrap();
    h.engine.complete_payout(admin, payout.id).await.unwrap();

    let err = h.engine.cancel_payout(admin, payout.id, None).await.unwrap_err();
    assert!(matches!(err, PaymentError::Conflict(_)));
    assert_eq!(h.engine.wallet(creator).await.unwrap().balance, dec!(65));
}

#[tokio::test]
async fn test_unverified_creator_raises_risk() {
    let h = harness();
    let creator = Uuid::new_v4();
    h.fund(creator, 10000).await;
    h.kyc.set(creator, KycStatus::Pending).await;

    for _ in 0..2 {
        let err = h.engine.request_payout(bank_payout(creator, dec!(20))).await.unwrap_err();
        assert!(matches!(err, PaymentError::KycRequired(_)));
    }
    let profile = h.engine.risk_profile(creator).await.unwrap();
    assert_eq!(profile.signals.pre_kyc_payout_requests, 2);
    assert!(profile.risk_score > 0);
}

#[tokio::test]
async fn test_concurrent_processing_sends_one_transfer() {
    let h = harness();
    let creator = Uuid::new_v4();
    h.fund(creator, 10000).await;
    let payout = h.engine.request_payout(bank_payout(creator, dec!(30))).await.unwrap();
    h.stripe.set_transfer_latency(std::time::Duration::from_millis(20));

    let (a, b) = tokio::join!(
        h.engine.start_payout_processing(Actor::Admin(Uuid::new_v4()), payout.id),
        h.engine.start_payout_processing(Actor::Admin(Uuid::new_v4()), payout.id),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(PaymentError::Conflict(_)) | Err(PaymentError::ConcurrentModification(_))
    )));
    assert_eq!(h.stripe.transfer_calls(), 1);

    let stored = h.engine.context().stores.payouts.get(payout.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PayoutStatus::Processing);
    assert!(stored.provider_reference.is_some());
}
