mod common;

use chrono::Duration;
use common::{Harness, card_payer, harness};
use creator_ledger::application::checkout::SubscriptionRequest;
use creator_ledger::domain::UserId;
use creator_ledger::domain::money::Currency;
use creator_ledger::domain::ports::NotificationKind;
use creator_ledger::domain::provider::{Provider, VerificationStatus};
use creator_ledger::domain::subscription::{BillingInterval, Subscription, SubscriptionStatus, Tier};
use creator_ledger::domain::wallet::EntryKind;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn premium(fan: UserId, creator: UserId, referrer: Option<UserId>) -> SubscriptionRequest {
    SubscriptionRequest {
        fan_id: fan,
        creator_id: creator,
        tier: Tier::Premium,
        tier_price: dec!(20),
        currency: Currency::Usd,
        interval: BillingInterval::Monthly,
        auto_renew: true,
        referrer_id: referrer,
        payer: card_payer("US"),
    }
}

async fn subscription_for(h: &Harness, creator: UserId) -> Subscription {
    h.engine
        .context()
        .stores
        .subscriptions
        .list_by_creator(creator)
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap()
}

#[tokio::test]
async fn test_paid_subscription_activates_and_pays_referrer() {
    let h = harness();
    let (fan, creator, referrer) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let outcome = h.engine.start_subscription(premium(fan, creator, Some(referrer))).await;
    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(subscription_for(&h, creator).await.status, SubscriptionStatus::Pending);

    let reference = outcome.reference.unwrap();
    h.engine.verify_payment(Provider::Stripe, &reference).await.unwrap();
    h.engine.verify_payment(Provider::Stripe, &reference).await.unwrap();

    let subscription = subscription_for(&h, creator).await;
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(subscription.start_date, Some(common::start_time()));
    assert_eq!(
        subscription.next_billing_date,
        common::start_time() + Duration::days(30)
    );

    assert_eq!(h.engine.wallet(creator).await.unwrap().balance, dec!(19.00));
    // 20 × 10% × 1.5
    let referrer_wallet = h.engine.wallet(referrer).await.unwrap();
    assert_eq!(referrer_wallet.balance, dec!(3.00));
    let entries = h.engine.ledger_entries(referrer).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EntryKind::ReferralCommission);

    let kinds: Vec<_> = h
        .notifier
        .sent_to(creator)
        .await
        .into_iter()
        .map(|n| n.kind)
        .collect();
    assert_eq!(kinds, vec![NotificationKind::SubscriptionActivated]);
}

#[tokio::test]
async fn test_single_active_subscription_per_pair() {
    let h = harness();
    let (fan, creator) = (Uuid::new_v4(), Uuid::new_v4());
    let outcome = h.engine.start_subscription(premium(fan, creator, None)).await;
    h.engine
        .verify_payment(Provider::Stripe, &outcome.reference.unwrap())
        .await
        .unwrap();

    let second = h.engine.start_subscription(premium(fan, creator, None)).await;
    assert!(!second.success);
    assert_eq!(second.error.unwrap().code, "conflict");

    // Another fan is unaffected.
    let other = h.engine.start_subscription(premium(Uuid::new_v4(), creator, None)).await;
    assert!(other.success);
}

#[tokio::test]
async fn test_two_paid_checkouts_leave_one_active() {
    let h = harness();
    let (fan, creator) = (Uuid::new_v4(), Uuid::new_v4());
    let first = h.engine.start_subscription(premium(fan, creator, None)).await;
    let second = h.engine.start_subscription(premium(fan, creator, None)).await;

    for outcome in [first, second] {
        h.engine
            .verify_payment(Provider::Stripe, &outcome.reference.unwrap())
            .await
            .unwrap();
    }

    let subscriptions = h
        .engine
        .context()
        .stores
        .subscriptions
        .list_by_creator(creator)
        .await
        .unwrap();
    let active = subscriptions.iter().filter(|s| s.is_active()).count();
    assert_eq!(active, 1);
}

#[tokio::test]
async fn test_self_referral_and_self_subscription_rejected() {
    let h = harness();
    let (fan, creator) = (Uuid::new_v4(), Uuid::new_v4());
    let own = h.engine.start_subscription(premium(creator, creator, None)).await;
    assert_eq!(own.error.unwrap().code, "validation_error");
    let referred = h.engine.start_subscription(premium(fan, creator, Some(fan))).await;
    assert_eq!(referred.error.unwrap().code, "validation_error");
    assert_eq!(h.stripe.session_calls(), 0);
}

#[tokio::test]
async fn test_failed_first_payment_leaves_subscription_pending() {
    let h = harness();
    let (fan, creator) = (Uuid::new_v4(), Uuid::new_v4());
    let outcome = h.engine.start_subscription(premium(fan, creator, None)).await;
    let reference = outcome.reference.unwrap();
    h.stripe.set_outcome(&reference, VerificationStatus::Failed).await;

    h.engine.verify_payment(Provider::Stripe, &reference).await.unwrap();
    assert_eq!(subscription_for(&h, creator).await.status, SubscriptionStatus::Pending);
    assert_eq!(h.engine.wallet(creator).await.unwrap().balance, dec!(0));
}

#[tokio::test]
async fn test_renewal_extends_billing_once() {
    let h = harness();
    let (fan, creator, referrer) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let outcome = h.engine.start_subscription(premium(fan, creator, Some(referrer))).await;
    h.engine
        .verify_payment(Provider::Stripe, &outcome.reference.unwrap())
        .await
        .unwrap();
    let subscription = subscription_for(&h, creator).await;

    h.clock.advance(Duration::days(30));
    let renewal = h.engine.start_renewal(subscription.id, &card_payer("US")).await;
    assert!(renewal.success, "{:?}", renewal.error);
    let reference = renewal.reference.unwrap();
    h.engine.verify_payment(Provider::Stripe, &reference).await.unwrap();
    h.engine.verify_payment(Provider::Stripe, &reference).await.unwrap();

    let renewed = subscription_for(&h, creator).await;
    assert_eq!(
        renewed.next_billing_date,
        subscription.next_billing_date + Duration::days(30)
    );
    assert_eq!(h.engine.wallet(creator).await.unwrap().balance, dec!(38.00));
    // Commission is paid on the first payment only.
    assert_eq!(h.engine.wallet(referrer).await.unwrap().balance, dec!(3.00));
}

#[tokio::test]
async fn test_failed_renewal_cancels_when_auto_renew_is_off() {
    let h = harness();
    let (fan, creator) = (Uuid::new_v4(), Uuid::new_v4());
    let outcome = h.engine.start_subscription(premium(fan, creator, None)).await;
    h.engine
        .verify_payment(Provider::Stripe, &outcome.reference.unwrap())
        .await
        .unwrap();
    let subscription = subscription_for(&h, creator).await;

    let billed_at = h.clock.advance(Duration::days(30));
    let renewal = h.engine.start_renewal(subscription.id, &card_payer("US")).await;
    let reference = renewal.reference.unwrap();

    // The fan turns auto-renew off while the renewal is still open.
    let stores = h.engine.context().stores.clone();
    let mut opted_out = stores.subscriptions.get(subscription.id).await.unwrap().unwrap();
    opted_out.auto_renew = false;
    assert!(stores.subscriptions.update(&mut opted_out).await.unwrap());

    h.stripe.set_outcome(&reference, VerificationStatus::Failed).await;
    h.engine.verify_payment(Provider::Stripe, &reference).await.unwrap();

    let cancelled = subscription_for(&h, creator).await;
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
    assert!(
        h.notifier
            .sent_to(fan)
            .await
            .iter()
            .any(|n| n.kind == NotificationKind::SubscriptionCancelled)
    );
    // Nothing is left for the dunning sweep.
    let report = h.engine.run_dunning(billed_at).await.unwrap();
    assert_eq!(report.scheduled, 0);
}

#[tokio::test]
async fn test_yearly_renewal_extends_by_a_year() {
    let h = harness();
    let (fan, creator) = (Uuid::new_v4(), Uuid::new_v4());
    let request = SubscriptionRequest {
        interval: BillingInterval::Yearly,
        ..premium(fan, creator, None)
    };
    let outcome = h.engine.start_subscription(request).await;
    h.engine
        .verify_payment(Provider::Stripe, &outcome.reference.unwrap())
        .await
        .unwrap();
    let subscription = subscription_for(&h, creator).await;

    h.clock.advance(Duration::days(365));
    let renewal = h.engine.start_renewal(subscription.id, &card_payer("US")).await;
    h.engine
        .verify_payment(Provider::Stripe, &renewal.reference.unwrap())
        .await
        .unwrap();

    let renewed = subscription_for(&h, creator).await;
    assert_eq!(
        renewed.next_billing_date,
        subscription.next_billing_date + Duration::days(365)
    );
}
