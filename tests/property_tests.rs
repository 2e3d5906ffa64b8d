use chrono::Utc;
use creator_ledger::domain::fees::{FeeSplit, calculate_creator_payout, calculate_platform_fee};
use creator_ledger::domain::money::{Amount, Currency};
use creator_ledger::domain::wallet::{SettlementOutcome, Wallet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use uuid::Uuid;

#[test]
fn test_fee_split_never_leaks_a_remainder() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..10_000 {
        let amount_minor = rng.gen_range(0..=10_000_000i64);
        // Percentages with up to two decimals, e.g. 7.25
        let fee_percent = Decimal::new(rng.gen_range(0..=10_000i64), 2);

        let split = FeeSplit::compute(amount_minor, fee_percent).unwrap();
        assert_eq!(split.total(), amount_minor);
        assert!(split.platform_fee >= 0 && split.creator_earnings >= 0);
        assert_eq!(
            calculate_platform_fee(amount_minor, fee_percent).unwrap()
                + calculate_creator_payout(amount_minor, fee_percent).unwrap(),
            amount_minor
        );
    }
}

#[test]
fn test_fee_percent_outside_range_is_rejected() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..1_000 {
        let above = Decimal::new(rng.gen_range(10_001..=1_000_000i64), 2);
        let below = -Decimal::new(rng.gen_range(1..=1_000_000i64), 2);
        assert!(calculate_platform_fee(1000, above).is_err());
        assert!(calculate_platform_fee(1000, below).is_err());
    }
}

#[test]
fn test_wallet_invariants_hold_under_random_operations() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..200 {
        let mut wallet = Wallet::new(Uuid::new_v4(), Currency::Usd, Utc::now());
        let mut open: Vec<Amount> = Vec::new();

        for _ in 0..100 {
            let amount = Amount::new(Decimal::new(rng.gen_range(1..=50_000i64), 2)).unwrap();
            match rng.gen_range(0..4) {
                0 => {
                    wallet.credit(amount);
                }
                1 => {
                    if wallet.reserve(amount).is_ok() {
                        open.push(amount);
                    }
                }
                2 if !open.is_empty() => {
                    let idx = rng.gen_range(0..open.len());
                    let reserved = open.swap_remove(idx);
                    let outcome = match rng.gen_range(0..3) {
                        0 => SettlementOutcome::Completed,
                        1 => SettlementOutcome::Failed,
                        _ => SettlementOutcome::Cancelled,
                    };
                    wallet.settle(reserved, outcome).unwrap();
                }
                _ => {
                    // Settling more than is reserved must be refused.
                    let pending = wallet.pending_payouts;
                    let over = Amount::new(pending + Decimal::ONE).unwrap();
                    assert!(wallet.settle(over, SettlementOutcome::Completed).is_err());
                    assert_eq!(wallet.pending_payouts, pending);
                }
            }
            wallet.check_invariants().unwrap();
            assert!(wallet.available() >= Decimal::ZERO);
            let reserved: Decimal = open.iter().map(|a| a.value()).sum();
            assert_eq!(wallet.pending_payouts, reserved);
        }
    }
}
