use crate::domain::UserId;
use crate::domain::money::Currency;
use crate::domain::provider::Provider;
use crate::error::PaymentError;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Creator subscription tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Basic,
    Premium,
    Pro,
    Elite,
}

impl Tier {
    /// Referral commission multiplier.
    pub fn multiplier(self) -> Decimal {
        match self {
            Tier::Basic => dec!(1.0),
            Tier::Premium => dec!(1.5),
            Tier::Pro => dec!(2.0),
            Tier::Elite => dec!(2.5),
        }
    }
}

impl FromStr for Tier {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Tier::Basic),
            "premium" => Ok(Tier::Premium),
            "pro" => Ok(Tier::Pro),
            "elite" => Ok(Tier::Elite),
            other => Err(PaymentError::ValidationError(format!(
                "Unknown tier: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    PastDue,
    Cancelled,
}

/// A fan's subscription to a creator. Prices are decimal major units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub fan_id: UserId,
    pub creator_id: UserId,
    pub tier: Tier,
    pub tier_price: Decimal,
    pub currency: Currency,
    pub interval: BillingInterval,
    pub status: SubscriptionStatus,
    pub provider: Provider,
    pub reference: String,
    /// Latest payment for the current billing cycle.
    pub payment_id: Uuid,
    pub auto_renew: bool,
    pub referrer_id: Option<UserId>,
    pub start_date: Option<DateTime<Utc>>,
    pub next_billing_date: DateTime<Utc>,
    pub past_due_since: Option<DateTime<Utc>>,
    /// End of the payment-method-update window once past due.
    pub grace_until: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Pending or past-due subscriptions become active. Returns whether the status changed.
    pub fn activate(&mut self, now: DateTime<Utc>) -> bool {
        match self.status {
            SubscriptionStatus::Pending | SubscriptionStatus::PastDue => {
                self.status = SubscriptionStatus::Active;
                if self.start_date.is_none() {
                    self.start_date = Some(now);
                }
                self.past_due_since = None;
                self.grace_until = None;
                self.updated_at = now;
                true
            }
            SubscriptionStatus::Active | SubscriptionStatus::Cancelled => false,
        }
    }

    pub fn mark_past_due(&mut self, now: DateTime<Utc>, grace: Duration) -> bool {
        if self.status != SubscriptionStatus::Active {
            return false;
        }
        self.status = SubscriptionStatus::PastDue;
        self.past_due_since = Some(now);
        self.grace_until = Some(now + grace);
        self.updated_at = now;
        true
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == SubscriptionStatus::Cancelled {
            return false;
        }
        self.status = SubscriptionStatus::Cancelled;
        self.auto_renew = false;
        self.cancelled_at = Some(now);
        self.updated_at = now;
        true
    }

    pub fn extend_billing(&mut self, period: Duration, now: DateTime<Utc>) {
        self.next_billing_date += period;
        self.updated_at = now;
    }

    /// Whether the past-due window has elapsed.
    pub fn grace_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::PastDue
            && self.grace_until.is_some_and(|deadline| deadline <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(now: DateTime<Utc>) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            fan_id: Uuid::new_v4(),
            creator_id: Uuid::new_v4(),
            tier: Tier::Premium,
            tier_price: dec!(10.00),
            currency: Currency::Usd,
            interval: BillingInterval::Monthly,
            status: SubscriptionStatus::Pending,
            provider: Provider::Stripe,
            reference: "pay_x".to_string(),
            payment_id: Uuid::new_v4(),
            auto_renew: true,
            referrer_id: None,
            start_date: None,
            next_billing_date: now + Duration::days(30),
            past_due_since: None,
            grace_until: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    #[test]
    fn test_activation_sets_start_date_once() {
        let now = Utc::now();
        let mut sub = sample(now);
        assert!(sub.activate(now));
        assert_eq!(sub.start_date, Some(now));
        assert!(!sub.activate(now + Duration::days(1)));
        assert_eq!(sub.start_date, Some(now));
    }

    #[test]
    fn test_past_due_grace_window() {
        let now = Utc::now();
        let mut sub = sample(now);
        sub.activate(now);
        assert!(sub.mark_past_due(now, Duration::days(7)));
        assert!(!sub.grace_expired(now + Duration::days(6)));
        assert!(sub.grace_expired(now + Duration::days(7)));
        assert!(sub.activate(now + Duration::days(2)));
        assert_eq!(sub.grace_until, None);
    }

    #[test]
    fn test_cancel_is_terminal() {
        let now = Utc::now();
        let mut sub = sample(now);
        assert!(sub.cancel(now));
        assert!(!sub.activate(now));
        assert!(!sub.auto_renew);
    }

    #[test]
    fn test_tier_multipliers() {
        assert_eq!(Tier::Basic.multiplier(), dec!(1.0));
        assert_eq!(Tier::Elite.multiplier(), dec!(2.5));
        assert_eq!("PRO".parse::<Tier>().unwrap(), Tier::Pro);
    }
}
