use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Success,
    Failed,
}

/// One scheduled retry of a failed recurring payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningAttempt {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub payment_id: Uuid,
    /// 1-based, unique per (subscription, payment).
    pub attempt_number: u32,
    pub scheduled_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub status: AttemptStatus,
    pub version: u64,
}

impl DunningAttempt {
    pub fn new(
        subscription_id: Uuid,
        payment_id: Uuid,
        attempt_number: u32,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            payment_id,
            attempt_number,
            scheduled_at,
            attempted_at: None,
            status: AttemptStatus::Pending,
            version: 0,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == AttemptStatus::Pending && self.scheduled_at <= now
    }

    /// Time the next delay is measured from.
    pub fn anchor(&self) -> DateTime<Utc> {
        self.attempted_at.unwrap_or(self.scheduled_at)
    }
}

/// Delays between retries; each measured from the previous attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DunningSchedule {
    delays: Vec<Duration>,
}

impl DunningSchedule {
    pub fn from_hours(hours: &[i64]) -> Self {
        Self {
            delays: hours.iter().map(|h| Duration::hours(*h)).collect(),
        }
    }

    pub fn len(&self) -> u32 {
        self.delays.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    /// Delay before attempt `attempt_number` (1-based), if the schedule has one.
    pub fn delay_before(&self, attempt_number: u32) -> Option<Duration> {
        attempt_number
            .checked_sub(1)
            .and_then(|idx| self.delays.get(idx as usize))
            .copied()
    }

    pub fn is_final(&self, attempt_number: u32) -> bool {
        attempt_number >= self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_offsets_accumulate_from_previous_attempt() {
        let schedule = DunningSchedule::from_hours(&[12, 24, 72, 120]);
        let failure = Utc::now();
        let mut at = failure;
        let mut offsets = Vec::new();
        for n in 1..=schedule.len() {
            at += schedule.delay_before(n).unwrap();
            offsets.push((at - failure).num_hours());
        }
        assert_eq!(offsets, vec![12, 36, 108, 228]);
        assert!(schedule.delay_before(5).is_none());
        assert!(schedule.delay_before(0).is_none());
        assert!(schedule.is_final(4));
        assert!(!schedule.is_final(3));
    }

    #[test]
    fn test_attempt_due() {
        let now = Utc::now();
        let attempt = DunningAttempt::new(Uuid::new_v4(), Uuid::new_v4(), 1, now);
        assert!(attempt.is_due(now));
        assert!(!attempt.is_due(now - Duration::seconds(1)));
    }
}
