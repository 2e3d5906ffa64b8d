use crate::domain::UserId;
use crate::domain::ports::{KycDirectory, KycStatus, Notification, Notifier};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Emits notifications as log events.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        tracing::info!(
            user_id = %notification.user_id,
            kind = ?notification.kind,
            title = %notification.title,
            "notification"
        );
        Ok(())
    }
}

/// Keeps every notification in memory for later inspection.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<RwLock<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }

    pub async fn sent_to(&self, user_id: UserId) -> Vec<Notification> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.sent.write().await.push(notification);
        Ok(())
    }
}

/// KYC statuses held in memory, with a fallback for unknown users.
#[derive(Debug, Clone)]
pub struct StaticKycDirectory {
    statuses: Arc<RwLock<HashMap<UserId, KycStatus>>>,
    fallback: KycStatus,
}

impl StaticKycDirectory {
    pub fn new(fallback: KycStatus) -> Self {
        Self {
            statuses: Arc::new(RwLock::new(HashMap::new())),
            fallback,
        }
    }

    pub async fn set(&self, user_id: UserId, status: KycStatus) {
        self.statuses.write().await.insert(user_id, status);
    }
}

#[async_trait]
impl KycDirectory for StaticKycDirectory {
    async fn kyc_status(&self, user_id: UserId) -> Result<KycStatus> {
        Ok(self
            .statuses
            .read()
            .await
            .get(&user_id)
            .copied()
            .unwrap_or(self.fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::NotificationKind;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_kyc_fallback_and_override() {
        let kyc = StaticKycDirectory::new(KycStatus::None);
        let user = Uuid::new_v4();
        assert_eq!(kyc.kyc_status(user).await.unwrap(), KycStatus::None);
        kyc.set(user, KycStatus::Approved).await;
        assert_eq!(kyc.kyc_status(user).await.unwrap(), KycStatus::Approved);
    }

    #[tokio::test]
    async fn test_recording_notifier_filters_by_user() {
        let notifier = RecordingNotifier::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        for user in [a, b, a] {
            notifier
                .notify(Notification {
                    user_id: user,
                    kind: NotificationKind::PaymentReceived,
                    title: "Payment received".into(),
                    body: String::new(),
                    link: None,
                })
                .await
                .unwrap();
        }
        assert_eq!(notifier.sent_to(a).await.len(), 2);
        assert_eq!(notifier.notifications().await.len(), 3);
    }
}
