use std::collections::HashMap;
use std::sync::RwLock;

use tracing::info;

use gloria_core::{Page, PageRequest, UserId};

use super::{Channel, Notification};
use crate::store::StoreResult;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// A delivery channel.
pub trait NotificationSink: Send + Sync {
    fn channel(&self) -> Channel;

    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Per-user in-app inbox.
#[derive(Debug, Default)]
pub struct InAppInbox {
    messages: RwLock<HashMap<UserId, Vec<Notification>>>,
}

impl InAppInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages for `user_id`, newest first.
    pub fn messages(&self, user_id: UserId) -> StoreResult<Vec<Notification>> {
        let messages = self.messages.read()?;
        let mut list = messages.get(&user_id).cloned().unwrap_or_default();
        list.reverse();
        Ok(list)
    }

    pub fn page(&self, user_id: UserId, page: PageRequest) -> StoreResult<Page<Notification>> {
        Ok(page.apply(self.messages(user_id)?))
    }
}

impl NotificationSink for InAppInbox {
    fn channel(&self) -> Channel {
        Channel::InApp
    }

    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let mut messages = self
            .messages
            .write()
            .map_err(|_| DeliveryError("inbox lock poisoned".into()))?;
        let inbox = messages.entry(notification.recipient).or_default();
        if !inbox.iter().any(|n| n.job_id == notification.job_id) {
            inbox.push(notification.clone());
        }
        Ok(())
    }
}

/// Writes outgoing mail to the log instead of an SMTP relay.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmailSink;

impl NotificationSink for LogEmailSink {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let Some(to) = notification.email.as_deref() else {
            return Ok(());
        };
        info!(
            job_id = %notification.job_id,
            user_id = %notification.recipient,
            to,
            topic = %notification.topic,
            subject = %notification.subject,
            "email notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::jobs::JobId;

    fn notification(recipient: UserId, job_id: JobId) -> Notification {
        Notification {
            job_id,
            recipient,
            email: None,
            topic: "role.updated".into(),
            subject: "role r (role.updated)".into(),
            entity_type: "role".into(),
            entity_id: "r".into(),
            actor_id: None,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn inbox_is_newest_first_and_paged() {
        let inbox = InAppInbox::new();
        let user = UserId::new();
        let ids: Vec<_> = (0..3).map(|_| JobId::new()).collect();
        for id in &ids {
            inbox.deliver(&notification(user, *id)).unwrap();
        }
        inbox.deliver(&notification(user, ids[0])).unwrap();

        let page = inbox.page(user, PageRequest::new(1, 2)).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items[0].job_id, ids[2]);
        assert!(inbox.messages(UserId::new()).unwrap().is_empty());
    }

    #[test]
    fn email_without_address_is_skipped() {
        assert!(LogEmailSink.deliver(&notification(UserId::new(), JobId::new())).is_ok());
    }
}
