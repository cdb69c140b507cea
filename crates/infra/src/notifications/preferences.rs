use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gloria_core::UserId;

use super::Channel;
use crate::store::StoreResult;

/// Per-user delivery settings. Users without a stored preference get
/// every channel enabled and nothing muted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: UserId,
    pub email: bool,
    pub in_app: bool,
    pub muted_topics: BTreeSet<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl NotificationPreference {
    pub fn default_for(user_id: UserId) -> Self {
        Self {
            user_id,
            email: true,
            in_app: true,
            muted_topics: BTreeSet::new(),
            updated_at: None,
        }
    }

    pub fn allows(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email,
            Channel::InApp => self.in_app,
        }
    }

    /// Exact topic match, or a `prefix.*` entry covering it.
    pub fn is_muted(&self, topic: &str) -> bool {
        self.muted_topics.iter().any(|muted| match muted.strip_suffix(".*") {
            Some(prefix) => topic.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('.')),
            None => muted == topic,
        })
    }
}

/// Fields to change; `muted_topics` replaces the whole list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PreferenceUpdate {
    pub email: Option<bool>,
    pub in_app: Option<bool>,
    pub muted_topics: Option<Vec<String>>,
}

#[derive(Debug, Default)]
pub struct PreferenceStore {
    preferences: RwLock<HashMap<UserId, NotificationPreference>>,
}

impl PreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: UserId) -> StoreResult<NotificationPreference> {
        Ok(self
            .preferences
            .read()?
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| NotificationPreference::default_for(user_id)))
    }

    /// Apply `update` and return `(before, after)`.
    pub fn update(
        &self,
        user_id: UserId,
        update: PreferenceUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<(NotificationPreference, NotificationPreference)> {
        let mut preferences = self.preferences.write()?;
        let before = preferences
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| NotificationPreference::default_for(user_id));

        let mut after = before.clone();
        if let Some(email) = update.email {
            after.email = email;
        }
        if let Some(in_app) = update.in_app {
            after.in_app = in_app;
        }
        if let Some(topics) = update.muted_topics {
            after.muted_topics = topics
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
        after.updated_at = Some(now);

        preferences.insert(user_id, after.clone());
        Ok((before, after))
    }

    pub fn snapshot(&self) -> StoreResult<HashMap<UserId, NotificationPreference>> {
        Ok(self.preferences.read()?.clone())
    }

    pub fn restore(&self, preferences: HashMap<UserId, NotificationPreference>) -> StoreResult<()> {
        *self.preferences.write()? = preferences;
        Ok(())
    }
}
