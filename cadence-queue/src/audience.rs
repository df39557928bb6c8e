//! Audience resolution.

use crate::error::QueueResult;
use crate::model::Contact;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Resolves an audience group to an ordered, deduplicated contact list.
#[async_trait]
pub trait AudienceSource: Send + Sync {
    async fn resolve(&self, group_id: &str) -> QueueResult<Vec<Contact>>;
}

/// Fixed in-memory audience groups.
#[derive(Default)]
pub struct StaticAudience {
    groups: RwLock<HashMap<String, Vec<Contact>>>,
}

impl StaticAudience {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a group, keeping the first occurrence of each recipient id and email.
    pub async fn set_group(&self, group_id: impl Into<String>, contacts: Vec<Contact>) {
        let contacts = dedupe(contacts);
        self.groups.write().await.insert(group_id.into(), contacts);
    }

    pub async fn with_group(self, group_id: impl Into<String>, contacts: Vec<Contact>) -> Self {
        self.set_group(group_id, contacts).await;
        self
    }
}

fn dedupe(contacts: Vec<Contact>) -> Vec<Contact> {
    let mut ids = HashSet::new();
    let mut emails = HashSet::new();
    contacts
        .into_iter()
        .filter(|c| ids.insert(c.recipient_id.clone()))
        .filter(|c| match &c.email {
            Some(email) => emails.insert(email.trim().to_lowercase()),
            None => true,
        })
        .collect()
}

#[async_trait]
impl AudienceSource for StaticAudience {
    async fn resolve(&self, group_id: &str) -> QueueResult<Vec<Contact>> {
        Ok(self
            .groups
            .read()
            .await
            .get(group_id)
            .cloned()
            .unwrap_or_default())
    }
}
