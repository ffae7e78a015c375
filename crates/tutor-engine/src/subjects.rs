//! Per-learner cache of the subject catalog.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::gateway::TutorGateway;
use crate::wire::{CreatedSubject, NewSubject, Subject};

/// Caches `list_subjects` results by user id.
///
/// Entries never expire. Concurrent writers for the same user overwrite each
/// other; creating any subject clears every entry.
#[derive(Debug, Default)]
pub struct SubjectCatalog {
    cache: RwLock<HashMap<String, Vec<Subject>>>,
}

impl SubjectCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the learner's subjects, fetching them on a cache miss.
    pub async fn list(&self, gateway: &dyn TutorGateway, user_id: &str) -> Result<Vec<Subject>> {
        if let Some(subjects) = self.cached(user_id).await {
            debug!(user_id, count = subjects.len(), "Subject cache hit");
            return Ok(subjects);
        }
        let subjects = gateway.list_subjects(user_id).await?;
        self.cache
            .write()
            .await
            .insert(user_id.to_string(), subjects.clone());
        Ok(subjects)
    }

    /// Creates a subject and clears the whole cache on success.
    pub async fn create(
        &self,
        gateway: &dyn TutorGateway,
        subject: &NewSubject,
    ) -> Result<CreatedSubject> {
        let created = gateway.create_subject(subject).await?;
        self.invalidate().await;
        Ok(created)
    }

    /// The cached subjects for `user_id`, if any.
    pub async fn cached(&self, user_id: &str) -> Option<Vec<Subject>> {
        self.cache.read().await.get(user_id).cloned()
    }

    /// Drops every cached entry.
    pub async fn invalidate(&self) {
        self.cache.write().await.clear();
    }
}
