use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use crate::errors::ChatResult;
use crate::models::{collections, UserProfile};
use crate::store::DocumentStore;

/// Read-through, time-boxed cache of user profiles.
///
/// Used only for display-name denormalization and notification titles.
/// Permission and capacity checks always re-read the authoritative
/// document at decision time, never this cache.
pub struct ProfileCache {
    store: Arc<dyn DocumentStore>,
    ttl: Duration,
    entries: DashMap<Uuid, (UserProfile, Instant)>,
}

impl ProfileCache {
    pub fn new(store: Arc<dyn DocumentStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Fetch a profile, serving from cache within the TTL.
    /// Returns None for unknown users rather than erroring.
    pub async fn get(&self, user_id: Uuid) -> ChatResult<Option<UserProfile>> {
        if let Some(entry) = self.entries.get(&user_id) {
            let (profile, fetched_at) = entry.value();
            if fetched_at.elapsed() < self.ttl {
                return Ok(Some(profile.clone()));
            }
        }

        let Some(doc) = self.store.get(collections::USERS, &user_id.to_string()).await? else {
            return Ok(None);
        };
        let profile: UserProfile = doc.decode()?;
        self.entries.insert(user_id, (profile.clone(), Instant::now()));
        Ok(Some(profile))
    }

    /// Display name for a user, with a neutral fallback when the profile
    /// is missing.
    pub async fn display_name(&self, user_id: Uuid) -> String {
        match self.get(user_id).await {
            Ok(Some(profile)) => profile.display_name(),
            Ok(None) => "A member".to_string(),
            Err(e) => {
                tracing::warn!(%user_id, error = %e, "profile lookup failed");
                "A member".to_string()
            }
        }
    }

    pub fn invalidate(&self, user_id: Uuid) {
        self.entries.remove(&user_id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
