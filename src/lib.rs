//! Messaging synchronization core: DM conversations with atomic message
//! delivery, per-user unread counters, soft-delete visibility, group
//! chat lifecycle, and notification fan-out, all over an injected
//! document store.

pub mod auth;
pub mod cache;
pub mod config;
pub mod conversations;
pub mod errors;
pub mod groups;
pub mod messages;
pub mod models;
pub mod notifications;
pub mod store;
pub mod unread;
pub mod visibility;

use std::sync::Arc;

use auth::AuthProvider;
use cache::ProfileCache;
use config::CoreConfig;
use conversations::ConversationResolver;
use groups::GroupLifecycleManager;
use messages::MessagePipeline;
use notifications::NotificationFanout;
use store::DocumentStore;
use unread::UnreadCounter;
use visibility::VisibilityManager;

// ─── Core Assembly ─────────────────────────────────────

/// One wired instance of every component, sharing a store, an auth
/// provider, and a profile cache. Construction is the only place these
/// dependencies are threaded; components never reach for globals.
pub struct ChatCore {
    pub config: CoreConfig,
    pub profiles: Arc<ProfileCache>,
    pub conversations: ConversationResolver,
    pub messages: MessagePipeline,
    pub unread: UnreadCounter,
    pub visibility: VisibilityManager,
    pub groups: GroupLifecycleManager,
    pub notifications: NotificationFanout,
}

impl ChatCore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthProvider>,
        config: CoreConfig,
    ) -> Self {
        let profiles = Arc::new(ProfileCache::new(
            Arc::clone(&store),
            config.profile_cache_ttl(),
        ));
        Self {
            conversations: ConversationResolver::new(Arc::clone(&store)),
            messages: MessagePipeline::new(Arc::clone(&store), Arc::clone(&auth)),
            unread: UnreadCounter::new(Arc::clone(&store)),
            visibility: VisibilityManager::new(Arc::clone(&store)),
            groups: GroupLifecycleManager::new(
                Arc::clone(&store),
                Arc::clone(&auth),
                Arc::clone(&profiles),
                config.clone(),
            ),
            notifications: NotificationFanout::new(store, Arc::clone(&profiles)),
            profiles,
            config,
        }
    }
}
